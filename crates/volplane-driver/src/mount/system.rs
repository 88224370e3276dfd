use crate::command::{exec, exec_unchecked};
use crate::mount::{MountRequest, Mounter};
use async_trait::async_trait;
use tracing::info;
use volplane_core::{Result, VolumeError};

/// Mounter backed by the host `mount` and `umount` commands
#[derive(Debug, Clone, Default)]
pub struct SystemMounter;

impl SystemMounter {
    pub fn new() -> Self {
        Self
    }

    /// Argument vector for `mount`
    fn mount_args(request: &MountRequest) -> Vec<String> {
        let mut options = request.options.clone();
        let mut args = Vec::new();

        match &request.fs_type {
            Some(fs_type) => {
                args.push("-t".to_string());
                args.push(fs_type.clone());
            }
            None => options.insert(0, "bind".to_string()),
        }

        if !options.is_empty() {
            args.push("-o".to_string());
            args.push(options.join(","));
        }

        args.push(request.source.clone());
        args.push(request.target.clone());
        args
    }
}

#[async_trait]
impl Mounter for SystemMounter {
    async fn mount(&self, request: &MountRequest) -> Result<()> {
        let args = Self::mount_args(request);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        exec("mount", &args).await?;
        info!(source = %request.source, path = %request.target, "Mounted");
        Ok(())
    }

    async fn unmount(&self, target: &str) -> Result<()> {
        exec("umount", &[target]).await?;
        info!(path = target, "Unmounted");
        Ok(())
    }

    async fn is_mounted(&self, target: &str) -> Result<bool> {
        // mountpoint(1): 0 is a mount point, 32 is not, anything else failed
        let output = exec_unchecked("mountpoint", &["-q", target]).await?;
        match output.exit_code {
            0 => Ok(true),
            32 => Ok(false),
            code => Err(VolumeError::io_failure(
                format!(
                    "mountpoint {} failed with exit code {}: {}",
                    target,
                    code,
                    output.stderr.trim()
                ),
                None,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_mount_args() {
        let request = MountRequest::typed("10.0.0.5:/export", "/mnt/abc", "nfs")
            .with_options(["vers=4", "soft"]);
        assert_eq!(
            SystemMounter::mount_args(&request),
            vec!["-t", "nfs", "-o", "vers=4,soft", "10.0.0.5:/export", "/mnt/abc"]
        );
    }

    #[test]
    fn test_bind_mount_args() {
        let request = MountRequest::bind("/mnt/abc/v1", "/var/lib/app");
        assert_eq!(
            SystemMounter::mount_args(&request),
            vec!["-o", "bind", "/mnt/abc/v1", "/var/lib/app"]
        );
    }
}
