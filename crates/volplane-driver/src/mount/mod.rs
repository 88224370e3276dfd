mod mock;
mod system;

pub use mock::MockMounter;
pub use system::SystemMounter;

use async_trait::async_trait;
use volplane_core::Result;

/// A request to bind `source` at `target`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    /// Device path, directory or network export
    pub source: String,
    pub target: String,
    /// Filesystem type hint; `None` means a bind mount
    pub fs_type: Option<String>,
    /// Mount flags, passed through as `-o a,b,c`
    pub options: Vec<String>,
}

impl MountRequest {
    /// Bind `source` at `target`
    pub fn bind(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            fs_type: None,
            options: Vec::new(),
        }
    }

    /// Mount `source` at `target` as filesystem `fs_type`
    pub fn typed(
        source: impl Into<String>,
        target: impl Into<String>,
        fs_type: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            fs_type: Some(fs_type.into()),
            options: Vec::new(),
        }
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.extend(options.into_iter().map(Into::into));
        self
    }

    pub fn is_bind(&self) -> bool {
        self.fs_type.is_none()
    }
}

/// OS mount/unmount primitive consumed by backends
///
/// Failures surface the OS error as `IoFailure`.
#[async_trait]
pub trait Mounter: Send + Sync {
    async fn mount(&self, request: &MountRequest) -> Result<()>;

    async fn unmount(&self, target: &str) -> Result<()>;

    /// Whether something is currently mounted at `target`
    async fn is_mounted(&self, target: &str) -> Result<bool>;
}
