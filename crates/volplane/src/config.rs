use serde::Deserialize;
use std::path::{Path, PathBuf};
use volplane_driver::DriverParams;

fn default_data_file() -> PathBuf {
    PathBuf::from("./volplane.redb")
}

/// Process configuration loaded from YAML
///
/// ```yaml
/// data_file: /var/lib/volplane/state.redb
/// drivers:
///   - name: nfs
///     params:
///       uri: 10.0.0.5:/exports/volumes
///       mount_root: /var/lib/volplane/mnt
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// redb file holding every driver's volume records
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
    /// Drivers to initialize at startup, in order
    #[serde(default)]
    pub drivers: Vec<DriverConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DriverConfig {
    pub name: String,
    #[serde(default)]
    pub params: DriverParams,
}

impl Config {
    pub fn from_yaml(raw: &str) -> miette::Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| miette::miette!("Invalid configuration: {}", e))
    }

    pub fn load(path: &Path) -> miette::Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            miette::miette!("Failed to read configuration '{}': {}", path.display(), e)
        })?;
        Self::from_yaml(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_yaml(
            r#"
data_file: /var/lib/volplane/state.redb
drivers:
  - name: nfs
    params:
      uri: 10.0.0.5:/exports/volumes
      unique_names: "true"
"#,
        )
        .unwrap();

        assert_eq!(config.data_file, PathBuf::from("/var/lib/volplane/state.redb"));
        assert_eq!(config.drivers.len(), 1);
        assert_eq!(config.drivers[0].name, "nfs");
        assert_eq!(
            config.drivers[0].params.required("uri").unwrap(),
            "10.0.0.5:/exports/volumes"
        );
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.data_file, default_data_file());
        assert!(config.drivers.is_empty());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(Config::from_yaml("data_dir: /tmp").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("volplane.yaml");
        std::fs::write(&path, "drivers:\n  - name: nfs\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert!(config.drivers[0].params.optional("uri").is_none());
        assert!(Config::load(&dir.path().join("missing.yaml")).is_err());
    }
}
