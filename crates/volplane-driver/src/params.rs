use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use volplane_core::{Result, VolumeError};

/// Driver initialization parameters
///
/// A flat option-name to string map. Each backend validates its own keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriverParams(BTreeMap<String, String>);

impl DriverParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// A key that must be present and non-empty
    pub fn required(&self, key: &str) -> Result<&str> {
        match self.0.get(key).map(String::as_str) {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(VolumeError::invalid_config(
                format!("missing required driver option '{}'", key),
                format!("Add '{}' to the driver's init parameters", key),
            )),
        }
    }

    pub fn optional(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn optional_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.optional(key).unwrap_or(default)
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool> {
        match self.optional(key) {
            None => Ok(default),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => Ok(true),
                "false" | "no" | "0" | "off" => Ok(false),
                _ => Err(VolumeError::invalid_config(
                    format!("driver option '{}' is not a boolean: {}", key, raw),
                    "Use true or false",
                )),
            },
        }
    }

    /// Whole seconds, e.g. `mount_timeout_secs: "30"`
    pub fn duration_secs_or(&self, key: &str, default: Duration) -> Result<Duration> {
        match self.optional(key) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| {
                    VolumeError::invalid_config(
                        format!("driver option '{}' is not a number of seconds: {}", key, raw),
                        "Use a whole number of seconds, e.g. 30",
                    )
                }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DriverParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_names_missing_key() {
        let params = DriverParams::new().with("mount_root", "/mnt");
        let err = params.required("uri").unwrap_err();
        assert!(matches!(err, VolumeError::InvalidConfig { .. }));
        assert!(err.to_string().contains("uri"));

        let blank = DriverParams::new().with("uri", "  ");
        assert!(blank.required("uri").is_err());
    }

    #[test]
    fn test_typed_accessors() {
        let params: DriverParams = [
            ("uri", "10.0.0.5:/export"),
            ("unique_names", "yes"),
            ("mount_timeout_secs", "5"),
        ]
        .into_iter()
        .collect();

        assert_eq!(params.required("uri").unwrap(), "10.0.0.5:/export");
        assert_eq!(params.optional_or("fstype", "nfs"), "nfs");
        assert!(params.bool_or("unique_names", false).unwrap());
        assert!(!params.bool_or("absent", false).unwrap());
        assert_eq!(
            params
                .duration_secs_or("mount_timeout_secs", Duration::from_secs(30))
                .unwrap(),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_malformed_values_are_invalid_config() {
        let params = DriverParams::new()
            .with("unique_names", "maybe")
            .with("mount_timeout_secs", "soon");
        assert!(params.bool_or("unique_names", false).is_err());
        assert!(params
            .duration_secs_or("mount_timeout_secs", Duration::from_secs(30))
            .is_err());
    }

    #[test]
    fn test_deserializes_from_plain_map() {
        let params: DriverParams = serde_json::from_str(r#"{"uri":"host:/x"}"#).unwrap();
        assert_eq!(params.required("uri").unwrap(), "host:/x");
    }
}
