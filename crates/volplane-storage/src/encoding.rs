use std::fmt;
use volplane_core::VolumeId;

/// Key encoder for volume record keys
///
/// Records live under `{prefix}/{volume_id}`; the prefix is chosen per
/// driver so backends sharing one store never collide.
pub struct KeyEncoder;

impl KeyEncoder {
    /// Encode a volume record key: {prefix}/{volume_id}
    pub fn encode_volume_key(prefix: &str, id: &VolumeId) -> String {
        format!("{}/{}", prefix, id)
    }

    /// Encode the prefix for scanning every record of a driver
    pub fn encode_prefix(prefix: &str) -> String {
        format!("{}/", prefix)
    }

    /// Parse a record key back to its volume ID
    pub fn parse_volume_key(prefix: &str, key: &str) -> Option<VolumeId> {
        key.strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|id| !id.is_empty() && !id.contains('/'))
            .map(VolumeId::from)
    }
}

/// Index key types for secondary indices
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexKey {
    /// Volumes sharing a locator name: {prefix}.index/name/{name}
    LocatorName { prefix: String, name: String },
}

impl IndexKey {
    pub fn locator_name(prefix: impl Into<String>, name: impl Into<String>) -> Self {
        IndexKey::LocatorName {
            prefix: prefix.into(),
            name: name.into(),
        }
    }

    /// Encode the index key to a string
    pub fn encode(&self) -> String {
        match self {
            IndexKey::LocatorName { prefix, name } => format!("{}.index/name/{}", prefix, name),
        }
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}
