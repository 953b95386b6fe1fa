use serde::{Deserialize, Serialize};
use trove_types::ROOT_KEY;

/// Object pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Store key holding a pointer to the root object.
    pub root_key: String,
    /// Skip the `put` when an object's encoded record is byte-identical to
    /// the one last written or loaded.
    pub skip_unchanged_writes: bool,
    /// Mark objects dirty when their stored record had unknown entries or
    /// lacked declared fields, so the next flush rewrites them.
    pub resave_on_schema_drift: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            root_key: ROOT_KEY.to_string(),
            skip_unchanged_writes: true,
            resave_on_schema_drift: true,
        }
    }
}
