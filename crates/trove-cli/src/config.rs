use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use trove_pool::PoolConfig;
use trove_store::FileStoreConfig;

/// Settings read from `--config`, with flag overrides applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TroveConfig {
    pub pool: PoolConfig,
    pub store: FileStoreConfig,
}

impl TroveConfig {
    /// Load from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Load `path` if given, else defaults; then apply `--dir`.
    pub fn resolve(path: Option<&Path>, dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Some(dir) = dir {
            config.store.dir = dir;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_sections_and_defaults() {
        let config: TroveConfig = toml::from_str(
            r#"
            [pool]
            root_key = "main"

            [store]
            dir = "/var/lib/trove"
            "#,
        )
        .unwrap();
        assert_eq!(config.pool.root_key, "main");
        assert!(config.pool.skip_unchanged_writes);
        assert_eq!(config.store.dir, PathBuf::from("/var/lib/trove"));
        assert!(!config.store.sync_writes);
    }

    #[test]
    fn dir_flag_overrides_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "[store]\ndir = \"from-file\"\n").unwrap();
        let config =
            TroveConfig::resolve(Some(file.path()), Some(PathBuf::from("from-flag"))).unwrap();
        assert_eq!(config.store.dir, PathBuf::from("from-flag"));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(TroveConfig::from_file("/definitely/not/here.toml").is_err());
    }
}
