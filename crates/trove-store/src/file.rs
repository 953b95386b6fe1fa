use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::traits::KvStore;

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

/// Prefix of in-progress write files. Keys may not start with a dot, so
/// these never collide with stored values.
const TEMP_PREFIX: &str = ".tmp-";

/// Configuration for a [`FileKvStore`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FileStoreConfig {
    /// Directory holding one file per key.
    pub dir: PathBuf,
    /// `fsync` every value before it is renamed into place.
    pub sync_writes: bool,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("trove-data"),
            sync_writes: false,
        }
    }
}

/// Directory-backed key/value store.
///
/// Each key is one file named after the key. On-disk format:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload]
/// ```
/// Writes go to a temporary file that is renamed over the target, so a
/// crash leaves either the old value or the new one. Leftover temporary
/// files are removed when the store is opened.
pub struct FileKvStore {
    dir: PathBuf,
    sync_writes: bool,
    next_temp: AtomicU64,
}

impl FileKvStore {
    /// Open (or create) a store in the configured directory.
    pub async fn open(config: FileStoreConfig) -> StoreResult<Self> {
        fs::create_dir_all(&config.dir).await?;

        let mut removed = 0usize;
        let mut dir = fs::read_dir(&config.dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(TEMP_PREFIX) {
                fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            warn!(removed, dir = %config.dir.display(), "removed interrupted writes");
        }

        debug!(dir = %config.dir.display(), sync = config.sync_writes, "file store opened");
        Ok(Self {
            dir: config.dir,
            sync_writes: config.sync_writes,
            next_temp: AtomicU64::new(0),
        })
    }

    /// Open a store at `dir` with default settings.
    pub async fn open_dir(dir: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open(FileStoreConfig {
            dir: dir.as_ref().to_path_buf(),
            ..FileStoreConfig::default()
        })
        .await
    }

    /// The directory backing this store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> StoreResult<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(key))
    }
}

/// Keys become file names: `[A-Za-z0-9._-]`, non-empty, no leading dot.
fn validate_key(key: &str) -> StoreResult<()> {
    let reason = if key.is_empty() {
        Some("empty key")
    } else if key.starts_with('.') {
        Some("key may not start with '.'")
    } else if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        Some("key may only contain [A-Za-z0-9._-]")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(StoreError::InvalidKey {
            key: key.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

fn frame(key: &str, payload: &[u8]) -> StoreResult<Bytes> {
    let length = u32::try_from(payload.len()).map_err(|_| StoreError::Rejected {
        op: "put",
        key: key.to_string(),
        reason: format!("value of {} bytes exceeds the 4 GiB frame limit", payload.len()),
    })?;
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u32_le(length);
    buf.put_u32_le(crc32fast::hash(payload));
    buf.put_slice(payload);
    Ok(buf.freeze())
}

fn unframe(key: &str, raw: Vec<u8>) -> StoreResult<Bytes> {
    let corrupt = |reason: String| StoreError::Corrupt {
        key: key.to_string(),
        reason,
    };
    if raw.len() < HEADER_SIZE {
        return Err(corrupt(format!("truncated header ({} bytes)", raw.len())));
    }
    let length = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
    let expected_crc = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
    let mut raw = Bytes::from(raw);
    let payload = raw.split_off(HEADER_SIZE);
    if payload.len() != length {
        return Err(corrupt(format!(
            "length field says {length} bytes, found {}",
            payload.len()
        )));
    }
    let actual_crc = crc32fast::hash(&payload);
    if actual_crc != expected_crc {
        return Err(corrupt(format!(
            "CRC mismatch: expected {expected_crc:#010x}, got {actual_crc:#010x}"
        )));
    }
    Ok(payload)
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(raw) => unframe(key, raw).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, value: Bytes) -> StoreResult<()> {
        let path = self.path_for(key)?;
        let framed = frame(key, &value)?;

        let seq = self.next_temp.fetch_add(1, Ordering::Relaxed);
        let temp = self.dir.join(format!("{TEMP_PREFIX}{key}-{seq}"));
        let mut file = fs::File::create(&temp).await?;
        file.write_all(&framed).await?;
        if self.sync_writes {
            file.sync_all().await?;
        } else {
            file.flush().await?;
        }
        drop(file);
        fs::rename(&temp, &path).await?;

        debug!(key, len = value.len(), "file store put");
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn all_keys(&self) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut dir = fs::read_dir(&self.dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if validate_key(&name).is_ok() {
                keys.push(name);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn contains(&self, key: &str) -> StoreResult<bool> {
        let path = self.path_for(key)?;
        Ok(fs::try_exists(&path).await?)
    }
}

impl std::fmt::Debug for FileKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKvStore")
            .field("dir", &self.dir)
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> (tempfile::TempDir, FileKvStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKvStore::open_dir(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn put_and_get() {
        let (_dir, store) = temp_store().await;
        store.put("abc", Bytes::from_static(b"{\"type\":\"Note\"}")).await.unwrap();

        let value = store.get("abc").await.unwrap().expect("should exist");
        assert_eq!(&value[..], b"{\"type\":\"Note\"}");
    }

    #[tokio::test]
    async fn missing_key_returns_none() {
        let (_dir, store) = temp_store().await;
        assert!(store.get("nope").await.unwrap().is_none());
        assert!(!store.contains("nope").await.unwrap());
    }

    #[tokio::test]
    async fn put_replaces_and_leaves_no_temp_files() {
        let (dir, store) = temp_store().await;
        store.put("k", Bytes::from_static(b"one")).await.unwrap();
        store.put("k", Bytes::from_static(b"two")).await.unwrap();

        assert_eq!(&store.get("k").await.unwrap().unwrap()[..], b"two");
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn delete_present_and_missing() {
        let (_dir, store) = temp_store().await;
        store.put("k", Bytes::from_static(b"v")).await.unwrap();
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn all_keys_sorted_and_skips_temp_files() {
        let (dir, store) = temp_store().await;
        store.put("b", Bytes::from_static(b"1")).await.unwrap();
        store.put("a", Bytes::from_static(b"2")).await.unwrap();
        std::fs::write(dir.path().join(".tmp-c-0"), b"partial").unwrap();

        assert_eq!(store.all_keys().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn reopen_removes_interrupted_writes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".tmp-x-3"), b"partial").unwrap();

        let _store = FileKvStore::open_dir(dir.path()).await.unwrap();
        assert!(!dir.path().join(".tmp-x-3").exists());
    }

    #[tokio::test]
    async fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileKvStore::open(FileStoreConfig {
                dir: dir.path().to_path_buf(),
                sync_writes: true,
            })
            .await
            .unwrap();
            store.put("root", Bytes::from_static(b"{\"*\":\"p1\"}")).await.unwrap();
        }
        let store = FileKvStore::open_dir(dir.path()).await.unwrap();
        assert_eq!(
            &store.get("root").await.unwrap().unwrap()[..],
            b"{\"*\":\"p1\"}"
        );
    }

    #[tokio::test]
    async fn flipped_byte_is_detected() {
        let (dir, store) = temp_store().await;
        store.put("k", Bytes::from_static(b"payload")).await.unwrap();

        let path = dir.path().join("k");
        let mut raw = std::fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        std::fs::write(&path, raw).unwrap();

        let err = store.get("k").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn truncated_file_is_detected() {
        let (dir, store) = temp_store().await;
        std::fs::write(dir.path().join("k"), b"abc").unwrap();
        let err = store.get("k").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn invalid_keys_are_rejected() {
        let (_dir, store) = temp_store().await;
        for key in ["", ".hidden", "a/b", "../escape"] {
            let err = store.put(key, Bytes::from_static(b"v")).await.unwrap_err();
            assert!(matches!(err, StoreError::InvalidKey { .. }), "{key}");
        }
    }

    #[test]
    fn default_config() {
        let config = FileStoreConfig::default();
        assert_eq!(config.dir, PathBuf::from("trove-data"));
        assert!(!config.sync_writes);
    }
}
