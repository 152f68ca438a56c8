//! Filesystem storage handler
//!
//! One file per key inside a single directory, named so that arbitrary keys
//! never escape it:
//!
//! - Short keys live in `<hex(key)>.rec` and the file holds the raw value.
//! - Keys whose hex form would exceed [`MAX_PLAIN_STEM`] live in
//!   `<sha256(key)>.lrec`. The file starts with a big-endian `u32` key length
//!   and the key itself, so `list_keys` can recover it, followed by the value.
//!
//! Writes go to a temporary file which is synced and then renamed over the
//! target, so readers never observe a torn record. `store_if_absent`
//! hard-links the synced temporary file into place; the link fails if the
//! target exists, which makes the insert a single atomic compare-and-set at
//! the filesystem level.

use async_trait::async_trait;
use keygate_core::effects::{StorageEffects, StorageError};
use keygate_core::hash::hash;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const RECORD_SUFFIX: &str = ".rec";
const HASHED_SUFFIX: &str = ".lrec";
const TEMP_MARKER: &str = ".tmp-";
const KEY_LEN_BYTES: usize = 4;

/// Longest hex file stem used verbatim. Leaves room for the temporary-file
/// suffix under the usual 255-byte name limit.
pub const MAX_PLAIN_STEM: usize = 200;

/// On-disk location of one key.
#[derive(Debug)]
struct RecordLocation {
    path: PathBuf,
    stem: String,
    /// The file carries the key in a header
    hashed: bool,
}

/// Durable storage rooted at a directory
#[derive(Debug)]
pub struct FilesystemStorageHandler {
    base_path: PathBuf,
    temp_counter: AtomicU64,
}

impl FilesystemStorageHandler {
    /// Open (and create if needed) a store rooted at `base_path`.
    pub async fn open(base_path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path)
            .await
            .map_err(|e| StorageError::ConfigurationError {
                reason: format!("cannot create {}: {e}", base_path.display()),
            })?;
        restrict_permissions(&base_path).await?;
        debug!(path = %base_path.display(), "opened filesystem storage");
        Ok(Self {
            base_path,
            temp_counter: AtomicU64::new(0),
        })
    }

    /// Directory holding the records.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn locate(&self, key: &str) -> RecordLocation {
        let plain = hex::encode(key.as_bytes());
        if plain.len() <= MAX_PLAIN_STEM {
            return RecordLocation {
                path: self.base_path.join(format!("{plain}{RECORD_SUFFIX}")),
                stem: plain,
                hashed: false,
            };
        }
        let stem = hash(key.as_bytes()).to_hex();
        RecordLocation {
            path: self.base_path.join(format!("{stem}{HASHED_SUFFIX}")),
            stem,
            hashed: true,
        }
    }

    fn temp_path(&self, location: &RecordLocation) -> PathBuf {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        self.base_path.join(format!(
            "{}{TEMP_MARKER}{}-{n}",
            location.stem,
            std::process::id()
        ))
    }

    async fn write_temp(
        &self,
        key: &str,
        location: &RecordLocation,
        value: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let temp = self.temp_path(location);
        let write_failed = |e: std::io::Error| StorageError::WriteFailed {
            key: key.to_string(),
            reason: e.to_string(),
        };
        let mut file = fs::File::create(&temp).await.map_err(write_failed)?;
        if location.hashed {
            let len = u32::try_from(key.len()).map_err(|_| StorageError::WriteFailed {
                key: key.to_string(),
                reason: "key too long".to_string(),
            })?;
            file.write_all(&len.to_be_bytes())
                .await
                .map_err(write_failed)?;
            file.write_all(key.as_bytes()).await.map_err(write_failed)?;
        }
        file.write_all(value).await.map_err(write_failed)?;
        file.sync_all().await.map_err(write_failed)?;
        Ok(temp)
    }

    async fn discard_temp(&self, temp: &Path) {
        // The temporary name is never read back; a leftover is only clutter.
        if let Err(e) = fs::remove_file(temp).await {
            debug!(path = %temp.display(), error = %e, "temporary record not removed");
        }
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .await
        .map_err(|e| StorageError::ConfigurationError {
            reason: format!("cannot restrict {}: {e}", path.display()),
        })
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<(), StorageError> {
    Ok(())
}

fn decode_key(file_name: &str) -> Option<String> {
    let encoded = file_name.strip_suffix(RECORD_SUFFIX)?;
    let bytes = hex::decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}

/// Split a hashed record into its key header and value.
fn split_hashed(bytes: &[u8]) -> Option<(&str, &[u8])> {
    let len_bytes: [u8; KEY_LEN_BYTES] = bytes.get(..KEY_LEN_BYTES)?.try_into().ok()?;
    let key_end = KEY_LEN_BYTES.checked_add(u32::from_be_bytes(len_bytes) as usize)?;
    let key = std::str::from_utf8(bytes.get(KEY_LEN_BYTES..key_end)?).ok()?;
    Some((key, bytes.get(key_end..)?))
}

#[async_trait]
impl StorageEffects for FilesystemStorageHandler {
    async fn store(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let location = self.locate(key);
        let temp = self.write_temp(key, &location, &value).await?;
        if let Err(e) = fs::rename(&temp, &location.path).await {
            self.discard_temp(&temp).await;
            return Err(StorageError::WriteFailed {
                key: key.to_string(),
                reason: e.to_string(),
            });
        }
        Ok(())
    }

    async fn store_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool, StorageError> {
        let location = self.locate(key);
        let temp = self.write_temp(key, &location, &value).await?;
        let linked = fs::hard_link(&temp, &location.path).await;
        self.discard_temp(&temp).await;
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(StorageError::WriteFailed {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let location = self.locate(key);
        let bytes = match fs::read(&location.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::ReadFailed {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            }
        };
        if !location.hashed {
            return Ok(Some(bytes));
        }
        match split_hashed(&bytes) {
            Some((stored_key, value)) if stored_key == key => Ok(Some(value.to_vec())),
            _ => Err(StorageError::ReadFailed {
                key: key.to_string(),
                reason: "record header does not match key".to_string(),
            }),
        }
    }

    async fn remove(&self, key: &str) -> Result<bool, StorageError> {
        match fs::remove_file(self.locate(key).path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::DeleteFailed {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let list_failed = |e: std::io::Error| StorageError::ListFailed {
            prefix: prefix.to_string(),
            reason: e.to_string(),
        };
        let mut entries = fs::read_dir(&self.base_path).await.map_err(list_failed)?;
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(list_failed)? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let key = if name.ends_with(HASHED_SUFFIX) {
                let bytes = match fs::read(entry.path()).await {
                    Ok(bytes) => bytes,
                    // Removed between listing and reading.
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => return Err(list_failed(e)),
                };
                match split_hashed(&bytes) {
                    Some((key, _)) => key.to_string(),
                    None => {
                        debug!(file = name, "skipping record with a malformed key header");
                        continue;
                    }
                }
            } else {
                match decode_key(name) {
                    Some(key) => key,
                    None => continue,
                }
            };
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}
