//! Local filesystem tensor I/O
//!
//! Stores each checkpoint prefix as one file with atomic writes to prevent
//! partial/corrupt shards.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use saver_core::{Error, OperationHandle, Result, TensorValue};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{RestoreRequest, SaveEntry, TensorIo};

/// Magic bytes for shard files
const SHARD_MAGIC: [u8; 4] = *b"SHRD";

/// Shard file format version
const SHARD_VERSION: u32 = 1;

/// On-disk contents of one checkpoint prefix
#[derive(Debug, Serialize, Deserialize)]
struct ShardFile {
    /// Timestamp when the shard was written
    created_at: DateTime<Utc>,

    /// Named, sliced tensor records
    records: Vec<SaveEntry>,
}

/// Local filesystem implementation of [`TensorIo`]
///
/// Checkpoint prefixes are interpreted as filesystem paths. The `device`
/// arguments are recorded in logs only; all I/O runs on the host.
#[derive(Debug, Clone, Default)]
pub struct LocalTensorIo;

impl LocalTensorIo {
    pub fn new() -> Self {
        Self
    }

    /// Generate a unique temporary file path next to the destination
    fn temp_path(path: &Path) -> PathBuf {
        let temp_name = format!(
            ".{}.{}.tmp",
            path.file_name().unwrap_or_default().to_string_lossy(),
            Uuid::new_v4()
        );
        path.with_file_name(temp_name)
    }

    /// Atomically write a shard file (write to .tmp, sync, rename)
    async fn write_shard_file(path: &Path, shard: &ShardFile) -> Result<u64> {
        let body = bincode::serialize(shard).map_err(|e| Error::Serialization(e.to_string()))?;

        let mut buf = Vec::with_capacity(8 + body.len());
        buf.extend_from_slice(&SHARD_MAGIC);
        buf.extend_from_slice(&SHARD_VERSION.to_le_bytes());
        buf.extend_from_slice(&body);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Error::Storage {
                message: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let temp_path = Self::temp_path(path);
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| Error::Storage {
                message: format!("Failed to create temp file {:?}: {}", temp_path, e),
            })?;

        file.write_all(&buf).await.map_err(|e| Error::Storage {
            message: format!("Failed to write {:?}: {}", temp_path, e),
        })?;

        file.sync_all().await.map_err(|e| Error::Storage {
            message: format!("Failed to sync {:?}: {}", temp_path, e),
        })?;

        fs::rename(&temp_path, path).await.map_err(|e| Error::Storage {
            message: format!("Failed to rename {:?} to {:?}: {}", temp_path, path, e),
        })?;

        Ok(buf.len() as u64)
    }

    /// Read and decode a shard file
    async fn read_shard_file(path: &Path) -> Result<ShardFile> {
        let buf = match fs::read(path).await {
            Ok(buf) => buf,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::Storage {
                    message: format!("Checkpoint not found: {}", path.display()),
                })
            }
            Err(e) => {
                return Err(Error::Storage {
                    message: format!("Failed to read {}: {}", path.display(), e),
                })
            }
        };

        if buf.len() < 8 || buf[..4] != SHARD_MAGIC {
            return Err(Error::CheckpointCorrupted {
                path: path.display().to_string(),
                reason: "invalid shard magic".to_string(),
            });
        }

        let version = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if version != SHARD_VERSION {
            warn!(
                path = %path.display(),
                expected = SHARD_VERSION,
                got = version,
                "Shard version mismatch"
            );
        }

        bincode::deserialize(&buf[8..]).map_err(|e| Error::CheckpointCorrupted {
            path: path.display().to_string(),
            reason: format!("undecodable shard body: {}", e),
        })
    }

    /// Best-effort removal of a shard file and its emptied `_temp` parent
    async fn delete_shard(path: &Path) {
        if let Err(e) = fs::remove_file(path).await {
            warn!(path = %path.display(), error = %e, "Failed to delete shard file");
            return;
        }

        if let Some(parent) = path.parent() {
            let is_temp_dir = parent
                .file_name()
                .map(|n| n.to_string_lossy().ends_with("_temp"))
                .unwrap_or(false);
            if is_temp_dir {
                if let Err(e) = fs::remove_dir(parent).await {
                    debug!(dir = %parent.display(), error = %e, "Temp directory not removed");
                }
            }
        }
    }
}

#[async_trait]
impl TensorIo for LocalTensorIo {
    #[instrument(skip(self, entries), fields(backend = "local", num_entries = entries.len()))]
    async fn bulk_save(
        &self,
        device: &str,
        file_prefix: &str,
        entries: Vec<SaveEntry>,
    ) -> Result<OperationHandle> {
        let path = PathBuf::from(file_prefix);
        let shard = ShardFile {
            created_at: Utc::now(),
            records: entries,
        };

        let size = Self::write_shard_file(&path, &shard).await?;
        debug!(device, file_prefix, size_bytes = size, "Shard written");

        Ok(OperationHandle::new(format!("save/{file_prefix}")))
    }

    #[instrument(skip(self, requests), fields(backend = "local", num_requests = requests.len()))]
    async fn bulk_restore(
        &self,
        device: &str,
        file_prefix: &str,
        requests: Vec<RestoreRequest>,
    ) -> Result<Vec<TensorValue>> {
        let path = PathBuf::from(file_prefix);
        let shard = Self::read_shard_file(&path).await?;

        let mut index: HashMap<(&str, &str), &SaveEntry> = HashMap::new();
        for record in &shard.records {
            index.insert((record.name.as_str(), record.slice_spec.as_str()), record);
        }

        let mut restored = Vec::with_capacity(requests.len());
        for request in &requests {
            let record = index
                .get(&(request.name.as_str(), request.slice_spec.as_str()))
                .ok_or_else(|| Error::TensorNotFound {
                    prefix: file_prefix.to_string(),
                    name: request.name.clone(),
                    slice_spec: request.slice_spec.clone(),
                })?;

            if record.tensor.dtype != request.dtype {
                return Err(Error::CheckpointCorrupted {
                    path: file_prefix.to_string(),
                    reason: format!(
                        "dtype mismatch for {:?}: stored {:?}, requested {:?}",
                        request.name, record.tensor.dtype, request.dtype
                    ),
                });
            }

            // Restored values live on the device the read ran on.
            let mut tensor = record.tensor.clone();
            tensor.device = device.to_string();
            restored.push(tensor);
        }

        debug!(device, file_prefix, count = restored.len(), "Tensors restored");
        Ok(restored)
    }

    #[instrument(skip(self, shard_prefixes), fields(backend = "local", num_shards = shard_prefixes.len()))]
    async fn merge_shards(
        &self,
        device: &str,
        shard_prefixes: Vec<String>,
        final_prefix: &str,
        delete_old_dirs: bool,
    ) -> Result<OperationHandle> {
        let mut records = Vec::new();
        let mut seen: HashMap<(String, String), String> = HashMap::new();

        for prefix in &shard_prefixes {
            let shard = Self::read_shard_file(Path::new(prefix)).await?;
            for record in shard.records {
                let slot = (record.name.clone(), record.slice_spec.clone());
                if let Some(previous) = seen.insert(slot, prefix.clone()) {
                    return Err(Error::CheckpointCorrupted {
                        path: final_prefix.to_string(),
                        reason: format!(
                            "shards {} and {} both contain {:?} / {:?}",
                            previous, prefix, record.name, record.slice_spec
                        ),
                    });
                }
                records.push(record);
            }
        }

        let merged = ShardFile {
            created_at: Utc::now(),
            records,
        };
        let size = Self::write_shard_file(Path::new(final_prefix), &merged).await?;

        if delete_old_dirs {
            for prefix in &shard_prefixes {
                Self::delete_shard(Path::new(prefix)).await;
            }
        }

        info!(
            device,
            final_prefix,
            num_shards = shard_prefixes.len(),
            size_bytes = size,
            "Checkpoint merged"
        );
        Ok(OperationHandle::new(format!("merge/{final_prefix}")))
    }
}
