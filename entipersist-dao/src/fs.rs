//! File-system store: one file per entity in a single directory.
//!
//! Each record is written to `<encoded key>.<extension>`, where the key is
//! percent-encoded so any key maps to exactly one portable file name. ASCII
//! upper-case letters are escaped as well, so keys differing only in case
//! stay distinct on case-insensitive file systems. Keys whose file name would
//! exceed [`MAX_FILE_NAME_BYTES`] are rejected with
//! [`StorageError::InvalidKey`]. Writes
//! go to a hidden temp file first and are renamed into place, so a record on
//! disk is always either the previous version or the new one, never a mix.

use crate::dao::{EntityPersistenceDao, LoadReport, SkippedRecord};
use crate::error::{StorageError, StorageResult};
use crate::locks::KeyLocks;
use crate::serializer::{Converter, RecordCodec, SerializerFactory, Validation};
use async_trait::async_trait;
use entipersist_types::{
    validate_key, Entity, PersistenceInfo, ResolveResult, ResolveSucceeded,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

const TEMP_SUFFIX: &str = "tmp";

/// Longest record file name accepted, in bytes (`NAME_MAX` on common file
/// systems).
pub const MAX_FILE_NAME_BYTES: usize = 255;

/// Directory-backed [`EntityPersistenceDao`].
pub struct FsDirectoryPersistence<D, S = D> {
    directory: PathBuf,
    codec: RecordCodec<D, S>,
    locks: KeyLocks,
}

impl<D> FsDirectoryPersistence<D, D>
where
    D: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Creates a store writing payloads as JSON into `directory`.
    ///
    /// The directory is created on the first write; a missing directory
    /// loads as empty.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            codec: RecordCodec::json(),
            locks: KeyLocks::default(),
        }
    }
}

impl<D, S> FsDirectoryPersistence<D, S>
where
    D: Send + Sync + 'static,
    S: Send + Sync + 'static,
{
    /// Creates a store whose records are `S`, converted from payloads `D`.
    pub fn with_converter(
        directory: impl Into<PathBuf>,
        serializer_factory: Arc<dyn SerializerFactory<S>>,
        converter: Arc<dyn Converter<D, S>>,
    ) -> Self {
        Self {
            directory: directory.into(),
            codec: RecordCodec::new(serializer_factory, converter),
            locks: KeyLocks::default(),
        }
    }

    /// Sets the record format and the validation predicate in one step.
    pub fn configure(
        self,
        serializer_factory: Arc<dyn SerializerFactory<S>>,
        validation: Validation<S>,
    ) -> Self {
        self.set_serializer_factory(serializer_factory)
            .set_validation(validation)
    }

    /// Sets the record format.
    pub fn set_serializer_factory(mut self, serializer_factory: Arc<dyn SerializerFactory<S>>) -> Self {
        self.codec.set_factory(serializer_factory);
        self
    }

    /// Sets the predicate records must pass to be loaded.
    pub fn set_validation(mut self, validation: Validation<S>) -> Self {
        self.codec.set_validation(validation);
        self
    }

    /// Sets the payload conversion.
    pub fn set_converter(mut self, converter: Arc<dyn Converter<D, S>>) -> Self {
        self.codec.set_converter(converter);
        self
    }

    /// The directory records are stored in.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the record file for `key`.
    pub fn record_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.directory.join(self.file_name(key)?))
    }

    fn file_name(&self, key: &str) -> StorageResult<String> {
        let name = format!("{}.{}", encode_key(key), self.codec.extension());
        if name.len() > MAX_FILE_NAME_BYTES {
            return Err(StorageError::InvalidKey(format!(
                "key {key:?} encodes to a {}-byte file name (limit {MAX_FILE_NAME_BYTES})",
                name.len()
            )));
        }
        Ok(name)
    }

    /// Maps a directory entry back to its key. `None` for anything that is
    /// not a record of this store (hidden files, temp files, other formats).
    fn key_for_file(&self, file_name: &str) -> Option<Result<String, String>> {
        if file_name.starts_with('.') {
            return None;
        }
        let stem = file_name
            .strip_suffix(self.codec.extension())
            .and_then(|s| s.strip_suffix('.'))?;
        Some(decode_key(stem))
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> StorageResult<()> {
        fs::create_dir_all(&self.directory).await?;

        let tmp = self
            .directory
            .join(format!(".{}.{TEMP_SUFFIX}", Uuid::new_v4().simple()));

        if let Err(e) = fs::write(&tmp, bytes).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl<D, S> EntityPersistenceDao<D> for FsDirectoryPersistence<D, S>
where
    D: Send + Sync + 'static,
    S: Send + Sync + 'static,
{
    async fn load_stored(&self) -> StorageResult<LoadReport<D>> {
        let mut report = LoadReport::default();

        let mut read_dir = match fs::read_dir(&self.directory).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(directory = %self.directory.display(), "no stored entities yet");
                return Ok(report);
            }
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            let file_name = entry.file_name().to_string_lossy().into_owned();

            let key = match self.key_for_file(&file_name) {
                None => continue,
                Some(Ok(key)) => key,
                Some(Err(reason)) => {
                    warn!(path = %path.display(), %reason, "skipping record with undecodable name");
                    report.skipped.push(SkippedRecord {
                        location: path.display().to_string(),
                        reason,
                    });
                    continue;
                }
            };

            match entry.file_type().await {
                Ok(file_type) if file_type.is_dir() => continue,
                Ok(_) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable record");
                    report.skipped.push(SkippedRecord {
                        location: path.display().to_string(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            }

            let decoded = match fs::read(&path).await {
                Ok(bytes) => self.codec.decode(&bytes),
                Err(e) => Err(StorageError::from(e)),
            };

            match decoded {
                Ok(data) => report.loaded.push(ResolveSucceeded::new(key, data)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping invalid record");
                    report.skipped.push(SkippedRecord {
                        location: path.display().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        report.loaded.sort_by(|a, b| a.key.cmp(&b.key));

        info!(
            directory = %self.directory.display(),
            loaded = report.loaded.len(),
            skipped = report.skipped.len(),
            "loaded stored entities"
        );
        Ok(report)
    }

    async fn resolve(&self, key: &str) -> StorageResult<ResolveResult<D>> {
        let path = self.record_path(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(ResolveResult::Found(self.codec.decode(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(ResolveResult::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, entity: &Entity<D>, key: &str) -> StorageResult<()> {
        let path = self.record_path(key)?;
        let data = entity
            .data
            .as_ref()
            .ok_or_else(|| StorageError::MissingData(key.to_string()))?;
        let bytes = self.codec.encode(data)?;

        let _guard = self.locks.lock(key).await;
        self.write_atomic(&path, &bytes).await?;

        debug!(key, bytes = bytes.len(), path = %path.display(), "stored entity");
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let path = self.record_path(key)?;

        let _guard = self.locks.lock(key).await;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key, path = %path.display(), "removed stored entity");
                Ok(())
            }
            // Nothing stored under this key - that's fine for remove
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persistence_info(&self, key: &str) -> StorageResult<PersistenceInfo> {
        let path = self.record_path(key)?;
        Ok(PersistenceInfo {
            key: key.to_string(),
            is_stored: fs::try_exists(&path).await?,
        })
    }
}

/// Percent-encodes a key into a file stem. A leading dot and ASCII
/// upper-case letters are escaped too, so records never look like hidden
/// files and two keys never differ only in letter case on disk.
fn encode_key(key: &str) -> String {
    let encoded = urlencoding::encode(key);
    let mut stem = String::with_capacity(encoded.len());
    // Hex digits still to copy from the current `%XX` escape.
    let mut escape_digits = 0;

    for (i, c) in encoded.char_indices() {
        if escape_digits > 0 {
            escape_digits -= 1;
            stem.push(c);
            continue;
        }
        match c {
            '%' => {
                escape_digits = 2;
                stem.push(c);
            }
            '.' if i == 0 => stem.push_str("%2E"),
            c if c.is_ascii_uppercase() => stem.push_str(&format!("%{:02X}", c as u8)),
            c => stem.push(c),
        }
    }
    stem
}

fn decode_key(stem: &str) -> Result<String, String> {
    let key = urlencoding::decode(stem)
        .map_err(|e| format!("file name {stem:?} is not a valid encoded key: {e}"))?
        .into_owned();
    validate_key(&key).map_err(|e| e.to_string())?;
    Ok(key)
}
