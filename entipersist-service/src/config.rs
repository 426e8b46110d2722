//! Service configuration and storage location derivation.
//!
//! By default a collection is stored under
//! `<cache_root>/<namespace>/entities/<entity_type>[/<extra parts>...]`, with
//! every segment below the cache root lower-cased. Setting `directory`
//! bypasses the derivation.

use crate::error::{ServiceError, ServiceResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Default product namespace segment.
pub const DEFAULT_NAMESPACE: &str = "entipersist";

/// Fixed segment between the namespace and the entity type.
pub const ENTITIES_SEGMENT: &str = "entities";

fn default_event_capacity() -> usize {
    256
}

/// Configuration for one persisted entity collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Name of the persisted entity type, e.g. `com.example.Note`.
    pub entity_type: String,
    /// Root cache directory. Defaults to the platform cache directory,
    /// then to the system temp directory.
    pub cache_root: Option<PathBuf>,
    /// Product namespace segment.
    pub namespace: String,
    /// Extra segments appended after the entity type.
    pub additional_path_parts: Vec<String>,
    /// Explicit storage directory; overrides the derived one.
    pub directory: Option<PathBuf>,
    /// Buffer size of the service event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            entity_type: String::new(),
            cache_root: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            additional_path_parts: Vec::new(),
            directory: None,
            event_capacity: default_event_capacity(),
        }
    }
}

impl PersistenceConfig {
    /// Configuration for `entity_type` with every other value defaulted.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            ..Default::default()
        }
    }

    pub fn with_cache_root(mut self, cache_root: impl Into<PathBuf>) -> Self {
        self.cache_root = Some(cache_root.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_additional_path_parts<I, P>(mut self, parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.additional_path_parts = parts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Parses a configuration from TOML. Missing keys take their defaults.
    pub fn from_toml_str(contents: &str) -> ServiceResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Reads a TOML configuration file.
    pub fn load_from(path: &Path) -> ServiceResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        info!(path = %path.display(), entity_type = %config.entity_type, "loaded persistence config");
        Ok(config)
    }

    /// The directory this collection is stored in.
    pub fn entity_directory(&self) -> ServiceResult<PathBuf> {
        if let Some(directory) = &self.directory {
            return Ok(directory.clone());
        }

        let root = self
            .cache_root
            .clone()
            .or_else(dirs::cache_dir)
            .unwrap_or_else(std::env::temp_dir);

        let mut path = root;
        path.push(segment("namespace", &self.namespace)?);
        path.push(ENTITIES_SEGMENT);
        path.push(segment("entity_type", &self.entity_type)?);
        for part in &self.additional_path_parts {
            path.push(segment("additional path part", part)?);
        }
        Ok(path)
    }
}

/// Validates one derived path segment and lower-cases it.
fn segment(name: &str, value: &str) -> ServiceResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::Config(format!("{name} must not be empty")));
    }
    if trimmed == "." || trimmed == ".." || trimmed.contains(['/', '\\']) {
        return Err(ServiceError::Config(format!(
            "{name} {value:?} is not a single path segment"
        )));
    }
    Ok(trimmed.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_lowercases() {
        assert_eq!(segment("t", "Com.Example.Note").unwrap(), "com.example.note");
    }

    #[test]
    fn segment_rejects_traversal() {
        assert!(segment("t", "..").is_err());
        assert!(segment("t", "a/b").is_err());
        assert!(segment("t", r"a\b").is_err());
        assert!(segment("t", "  ").is_err());
    }
}
