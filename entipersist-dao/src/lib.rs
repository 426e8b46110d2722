//! Persistence access layer for entipersist.
//!
//! Mediates between typed entity payloads and their durable representation.
//!
//! # Architecture
//!
//! - [`EntityPersistenceDao`] is the storage-agnostic contract: bulk load,
//!   single-key resolve, store, remove
//! - Serialization is pluggable ([`SerializerFactory`], [`Converter`]) and
//!   records are checked by a [`Validation`] predicate before being loaded
//! - [`FsDirectoryPersistence`] keeps one file per entity in a directory,
//!   written atomically; [`MemoryPersistence`] keeps records in memory
//! - Corrupt records are skipped during a bulk load, never fatal to it
//!
//! # Example
//!
//! ```no_run
//! use entipersist_dao::{EntityPersistenceDao, FsDirectoryPersistence};
//! use entipersist_types::Entity;
//!
//! # async fn run() -> entipersist_dao::StorageResult<()> {
//! let store: FsDirectoryPersistence<String> = FsDirectoryPersistence::new("/tmp/notes");
//! store.store(&Entity::resolved("n1", "hello".to_string()), "n1").await?;
//!
//! let report = store.load_stored().await?;
//! assert_eq!(report.loaded.len(), 1);
//! # Ok(())
//! # }
//! ```

mod dao;
mod error;
pub mod fs;
mod locks;
pub mod memory;
mod request;
pub mod serializer;

pub use dao::{EntityPersistenceDao, LoadReport, SkippedRecord};
pub use error::{StorageError, StorageResult};
pub use fs::FsDirectoryPersistence;
pub use memory::{MemoryBackend, MemoryPersistence};
pub use request::{ResolveCallback, ResolveRequest};
pub use serializer::{
    Converter, IdentityConverter, JsonSerializerFactory, Serializer, SerializerFactory,
    Validation,
};
