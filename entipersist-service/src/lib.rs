//! Persistence lifecycle for entipersist.
//!
//! [`PersistenceService`] keeps a live entity collection and a store in
//! step:
//! - on start, every stored entity is loaded and handed to the collection in
//!   one batch, without being written straight back
//! - once ready, collection updates and removals become store writes,
//!   serialized per key and concurrent across keys
//! - write failures never reach the collection; they are logged and
//!   published as [`PersistenceEvent`]s
//!
//! # Example
//!
//! ```no_run
//! use entipersist_service::{EntityCollection, PersistenceConfig, PersistenceService};
//! use std::sync::Arc;
//!
//! # async fn run() -> entipersist_service::ServiceResult<()> {
//! let notes = Arc::new(EntityCollection::<String>::new());
//! let service = PersistenceService::with_fs_json(
//!     PersistenceConfig::new("com.example.Note"),
//!     notes.clone(),
//! );
//! service.start().await?;
//!
//! notes.put("n1", "hello".to_string()).ok();
//! service.flush().await?;
//! # Ok(())
//! # }
//! ```

mod collection;
mod config;
mod error;
mod events;
mod queue;
mod service;

pub use collection::{CollectionError, EntityCollection, HasEntities};
pub use config::{DEFAULT_NAMESPACE, ENTITIES_SEGMENT, PersistenceConfig};
pub use error::{ServiceError, ServiceResult};
pub use events::{LifecycleState, PersistenceEvent, WriteKind};
pub use service::{DaoFactory, PersistenceService};
