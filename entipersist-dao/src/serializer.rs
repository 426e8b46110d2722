//! Pluggable serialization of stored records.
//!
//! A record goes through two steps on its way to storage: the entity payload
//! `D` is converted into its serialized type `S` by a [`Converter`], then a
//! [`Serializer`] turns `S` into bytes. Loading runs the steps in reverse and
//! checks the decoded `S` against a [`Validation`] predicate before trusting
//! it. When `S == D` the [`IdentityConverter`] skips the first step.

use crate::error::{StorageError, StorageResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

/// Turns serialized records into bytes and back.
pub trait Serializer<S>: Send + Sync {
    fn serialize(&self, value: &S) -> StorageResult<Vec<u8>>;

    fn deserialize(&self, bytes: &[u8]) -> StorageResult<S>;
}

/// Produces a [`Serializer`] for each read or write.
pub trait SerializerFactory<S>: Send + Sync {
    fn create(&self) -> Box<dyn Serializer<S>>;

    /// File extension (without the dot) for records written by this format.
    fn extension(&self) -> &str;
}

/// Predicate deciding whether a decoded record can be trusted.
pub type Validation<S> = Arc<dyn Fn(&S) -> bool + Send + Sync>;

/// Converts between an entity payload and its serialized representation.
///
/// Errors are plain messages; they end up in [`StorageError::Conversion`].
pub trait Converter<D, S>: Send + Sync {
    fn to_serial(&self, data: &D) -> Result<S, String>;

    fn from_serial(&self, serial: S) -> Result<D, String>;
}

/// Converter for payloads that are stored as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityConverter;

impl<D: Clone + Send + Sync> Converter<D, D> for IdentityConverter {
    fn to_serial(&self, data: &D) -> Result<D, String> {
        Ok(data.clone())
    }

    fn from_serial(&self, serial: D) -> Result<D, String> {
        Ok(serial)
    }
}

/// JSON serializer factory, the default record format.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializerFactory {
    pretty: bool,
}

impl JsonSerializerFactory {
    /// Compact JSON.
    pub fn new() -> Self {
        Self { pretty: false }
    }

    /// Indented JSON, easier to inspect on disk.
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl<S> SerializerFactory<S> for JsonSerializerFactory
where
    S: Serialize + DeserializeOwned + 'static,
{
    fn create(&self) -> Box<dyn Serializer<S>> {
        Box::new(JsonSerializer {
            pretty: self.pretty,
            _marker: PhantomData,
        })
    }

    fn extension(&self) -> &str {
        "json"
    }
}

struct JsonSerializer<S> {
    pretty: bool,
    _marker: PhantomData<fn() -> S>,
}

impl<S> Serializer<S> for JsonSerializer<S>
where
    S: Serialize + DeserializeOwned,
{
    fn serialize(&self, value: &S) -> StorageResult<Vec<u8>> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(value)?
        } else {
            serde_json::to_vec(value)?
        };
        Ok(bytes)
    }

    fn deserialize(&self, bytes: &[u8]) -> StorageResult<S> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Everything a store needs to encode and decode one record.
pub(crate) struct RecordCodec<D, S> {
    factory: Arc<dyn SerializerFactory<S>>,
    validation: Option<Validation<S>>,
    converter: Arc<dyn Converter<D, S>>,
}

impl<D, S> Clone for RecordCodec<D, S> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            validation: self.validation.clone(),
            converter: self.converter.clone(),
        }
    }
}

impl<D, S> RecordCodec<D, S> {
    pub(crate) fn new(
        factory: Arc<dyn SerializerFactory<S>>,
        converter: Arc<dyn Converter<D, S>>,
    ) -> Self {
        Self {
            factory,
            validation: None,
            converter,
        }
    }

    pub(crate) fn set_factory(&mut self, factory: Arc<dyn SerializerFactory<S>>) {
        self.factory = factory;
    }

    pub(crate) fn set_validation(&mut self, validation: Validation<S>) {
        self.validation = Some(validation);
    }

    pub(crate) fn set_converter(&mut self, converter: Arc<dyn Converter<D, S>>) {
        self.converter = converter;
    }

    pub(crate) fn extension(&self) -> &str {
        self.factory.extension()
    }

    pub(crate) fn encode(&self, data: &D) -> StorageResult<Vec<u8>> {
        let serial = self
            .converter
            .to_serial(data)
            .map_err(StorageError::Conversion)?;
        self.factory.create().serialize(&serial)
    }

    pub(crate) fn decode(&self, bytes: &[u8]) -> StorageResult<D> {
        let serial = self.factory.create().deserialize(bytes)?;
        if let Some(is_valid) = &self.validation {
            if !is_valid(&serial) {
                return Err(StorageError::InvalidRecord(
                    "rejected by validation".to_string(),
                ));
            }
        }
        self.converter
            .from_serial(serial)
            .map_err(StorageError::Conversion)
    }
}

impl<D> RecordCodec<D, D>
where
    D: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// JSON records holding the payload itself.
    pub(crate) fn json() -> Self {
        Self::new(Arc::new(JsonSerializerFactory::new()), Arc::new(IdentityConverter))
    }
}
