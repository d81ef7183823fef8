//! Content-addressed push/pull storage for serialized index units.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Mutex;

use opentelemetry::KeyValue;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};
use crate::progress::lock;
use crate::telemetry::metrics;

/// A store that hands back an identifier for every unit pushed to it.
pub trait Archive: Send + Sync + 'static {
    type Id: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;

    fn push(&self, data: Vec<u8>) -> Result<Self::Id>;

    fn pull(&self, id: &Self::Id) -> Result<Vec<u8>>;

    /// Serialize `value` as JSON and push it.
    fn push_value<V: Serialize>(&self, value: &V) -> Result<Self::Id>
    where
        Self: Sized,
    {
        self.push(serde_json::to_vec(value)?)
    }

    /// Pull a unit and deserialize it from JSON.
    fn pull_value<V: DeserializeOwned>(&self, id: &Self::Id) -> Result<V>
    where
        Self: Sized,
    {
        Ok(serde_json::from_slice(&self.pull(id)?)?)
    }
}

/// SHA-256 digest of a unit's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId([u8; 32]);

impl ContentId {
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// In-memory content-addressed archive.
///
/// Pushing the same bytes twice yields the same id and stores them once.
#[derive(Debug, Default)]
pub struct MemoryArchive {
    units: Mutex<HashMap<ContentId, Vec<u8>>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct units stored.
    pub fn len(&self) -> usize {
        lock(&self.units).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Archive for MemoryArchive {
    type Id = ContentId;

    fn push(&self, data: Vec<u8>) -> Result<ContentId> {
        let id = ContentId::of(&data);
        debug!(%id, bytes = data.len(), "push");
        lock(&self.units).entry(id).or_insert(data);
        metrics::archive_operations().add(1, &[KeyValue::new("operation", "push")]);
        Ok(id)
    }

    fn pull(&self, id: &ContentId) -> Result<Vec<u8>> {
        let data = lock(&self.units)
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Archive(format!("no unit stored under {id}")))?;
        if ContentId::of(&data) != *id {
            return Err(Error::Archive(format!("unit {id} failed its digest check")));
        }
        metrics::archive_operations().add(1, &[KeyValue::new("operation", "pull")]);
        Ok(data)
    }
}
