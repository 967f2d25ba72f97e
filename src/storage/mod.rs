//! Resource storage behind the storage node.
//!
//! [`Storage`] is the seam the storage node's handlers call; the pipeline
//! ships [`MemoryStorage`], which keeps resources in insertion order.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::Error;

/// A stored value and the id assigned to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    /// Assigned on save.
    pub id: String,
    /// The stored value.
    pub value: String,
}

impl Resource {
    /// Creates a resource.
    pub fn new(id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
        }
    }
}

#[cfg(feature = "grpc")]
impl From<Resource> for crate::transport::proto::Resource {
    fn from(resource: Resource) -> Self {
        Self {
            id: resource.id,
            value: resource.value,
        }
    }
}

#[cfg(feature = "grpc")]
impl From<crate::transport::proto::Resource> for Resource {
    fn from(resource: crate::transport::proto::Resource) -> Self {
        Self {
            id: resource.id,
            value: resource.value,
        }
    }
}

/// Persistent resource store.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Stores `value` under a new id.
    async fn save(&self, value: &str) -> Result<Resource, Error>;

    /// Returns the resource with `id`, or a `NotFound` error.
    async fn get(&self, id: &str) -> Result<Resource, Error>;

    /// Returns every resource in insertion order.
    async fn list(&self) -> Result<Vec<Resource>, Error>;

    /// Removes the resource with `id`, or returns a `NotFound` error.
    async fn delete(&self, id: &str) -> Result<(), Error>;
}

/// An in-memory [`Storage`].
///
/// Clones share the same resources.
///
/// ## Example
///
/// ```rust
/// use tracemux::storage::{MemoryStorage, Storage};
///
/// # tokio_test::block_on(async {
/// let storage = MemoryStorage::new();
/// let saved = storage.save("x").await?;
/// assert_eq!(storage.get(&saved.id).await?.value, "x");
/// # Ok::<_, tracemux::Error>(())
/// # }).unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    resources: Arc<RwLock<Vec<Resource>>>,
}

impl MemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored resources.
    pub fn len(&self) -> usize {
        self.resources.read().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.resources.read().is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save(&self, value: &str) -> Result<Resource, Error> {
        let resource = Resource::new(uuid::Uuid::new_v4().to_string(), value);
        self.resources.write().push(resource.clone());
        Ok(resource)
    }

    async fn get(&self, id: &str) -> Result<Resource, Error> {
        self.resources
            .read()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("resource {id} not found")))
    }

    async fn list(&self) -> Result<Vec<Resource>, Error> {
        Ok(self.resources.read().clone())
    }

    async fn delete(&self, id: &str) -> Result<(), Error> {
        let mut resources = self.resources.write();
        match resources.iter().position(|r| r.id == id) {
            Some(index) => {
                resources.remove(index);
                Ok(())
            }
            None => Err(Error::not_found(format!("resource {id} not found"))),
        }
    }
}
