use async_trait::async_trait;

use crate::error::Result;

pub mod consul;
pub use consul::ConsulStore;

/// One entry of a subtree listing.  Folder keys end in `/` and carry no value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: String,
    pub value: Option<Vec<u8>>,
}

impl KvPair {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    pub fn folder(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }
}

/// Result of a blocking listing: the pairs and the store's index for them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub pairs: Vec<KvPair>,
    pub index: u64,
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Blocks until the subtree index moves past `index` or the store's
    /// wait bound elapses, then returns the whole subtree.
    async fn list_since(&self, prefix: &str, index: u64) -> Result<Listing>;

    /// Point-in-time read of a subtree.
    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>>;
}

/// Key prefix holding the services of an instance.
pub fn services_prefix(instance_id: &str) -> String {
    format!("instances/{}/services/", instance_id)
}

/// Key prefix holding the configuration of one service.
pub fn service_prefix(instance_id: &str, service: &str) -> String {
    format!("instances/{}/services/{}/", instance_id, service)
}
