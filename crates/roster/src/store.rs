//! Member store: lookup, list, and atomic read-modify-write per address.

use crate::address::Address;
use crate::member::Member;
use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Computes the new record for an address from the current one (if any).
pub type Upsert = Box<dyn FnOnce(Option<&Member>) -> Member + Send>;

/// Storage contract used by the reconciler and the local registration path.
///
/// `upsert` must apply `f` atomically with respect to any other `upsert` on the same address.
#[async_trait]
pub trait MemberStore: Send + Sync {
    async fn get(&self, address: &Address) -> Result<Option<Member>, StoreError>;

    /// All members ordered by address.
    async fn list(&self) -> Result<Vec<Member>, StoreError>;

    async fn upsert(&self, address: &Address, f: Upsert) -> Result<Member, StoreError>;
}

/// Process-lifetime store backed by an ordered map.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    members: RwLock<BTreeMap<Address, Member>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemberStore for InMemoryStore {
    async fn get(&self, address: &Address) -> Result<Option<Member>, StoreError> {
        Ok(self.members.read().await.get(address).cloned())
    }

    async fn list(&self) -> Result<Vec<Member>, StoreError> {
        Ok(self.members.read().await.values().cloned().collect())
    }

    async fn upsert(&self, address: &Address, f: Upsert) -> Result<Member, StoreError> {
        // Write lock held across read and write.
        let mut guard = self.members.write().await;
        let next = f(guard.get(address));
        guard.insert(*address, next.clone());
        Ok(next)
    }
}
