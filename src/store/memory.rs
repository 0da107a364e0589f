use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    matches_search, CredentialStore, Listing, ListQuery, Resource, ResourceStore, SortOrder,
    StoreError,
};
use crate::models::{NewUser, User};

/// Ordered in-process collection; backs tests and `STORE_BACKEND=memory`.
pub struct MemoryStore<R: Resource> {
    rows: RwLock<BTreeMap<i64, R>>,
    next_id: AtomicI64,
}

impl<R: Resource> MemoryStore<R> {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl<R: Resource> Default for MemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R: Resource> ResourceStore<R> for MemoryStore<R> {
    async fn create(&self, draft: R::Draft) -> Result<R, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = R::with_id(id, draft);
        self.rows.write().await.insert(id, record.clone());
        Ok(record)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<R>, StoreError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn update(&self, record: &R) -> Result<Option<R>, StoreError> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&record.id()) {
            Some(slot) => {
                *slot = record.clone();
                Ok(Some(record.clone()))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.rows.write().await.remove(&id).is_some())
    }

    async fn list(&self, query: &ListQuery) -> Result<Listing<R>, StoreError> {
        let rows = self.rows.read().await;

        let filtered = rows.values().filter(|r| match query.owner {
            Some(owner) => r.owner_id() == Some(owner),
            None => true,
        });
        let mut matched: Vec<R> = match query.search.as_deref() {
            Some(needle) => filtered.filter(|r| matches_search(*r, needle)).cloned().collect(),
            None => filtered.cloned().collect(),
        };

        // BTreeMap iteration is already ascending by id.
        if R::KIND.default_order() == SortOrder::IdDesc {
            matched.reverse();
        }

        let total = matched.len() as u64;
        let items = match query.window {
            Some(w) => matched
                .into_iter()
                .skip(w.offset as usize)
                .take(w.limit as usize)
                .collect(),
            None => matched,
        };

        Ok(Listing { items, total })
    }
}

/// Accounts plus their password hashes.
#[derive(Default)]
pub struct MemoryUsers {
    users: MemoryStore<User>,
    hashes: RwLock<HashMap<i64, String>>,
}

impl MemoryUsers {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResourceStore<User> for MemoryUsers {
    async fn create(&self, draft: NewUser) -> Result<User, StoreError> {
        let hash = draft.password_hash.clone();
        let user = self.users.create(draft).await?;
        self.hashes.write().await.insert(user.user_id, hash);
        Ok(user)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        self.users.get_by_id(id).await
    }

    async fn update(&self, record: &User) -> Result<Option<User>, StoreError> {
        self.users.update(record).await
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        self.hashes.write().await.remove(&id);
        self.users.delete(id).await
    }

    async fn list(&self, query: &ListQuery) -> Result<Listing<User>, StoreError> {
        self.users.list(query).await
    }
}

#[async_trait]
impl CredentialStore for MemoryUsers {
    async fn password_hash(&self, user_id: i64) -> Result<Option<String>, StoreError> {
        Ok(self.hashes.read().await.get(&user_id).cloned())
    }

    async fn set_password_hash(&self, user_id: i64, hash: &str) -> Result<bool, StoreError> {
        if self.users.get_by_id(user_id).await?.is_none() {
            return Ok(false);
        }
        self.hashes.write().await.insert(user_id, hash.to_string());
        Ok(true)
    }
}
