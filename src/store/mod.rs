//! Keyed resource collections.
//!
//! Every resource kind is reachable through the same five operations of
//! [`ResourceStore`]; pagination, the appointment lifecycle and the deletion
//! guard are built on nothing else.

pub mod memory;
pub mod pg;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{AnalysisRecord, Appointment, Doctor, Product, User};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("duplicate value: {0}")]
    Duplicate(String),
}

/// Unique-constraint violations become [`StoreError::Duplicate`].
pub(crate) fn classify(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Duplicate(db.constraint().unwrap_or("unique key").to_string())
        }
        _ => StoreError::Database(e),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceKind {
    User,
    Doctor,
    Product,
    Appointment,
    AnalysisRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    IdAsc,
    IdDesc,
}

impl ResourceKind {
    pub fn label(self) -> &'static str {
        match self {
            ResourceKind::User => "user",
            ResourceKind::Doctor => "doctor",
            ResourceKind::Product => "product",
            ResourceKind::Appointment => "appointment",
            ResourceKind::AnalysisRecord => "analysis record",
        }
    }

    /// Kinds whose records belong to one account.
    pub fn has_owners(self) -> bool {
        matches!(
            self,
            ResourceKind::User | ResourceKind::Appointment | ResourceKind::AnalysisRecord
        )
    }

    /// Stable listing order when the caller asks for none.
    pub fn default_order(self) -> SortOrder {
        match self {
            ResourceKind::Appointment | ResourceKind::AnalysisRecord => SortOrder::IdDesc,
            ResourceKind::User | ResourceKind::Doctor | ResourceKind::Product => SortOrder::IdAsc,
        }
    }
}

/// A server-owned record kind.
pub trait Resource: Clone + Send + Sync + Serialize + 'static {
    /// Fields supplied at creation; the store assigns the id.
    type Draft: Send + Sync + 'static;

    const KIND: ResourceKind;

    fn id(&self) -> i64;

    fn with_id(id: i64, draft: Self::Draft) -> Self;

    /// Account id that owns this record, if the kind has owners.
    fn owner_id(&self) -> Option<i64> {
        None
    }

    /// Lowercase-insensitive haystacks consulted by free-text search.
    fn search_fields(&self) -> Vec<&str>;

    fn display_label(&self) -> String;

    /// True once the owning account may no longer edit or delete the record.
    fn owner_locked(&self) -> bool {
        false
    }

    fn store(stores: &Stores) -> &Arc<dyn ResourceStore<Self>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub owner: Option<i64>,
    pub search: Option<String>,
    pub window: Option<Window>,
}

#[derive(Debug, Clone)]
pub struct Listing<R> {
    pub items: Vec<R>,
    /// Matches across all windows.
    pub total: u64,
}

#[async_trait]
pub trait ResourceStore<R: Resource>: Send + Sync {
    async fn create(&self, draft: R::Draft) -> Result<R, StoreError>;

    async fn get_by_id(&self, id: i64) -> Result<Option<R>, StoreError>;

    /// Replaces the stored record in one write. `None` when the id is gone.
    async fn update(&self, record: &R) -> Result<Option<R>, StoreError>;

    /// Idempotent; reports whether a row was actually removed.
    async fn delete(&self, id: i64) -> Result<bool, StoreError>;

    async fn list(&self, query: &ListQuery) -> Result<Listing<R>, StoreError>;
}

/// Stored password hashes, kept apart from the `User` record so that hashes
/// never travel with listings or responses.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Argon2 PHC string for the account; `None` when the account is gone.
    async fn password_hash(&self, user_id: i64) -> Result<Option<String>, StoreError>;

    /// Replaces the hash. `false` when the account is gone.
    async fn set_password_hash(&self, user_id: i64, hash: &str) -> Result<bool, StoreError>;
}

#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn ResourceStore<User>>,
    pub credentials: Arc<dyn CredentialStore>,
    pub doctors: Arc<dyn ResourceStore<Doctor>>,
    pub products: Arc<dyn ResourceStore<Product>>,
    pub appointments: Arc<dyn ResourceStore<Appointment>>,
    pub analyses: Arc<dyn ResourceStore<AnalysisRecord>>,
}

impl Stores {
    pub fn in_memory() -> Self {
        let users = Arc::new(memory::MemoryUsers::new());
        Self {
            users: users.clone(),
            credentials: users,
            doctors: Arc::new(memory::MemoryStore::<Doctor>::new()),
            products: Arc::new(memory::MemoryStore::<Product>::new()),
            appointments: Arc::new(memory::MemoryStore::<Appointment>::new()),
            analyses: Arc::new(memory::MemoryStore::<AnalysisRecord>::new()),
        }
    }

    pub fn postgres(pool: sqlx::PgPool) -> Self {
        let pg = Arc::new(pg::PgStore::new(pool));
        Self {
            users: pg.clone(),
            credentials: pg.clone(),
            doctors: pg.clone(),
            products: pg.clone(),
            appointments: pg.clone(),
            analyses: pg,
        }
    }

    pub fn of<R: Resource>(&self) -> &Arc<dyn ResourceStore<R>> {
        R::store(self)
    }
}

/// Case-insensitive substring match used by the in-memory backend; Postgres
/// uses `ILIKE` with the same semantics.
pub fn matches_search<R: Resource>(record: &R, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    record
        .search_fields()
        .iter()
        .any(|field| field.to_lowercase().contains(&needle))
}

/// Normalises a free-text query; blank input means "no search".
pub fn normalize_search(query: Option<&str>) -> Option<String> {
    query
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_string)
}
