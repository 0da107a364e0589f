//! Pagination engine shared by every resource kind.
//!
//! Contract:
//! - `totalPages = max(1, ceil(totalMatching / pageSize))`, so "Page 1 of 1"
//!   is always renderable.
//! - Ordering is the kind's stable default order; identical inputs over an
//!   unchanged collection give identical pages.
//! - A non-blank `query` switches to search mode: every match in one page,
//!   `number = 0` and `totalPages = 1`. Clients must treat this mode apart
//!   from normal paging.

use serde::{Deserialize, Serialize};

use crate::authz;
use crate::error::ApiError;
use crate::middleware::auth_context::AuthContext;
use crate::models::{AppState, PagingLimits};
use crate::store::{normalize_search, ListQuery, Resource, ResourceStore, Window};

/// Raw query-string parameters (`?page=0&pageSize=10&query=...`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageParams {
    pub page: Option<i64>,
    #[serde(alias = "size")]
    pub page_size: Option<i64>,
    pub query: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub page_size: i64,
    pub query: Option<String>,
}

impl PageRequest {
    pub fn new(page: i64, page_size: i64) -> Self {
        Self {
            page,
            page_size,
            query: None,
        }
    }

    pub fn search(query: &str) -> Self {
        Self {
            page: 0,
            page_size: 1,
            query: normalize_search(Some(query)),
        }
    }

    pub fn from_params(params: PageParams, limits: &PagingLimits) -> Result<Self, ApiError> {
        let req = Self {
            page: params.page.unwrap_or(0),
            page_size: params.page_size.unwrap_or(limits.default_page_size),
            query: normalize_search(params.query.as_deref()),
        };
        req.validate(limits)?;
        Ok(req)
    }

    pub fn validate(&self, limits: &PagingLimits) -> Result<(), ApiError> {
        if self.page < 0 {
            return Err(ApiError::invalid_argument("page must be >= 0"));
        }
        if self.page_size <= 0 {
            return Err(ApiError::invalid_argument("pageSize must be > 0"));
        }
        if self.page_size > limits.max_page_size {
            return Err(ApiError::invalid_argument(format!(
                "pageSize must be <= {}",
                limits.max_page_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListMode {
    Paged,
    Search,
}

/// One served page; serialises to `{content, number, size, totalPages, ...}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    /// Echo of the served page index.
    pub number: i64,
    pub size: i64,
    pub total_pages: i64,
    pub total_elements: i64,
    pub mode: ListMode,
}

pub fn total_pages(total: u64, page_size: i64) -> i64 {
    let size = page_size.max(1) as u64;
    total.div_ceil(size).max(1) as i64
}

/// Fetches one page from `store`, optionally restricted to one owner.
pub async fn fetch_page<R: Resource>(
    store: &dyn ResourceStore<R>,
    owner: Option<i64>,
    req: &PageRequest,
) -> Result<Page<R>, ApiError> {
    if req.page < 0 || req.page_size <= 0 {
        return Err(ApiError::invalid_argument(
            "page must be >= 0 and pageSize must be > 0",
        ));
    }

    if let Some(search) = req.query.clone() {
        let listing = store
            .list(&ListQuery {
                owner,
                search: Some(search),
                window: None,
            })
            .await?;
        let total = listing.items.len() as i64;
        return Ok(Page {
            content: listing.items,
            number: 0,
            size: total,
            total_pages: 1,
            total_elements: total,
            mode: ListMode::Search,
        });
    }

    let listing = store
        .list(&ListQuery {
            owner,
            search: None,
            window: Some(Window {
                offset: (req.page as u64).saturating_mul(req.page_size as u64),
                limit: req.page_size as u64,
            }),
        })
        .await?;

    Ok(Page {
        content: listing.items,
        number: req.page,
        size: req.page_size,
        total_pages: total_pages(listing.total, req.page_size),
        total_elements: listing.total as i64,
        mode: ListMode::Paged,
    })
}

/// Authorised list of any resource kind for the caller.
pub async fn paginate<R: Resource>(
    state: &AppState,
    auth: &AuthContext,
    req: &PageRequest,
) -> Result<Page<R>, ApiError> {
    let owner = authz::list_scope(auth, R::KIND)?;
    tracing::debug!(
        kind = R::KIND.label(),
        page = req.page,
        page_size = req.page_size,
        search = req.query.is_some(),
        "list"
    );
    fetch_page(state.stores.of::<R>().as_ref(), owner, req).await
}

/// Client-side browsing state for one paginated collection.
///
/// Holds the current page, page size and query, and learns `totalPages` from
/// each served page so navigation never leaves `[0, totalPages)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListCursor {
    page: i64,
    page_size: i64,
    query: Option<String>,
    total_pages: i64,
}

impl ListCursor {
    pub fn new(page_size: i64) -> Self {
        Self {
            page: 0,
            page_size: page_size.max(1),
            query: None,
            total_pages: 1,
        }
    }

    pub fn page(&self) -> i64 {
        self.page
    }

    pub fn page_size(&self) -> i64 {
        self.page_size
    }

    pub fn total_pages(&self) -> i64 {
        self.total_pages
    }

    pub fn in_search_mode(&self) -> bool {
        self.query.is_some()
    }

    /// A new page size invalidates the old offset, so browsing restarts at 0.
    pub fn set_page_size(&mut self, page_size: i64) {
        self.page_size = page_size.max(1);
        self.page = 0;
    }

    /// Blank input leaves search mode.
    pub fn search(&mut self, query: &str) {
        self.query = normalize_search(Some(query));
        self.page = 0;
    }

    pub fn observe<T>(&mut self, served: &Page<T>) {
        self.total_pages = served.total_pages.max(1);
        self.page = served.number.min(self.total_pages - 1);
    }

    pub fn next(&mut self) -> bool {
        if self.in_search_mode() || self.page + 1 >= self.total_pages {
            return false;
        }
        self.page += 1;
        true
    }

    pub fn prev(&mut self) -> bool {
        if self.in_search_mode() || self.page == 0 {
            return false;
        }
        self.page -= 1;
        true
    }

    pub fn request(&self) -> PageRequest {
        PageRequest {
            page: self.page,
            page_size: self.page_size,
            query: self.query.clone(),
        }
    }
}
