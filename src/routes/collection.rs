//! Routes every resource collection shares: paginated list, single read and
//! the two-step delete.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use serde::Deserialize;

use crate::{
    authz::{self, Operation},
    error::ApiError,
    guard::{self, ConfirmationContext, DeletionOutcome},
    middleware::auth_context::AuthContext,
    models::AppState,
    pagination::{self, Page, PageParams, PageRequest},
    store::Resource,
};

#[derive(Debug, Deserialize)]
pub struct ConfirmParams {
    pub confirmation: Option<String>,
}

/// `GET {base}` and `GET {base}/{id}`.
pub fn read_routes<R: Resource>(router: Router<AppState>, base: &str) -> Router<AppState> {
    router
        .route(base, get(list::<R>))
        .route(&format!("{base}/{{id}}"), get(get_one::<R>))
}

/// `POST {base}/{id}/delete-confirmation` and `DELETE {base}/{id}`.
pub fn delete_routes<R: Resource>(router: Router<AppState>, base: &str) -> Router<AppState> {
    router
        .route(
            &format!("{base}/{{id}}/delete-confirmation"),
            post(request_delete::<R>),
        )
        .route(&format!("{base}/{{id}}"), axum::routing::delete(confirm_delete::<R>))
}

/// The full generic set for `base`.
pub fn routes<R: Resource>(base: &str) -> Router<AppState> {
    delete_routes::<R>(read_routes::<R>(Router::new(), base), base)
}

pub async fn list<R: Resource>(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<PageParams>,
) -> Result<Json<Page<R>>, ApiError> {
    let req = PageRequest::from_params(params, &state.paging)?;
    let page = pagination::paginate::<R>(&state, &auth, &req).await?;
    Ok(Json(page))
}

pub async fn get_one<R: Resource>(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i64>,
) -> Result<Json<R>, ApiError> {
    let record = state
        .stores
        .of::<R>()
        .get_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found(R::KIND))?;
    authz::authorize_record(&auth, Operation::Read, &record)?;
    tracing::debug!(kind = R::KIND.label(), id, "read");
    Ok(Json(record))
}

pub async fn request_delete<R: Resource>(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i64>,
) -> Result<Json<ConfirmationContext>, ApiError> {
    let ctx = guard::request_deletion::<R>(&state, &auth, id).await?;
    Ok(Json(ctx))
}

pub async fn confirm_delete<R: Resource>(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i64>,
    Query(params): Query<ConfirmParams>,
) -> Result<Json<DeletionOutcome>, ApiError> {
    let outcome =
        guard::confirm_deletion::<R>(&state, &auth, id, params.confirmation.as_deref()).await?;
    Ok(Json(outcome))
}
