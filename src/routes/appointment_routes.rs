// src/routes/appointment_routes.rs

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, patch, post},
};

use crate::{
    error::ApiError,
    lifecycle::{self, AppointmentUpdateRequest, BookingRequest, OnBehalfBookingRequest},
    middleware::auth_context::AuthContext,
    models::{AppState, Appointment, AppointmentStatus},
    pagination::{Page, PageParams, PageRequest},
    routes::collection,
};

pub fn router() -> Router<AppState> {
    collection::delete_routes::<Appointment>(Router::new(), "/appointments")
        .route("/appointments", get(list_appointments).post(book))
        .route("/appointments/admin", post(book_on_behalf))
        .route(
            "/appointments/{id}",
            get(get_appointment).put(update_appointment),
        )
        .route("/appointments/{id}/status", patch(patch_status))
        .route("/appointments/user/{user_id}", get(list_for_user))
}

pub async fn list_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<PageParams>,
) -> Result<Json<Page<Appointment>>, ApiError> {
    let req = PageRequest::from_params(params, &state.paging)?;
    tracing::debug!(user_id = auth.user_id, page = req.page, "list appointments");
    Ok(Json(lifecycle::list(&state, &auth, &req).await?))
}

pub async fn list_for_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<i64>,
    Query(params): Query<PageParams>,
) -> Result<Json<Page<Appointment>>, ApiError> {
    let req = PageRequest::from_params(params, &state.paging)?;
    Ok(Json(lifecycle::list_for_user(&state, &auth, user_id, &req).await?))
}

pub async fn get_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<i64>,
) -> Result<Json<Appointment>, ApiError> {
    Ok(Json(lifecycle::get(&state, &auth, appointment_id).await?))
}

pub async fn book(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<BookingRequest>,
) -> Result<Json<Appointment>, ApiError> {
    Ok(Json(lifecycle::create_for_self(&state, &auth, req).await?))
}

pub async fn book_on_behalf(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<OnBehalfBookingRequest>,
) -> Result<Json<Appointment>, ApiError> {
    Ok(Json(lifecycle::create_on_behalf(&state, &auth, req).await?))
}

pub async fn update_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<i64>,
    Json(req): Json<AppointmentUpdateRequest>,
) -> Result<Json<Appointment>, ApiError> {
    Ok(Json(
        lifecycle::update(&state, &auth, appointment_id, req).await?,
    ))
}

/// Body is the bare status: `"COMPLETED"` as a JSON string or plain text.
pub async fn patch_status(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<i64>,
    body: String,
) -> Result<Json<Appointment>, ApiError> {
    let status = body.parse::<AppointmentStatus>()?;
    Ok(Json(
        lifecycle::update_status(&state, &auth, appointment_id, status).await?,
    ))
}
