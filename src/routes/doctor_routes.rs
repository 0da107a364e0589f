// src/routes/doctor_routes.rs

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{post, put},
};
use serde::Deserialize;

use crate::{
    authz::{self, Operation, Ownership},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, Doctor, NewDoctor, required_text},
    routes::collection,
    store::ResourceKind,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorRequest {
    pub name: String,
    #[serde(default)]
    pub qualifications: String,
    #[serde(default)]
    pub speciality: String,
}

pub fn router() -> Router<AppState> {
    collection::routes::<Doctor>("/doctors")
        .route("/doctors", post(create_doctor))
        .route("/doctors/{id}", put(update_doctor))
}

pub async fn create_doctor(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<DoctorRequest>,
) -> Result<Json<Doctor>, ApiError> {
    authz::authorize(&auth, ResourceKind::Doctor, Operation::Create, Ownership::Unknown)?;

    let doctor = state
        .stores
        .doctors
        .create(NewDoctor {
            name: required_text("name", &req.name)?,
            qualifications: req.qualifications.trim().to_string(),
            speciality: req.speciality.trim().to_string(),
        })
        .await?;

    tracing::info!(doctor_id = doctor.doctor_id, by = auth.user_id, "doctor created");
    Ok(Json(doctor))
}

/// Renames never cascade; appointments keep the name they were booked with.
pub async fn update_doctor(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(doctor_id): Path<i64>,
    Json(req): Json<DoctorRequest>,
) -> Result<Json<Doctor>, ApiError> {
    authz::authorize(&auth, ResourceKind::Doctor, Operation::Update, Ownership::Unknown)?;

    let next = Doctor {
        doctor_id,
        name: required_text("name", &req.name)?,
        qualifications: req.qualifications.trim().to_string(),
        speciality: req.speciality.trim().to_string(),
    };
    let doctor = state
        .stores
        .doctors
        .update(&next)
        .await?
        .ok_or_else(|| ApiError::not_found(ResourceKind::Doctor))?;

    tracing::info!(doctor_id, by = auth.user_id, "doctor updated");
    Ok(Json(doctor))
}
