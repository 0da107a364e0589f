// src/routes/analysis_routes.rs

use axum::{Json, Router, extract::State, routing::post};
use chrono::Utc;
use serde::Deserialize;

use crate::{
    authz::{self, Operation, Ownership},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AnalysisRecord, AppState, NewAnalysisRecord, Severity, parse_instant},
    routes::collection,
    store::ResourceKind,
};

/// A scoring result handed over by the analysis pipeline.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    pub user_id: i64,
    pub severity: String,
    pub confidence: f64,
    #[serde(default)]
    pub diagnosis: String,
    #[serde(default)]
    pub suggestion: String,
    pub analysis_time: Option<String>,
}

pub fn router() -> Router<AppState> {
    collection::routes::<AnalysisRecord>("/analysis").route("/analysis", post(ingest))
}

fn validate_confidence(c: f64) -> Result<f64, ApiError> {
    if !(0.0..=1.0).contains(&c) {
        return Err(ApiError::invalid_argument("confidence must lie in [0, 1]"));
    }
    Ok(c)
}

pub async fn ingest(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<IngestRequest>,
) -> Result<Json<AnalysisRecord>, ApiError> {
    authz::authorize(
        &auth,
        ResourceKind::AnalysisRecord,
        Operation::Create,
        Ownership::Unknown,
    )?;

    let draft = NewAnalysisRecord {
        user_id: req.user_id,
        severity: req.severity.parse::<Severity>()?,
        confidence: validate_confidence(req.confidence)?,
        diagnosis: req.diagnosis.trim().to_string(),
        suggestion: req.suggestion.trim().to_string(),
        analysis_time: match req.analysis_time.as_deref() {
            Some(t) => parse_instant(t)?,
            None => Utc::now(),
        },
    };
    let record = state.stores.analyses.create(draft).await?;

    tracing::info!(
        history_id = record.history_id,
        user_id = record.user_id,
        severity = record.severity.as_str(),
        "analysis record stored"
    );
    Ok(Json(record))
}
