use axum::{Json, Router, routing::get};

use crate::error::ApiError;
use crate::middleware::auth_context::AuthContext;
use crate::models::{AppState, Role};

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeResponse {
    pub user_id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub view: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/home", get(home))
}

/// Which dashboard the front end should render for this caller.
fn view_for(role: Role) -> &'static str {
    match role {
        Role::Admin => "admin",
        Role::Staff => "staff",
        Role::User => "patient",
    }
}

pub async fn home(auth: AuthContext) -> Result<Json<HomeResponse>, ApiError> {
    Ok(Json(HomeResponse {
        user_id: auth.user_id,
        view: view_for(auth.role).to_string(),
        name: auth.name,
        email: auth.email,
        role: auth.role,
    }))
}
