//! Resource listing and appointment lifecycle service for a skin clinic.

pub mod auth;
pub mod authz;
pub mod config;
pub mod db;
pub mod error;
pub mod guard;
pub mod lifecycle;
pub mod middleware;
pub mod models;
pub mod pagination;
pub mod routes;
pub mod store;

#[cfg(test)]
pub mod test_support;

use std::sync::Arc;

use axum::Router;
use axum::http::header;
use chrono::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::{Config, StoreBackend};
use crate::guard::DeletionGuard;
use crate::middleware::auth_context::{MemorySessions, SessionResolver};
use crate::models::{AppState, NewUser, PagingLimits, Role, SchedulingPolicy};
use crate::store::Stores;
use crate::store::pg::PgSessions;

/// Wires stores, sessions and engine settings for the configured backend.
pub async fn build_state(cfg: &Config) -> anyhow::Result<AppState> {
    let (stores, sessions): (Stores, Arc<dyn SessionResolver>) = match cfg.backend {
        StoreBackend::Postgres => {
            let url = cfg
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is not set"))?;
            let pool = db::connect_pg(url).await?;
            if cfg.run_migrations {
                db::migrate(&pool).await?;
            }
            let sessions: Arc<dyn SessionResolver> = Arc::new(PgSessions::new(pool.clone()));
            (Stores::postgres(pool), sessions)
        }
        StoreBackend::Memory => {
            let stores = Stores::in_memory();
            let sessions = Arc::new(MemorySessions::new());
            if let Some(token) = cfg.bootstrap_admin_token.as_deref() {
                let admin = stores
                    .users
                    .create(NewUser {
                        email: "admin@clinic.local".into(),
                        name: "Bootstrap Admin".into(),
                        role: Role::Admin,
                        password_hash: String::new(),
                    })
                    .await?;
                sessions
                    .register(token, admin.user_id, &admin.email, &admin.name, Role::Admin)
                    .await;
                tracing::warn!(user_id = admin.user_id, "bootstrap admin session registered");
            }
            (stores, sessions as Arc<dyn SessionResolver>)
        }
    };

    let ttl = Duration::seconds(cfg.delete_confirm_ttl_secs);
    let guard = match cfg.delete_guard_secret.as_deref() {
        Some(secret) => DeletionGuard::new(secret.as_bytes(), ttl),
        None => DeletionGuard::ephemeral(ttl),
    };

    Ok(AppState {
        stores,
        sessions,
        guard,
        paging: PagingLimits {
            default_page_size: cfg.default_page_size,
            max_page_size: cfg.max_page_size,
        },
        scheduling: SchedulingPolicy {
            enforce_slot_conflicts: cfg.enforce_slot_conflicts,
        },
    })
}

/// The full HTTP application: routes plus CORS and request tracing.
pub fn app(state: AppState) -> Router {
    // Browser clients call the API cross-origin; allow the preflight.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]);

    routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
