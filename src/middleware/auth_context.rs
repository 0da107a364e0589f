use std::collections::HashMap;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::hash_access_token;
use crate::error::ApiError;
use crate::models::{AppState, Role};
use crate::store::StoreError;

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: i64,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub session_token_id: Uuid,
}

impl AuthContext {
    pub fn is_privileged(&self) -> bool {
        self.role.is_privileged()
    }
}

/// Resolves a hashed bearer token to a live session.
///
/// Credentials are issued elsewhere; this side only reads them.
#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve(&self, token_hash: &str) -> Result<Option<AuthContext>, StoreError>;

    /// Revokes every live session of `user_id` except `keep`. Returns how many.
    async fn revoke_others(&self, user_id: i64, keep: Uuid) -> Result<u64, StoreError>;
}

/// Sessions held in process, keyed by token hash.
#[derive(Default)]
pub struct MemorySessions {
    sessions: RwLock<HashMap<String, AuthContext>>,
}

impl MemorySessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `token` for the given account and returns the session context.
    pub async fn register(
        &self,
        token: &str,
        user_id: i64,
        email: &str,
        name: &str,
        role: Role,
    ) -> AuthContext {
        let ctx = AuthContext {
            user_id,
            email: email.to_string(),
            name: name.to_string(),
            role,
            session_token_id: Uuid::new_v4(),
        };
        self.sessions
            .write()
            .await
            .insert(hash_access_token(token), ctx.clone());
        ctx
    }

    pub async fn revoke(&self, token: &str) -> bool {
        self.sessions
            .write()
            .await
            .remove(&hash_access_token(token))
            .is_some()
    }
}

#[async_trait]
impl SessionResolver for MemorySessions {
    async fn resolve(&self, token_hash: &str) -> Result<Option<AuthContext>, StoreError> {
        Ok(self.sessions.read().await.get(token_hash).cloned())
    }

    async fn revoke_others(&self, user_id: i64, keep: Uuid) -> Result<u64, StoreError> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, ctx| ctx.user_id != user_id || ctx.session_token_id == keep);
        Ok((before - sessions.len()) as u64)
    }
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            // Extract Authorization: Bearer <token>
            let TypedHeader(authz): TypedHeader<Authorization<Bearer>> =
                TypedHeader::from_request_parts(parts, state)
                    .await
                    .map_err(|_| ApiError::session_expired())?;

            let token_hash = hash_access_token(authz.token());

            let ctx = state
                .sessions
                .resolve(&token_hash)
                .await?
                .ok_or_else(ApiError::session_expired)?;

            tracing::debug!(user_id = ctx.user_id, role = ctx.role.as_str(), "session resolved");
            Ok(ctx)
        }
    }
}
