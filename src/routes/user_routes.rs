// src/routes/user_routes.rs

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};

use crate::{
    auth::{hash_password, verify_password},
    authz::{self, Operation, Ownership},
    error::ApiError,
    lifecycle::find_user_by_email,
    middleware::auth_context::AuthContext,
    models::{AppState, NewUser, Role, User, required_text},
    routes::collection,
    store::ResourceKind,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub email: String,
    pub name: String,
    pub password: String,
    pub role: Option<String>, // default USER
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordChanged {
    pub ok: bool,
    /// Other sessions of the account that were signed out.
    pub revoked_sessions: u64,
}

#[derive(Debug, Deserialize)]
pub struct EmailQuery {
    pub email: String,
}

pub fn router() -> Router<AppState> {
    collection::routes::<User>("/users")
        .route("/users", post(create_user))
        .route("/users/{id}", put(update_user))
        .route("/users/me", get(me))
        .route("/users/me/password", put(change_password))
        .route("/users/email", get(find_by_email))
}

fn validate_email(email: &str) -> Result<String, ApiError> {
    let e = required_text("email", email)?;
    match e.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(e.to_lowercase()),
        _ => Err(ApiError::invalid_argument("email is not a valid address")),
    }
}

fn validate_password(pw: &str) -> Result<(), ApiError> {
    let p = pw.trim();
    if p.len() < 8 {
        return Err(ApiError::invalid_argument(
            "password must be at least 8 characters",
        ));
    }
    Ok(())
}

/// Only an ADMIN hands out, or takes away, the ADMIN role.
fn ensure_may_assign(auth: &AuthContext, from: Option<Role>, to: Role) -> Result<(), ApiError> {
    let touches_admin = to == Role::Admin || from == Some(Role::Admin);
    if touches_admin && from != Some(to) && auth.role != Role::Admin {
        return Err(ApiError::forbidden("only an admin can grant or revoke the ADMIN role"));
    }
    Ok(())
}

async fn ensure_email_free(
    state: &AppState,
    email: &str,
    except: Option<i64>,
) -> Result<(), ApiError> {
    if let Some(other) = find_user_by_email(state, email).await? {
        if Some(other.user_id) != except {
            return Err(ApiError::Conflict(
                "DUPLICATE",
                format!("an account with email {email} already exists"),
            ));
        }
    }
    Ok(())
}

pub async fn create_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<User>, ApiError> {
    authz::authorize(&auth, ResourceKind::User, Operation::Create, Ownership::Unknown)?;

    let email = validate_email(&req.email)?;
    let name = required_text("name", &req.name)?;
    validate_password(&req.password)?;
    let role = match req.role.as_deref() {
        Some(r) => r.parse::<Role>()?,
        None => Role::User,
    };
    ensure_may_assign(&auth, None, role)?;
    ensure_email_free(&state, &email, None).await?;

    let password_hash = hash_password(req.password.trim()).map_err(ApiError::Internal)?;

    let user = state
        .stores
        .users
        .create(NewUser {
            email,
            name,
            role,
            password_hash,
        })
        .await?;

    tracing::info!(user_id = user.user_id, role = role.as_str(), by = auth.user_id, "user created");
    Ok(Json(user))
}

pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<i64>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<User>, ApiError> {
    let existing = state
        .stores
        .users
        .get_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::not_found(ResourceKind::User))?;
    authz::authorize_record(&auth, Operation::Update, &existing)?;

    let mut next = existing.clone();
    if let Some(email) = req.email.as_deref().filter(|e| !e.trim().is_empty()) {
        next.email = validate_email(email)?;
        ensure_email_free(&state, &next.email, Some(user_id)).await?;
    }
    if let Some(name) = req.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        next.name = name.to_string();
    }
    if let Some(role) = req.role.as_deref() {
        next.role = role.parse::<Role>()?;
        ensure_may_assign(&auth, Some(existing.role), next.role)?;
    }

    let updated = state
        .stores
        .users
        .update(&next)
        .await?
        .ok_or_else(|| ApiError::not_found(ResourceKind::User))?;

    tracing::info!(user_id, by = auth.user_id, "user updated");
    Ok(Json(updated))
}

/// The caller's own account record.
pub async fn me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<User>, ApiError> {
    let user = state
        .stores
        .users
        .get_by_id(auth.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found(ResourceKind::User))?;
    Ok(Json(user))
}

/// Replaces the caller's own password after checking the current one, then
/// signs out every other session of the account.
pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<PasswordChanged>, ApiError> {
    if req.current_password.is_empty() || req.new_password.is_empty() {
        return Err(ApiError::invalid_argument(
            "currentPassword and newPassword are required",
        ));
    }
    validate_password(&req.new_password)?;

    let stored = state
        .stores
        .credentials
        .password_hash(auth.user_id)
        .await?
        .ok_or_else(ApiError::session_expired)?;

    // Passwords are hashed trimmed on create.
    if !verify_password(req.current_password.trim(), &stored) {
        tracing::warn!(user_id = auth.user_id, "password change with wrong current password");
        return Err(ApiError::invalid_credentials());
    }

    let new_hash = hash_password(req.new_password.trim()).map_err(ApiError::Internal)?;
    if !state
        .stores
        .credentials
        .set_password_hash(auth.user_id, &new_hash)
        .await?
    {
        return Err(ApiError::session_expired());
    }

    let revoked_sessions = state
        .sessions
        .revoke_others(auth.user_id, auth.session_token_id)
        .await?;

    tracing::info!(user_id = auth.user_id, revoked_sessions, "password changed");
    Ok(Json(PasswordChanged {
        ok: true,
        revoked_sessions,
    }))
}

/// Lookup by email. A USER may only find itself; anything else is `NotFound`.
pub async fn find_by_email(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<EmailQuery>,
) -> Result<Json<User>, ApiError> {
    let email = required_text("email", &q.email)?;
    let user = find_user_by_email(&state, &email)
        .await?
        .ok_or_else(|| ApiError::not_found(ResourceKind::User))?;
    authz::authorize_record(&auth, Operation::Read, &user)?;
    Ok(Json(user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::principal;

    #[test]
    fn test_validate_email() {
        assert_eq!(validate_email(" Mia@Example.com ").unwrap(), "mia@example.com");
        assert!(validate_email("").is_err());
        assert!(validate_email("mia").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("mia@localhost").is_err());
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("password123").is_ok());
        assert!(validate_password("short").is_err()); // Too short
        assert!(validate_password("").is_err());
    }

    #[test]
    fn test_only_admins_touch_the_admin_role() {
        let staff = principal(1, Role::Staff);
        let admin = principal(2, Role::Admin);

        assert!(ensure_may_assign(&staff, None, Role::User).is_ok());
        assert!(ensure_may_assign(&staff, None, Role::Staff).is_ok());
        assert!(ensure_may_assign(&staff, None, Role::Admin).is_err());
        assert!(ensure_may_assign(&staff, Some(Role::Admin), Role::User).is_err());
        // Unchanged ADMIN role on an edit of someone else's name.
        assert!(ensure_may_assign(&staff, Some(Role::Admin), Role::Admin).is_ok());

        assert!(ensure_may_assign(&admin, None, Role::Admin).is_ok());
        assert!(ensure_may_assign(&admin, Some(Role::Admin), Role::Staff).is_ok());
    }
}
