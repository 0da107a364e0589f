//! Deletion guard: confirm first, then delete.
//!
//! Step one authorises the delete and hands back a confirmation context with
//! a signed, short-lived token. Step two must present that token for the same
//! resource kind, id and caller before `ResourceStore::delete` runs. The token
//! is self-contained (HMAC-SHA256 over a small claim set), so opening a
//! confirmation stores nothing and abandoning one needs no cleanup.

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::auth::generate_opaque_token;
use crate::authz::{self, Operation, Ownership};
use crate::error::ApiError;
use crate::middleware::auth_context::AuthContext;
use crate::models::AppState;
use crate::store::{Resource, ResourceKind};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct DeletionGuard {
    key: Arc<Vec<u8>>,
    ttl: Duration,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    kind: ResourceKind,
    id: i64,
    sub: i64,
    exp: i64,
    nonce: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationContext {
    pub resource_kind: ResourceKind,
    pub id: i64,
    pub display_label: String,
    pub confirmation_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionOutcome {
    pub ok: bool,
    /// False when the id was already gone; still a success.
    pub existed: bool,
}

fn invalid_confirmation(reason: &str) -> ApiError {
    ApiError::BadRequest("CONFIRMATION_INVALID", format!("confirmation rejected: {reason}"))
}

impl DeletionGuard {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            key: Arc::new(secret.to_vec()),
            ttl,
        }
    }

    /// Guard keyed with fresh random bytes; tokens die with the process.
    pub fn ephemeral(ttl: Duration) -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self::new(&key, ttl)
    }

    fn mac(&self) -> Result<HmacSha256, ApiError> {
        HmacSha256::new_from_slice(&self.key)
            .map_err(|e| ApiError::Internal(format!("hmac key error: {e}")))
    }

    pub fn issue_at(
        &self,
        auth: &AuthContext,
        kind: ResourceKind,
        id: i64,
        display_label: String,
        now: DateTime<Utc>,
    ) -> Result<ConfirmationContext, ApiError> {
        let expires_at = now + self.ttl;
        let claims = Claims {
            kind,
            id,
            sub: auth.user_id,
            exp: expires_at.timestamp(),
            nonce: generate_opaque_token(),
        };
        let payload = serde_json::to_vec(&claims)
            .map_err(|e| ApiError::Internal(format!("claims encode error: {e}")))?;

        let mut mac = self.mac()?;
        mac.update(&payload);
        let signature = mac.finalize().into_bytes();

        Ok(ConfirmationContext {
            resource_kind: kind,
            id,
            display_label,
            confirmation_token: format!(
                "{}.{}",
                URL_SAFE_NO_PAD.encode(&payload),
                URL_SAFE_NO_PAD.encode(signature)
            ),
            expires_at,
        })
    }

    pub fn verify_at(
        &self,
        token: &str,
        auth: &AuthContext,
        kind: ResourceKind,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        let (payload_b64, sig_b64) = token
            .trim()
            .split_once('.')
            .ok_or_else(|| invalid_confirmation("malformed token"))?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| invalid_confirmation("malformed token"))?;
        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| invalid_confirmation("malformed token"))?;

        let mut mac = self.mac()?;
        mac.update(&payload);
        mac.verify_slice(&signature)
            .map_err(|_| invalid_confirmation("bad signature"))?;

        let claims: Claims = serde_json::from_slice(&payload)
            .map_err(|_| invalid_confirmation("malformed token"))?;

        if claims.kind != kind || claims.id != id {
            return Err(invalid_confirmation("token was issued for another record"));
        }
        if claims.sub != auth.user_id {
            return Err(invalid_confirmation("token was issued to another caller"));
        }
        if claims.exp < now.timestamp() {
            return Err(invalid_confirmation("token expired"));
        }
        Ok(())
    }
}

/// Delete authorisation for one id; `None` when the record is already gone.
async fn authorize_delete<R: Resource>(
    state: &AppState,
    auth: &AuthContext,
    id: i64,
) -> Result<Option<R>, ApiError> {
    match state.stores.of::<R>().get_by_id(id).await? {
        Some(record) => {
            authz::authorize_record(auth, Operation::Delete, &record)?;
            Ok(Some(record))
        }
        None => {
            authz::authorize(auth, R::KIND, Operation::Delete, Ownership::Unknown)?;
            Ok(None)
        }
    }
}

/// Step one: open a confirmation. Never mutates the store.
///
/// An owner asking about an id it cannot see gets `NotFound` whether the id is
/// foreign or missing. A token already issued still completes idempotently in
/// step two.
pub async fn request_deletion<R: Resource>(
    state: &AppState,
    auth: &AuthContext,
    id: i64,
) -> Result<ConfirmationContext, ApiError> {
    let record = authorize_delete::<R>(state, auth, id).await?;
    if record.is_none() && R::KIND.has_owners() && !auth.is_privileged() {
        return Err(ApiError::not_found(R::KIND));
    }
    let label = match &record {
        Some(r) => r.display_label(),
        None => format!("{} #{id}", R::KIND.label()),
    };
    let ctx = state.guard.issue_at(auth, R::KIND, id, label, Utc::now())?;
    tracing::info!(
        user_id = auth.user_id,
        kind = R::KIND.label(),
        id,
        "deletion confirmation issued"
    );
    Ok(ctx)
}

/// Step two: the explicit acknowledgement that actually deletes.
pub async fn confirm_deletion<R: Resource>(
    state: &AppState,
    auth: &AuthContext,
    id: i64,
    token: Option<&str>,
) -> Result<DeletionOutcome, ApiError> {
    let token = token.map(str::trim).filter(|t| !t.is_empty()).ok_or_else(|| {
        ApiError::BadRequest(
            "CONFIRMATION_REQUIRED",
            "request a delete confirmation first and pass its token".into(),
        )
    })?;

    if let Err(e) = state.guard.verify_at(token, auth, R::KIND, id, Utc::now()) {
        tracing::warn!(user_id = auth.user_id, kind = R::KIND.label(), id, "{e}");
        return Err(e);
    }

    // Re-check: the record may have changed hands or status since step one.
    authorize_delete::<R>(state, auth, id).await?;

    let existed = state.stores.of::<R>().delete(id).await?;
    tracing::info!(
        user_id = auth.user_id,
        kind = R::KIND.label(),
        id,
        existed,
        "record deleted"
    );
    Ok(DeletionOutcome { ok: true, existed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AppointmentStatus, Doctor, NewDoctor, Role};
    use crate::store::ListQuery;
    use crate::test_support::{principal, Harness};

    fn guard() -> DeletionGuard {
        DeletionGuard::new(b"test-secret", Duration::minutes(5))
    }

    #[test]
    fn test_token_round_trip_binds_kind_id_and_caller() {
        let g = guard();
        let me = principal(1, Role::Staff);
        let now = Utc::now();
        let ctx = g
            .issue_at(&me, ResourceKind::Doctor, 4, "Dr. Ada".into(), now)
            .unwrap();

        assert!(g.verify_at(&ctx.confirmation_token, &me, ResourceKind::Doctor, 4, now).is_ok());

        let other = principal(2, Role::Staff);
        for (who, kind, id) in [
            (&other, ResourceKind::Doctor, 4),
            (&me, ResourceKind::Product, 4),
            (&me, ResourceKind::Doctor, 5),
        ] {
            let err = g
                .verify_at(&ctx.confirmation_token, who, kind, id, now)
                .unwrap_err();
            assert_eq!(err.code(), "CONFIRMATION_INVALID");
        }
    }

    #[test]
    fn test_expired_and_tampered_tokens_are_rejected() {
        let g = guard();
        let me = principal(1, Role::Admin);
        let now = Utc::now();
        let ctx = g
            .issue_at(&me, ResourceKind::User, 9, "x".into(), now)
            .unwrap();

        let later = now + Duration::minutes(6);
        assert!(g.verify_at(&ctx.confirmation_token, &me, ResourceKind::User, 9, later).is_err());

        let mut forged = ctx.confirmation_token.clone();
        forged.insert(0, 'A');
        assert!(g.verify_at(&forged, &me, ResourceKind::User, 9, now).is_err());

        let foreign_key = DeletionGuard::new(b"other-secret", Duration::minutes(5));
        assert!(
            foreign_key
                .verify_at(&ctx.confirmation_token, &me, ResourceKind::User, 9, now)
                .is_err()
        );
        assert!(g.verify_at("no-dot", &me, ResourceKind::User, 9, now).is_err());
    }

    #[tokio::test]
    async fn test_opening_a_confirmation_never_mutates() {
        let h = Harness::new();
        let (staff, _) = h.account("Sam", Role::Staff).await;
        let doc = h.doctor("Dr. Ada").await;

        let ctx = request_deletion::<Doctor>(&h.state, &staff, doc.doctor_id)
            .await
            .unwrap();
        assert_eq!(ctx.display_label, "Dr. Ada (Dermatology)");

        // Abandoned: nothing happened.
        let still = h.state.stores.doctors.get_by_id(doc.doctor_id).await.unwrap();
        assert_eq!(still, Some(doc));
        let all = h.state.stores.doctors.list(&ListQuery::default()).await.unwrap();
        assert_eq!(all.total, 1);
    }

    #[tokio::test]
    async fn test_delete_requires_token() {
        let h = Harness::new();
        let (staff, _) = h.account("Sam", Role::Staff).await;
        let doc = h.doctor("Dr. Ada").await;

        for token in [None, Some(""), Some("   ")] {
            let err = confirm_deletion::<Doctor>(&h.state, &staff, doc.doctor_id, token)
                .await
                .unwrap_err();
            assert_eq!(err.code(), "CONFIRMATION_REQUIRED");
        }
        assert!(h.state.stores.doctors.get_by_id(doc.doctor_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_two_step_delete_is_idempotent() {
        let h = Harness::new();
        let (staff, _) = h.account("Sam", Role::Staff).await;
        let doc = h.doctor("Dr. Ada").await;

        for expected_existed in [true, false] {
            let ctx = request_deletion::<Doctor>(&h.state, &staff, doc.doctor_id)
                .await
                .unwrap();
            let outcome = confirm_deletion::<Doctor>(
                &h.state,
                &staff,
                doc.doctor_id,
                Some(ctx.confirmation_token.as_str()),
            )
            .await
            .unwrap();
            assert!(outcome.ok);
            assert_eq!(outcome.existed, expected_existed);
        }
        assert!(h.state.stores.doctors.get_by_id(doc.doctor_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_users_cannot_delete_catalogue_entries() {
        let h = Harness::new();
        let (user, _) = h.account("Uma", Role::User).await;
        let doc = h.doctor("Dr. Ada").await;
        let err = request_deletion::<Doctor>(&h.state, &user, doc.doctor_id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");

        let stray = h
            .state
            .stores
            .doctors
            .create(NewDoctor {
                name: "Dr. Bo".into(),
                qualifications: "MD".into(),
                speciality: "Dermatology".into(),
            })
            .await
            .unwrap();
        assert!(request_deletion::<Doctor>(&h.state, &user, stray.doctor_id).await.is_err());
    }

    #[tokio::test]
    async fn test_owner_loses_delete_right_between_steps() {
        let h = Harness::new();
        let (user, _) = h.account("Uma", Role::User).await;
        h.doctor("Dr. Ada").await;
        let appt = h.booking(&user, "Dr. Ada").await;

        let ctx = request_deletion::<crate::models::Appointment>(&h.state, &user, appt.appointment_id)
            .await
            .unwrap();

        // Staff confirms it before the owner acknowledges.
        let mut confirmed = appt.clone();
        confirmed.status = AppointmentStatus::Confirmed;
        h.state.stores.appointments.update(&confirmed).await.unwrap();

        let err = confirm_deletion::<crate::models::Appointment>(
            &h.state,
            &user,
            appt.appointment_id,
            Some(ctx.confirmation_token.as_str()),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
        assert!(
            h.state
                .stores
                .appointments
                .get_by_id(appt.appointment_id)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_owner_sees_missing_and_foreign_ids_alike() {
        let h = Harness::new();
        let (mia, _) = h.account("Mia", Role::User).await;
        let (eve, _) = h.account("Eve", Role::User).await;
        h.doctor("Dr. Ada").await;
        let foreign = h.booking(&mia, "Dr. Ada").await;
        let own = h.booking(&eve, "Dr. Ada").await;

        let foreign_err =
            request_deletion::<crate::models::Appointment>(&h.state, &eve, foreign.appointment_id)
                .await
                .unwrap_err();
        let missing_err = request_deletion::<crate::models::Appointment>(&h.state, &eve, 9_999)
            .await
            .unwrap_err();
        assert_eq!(foreign_err.status(), missing_err.status());
        assert_eq!(foreign_err.code(), "NOT_FOUND");
        assert_eq!(missing_err.code(), "NOT_FOUND");

        // A token issued while the booking existed still confirms twice.
        let ctx = request_deletion::<crate::models::Appointment>(&h.state, &eve, own.appointment_id)
            .await
            .unwrap();
        for expected_existed in [true, false] {
            let outcome = confirm_deletion::<crate::models::Appointment>(
                &h.state,
                &eve,
                own.appointment_id,
                Some(ctx.confirmation_token.as_str()),
            )
            .await
            .unwrap();
            assert_eq!(outcome.existed, expected_existed);
        }

        // Staff still get a confirmation for an id that is already gone.
        let (staff, _) = h.account("Sam", Role::Staff).await;
        let ctx = request_deletion::<crate::models::Appointment>(&h.state, &staff, 9_999)
            .await
            .unwrap();
        assert_eq!(ctx.display_label, "appointment #9999");
    }
}
