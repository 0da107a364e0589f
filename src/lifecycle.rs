//! Appointment lifecycle engine.
//!
//! States: PENDING, CONFIRMED, CANCELLED, COMPLETED, RESCHEDULED. Every
//! appointment starts PENDING unless staff book it with an explicit status.
//! Staff and admins may move between any two states (none is terminal);
//! owners never change status and may only edit or delete while PENDING.
//! Each mutation is a single-record store write, last write wins.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::authz::{self, Operation, Ownership};
use crate::error::ApiError;
use crate::middleware::auth_context::AuthContext;
use crate::models::{
    parse_instant, required_text, AppState, Appointment, AppointmentStatus, Doctor,
    NewAppointment, User,
};
use crate::pagination::{fetch_page, Page, PageRequest};
use crate::store::{ListQuery, ResourceKind};

const KIND: ResourceKind = ResourceKind::Appointment;

/* ============================================================
   Requests
   ============================================================ */

/// Owner booking. A `status` field is accepted and ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub date: String,
    pub doctor_name: String,
    pub status: Option<String>,
}

/// Staff booking on behalf of someone, with or without an account.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnBehalfBookingRequest {
    pub user_name: String,
    pub user_email: String,
    pub date: String,
    pub doctor_name: String,
    pub status: Option<String>,
}

/// Full update (`PUT`). `date` and `doctorName` are always required.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentUpdateRequest {
    pub date: String,
    pub doctor_name: String,
    pub user_name: Option<String>,
    pub status: Option<String>,
}

/* ============================================================
   Reference checks
   ============================================================ */

/// Resolves `doctor_name` to the stored spelling of an existing doctor.
async fn ensure_known_doctor(state: &AppState, doctor_name: &str) -> Result<String, ApiError> {
    let name = required_text("doctorName", doctor_name)?;
    let candidates = state
        .stores
        .doctors
        .list(&ListQuery {
            search: Some(name.clone()),
            ..ListQuery::default()
        })
        .await?;

    candidates
        .items
        .into_iter()
        .map(|d: Doctor| d.name)
        .find(|n| n.trim().eq_ignore_ascii_case(&name))
        .ok_or_else(|| {
            ApiError::BadRequest("UNKNOWN_DOCTOR", format!("no doctor named {name:?}"))
        })
}

/// Double-booking check, active only when the scheduling policy enables it.
async fn ensure_slot_free(
    state: &AppState,
    doctor_name: &str,
    date: DateTime<Utc>,
    exclude: Option<i64>,
) -> Result<(), ApiError> {
    if !state.scheduling.enforce_slot_conflicts {
        return Ok(());
    }
    let same_doctor = state
        .stores
        .appointments
        .list(&ListQuery {
            search: Some(doctor_name.to_string()),
            ..ListQuery::default()
        })
        .await?;

    let clash = same_doctor.items.iter().find(|a| {
        Some(a.appointment_id) != exclude
            && a.status != AppointmentStatus::Cancelled
            && a.date == date
            && a.doctor_name.eq_ignore_ascii_case(doctor_name)
    });
    if let Some(other) = clash {
        tracing::warn!(
            doctor = doctor_name,
            %date,
            clashes_with = other.appointment_id,
            "slot already booked"
        );
        return Err(ApiError::Conflict(
            "SLOT_TAKEN",
            format!("{doctor_name} is already booked at {date}"),
        ));
    }
    Ok(())
}

/// True when `next` occupies a slot that `current` did not: it moved, or it
/// left CANCELLED.
fn claims_slot(current: &Appointment, next: &Appointment) -> bool {
    if next.status == AppointmentStatus::Cancelled {
        return false;
    }
    current.status == AppointmentStatus::Cancelled
        || next.date != current.date
        || !next.doctor_name.eq_ignore_ascii_case(&current.doctor_name)
}

/// Case-insensitive exact email match.
pub(crate) async fn find_user_by_email(state: &AppState, email: &str) -> Result<Option<User>, ApiError> {
    let matches = state
        .stores
        .users
        .list(&ListQuery {
            search: Some(email.to_string()),
            ..ListQuery::default()
        })
        .await?;
    Ok(matches
        .items
        .into_iter()
        .find(|u| u.email.eq_ignore_ascii_case(email)))
}

async fn load(state: &AppState, id: i64) -> Result<Option<Appointment>, ApiError> {
    Ok(state.stores.appointments.get_by_id(id).await?)
}

/// Loads and authorises; a missing id is `NotFound` for everyone.
async fn load_authorized(
    state: &AppState,
    auth: &AuthContext,
    id: i64,
    op: Operation,
) -> Result<Appointment, ApiError> {
    let appt = load(state, id)
        .await?
        .ok_or_else(|| ApiError::not_found(KIND))?;
    authz::authorize_record(auth, op, &appt)?;
    Ok(appt)
}

async fn store_update(state: &AppState, appt: &Appointment) -> Result<Appointment, ApiError> {
    state
        .stores
        .appointments
        .update(appt)
        .await?
        .ok_or_else(|| ApiError::not_found(KIND))
}

/// Replaces `user_email` with the linked account's current address.
async fn enrich_emails(state: &AppState, appts: &mut [Appointment]) -> Result<(), ApiError> {
    let mut cache: Vec<(i64, Option<String>)> = Vec::new();
    for appt in appts.iter_mut() {
        let Some(uid) = appt.user_id else { continue };
        let email = match cache.iter().find(|(id, _)| *id == uid) {
            Some((_, email)) => email.clone(),
            None => {
                let email = state.stores.users.get_by_id(uid).await?.map(|u| u.email);
                cache.push((uid, email.clone()));
                email
            }
        };
        if let Some(email) = email {
            appt.user_email = email;
        }
    }
    Ok(())
}

/* ============================================================
   Create
   ============================================================ */

/// Owner booking: identity comes from the session, status is always PENDING.
pub async fn create_for_self(
    state: &AppState,
    auth: &AuthContext,
    req: BookingRequest,
) -> Result<Appointment, ApiError> {
    authz::authorize(auth, KIND, Operation::Create, Ownership::Unknown)?;

    let date = parse_instant(&req.date)?;
    let doctor_name = ensure_known_doctor(state, &req.doctor_name).await?;
    ensure_slot_free(state, &doctor_name, date, None).await?;

    if req.status.is_some() {
        tracing::debug!(user_id = auth.user_id, "ignoring caller-supplied status on booking");
    }

    let appt = state
        .stores
        .appointments
        .create(NewAppointment {
            user_id: Some(auth.user_id),
            user_name: auth.name.clone(),
            user_email: auth.email.clone(),
            doctor_name,
            date,
            status: AppointmentStatus::Pending,
        })
        .await?;

    tracing::info!(
        appointment_id = appt.appointment_id,
        user_id = auth.user_id,
        "appointment booked"
    );
    Ok(appt)
}

/// Staff booking on behalf of someone else; the initial status may be chosen.
pub async fn create_on_behalf(
    state: &AppState,
    auth: &AuthContext,
    req: OnBehalfBookingRequest,
) -> Result<Appointment, ApiError> {
    if !auth.is_privileged() {
        return Err(ApiError::forbidden(
            "only staff and admins can book on behalf of another user",
        ));
    }
    authz::authorize(auth, KIND, Operation::Create, Ownership::Unknown)?;

    let user_name = required_text("userName", &req.user_name)?;
    let user_email = required_text("userEmail", &req.user_email)?;
    let date = parse_instant(&req.date)?;
    let status = match req.status.as_deref() {
        Some(s) => s.parse::<AppointmentStatus>()?,
        None => AppointmentStatus::Pending,
    };
    let doctor_name = ensure_known_doctor(state, &req.doctor_name).await?;
    if status != AppointmentStatus::Cancelled {
        ensure_slot_free(state, &doctor_name, date, None).await?;
    }

    let user_id = find_user_by_email(state, &user_email).await?.map(|u| u.user_id);

    let appt = state
        .stores
        .appointments
        .create(NewAppointment {
            user_id,
            user_name,
            user_email,
            doctor_name,
            date,
            status,
        })
        .await?;

    tracing::info!(
        appointment_id = appt.appointment_id,
        booked_by = auth.user_id,
        linked_user = ?appt.user_id,
        status = status.as_str(),
        "appointment booked on behalf"
    );
    Ok(appt)
}

/* ============================================================
   Read
   ============================================================ */

pub async fn get(state: &AppState, auth: &AuthContext, id: i64) -> Result<Appointment, ApiError> {
    let mut appt = load_authorized(state, auth, id, Operation::Read).await?;
    if auth.is_privileged() {
        enrich_emails(state, std::slice::from_mut(&mut appt)).await?;
    }
    Ok(appt)
}

/// Owners see their own bookings; staff see everything with emails
/// recomputed from the accounts at read time.
pub async fn list(
    state: &AppState,
    auth: &AuthContext,
    req: &PageRequest,
) -> Result<Page<Appointment>, ApiError> {
    let owner = authz::list_scope(auth, KIND)?;
    let mut page = fetch_page(state.stores.appointments.as_ref(), owner, req).await?;
    if auth.is_privileged() {
        enrich_emails(state, &mut page.content).await?;
    }
    Ok(page)
}

/// Bookings of one account. Owners may only name themselves.
pub async fn list_for_user(
    state: &AppState,
    auth: &AuthContext,
    user_id: i64,
    req: &PageRequest,
) -> Result<Page<Appointment>, ApiError> {
    authz::list_scope(auth, KIND)?;
    if !auth.is_privileged() && user_id != auth.user_id {
        return Err(ApiError::not_found(ResourceKind::User));
    }
    let mut page = fetch_page(state.stores.appointments.as_ref(), Some(user_id), req).await?;
    if auth.is_privileged() {
        enrich_emails(state, &mut page.content).await?;
    }
    Ok(page)
}

/* ============================================================
   Update
   ============================================================ */

/// Full update. Owners may move `date` and `doctorName` of a PENDING
/// booking; staff may additionally set `status` and `userName`.
pub async fn update(
    state: &AppState,
    auth: &AuthContext,
    id: i64,
    req: AppointmentUpdateRequest,
) -> Result<Appointment, ApiError> {
    let current = load_authorized(state, auth, id, Operation::Update).await?;

    let requested_status = match req.status.as_deref() {
        Some(s) => Some(s.parse::<AppointmentStatus>()?),
        None => None,
    };
    if !auth.is_privileged() {
        if let Some(st) = requested_status.filter(|st| *st != current.status) {
            tracing::warn!(
                user_id = auth.user_id,
                appointment_id = id,
                requested = st.as_str(),
                "owner tried to change status"
            );
            return Err(ApiError::forbidden("appointment status can only be changed by staff"));
        }
    }

    let date = parse_instant(&req.date)?;
    // A booking keeps its stored doctor name even after the doctor was renamed.
    let doctor_name = if req.doctor_name.trim().eq_ignore_ascii_case(&current.doctor_name) {
        current.doctor_name.clone()
    } else {
        ensure_known_doctor(state, &req.doctor_name).await?
    };

    let mut next = current.clone();
    next.date = date;
    next.doctor_name = doctor_name;
    if auth.is_privileged() {
        if let Some(st) = requested_status {
            next.status = st;
        }
        if let Some(name) = req.user_name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            next.user_name = name.to_string();
        }
    }

    if claims_slot(&current, &next) {
        ensure_slot_free(state, &next.doctor_name, next.date, Some(id)).await?;
    }

    let saved = store_update(state, &next).await?;
    if saved.status != current.status {
        tracing::info!(
            appointment_id = id,
            from = current.status.as_str(),
            to = saved.status.as_str(),
            by = auth.user_id,
            "appointment status changed"
        );
    } else {
        tracing::info!(appointment_id = id, by = auth.user_id, "appointment updated");
    }
    Ok(saved)
}

/// Status-only transition (`PATCH`). Any state may move to any other.
pub async fn update_status(
    state: &AppState,
    auth: &AuthContext,
    id: i64,
    status: AppointmentStatus,
) -> Result<Appointment, ApiError> {
    let current = load_authorized(state, auth, id, Operation::UpdateStatus).await?;

    let mut next = current.clone();
    next.status = status;
    if claims_slot(&current, &next) {
        ensure_slot_free(state, &next.doctor_name, next.date, Some(id)).await?;
    }
    let saved = store_update(state, &next).await?;

    tracing::info!(
        appointment_id = id,
        from = current.status.as_str(),
        to = status.as_str(),
        by = auth.user_id,
        "appointment status changed"
    );
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard;
    use crate::models::{Role, SchedulingPolicy};
    use crate::test_support::Harness;

    fn booking(doctor: &str, date: &str) -> BookingRequest {
        BookingRequest {
            date: date.into(),
            doctor_name: doctor.into(),
            status: None,
        }
    }

    fn full_update(doctor: &str, date: &str, status: Option<&str>) -> AppointmentUpdateRequest {
        AppointmentUpdateRequest {
            date: date.into(),
            doctor_name: doctor.into(),
            user_name: None,
            status: status.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_owner_booking_is_pending_whatever_the_request_says() {
        let h = Harness::new();
        let (user, _) = h.account("Mia", Role::User).await;
        h.doctor("Dr. Ada").await;

        for requested in ["CONFIRMED", "COMPLETED", "garbage"] {
            let mut req = booking("dr. ada", "2025-05-01T10:00:00Z");
            req.status = Some(requested.into());
            let appt = create_for_self(&h.state, &user, req).await.unwrap();
            assert_eq!(appt.status, AppointmentStatus::Pending);
            assert_eq!(appt.user_id, Some(user.user_id));
            assert_eq!(appt.user_name, "Mia");
            assert_eq!(appt.user_email, user.email);
            // Stored with the doctor's canonical spelling.
            assert_eq!(appt.doctor_name, "Dr. Ada");
        }
    }

    #[tokio::test]
    async fn test_booking_rejects_unknown_doctor_and_bad_date() {
        let h = Harness::new();
        let (user, _) = h.account("Mia", Role::User).await;
        h.doctor("Dr. Ada").await;

        let err = create_for_self(&h.state, &user, booking("Dr. Nobody", "2025-05-01T10:00:00Z"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_DOCTOR");

        let err = create_for_self(&h.state, &user, booking("Dr. Ada", "tomorrow"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_admin_may_book_directly_as_confirmed() {
        let h = Harness::new();
        let (admin, _) = h.account("Root", Role::Admin).await;
        let (patient, _) = h.account("Noor", Role::User).await;
        h.doctor("Dr. Ada").await;

        let appt = create_on_behalf(
            &h.state,
            &admin,
            OnBehalfBookingRequest {
                user_name: "Noor".into(),
                user_email: patient.email.to_uppercase(),
                date: "2025-06-01T09:00".into(),
                doctor_name: "Dr. Ada".into(),
                status: Some("CONFIRMED".into()),
            },
        )
        .await
        .unwrap();

        let stored = h
            .state
            .stores
            .appointments
            .get_by_id(appt.appointment_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, AppointmentStatus::Confirmed);
        assert_eq!(stored.user_id, Some(patient.user_id));
    }

    #[tokio::test]
    async fn test_walk_in_booking_has_no_account() {
        let h = Harness::new();
        let (staff, _) = h.account("Sam", Role::Staff).await;
        h.doctor("Dr. Ada").await;

        let appt = create_on_behalf(
            &h.state,
            &staff,
            OnBehalfBookingRequest {
                user_name: "Walk In".into(),
                user_email: "walkin@example.com".into(),
                date: "2025-06-01T09:00:00Z".into(),
                doctor_name: "Dr. Ada".into(),
                status: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(appt.user_id, None);
        assert_eq!(appt.status, AppointmentStatus::Pending);
    }

    #[tokio::test]
    async fn test_users_cannot_book_on_behalf() {
        let h = Harness::new();
        let (user, _) = h.account("Mia", Role::User).await;
        h.doctor("Dr. Ada").await;
        let err = create_on_behalf(
            &h.state,
            &user,
            OnBehalfBookingRequest {
                user_name: "Someone".into(),
                user_email: "someone@example.com".into(),
                date: "2025-06-01T09:00:00Z".into(),
                doctor_name: "Dr. Ada".into(),
                status: None,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[tokio::test]
    async fn test_owner_edit_gate() {
        let h = Harness::new();
        let (user, _) = h.account("Mia", Role::User).await;
        let (staff, _) = h.account("Sam", Role::Staff).await;
        h.doctor("Dr. Ada").await;
        h.doctor("Dr. Bo").await;
        let appt = h.booking(&user, "Dr. Ada").await;

        // PENDING: owner may move date and doctor.
        let moved = update(
            &h.state,
            &user,
            appt.appointment_id,
            full_update("Dr. Bo", "2025-07-01T15:30:00Z", None),
        )
        .await
        .unwrap();
        assert_eq!(moved.doctor_name, "Dr. Bo");
        assert_eq!(moved.status, AppointmentStatus::Pending);

        for st in [
            AppointmentStatus::Confirmed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::Completed,
            AppointmentStatus::Rescheduled,
        ] {
            update_status(&h.state, &staff, appt.appointment_id, st).await.unwrap();
            let err = update(
                &h.state,
                &user,
                appt.appointment_id,
                full_update("Dr. Ada", "2025-07-02T15:30:00Z", None),
            )
            .await
            .unwrap_err();
            assert_eq!(err.code(), "FORBIDDEN", "{st:?}");

            let err = guard::request_deletion::<Appointment>(&h.state, &user, appt.appointment_id)
                .await
                .unwrap_err();
            assert_eq!(err.code(), "FORBIDDEN", "{st:?}");
        }
    }

    #[tokio::test]
    async fn test_owner_cannot_change_status() {
        let h = Harness::new();
        let (user, _) = h.account("Mia", Role::User).await;
        h.doctor("Dr. Ada").await;
        let appt = h.booking(&user, "Dr. Ada").await;

        let err = update(
            &h.state,
            &user,
            appt.appointment_id,
            full_update("Dr. Ada", "2025-07-01T15:30:00Z", Some("CONFIRMED")),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");

        let err = update_status(&h.state, &user, appt.appointment_id, AppointmentStatus::Cancelled)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");

        // Echoing the current status is not a change.
        let ok = update(
            &h.state,
            &user,
            appt.appointment_id,
            full_update("Dr. Ada", "2025-07-01T15:30:00Z", Some("PENDING")),
        )
        .await
        .unwrap();
        assert_eq!(ok.status, AppointmentStatus::Pending);

        // Nothing partially applied by the rejected attempt.
        let stored = h
            .state
            .stores
            .appointments
            .get_by_id(appt.appointment_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, ok);
    }

    #[tokio::test]
    async fn test_foreign_appointments_are_not_found() {
        let h = Harness::new();
        let (mia, _) = h.account("Mia", Role::User).await;
        let (eve, _) = h.account("Eve", Role::User).await;
        h.doctor("Dr. Ada").await;
        let appt = h.booking(&mia, "Dr. Ada").await;
        let id = appt.appointment_id;

        assert_eq!(get(&h.state, &eve, id).await.unwrap_err().code(), "NOT_FOUND");
        assert_eq!(
            update(&h.state, &eve, id, full_update("Dr. Ada", "2025-07-01T15:30:00Z", None))
                .await
                .unwrap_err()
                .code(),
            "NOT_FOUND"
        );
        assert_eq!(
            update_status(&h.state, &eve, id, AppointmentStatus::Cancelled)
                .await
                .unwrap_err()
                .code(),
            "NOT_FOUND"
        );
        assert_eq!(
            guard::request_deletion::<Appointment>(&h.state, &eve, id)
                .await
                .unwrap_err()
                .code(),
            "NOT_FOUND"
        );
        assert_eq!(
            list_for_user(&h.state, &eve, mia.user_id, &PageRequest::new(0, 5))
                .await
                .unwrap_err()
                .code(),
            "NOT_FOUND"
        );

        let eve_page = list(&h.state, &eve, &PageRequest::new(0, 5)).await.unwrap();
        assert!(eve_page.content.is_empty());
        assert_eq!(eve_page.total_pages, 1);
    }

    #[tokio::test]
    async fn test_owner_paging_over_two_pending_bookings() {
        let h = Harness::new();
        let (user, _) = h.account("Mia", Role::User).await;
        let (other, _) = h.account("Eve", Role::User).await;
        h.doctor("Dr. Ada").await;
        let first = h.booking(&user, "Dr. Ada").await;
        h.booking(&other, "Dr. Ada").await;
        let second = h.booking(&user, "Dr. Ada").await;

        let p0 = list(&h.state, &user, &PageRequest::new(0, 1)).await.unwrap();
        assert_eq!(p0.content.len(), 1);
        assert_eq!(p0.total_pages, 2);
        let p1 = list(&h.state, &user, &PageRequest::new(1, 1)).await.unwrap();
        assert_eq!(p1.content.len(), 1);

        // Newest id first.
        assert_eq!(p0.content[0].appointment_id, second.appointment_id);
        assert_eq!(p1.content[0].appointment_id, first.appointment_id);
    }

    #[tokio::test]
    async fn test_status_patch_keeps_other_fields() {
        let h = Harness::new();
        let (user, _) = h.account("Mia", Role::User).await;
        let (staff, _) = h.account("Sam", Role::Staff).await;
        h.doctor("Dr. Ada").await;
        let appt = h.booking(&user, "Dr. Ada").await;

        update_status(&h.state, &staff, appt.appointment_id, AppointmentStatus::Confirmed)
            .await
            .unwrap();
        let done = update_status(&h.state, &staff, appt.appointment_id, AppointmentStatus::Completed)
            .await
            .unwrap();

        assert_eq!(done.status, AppointmentStatus::Completed);
        assert_eq!(done.date, appt.date);
        assert_eq!(done.doctor_name, appt.doctor_name);
        assert_eq!(done.user_name, appt.user_name);

        // No terminal state for staff.
        let back = update_status(&h.state, &staff, appt.appointment_id, AppointmentStatus::Pending)
            .await
            .unwrap();
        assert_eq!(back.status, AppointmentStatus::Pending);
    }

    #[tokio::test]
    async fn test_staff_full_update_sets_status_and_name() {
        let h = Harness::new();
        let (user, _) = h.account("Mia", Role::User).await;
        let (staff, _) = h.account("Sam", Role::Staff).await;
        h.doctor("Dr. Ada").await;
        let appt = h.booking(&user, "Dr. Ada").await;

        let mut req = full_update("Dr. Ada", "2025-08-01T08:00:00Z", Some("rescheduled"));
        req.user_name = Some("Mia Rossi".into());
        let saved = update(&h.state, &staff, appt.appointment_id, req).await.unwrap();
        assert_eq!(saved.status, AppointmentStatus::Rescheduled);
        assert_eq!(saved.user_name, "Mia Rossi");
    }

    #[tokio::test]
    async fn test_staff_listing_recomputes_emails() {
        let h = Harness::new();
        let (user, _) = h.account("Mia", Role::User).await;
        let (staff, _) = h.account("Sam", Role::Staff).await;
        h.doctor("Dr. Ada").await;
        let appt = h.booking(&user, "Dr. Ada").await;

        let mut account = h
            .state
            .stores
            .users
            .get_by_id(user.user_id)
            .await
            .unwrap()
            .unwrap();
        account.email = "mia.new@example.com".into();
        h.state.stores.users.update(&account).await.unwrap();

        let page = list(&h.state, &staff, &PageRequest::new(0, 10)).await.unwrap();
        assert_eq!(page.content[0].user_email, "mia.new@example.com");
        let single = get(&h.state, &staff, appt.appointment_id).await.unwrap();
        assert_eq!(single.user_email, "mia.new@example.com");

        // Stored value is untouched; enrichment is read-time only.
        let stored = h
            .state
            .stores
            .appointments
            .get_by_id(appt.appointment_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.user_email, user.email);
    }

    #[tokio::test]
    async fn test_doctor_rename_does_not_touch_bookings() {
        let h = Harness::new();
        let (user, _) = h.account("Mia", Role::User).await;
        let mut doc = h.doctor("Dr. Ada").await;
        let appt = h.booking(&user, "Dr. Ada").await;

        doc.name = "Dr. Ada Lovelace".into();
        h.state.stores.doctors.update(&doc).await.unwrap();

        let stored = get(&h.state, &user, appt.appointment_id).await.unwrap();
        assert_eq!(stored.doctor_name, "Dr. Ada");
    }

    #[tokio::test]
    async fn test_bookings_stay_editable_after_doctor_rename() {
        let h = Harness::new();
        let (user, _) = h.account("Mia", Role::User).await;
        let (staff, _) = h.account("Sam", Role::Staff).await;
        let mut doc = h.doctor("Dr. Ada").await;
        h.doctor("Dr. Bo").await;
        let appt = h.booking(&user, "Dr. Ada").await;

        doc.name = "Dr. Ada Lovelace".into();
        h.state.stores.doctors.update(&doc).await.unwrap();

        let moved = update(
            &h.state,
            &user,
            appt.appointment_id,
            full_update("dr. ada", "2025-07-01T15:30:00Z", None),
        )
        .await
        .unwrap();
        assert_eq!(moved.doctor_name, "Dr. Ada");
        assert_eq!(moved.date, parse_instant("2025-07-01T15:30:00Z").unwrap());

        let confirmed = update(
            &h.state,
            &staff,
            appt.appointment_id,
            full_update("Dr. Ada", "2025-07-01T15:30:00Z", Some("CONFIRMED")),
        )
        .await
        .unwrap();
        assert_eq!(confirmed.status, AppointmentStatus::Confirmed);
        assert_eq!(confirmed.doctor_name, "Dr. Ada");

        // Pointing at a different doctor is still checked.
        let err = update(
            &h.state,
            &staff,
            appt.appointment_id,
            full_update("Dr. Nobody", "2025-07-01T15:30:00Z", None),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_DOCTOR");
        let repointed = update(
            &h.state,
            &staff,
            appt.appointment_id,
            full_update("dr. bo", "2025-07-01T15:30:00Z", None),
        )
        .await
        .unwrap();
        assert_eq!(repointed.doctor_name, "Dr. Bo");
    }

    #[tokio::test]
    async fn test_slot_conflicts_only_when_enabled() {
        let relaxed = Harness::new();
        let (u1, _) = relaxed.account("Mia", Role::User).await;
        let (u2, _) = relaxed.account("Eve", Role::User).await;
        relaxed.doctor("Dr. Ada").await;
        let when = "2025-09-01T10:00:00Z";
        create_for_self(&relaxed.state, &u1, booking("Dr. Ada", when)).await.unwrap();
        create_for_self(&relaxed.state, &u2, booking("Dr. Ada", when)).await.unwrap();

        let strict = Harness::with_scheduling(SchedulingPolicy {
            enforce_slot_conflicts: true,
        });
        let (u1, _) = strict.account("Mia", Role::User).await;
        let (u2, _) = strict.account("Eve", Role::User).await;
        let (staff, _) = strict.account("Sam", Role::Staff).await;
        strict.doctor("Dr. Ada").await;
        let taken = create_for_self(&strict.state, &u1, booking("Dr. Ada", when)).await.unwrap();
        let err = create_for_self(&strict.state, &u2, booking("Dr. Ada", when))
            .await
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::CONFLICT);

        // A cancelled booking frees the slot.
        update_status(&strict.state, &staff, taken.appointment_id, AppointmentStatus::Cancelled)
            .await
            .unwrap();
        let rebooked = create_for_self(&strict.state, &u2, booking("Dr. Ada", when)).await.unwrap();

        // The cancelled booking cannot come back into a slot that was rebooked.
        let err = update_status(&strict.state, &staff, taken.appointment_id, AppointmentStatus::Confirmed)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SLOT_TAKEN");
        let err = update(
            &strict.state,
            &staff,
            taken.appointment_id,
            full_update("Dr. Ada", when, Some("PENDING")),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "SLOT_TAKEN");
        let stored = strict
            .state
            .stores
            .appointments
            .get_by_id(taken.appointment_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, AppointmentStatus::Cancelled);

        // Once the slot is free again it may be reactivated.
        update_status(&strict.state, &staff, rebooked.appointment_id, AppointmentStatus::Cancelled)
            .await
            .unwrap();
        let back = update_status(&strict.state, &staff, taken.appointment_id, AppointmentStatus::Confirmed)
            .await
            .unwrap();
        assert_eq!(back.status, AppointmentStatus::Confirmed);

        // A status change that keeps a live booking in place never clashes with itself.
        let done = update_status(&strict.state, &staff, taken.appointment_id, AppointmentStatus::Completed)
            .await
            .unwrap();
        assert_eq!(done.status, AppointmentStatus::Completed);
    }
}
