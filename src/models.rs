use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::guard::DeletionGuard;
use crate::middleware::auth_context::SessionResolver;
use crate::store::{Resource, ResourceKind, ResourceStore, Stores};

#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub sessions: Arc<dyn SessionResolver>,
    pub guard: DeletionGuard,
    pub paging: PagingLimits,
    pub scheduling: SchedulingPolicy,
}

#[derive(Debug, Clone, Copy)]
pub struct PagingLimits {
    pub default_page_size: i64,
    pub max_page_size: i64,
}

impl Default for PagingLimits {
    fn default() -> Self {
        Self {
            default_page_size: 10,
            max_page_size: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulingPolicy {
    /// Reject a second live booking of the same doctor at the same instant.
    pub enforce_slot_conflicts: bool,
}

/* -------------------------
   Enumerations
--------------------------*/

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Staff,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Staff => "STAFF",
            Role::Admin => "ADMIN",
        }
    }

    pub fn is_privileged(self) -> bool {
        matches!(self, Role::Staff | Role::Admin)
    }
}

impl FromStr for Role {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USER" => Ok(Role::User),
            "STAFF" => Ok(Role::Staff),
            "ADMIN" => Ok(Role::Admin),
            other => Err(ApiError::invalid_argument(format!("unknown role: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    Rescheduled,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 5] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::Completed,
        AppointmentStatus::Rescheduled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "PENDING",
            AppointmentStatus::Confirmed => "CONFIRMED",
            AppointmentStatus::Cancelled => "CANCELLED",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::Rescheduled => "RESCHEDULED",
        }
    }
}

impl FromStr for AppointmentStatus {
    type Err = ApiError;

    /// Accepts `PENDING`, `"PENDING"` (a bare JSON string) and any casing.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim().trim_matches('"').trim();
        AppointmentStatus::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(raw))
            .ok_or_else(|| ApiError::invalid_argument(format!("unknown appointment status: {raw}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Mild,
    Moderate,
    Severe,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Mild => "mild",
            Severity::Moderate => "moderate",
            Severity::Severe => "severe",
        }
    }
}

impl FromStr for Severity {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Severity::None),
            "mild" => Ok(Severity::Mild),
            "moderate" => Ok(Severity::Moderate),
            "severe" => Ok(Severity::Severe),
            other => Err(ApiError::invalid_argument(format!("unknown severity: {other}"))),
        }
    }
}

/* -------------------------
   Records
--------------------------*/

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: i64,
    pub email: String,
    pub name: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub role: Role,
    /// Argon2 PHC string, kept by the `CredentialStore` side of each backend.
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Doctor {
    pub doctor_id: i64,
    pub name: String,
    pub qualifications: String,
    pub speciality: String,
}

#[derive(Debug, Clone)]
pub struct NewDoctor {
    pub name: String,
    pub qualifications: String,
    pub speciality: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub product_id: i64,
    pub name: String,
    pub brand: String,
    pub description: String,
    pub image_link: String,
    pub product_link: String,
    pub skin_type: String,
}

#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub brand: String,
    pub description: String,
    pub image_link: String,
    pub product_link: String,
    pub skin_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub appointment_id: i64,
    /// `None` for walk-in bookings made by staff for someone without an account.
    pub user_id: Option<i64>,
    pub user_name: String,
    pub user_email: String,
    pub doctor_name: String,
    pub date: DateTime<Utc>,
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub user_id: Option<i64>,
    pub user_name: String,
    pub user_email: String,
    pub doctor_name: String,
    pub date: DateTime<Utc>,
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    pub history_id: i64,
    pub user_id: i64,
    pub severity: Severity,
    pub confidence: f64,
    pub diagnosis: String,
    pub suggestion: String,
    pub analysis_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAnalysisRecord {
    pub user_id: i64,
    pub severity: Severity,
    pub confidence: f64,
    pub diagnosis: String,
    pub suggestion: String,
    pub analysis_time: DateTime<Utc>,
}

/* -------------------------
   Resource bindings
--------------------------*/

impl Resource for User {
    type Draft = NewUser;
    const KIND: ResourceKind = ResourceKind::User;

    fn id(&self) -> i64 {
        self.user_id
    }

    fn with_id(id: i64, d: NewUser) -> Self {
        User {
            user_id: id,
            email: d.email,
            name: d.name,
            role: d.role,
        }
    }

    // An account owns its own record.
    fn owner_id(&self) -> Option<i64> {
        Some(self.user_id)
    }

    fn search_fields(&self) -> Vec<&str> {
        vec![self.name.as_str(), self.email.as_str()]
    }

    fn display_label(&self) -> String {
        format!("{} <{}>", self.name, self.email)
    }

    fn store(stores: &Stores) -> &Arc<dyn ResourceStore<Self>> {
        &stores.users
    }
}

impl Resource for Doctor {
    type Draft = NewDoctor;
    const KIND: ResourceKind = ResourceKind::Doctor;

    fn id(&self) -> i64 {
        self.doctor_id
    }

    fn with_id(id: i64, d: NewDoctor) -> Self {
        Doctor {
            doctor_id: id,
            name: d.name,
            qualifications: d.qualifications,
            speciality: d.speciality,
        }
    }

    fn search_fields(&self) -> Vec<&str> {
        vec![
            self.name.as_str(),
            self.qualifications.as_str(),
            self.speciality.as_str(),
        ]
    }

    fn display_label(&self) -> String {
        format!("{} ({})", self.name, self.speciality)
    }

    fn store(stores: &Stores) -> &Arc<dyn ResourceStore<Self>> {
        &stores.doctors
    }
}

impl Resource for Product {
    type Draft = NewProduct;
    const KIND: ResourceKind = ResourceKind::Product;

    fn id(&self) -> i64 {
        self.product_id
    }

    fn with_id(id: i64, d: NewProduct) -> Self {
        Product {
            product_id: id,
            name: d.name,
            brand: d.brand,
            description: d.description,
            image_link: d.image_link,
            product_link: d.product_link,
            skin_type: d.skin_type,
        }
    }

    fn search_fields(&self) -> Vec<&str> {
        vec![
            self.name.as_str(),
            self.brand.as_str(),
            self.skin_type.as_str(),
            self.description.as_str(),
        ]
    }

    fn display_label(&self) -> String {
        if self.brand.is_empty() {
            self.name.clone()
        } else {
            format!("{} by {}", self.name, self.brand)
        }
    }

    fn store(stores: &Stores) -> &Arc<dyn ResourceStore<Self>> {
        &stores.products
    }
}

impl Resource for Appointment {
    type Draft = NewAppointment;
    const KIND: ResourceKind = ResourceKind::Appointment;

    fn id(&self) -> i64 {
        self.appointment_id
    }

    fn with_id(id: i64, d: NewAppointment) -> Self {
        Appointment {
            appointment_id: id,
            user_id: d.user_id,
            user_name: d.user_name,
            user_email: d.user_email,
            doctor_name: d.doctor_name,
            date: d.date,
            status: d.status,
        }
    }

    fn owner_id(&self) -> Option<i64> {
        self.user_id
    }

    fn search_fields(&self) -> Vec<&str> {
        vec![
            self.user_name.as_str(),
            self.user_email.as_str(),
            self.doctor_name.as_str(),
            self.status.as_str(),
        ]
    }

    fn display_label(&self) -> String {
        format!(
            "{} with {} on {}",
            self.user_name,
            self.doctor_name,
            self.date.format("%Y-%m-%d %H:%M UTC")
        )
    }

    fn owner_locked(&self) -> bool {
        self.status != AppointmentStatus::Pending
    }

    fn store(stores: &Stores) -> &Arc<dyn ResourceStore<Self>> {
        &stores.appointments
    }
}

impl Resource for AnalysisRecord {
    type Draft = NewAnalysisRecord;
    const KIND: ResourceKind = ResourceKind::AnalysisRecord;

    fn id(&self) -> i64 {
        self.history_id
    }

    fn with_id(id: i64, d: NewAnalysisRecord) -> Self {
        AnalysisRecord {
            history_id: id,
            user_id: d.user_id,
            severity: d.severity,
            confidence: d.confidence,
            diagnosis: d.diagnosis,
            suggestion: d.suggestion,
            analysis_time: d.analysis_time,
        }
    }

    fn owner_id(&self) -> Option<i64> {
        Some(self.user_id)
    }

    fn search_fields(&self) -> Vec<&str> {
        vec![
            self.severity.as_str(),
            self.diagnosis.as_str(),
            self.suggestion.as_str(),
        ]
    }

    fn display_label(&self) -> String {
        format!(
            "{} analysis from {}",
            self.severity.as_str(),
            self.analysis_time.format("%Y-%m-%d %H:%M UTC")
        )
    }

    fn store(stores: &Stores) -> &Arc<dyn ResourceStore<Self>> {
        &stores.analyses
    }
}

/* -------------------------
   Helpers
--------------------------*/

/// Parses an appointment instant.
///
/// RFC 3339 is preferred; the zone-less `YYYY-MM-DDTHH:MM[:SS]` form sent by
/// `datetime-local` inputs is read as UTC.
pub fn parse_instant(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(ApiError::invalid_argument(format!(
        "date must be an RFC 3339 instant, got {raw:?}"
    )))
}

pub fn required_text(field: &str, value: &str) -> Result<String, ApiError> {
    let v = value.trim();
    if v.is_empty() {
        return Err(ApiError::invalid_argument(format!("{field} is required")));
    }
    Ok(v.to_string())
}
