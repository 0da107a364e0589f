//! Fixtures shared by the unit tests.

use std::sync::Arc;

use chrono::Duration;
use uuid::Uuid;

use crate::guard::DeletionGuard;
use crate::lifecycle::{self, BookingRequest};
use crate::middleware::auth_context::{AuthContext, MemorySessions};
use crate::models::{
    AppState, Appointment, Doctor, NewDoctor, NewUser, PagingLimits, Role, SchedulingPolicy,
};
use crate::store::Stores;

/// A caller that exists only as a session, with no account row behind it.
pub fn principal(user_id: i64, role: Role) -> AuthContext {
    AuthContext {
        user_id,
        email: format!("user{user_id}@example.com"),
        name: format!("User {user_id}"),
        role,
        session_token_id: Uuid::new_v4(),
    }
}

pub fn test_guard() -> DeletionGuard {
    DeletionGuard::new(b"test-secret", Duration::minutes(5))
}

/// In-memory application state plus its session table.
pub struct Harness {
    pub state: AppState,
    pub sessions: Arc<MemorySessions>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_scheduling(SchedulingPolicy::default())
    }

    pub fn with_scheduling(scheduling: SchedulingPolicy) -> Self {
        let sessions = Arc::new(MemorySessions::new());
        let state = AppState {
            stores: Stores::in_memory(),
            sessions: sessions.clone(),
            guard: test_guard(),
            paging: PagingLimits::default(),
            scheduling,
        };
        Self { state, sessions }
    }

    /// Stores an account and opens a session for it. Returns the session and
    /// its bearer token.
    pub async fn account(&self, name: &str, role: Role) -> (AuthContext, String) {
        let email = format!("{}@example.com", name.to_lowercase().replace(' ', "."));
        let user = self
            .state
            .stores
            .users
            .create(NewUser {
                email: email.clone(),
                name: name.to_string(),
                role,
                password_hash: String::new(),
            })
            .await
            .unwrap();
        let token = format!("token-{}-{}", user.user_id, Uuid::new_v4());
        let ctx = self
            .sessions
            .register(&token, user.user_id, &email, name, role)
            .await;
        (ctx, token)
    }

    pub async fn doctor(&self, name: &str) -> Doctor {
        self.state
            .stores
            .doctors
            .create(NewDoctor {
                name: name.to_string(),
                qualifications: "MBBS".into(),
                speciality: "Dermatology".into(),
            })
            .await
            .unwrap()
    }

    /// A PENDING booking made by `owner` through the normal owner path.
    pub async fn booking(&self, owner: &AuthContext, doctor_name: &str) -> Appointment {
        lifecycle::create_for_self(
            &self.state,
            owner,
            BookingRequest {
                date: "2025-05-01T10:00:00Z".into(),
                doctor_name: doctor_name.to_string(),
                status: None,
            },
        )
        .await
        .unwrap()
    }
}
