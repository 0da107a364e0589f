//! Authorization predicate table.
//!
//! Every engine asks the same question, keyed by
//! `(role, resource kind, operation, record ownership)`; nothing else in the
//! crate makes role decisions.

use crate::error::ApiError;
use crate::middleware::auth_context::AuthContext;
use crate::models::Role;
use crate::store::{Resource, ResourceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    List,
    Read,
    Create,
    Update,
    UpdateStatus,
    Delete,
}

impl Operation {
    pub fn verb(self) -> &'static str {
        match self {
            Operation::List => "list",
            Operation::Read => "read",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::UpdateStatus => "change the status of",
            Operation::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    Unauthorized,
    Forbidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    All,
    OwnOnly,
    Denied(Denial),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Own,
    Foreign,
    /// No record to compare against (creates, already-deleted ids), or a
    /// kind without owners.
    Unknown,
}

impl Ownership {
    pub fn of(auth: &AuthContext, kind: ResourceKind, owner_id: Option<i64>) -> Self {
        if !kind.has_owners() {
            Ownership::Unknown
        } else if owner_id == Some(auth.user_id) {
            Ownership::Own
        } else {
            Ownership::Foreign
        }
    }
}

pub fn access(role: Role, kind: ResourceKind, op: Operation) -> Access {
    use Access::*;
    use Operation::*;
    use ResourceKind as K;

    if role.is_privileged() {
        return match (kind, op) {
            (K::AnalysisRecord, Update | UpdateStatus) => Denied(Denial::Forbidden),
            (K::User | K::Doctor | K::Product, UpdateStatus) => Denied(Denial::Forbidden),
            _ => All,
        };
    }

    match (kind, op) {
        (K::User, List) => Denied(Denial::Unauthorized),
        (K::User, Read) => OwnOnly,
        (K::User, _) => Denied(Denial::Forbidden),

        (K::Doctor | K::Product, List | Read) => All,
        (K::Doctor | K::Product, _) => Denied(Denial::Forbidden),

        (K::Appointment, Create) => All,
        (K::Appointment, List | Read | Update | Delete) => OwnOnly,
        (K::Appointment, UpdateStatus) => Denied(Denial::Forbidden),

        (K::AnalysisRecord, List | Read | Delete) => OwnOnly,
        (K::AnalysisRecord, _) => Denied(Denial::Forbidden),
    }
}

fn denial_error(denial: Denial, kind: ResourceKind, op: Operation) -> ApiError {
    let message = format!("not allowed to {} {}", op.verb(), kind.label());
    match denial {
        Denial::Unauthorized => ApiError::Unauthorized("NOT_PERMITTED", message),
        Denial::Forbidden => ApiError::Forbidden("FORBIDDEN", message),
    }
}

/// Checks a record-level operation.
///
/// A non-privileged caller touching someone else's record always sees
/// `NotFound`, whatever the table says, so existence is never confirmed.
pub fn authorize(
    auth: &AuthContext,
    kind: ResourceKind,
    op: Operation,
    ownership: Ownership,
) -> Result<(), ApiError> {
    let hide = !auth.is_privileged() && ownership == Ownership::Foreign;
    match access(auth.role, kind, op) {
        Access::All => Ok(()),
        Access::OwnOnly if ownership == Ownership::Foreign => Err(ApiError::not_found(kind)),
        Access::OwnOnly => Ok(()),
        Access::Denied(_) if hide => Err(ApiError::not_found(kind)),
        Access::Denied(d) => {
            tracing::warn!(
                user_id = auth.user_id,
                role = auth.role.as_str(),
                kind = kind.label(),
                op = op.verb(),
                "operation denied"
            );
            Err(denial_error(d, kind, op))
        }
    }
}

/// [`authorize`] against a loaded record, plus the owner lock: once a record
/// reports [`Resource::owner_locked`], its owner may no longer update or
/// delete it.
pub fn authorize_record<R: Resource>(
    auth: &AuthContext,
    op: Operation,
    record: &R,
) -> Result<(), ApiError> {
    let ownership = Ownership::of(auth, R::KIND, record.owner_id());
    authorize(auth, R::KIND, op, ownership)?;

    if !auth.is_privileged()
        && matches!(op, Operation::Update | Operation::Delete)
        && record.owner_locked()
    {
        tracing::warn!(
            user_id = auth.user_id,
            kind = R::KIND.label(),
            id = record.id(),
            "owner lock rejected {}",
            op.verb()
        );
        return Err(ApiError::forbidden(format!(
            "{} can no longer be changed by its owner",
            R::KIND.label()
        )));
    }
    Ok(())
}

/// Resolves the owner filter a list call must apply.
pub fn list_scope(auth: &AuthContext, kind: ResourceKind) -> Result<Option<i64>, ApiError> {
    match access(auth.role, kind, Operation::List) {
        Access::All => Ok(None),
        Access::OwnOnly => Ok(Some(auth.user_id)),
        Access::Denied(d) => {
            tracing::warn!(user_id = auth.user_id, kind = kind.label(), "list denied");
            Err(denial_error(d, kind, Operation::List))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::principal;

    #[test]
    fn test_privileged_roles_have_full_access_except_status_outside_appointments() {
        for role in [Role::Staff, Role::Admin] {
            assert_eq!(
                access(role, ResourceKind::Appointment, Operation::UpdateStatus),
                Access::All
            );
            assert_eq!(
                access(role, ResourceKind::User, Operation::List),
                Access::All
            );
            assert_eq!(
                access(role, ResourceKind::AnalysisRecord, Operation::Update),
                Access::Denied(Denial::Forbidden)
            );
            assert_eq!(
                access(role, ResourceKind::Doctor, Operation::UpdateStatus),
                Access::Denied(Denial::Forbidden)
            );
        }
    }

    #[test]
    fn test_user_cannot_list_users() {
        let user = principal(3, Role::User);
        let err = list_scope(&user, ResourceKind::User).unwrap_err();
        assert_eq!(err.code(), "NOT_PERMITTED");
    }

    #[test]
    fn test_user_list_scope_is_own_records() {
        let user = principal(3, Role::User);
        assert_eq!(list_scope(&user, ResourceKind::Appointment).unwrap(), Some(3));
        assert_eq!(list_scope(&user, ResourceKind::AnalysisRecord).unwrap(), Some(3));
        assert_eq!(list_scope(&user, ResourceKind::Doctor).unwrap(), None);

        let staff = principal(1, Role::Staff);
        assert_eq!(list_scope(&staff, ResourceKind::Appointment).unwrap(), None);
    }

    #[test]
    fn test_foreign_records_are_hidden_from_users() {
        let user = principal(3, Role::User);
        for op in [
            Operation::Read,
            Operation::Update,
            Operation::UpdateStatus,
            Operation::Delete,
        ] {
            let err = authorize(&user, ResourceKind::Appointment, op, Ownership::Foreign)
                .unwrap_err();
            assert_eq!(err.code(), "NOT_FOUND", "{op:?}");
        }
    }

    #[test]
    fn test_user_status_change_on_own_appointment_is_forbidden() {
        let user = principal(3, Role::User);
        let err = authorize(
            &user,
            ResourceKind::Appointment,
            Operation::UpdateStatus,
            Ownership::Own,
        )
        .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[test]
    fn test_user_catalogue_mutation_is_forbidden() {
        let user = principal(3, Role::User);
        let err = authorize(&user, ResourceKind::Product, Operation::Create, Ownership::Unknown)
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
        assert!(authorize(&user, ResourceKind::Product, Operation::Read, Ownership::Unknown).is_ok());
    }

    #[test]
    fn test_ownership_of() {
        let user = principal(3, Role::User);
        let k = ResourceKind::Appointment;
        assert_eq!(Ownership::of(&user, k, Some(3)), Ownership::Own);
        assert_eq!(Ownership::of(&user, k, Some(4)), Ownership::Foreign);
        // Walk-in bookings belong to nobody.
        assert_eq!(Ownership::of(&user, k, None), Ownership::Foreign);
        assert_eq!(
            Ownership::of(&user, ResourceKind::Doctor, None),
            Ownership::Unknown
        );
    }
}
