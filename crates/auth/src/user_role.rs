//! User↔Role association record and its lifecycle transitions.
//!
//! At most one row exists per `(user, role)` pair regardless of delete state:
//! removing a role soft-deletes the row and re-assigning it undeletes the same
//! row. The planning functions here are pure; the caller runs the lookup and
//! the resulting write inside one storage transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use a11n_core::{DomainError, DomainResult, Entity, Lifecycle, RoleId, UserId, UserRoleId};

/// Link between a user and a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRole {
    #[serde(rename = "pk")]
    pub id: UserRoleId,
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
    pub user: UserId,
    pub role: RoleId,
}

/// Storage action required to carry out an assign/remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkChange {
    /// No row existed; insert this one.
    Insert(UserRole),
    /// Existing row changed delete state; write it back.
    Update(UserRole),
    /// Nothing to do.
    Unchanged,
}

impl LinkChange {
    /// Value reported to the caller of assign/remove.
    pub fn changed(&self) -> bool {
        !matches!(self, LinkChange::Unchanged)
    }
}

impl UserRole {
    pub fn link(user: UserId, role: RoleId, now: DateTime<Utc>) -> Self {
        Self {
            id: UserRoleId::new(),
            lifecycle: Lifecycle::new(now),
            user,
            role,
        }
    }

    /// Reject a row that does not belong to the requested pair.
    ///
    /// A mismatch means the lookup itself is broken; callers must abort.
    pub fn ensure_pair(&self, user: UserId, role: RoleId) -> DomainResult<()> {
        if self.user != user || self.role != role {
            return Err(DomainError::integrity(format!(
                "link {} references (user {}, role {}), expected (user {}, role {})",
                self.id, self.user, self.role, user, role
            )));
        }
        Ok(())
    }

    /// Decide what `assign(role, user)` must do given the current row (any delete state).
    pub fn plan_assign(
        existing: Option<UserRole>,
        user: UserId,
        role: RoleId,
        now: DateTime<Utc>,
    ) -> DomainResult<LinkChange> {
        match existing {
            None => Ok(LinkChange::Insert(UserRole::link(user, role, now))),
            Some(mut row) => {
                row.ensure_pair(user, role)?;
                if row.lifecycle.undelete(now) {
                    Ok(LinkChange::Update(row))
                } else {
                    Ok(LinkChange::Unchanged)
                }
            }
        }
    }

    /// Decide what `remove(role, user)` must do given the current row (any delete state).
    pub fn plan_remove(
        existing: Option<UserRole>,
        user: UserId,
        role: RoleId,
        now: DateTime<Utc>,
    ) -> DomainResult<LinkChange> {
        match existing {
            None => Ok(LinkChange::Unchanged),
            Some(mut row) => {
                row.ensure_pair(user, role)?;
                if row.lifecycle.soft_delete(now) {
                    Ok(LinkChange::Update(row))
                } else {
                    Ok(LinkChange::Unchanged)
                }
            }
        }
    }
}

impl Entity for UserRole {
    type Id = UserRoleId;

    const KIND: &'static str = "userrole";

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }
}
