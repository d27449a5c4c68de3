//! Link Lifecycle Manager: assign/remove roles while keeping one row per pair.

use chrono::{DateTime, Utc};
use tracing::{debug, error, instrument, warn};

use a11n_auth::{LinkChange, Role, User, UserRole};
use a11n_core::{DomainResult, RoleId, UserId};

use crate::error::Result;
use crate::store::{EntityStore, StoreError, StoreTx};

type Planner = fn(Option<UserRole>, UserId, RoleId, DateTime<Utc>) -> DomainResult<LinkChange>;

/// Mutates the user↔role association.
///
/// Lookup and write for one call share a single transaction. A unique
/// violation on insert means a concurrent caller created the link first and
/// is reported as "nothing changed".
#[derive(Debug, Clone)]
pub struct LinkManager<S> {
    store: S,
}

impl<S: EntityStore> LinkManager<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Give `user` the `role`. `true` if a link was created or undeleted.
    #[instrument(skip(self, role, user), fields(role = %role.id, user = %user.id), err)]
    pub async fn assign(&self, role: &Role, user: &User) -> Result<bool> {
        self.transition("assign", UserRole::plan_assign, role, user).await
    }

    /// Take the `role` from `user`. `true` if a live link was soft-deleted.
    #[instrument(skip(self, role, user), fields(role = %role.id, user = %user.id), err)]
    pub async fn remove(&self, role: &Role, user: &User) -> Result<bool> {
        self.transition("remove", UserRole::plan_remove, role, user).await
    }

    async fn transition(&self, op: &'static str, plan: Planner, role: &Role, user: &User) -> Result<bool> {
        let mut tx = self.store.begin().await?;
        let existing = tx.find_link(user.id, role.id).await?;

        let change = match plan(existing, user.id, role.id, Utc::now()) {
            Ok(change) => change,
            Err(err) => {
                error!(op, error = %err, "link lookup returned a row for another pair");
                tx.rollback().await?;
                return Err(err.into());
            }
        };

        match change {
            LinkChange::Unchanged => {
                tx.rollback().await?;
                debug!(op, "link already in requested state");
                Ok(false)
            }
            LinkChange::Insert(link) => match tx.insert_link(&link).await {
                Ok(()) => {
                    tx.commit().await?;
                    debug!(op, link = %link.id, "link created");
                    Ok(true)
                }
                Err(StoreError::UniqueViolation { constraint }) => {
                    warn!(op, %constraint, "lost race creating link; already assigned");
                    tx.rollback().await?;
                    Ok(false)
                }
                Err(err) => Err(err.into()),
            },
            LinkChange::Update(link) => {
                tx.update_link(&link).await?;
                tx.commit().await?;
                debug!(op, link = %link.id, deleted = link.lifecycle.is_deleted(), "link updated");
                Ok(true)
            }
        }
    }
}
