//! Entity Store boundary.
//!
//! This module defines the storage contract the services are written against:
//! a transactional store handing out one transaction per multi-step operation.
//! Nothing here assumes a particular backend.
//!
//! ## Transactions
//!
//! - [`EntityStore::begin`] opens a read-write transaction.
//! - [`EntityStore::begin_read`] opens a read-only transaction over one
//!   consistent snapshot; writes through it fail.
//! - A transaction that is dropped without [`StoreTx::commit`] is rolled back.
//! - After `commit`/`rollback` every further call fails with
//!   [`StoreError::Finished`].

pub mod in_memory;
pub mod postgres;
#[cfg(test)]
pub(crate) mod scripted;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

use std::sync::Arc;

use thiserror::Error;

use a11n_auth::{Role, Token, User, UserRole};
use a11n_core::{RoleId, TokenId, UserId};

/// Keyset position in the roles-of-user ordering: `(priority, pk)`.
pub type RolePageKey = (i32, RoleId);

/// Keyset position in the users-of-role ordering: `(displayname, pk)`.
pub type UserPageKey = (String, UserId);

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write (expected under races).
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    /// Referential or check constraint failure, or a row that does not match its key.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// Update of a row that does not exist.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("write attempted through a read-only transaction")]
    ReadOnly,

    #[error("transaction already finished")]
    Finished,

    /// Connection, pool or serialization failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn unique(constraint: impl Into<String>) -> Self {
        Self::UniqueViolation {
            constraint: constraint.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation { .. })
    }
}

/// Unique constraint names shared by every backend.
pub mod constraints {
    pub const USERS_EMAIL: &str = "users_email_key";
    pub const USERS_SMS: &str = "users_sms_key";
    pub const USER_ROLE_PAIR: &str = "userroles_user_role_key";
}

/// Source of transactions.
#[async_trait::async_trait]
pub trait EntityStore: Send + Sync {
    type Tx: StoreTx + 'static;

    async fn begin(&self) -> StoreResult<Self::Tx>;

    async fn begin_read(&self) -> StoreResult<Self::Tx>;
}

#[async_trait::async_trait]
impl<S> EntityStore for Arc<S>
where
    S: EntityStore + ?Sized,
{
    type Tx = S::Tx;

    async fn begin(&self) -> StoreResult<Self::Tx> {
        (**self).begin().await
    }

    async fn begin_read(&self) -> StoreResult<Self::Tx> {
        (**self).begin_read().await
    }
}

/// Operations available inside one transaction.
///
/// `get_*` lookups return rows in any delete state; filtering on liveness is
/// the caller's job. `delete_*` are hard deletes and report whether a row was
/// removed.
///
/// Inside a transaction from [`EntityStore::begin`], a row returned by a
/// point lookup (`get_*`, `find_link`) cannot be changed by another
/// transaction until this one finishes.
#[async_trait::async_trait]
pub trait StoreTx: Send {
    async fn get_user(&mut self, id: UserId) -> StoreResult<Option<User>>;
    async fn insert_user(&mut self, user: &User) -> StoreResult<()>;
    async fn update_user(&mut self, user: &User) -> StoreResult<()>;
    async fn delete_user(&mut self, id: UserId) -> StoreResult<bool>;

    async fn get_role(&mut self, id: RoleId) -> StoreResult<Option<Role>>;
    async fn insert_role(&mut self, role: &Role) -> StoreResult<()>;
    async fn update_role(&mut self, role: &Role) -> StoreResult<()>;
    async fn delete_role(&mut self, id: RoleId) -> StoreResult<bool>;

    async fn get_token(&mut self, id: TokenId) -> StoreResult<Option<Token>>;
    async fn insert_token(&mut self, token: &Token) -> StoreResult<()>;
    async fn update_token(&mut self, token: &Token) -> StoreResult<()>;
    async fn delete_token(&mut self, id: TokenId) -> StoreResult<bool>;

    /// The link row for the pair, live or soft-deleted.
    async fn find_link(&mut self, user: UserId, role: RoleId) -> StoreResult<Option<UserRole>>;
    async fn insert_link(&mut self, link: &UserRole) -> StoreResult<()>;
    async fn update_link(&mut self, link: &UserRole) -> StoreResult<()>;

    /// Live roles linked to `user` through a live link, ordered by
    /// `priority` descending then `pk` ascending, strictly after `after`.
    async fn active_roles_page(
        &mut self,
        user: UserId,
        after: Option<&RolePageKey>,
        limit: usize,
    ) -> StoreResult<Vec<Role>>;

    /// Live users linked to `role` through a live link, ordered by
    /// `displayname` ascending (bytewise) then `pk` ascending, strictly after `after`.
    async fn active_users_page(
        &mut self,
        role: RoleId,
        after: Option<&UserPageKey>,
        limit: usize,
    ) -> StoreResult<Vec<User>>;

    async fn commit(&mut self) -> StoreResult<()>;

    async fn rollback(&mut self) -> StoreResult<()>;
}
