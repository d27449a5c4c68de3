//! Test-only store: an [`InMemoryStore`] with selected faults switched on.

use a11n_auth::{Role, Token, User, UserRole};
use a11n_core::{RoleId, TokenId, UserId};

use super::in_memory::InMemoryTx;
use super::{EntityStore, InMemoryStore, RolePageKey, StoreError, StoreResult, StoreTx, UserPageKey};

#[derive(Debug, Clone, Copy, Default)]
struct Faults {
    /// `find_link` reports no row, as if a concurrent insert was not yet visible.
    stale_link_lookup: bool,
    /// `rollback` releases the transaction but reports a backend error.
    failing_rollback: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct ScriptedStore {
    inner: InMemoryStore,
    faults: Faults,
}

impl ScriptedStore {
    pub(crate) fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            faults: Faults::default(),
        }
    }

    pub(crate) fn stale_link_lookup(mut self) -> Self {
        self.faults.stale_link_lookup = true;
        self
    }

    pub(crate) fn failing_rollback(mut self) -> Self {
        self.faults.failing_rollback = true;
        self
    }
}

#[async_trait::async_trait]
impl EntityStore for ScriptedStore {
    type Tx = ScriptedTx;

    async fn begin(&self) -> StoreResult<ScriptedTx> {
        Ok(ScriptedTx {
            inner: self.inner.begin().await?,
            faults: self.faults,
        })
    }

    async fn begin_read(&self) -> StoreResult<ScriptedTx> {
        Ok(ScriptedTx {
            inner: self.inner.begin_read().await?,
            faults: self.faults,
        })
    }
}

pub(crate) struct ScriptedTx {
    inner: InMemoryTx,
    faults: Faults,
}

#[async_trait::async_trait]
impl StoreTx for ScriptedTx {
    async fn get_user(&mut self, id: UserId) -> StoreResult<Option<User>> {
        self.inner.get_user(id).await
    }

    async fn insert_user(&mut self, user: &User) -> StoreResult<()> {
        self.inner.insert_user(user).await
    }

    async fn update_user(&mut self, user: &User) -> StoreResult<()> {
        self.inner.update_user(user).await
    }

    async fn delete_user(&mut self, id: UserId) -> StoreResult<bool> {
        self.inner.delete_user(id).await
    }

    async fn get_role(&mut self, id: RoleId) -> StoreResult<Option<Role>> {
        self.inner.get_role(id).await
    }

    async fn insert_role(&mut self, role: &Role) -> StoreResult<()> {
        self.inner.insert_role(role).await
    }

    async fn update_role(&mut self, role: &Role) -> StoreResult<()> {
        self.inner.update_role(role).await
    }

    async fn delete_role(&mut self, id: RoleId) -> StoreResult<bool> {
        self.inner.delete_role(id).await
    }

    async fn get_token(&mut self, id: TokenId) -> StoreResult<Option<Token>> {
        self.inner.get_token(id).await
    }

    async fn insert_token(&mut self, token: &Token) -> StoreResult<()> {
        self.inner.insert_token(token).await
    }

    async fn update_token(&mut self, token: &Token) -> StoreResult<()> {
        self.inner.update_token(token).await
    }

    async fn delete_token(&mut self, id: TokenId) -> StoreResult<bool> {
        self.inner.delete_token(id).await
    }

    async fn find_link(&mut self, user: UserId, role: RoleId) -> StoreResult<Option<UserRole>> {
        let found = self.inner.find_link(user, role).await?;
        Ok(if self.faults.stale_link_lookup { None } else { found })
    }

    async fn insert_link(&mut self, link: &UserRole) -> StoreResult<()> {
        self.inner.insert_link(link).await
    }

    async fn update_link(&mut self, link: &UserRole) -> StoreResult<()> {
        self.inner.update_link(link).await
    }

    async fn active_roles_page(
        &mut self,
        user: UserId,
        after: Option<&RolePageKey>,
        limit: usize,
    ) -> StoreResult<Vec<Role>> {
        self.inner.active_roles_page(user, after, limit).await
    }

    async fn active_users_page(
        &mut self,
        role: RoleId,
        after: Option<&UserPageKey>,
        limit: usize,
    ) -> StoreResult<Vec<User>> {
        self.inner.active_users_page(role, after, limit).await
    }

    async fn commit(&mut self) -> StoreResult<()> {
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        self.inner.rollback().await?;
        if self.faults.failing_rollback {
            return Err(StoreError::Backend("rollback failed".to_string()));
        }
        Ok(())
    }
}
