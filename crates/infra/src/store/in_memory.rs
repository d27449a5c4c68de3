//! In-memory entity store for tests/dev.
//!
//! Write transactions are serialized and work on a private copy of the tables
//! that replaces the shared state on commit. Read transactions hold an
//! immutable snapshot, so they never observe a half-applied write and never
//! block writers.
//!
//! Unique and foreign-key constraints mirror the Postgres layout and report
//! the same constraint names.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{Mutex, OwnedMutexGuard};

use a11n_auth::{Role, Token, User, UserRole};
use a11n_core::{RoleId, TokenId, UserId, UserRoleId};

use super::{constraints, EntityStore, RolePageKey, StoreError, StoreResult, StoreTx, UserPageKey};

#[derive(Debug, Clone, Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    roles: BTreeMap<RoleId, Role>,
    tokens: BTreeMap<TokenId, Token>,
    links: BTreeMap<UserRoleId, UserRole>,
}

impl Tables {
    fn check_user_unique(&self, user: &User) -> StoreResult<()> {
        for other in self.users.values().filter(|u| u.id != user.id) {
            if other.email == user.email {
                return Err(StoreError::unique(constraints::USERS_EMAIL));
            }
            if user.sms.is_some() && other.sms == user.sms {
                return Err(StoreError::unique(constraints::USERS_SMS));
            }
        }
        Ok(())
    }

    fn check_link(&self, link: &UserRole) -> StoreResult<()> {
        if !self.users.contains_key(&link.user) {
            return Err(StoreError::Integrity(format!("link references missing user {}", link.user)));
        }
        if !self.roles.contains_key(&link.role) {
            return Err(StoreError::Integrity(format!("link references missing role {}", link.role)));
        }
        let duplicate = self
            .links
            .values()
            .any(|l| l.id != link.id && l.user == link.user && l.role == link.role);
        if duplicate {
            return Err(StoreError::unique(constraints::USER_ROLE_PAIR));
        }
        Ok(())
    }

    fn check_token(&self, token: &Token) -> StoreResult<()> {
        if !self.users.contains_key(&token.user) {
            return Err(StoreError::Integrity(format!("token references missing user {}", token.user)));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Shared {
    current: RwLock<Arc<Tables>>,
    writer: Arc<Mutex<()>>,
}

/// In-memory [`EntityStore`]. Cloning shares the underlying tables.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Shared>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> StoreResult<Arc<Tables>> {
        let current = self.inner.current.read().map_err(poisoned)?;
        Ok(Arc::clone(&current))
    }
}

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Backend("in-memory store lock poisoned".to_string())
}

#[async_trait::async_trait]
impl EntityStore for InMemoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> StoreResult<InMemoryTx> {
        let guard = Arc::clone(&self.inner.writer).lock_owned().await;
        let work = (*self.snapshot()?).clone();
        Ok(InMemoryTx {
            shared: Arc::clone(&self.inner),
            state: TxState::Write { _guard: guard, work },
        })
    }

    async fn begin_read(&self) -> StoreResult<InMemoryTx> {
        Ok(InMemoryTx {
            shared: Arc::clone(&self.inner),
            state: TxState::Read(self.snapshot()?),
        })
    }
}

enum TxState {
    Write {
        _guard: OwnedMutexGuard<()>,
        work: Tables,
    },
    Read(Arc<Tables>),
    Done,
}

pub struct InMemoryTx {
    shared: Arc<Shared>,
    state: TxState,
}

impl InMemoryTx {
    fn tables(&self) -> StoreResult<&Tables> {
        match &self.state {
            TxState::Write { work, .. } => Ok(work),
            TxState::Read(snapshot) => Ok(snapshot.as_ref()),
            TxState::Done => Err(StoreError::Finished),
        }
    }

    fn tables_mut(&mut self) -> StoreResult<&mut Tables> {
        match &mut self.state {
            TxState::Write { work, .. } => Ok(work),
            TxState::Read(_) => Err(StoreError::ReadOnly),
            TxState::Done => Err(StoreError::Finished),
        }
    }
}

#[async_trait::async_trait]
impl StoreTx for InMemoryTx {
    async fn get_user(&mut self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.tables()?.users.get(&id).cloned())
    }

    async fn insert_user(&mut self, user: &User) -> StoreResult<()> {
        let tables = self.tables_mut()?;
        if tables.users.contains_key(&user.id) {
            return Err(StoreError::unique("users_pkey"));
        }
        tables.check_user_unique(user)?;
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update_user(&mut self, user: &User) -> StoreResult<()> {
        let tables = self.tables_mut()?;
        if !tables.users.contains_key(&user.id) {
            return Err(StoreError::not_found("user", user.id));
        }
        tables.check_user_unique(user)?;
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn delete_user(&mut self, id: UserId) -> StoreResult<bool> {
        let tables = self.tables_mut()?;
        if tables.users.remove(&id).is_none() {
            return Ok(false);
        }
        tables.links.retain(|_, l| l.user != id);
        tables.tokens.retain(|_, t| t.user != id);
        Ok(true)
    }

    async fn get_role(&mut self, id: RoleId) -> StoreResult<Option<Role>> {
        Ok(self.tables()?.roles.get(&id).cloned())
    }

    async fn insert_role(&mut self, role: &Role) -> StoreResult<()> {
        let tables = self.tables_mut()?;
        if tables.roles.contains_key(&role.id) {
            return Err(StoreError::unique("roles_pkey"));
        }
        tables.roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn update_role(&mut self, role: &Role) -> StoreResult<()> {
        let tables = self.tables_mut()?;
        match tables.roles.get_mut(&role.id) {
            Some(slot) => {
                *slot = role.clone();
                Ok(())
            }
            None => Err(StoreError::not_found("role", role.id)),
        }
    }

    async fn delete_role(&mut self, id: RoleId) -> StoreResult<bool> {
        let tables = self.tables_mut()?;
        if tables.roles.remove(&id).is_none() {
            return Ok(false);
        }
        tables.links.retain(|_, l| l.role != id);
        Ok(true)
    }

    async fn get_token(&mut self, id: TokenId) -> StoreResult<Option<Token>> {
        Ok(self.tables()?.tokens.get(&id).cloned())
    }

    async fn insert_token(&mut self, token: &Token) -> StoreResult<()> {
        let tables = self.tables_mut()?;
        if tables.tokens.contains_key(&token.id) {
            return Err(StoreError::unique("tokens_pkey"));
        }
        tables.check_token(token)?;
        tables.tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn update_token(&mut self, token: &Token) -> StoreResult<()> {
        let tables = self.tables_mut()?;
        if !tables.tokens.contains_key(&token.id) {
            return Err(StoreError::not_found("token", token.id));
        }
        tables.check_token(token)?;
        tables.tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn delete_token(&mut self, id: TokenId) -> StoreResult<bool> {
        Ok(self.tables_mut()?.tokens.remove(&id).is_some())
    }

    async fn find_link(&mut self, user: UserId, role: RoleId) -> StoreResult<Option<UserRole>> {
        Ok(self
            .tables()?
            .links
            .values()
            .find(|l| l.user == user && l.role == role)
            .cloned())
    }

    async fn insert_link(&mut self, link: &UserRole) -> StoreResult<()> {
        let tables = self.tables_mut()?;
        if tables.links.contains_key(&link.id) {
            return Err(StoreError::unique("userroles_pkey"));
        }
        tables.check_link(link)?;
        tables.links.insert(link.id, link.clone());
        Ok(())
    }

    async fn update_link(&mut self, link: &UserRole) -> StoreResult<()> {
        let tables = self.tables_mut()?;
        if !tables.links.contains_key(&link.id) {
            return Err(StoreError::not_found("userrole", link.id));
        }
        tables.check_link(link)?;
        tables.links.insert(link.id, link.clone());
        Ok(())
    }

    async fn active_roles_page(
        &mut self,
        user: UserId,
        after: Option<&RolePageKey>,
        limit: usize,
    ) -> StoreResult<Vec<Role>> {
        let tables = self.tables()?;
        let mut roles: Vec<&Role> = tables
            .links
            .values()
            .filter(|l| l.user == user && l.lifecycle.is_live())
            .filter_map(|l| tables.roles.get(&l.role))
            .filter(|r| r.lifecycle.is_live())
            .filter(|r| match after {
                None => true,
                Some((priority, id)) => r.priority < *priority || (r.priority == *priority && r.id > *id),
            })
            .collect();
        roles.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        Ok(roles.into_iter().take(limit).cloned().collect())
    }

    async fn active_users_page(
        &mut self,
        role: RoleId,
        after: Option<&UserPageKey>,
        limit: usize,
    ) -> StoreResult<Vec<User>> {
        let tables = self.tables()?;
        let mut users: Vec<&User> = tables
            .links
            .values()
            .filter(|l| l.role == role && l.lifecycle.is_live())
            .filter_map(|l| tables.users.get(&l.user))
            .filter(|u| u.lifecycle.is_live())
            .filter(|u| match after {
                None => true,
                Some((displayname, id)) => (u.displayname.as_str(), u.id) > (displayname.as_str(), *id),
            })
            .collect();
        users.sort_by(|a, b| a.displayname.cmp(&b.displayname).then(a.id.cmp(&b.id)));
        Ok(users.into_iter().take(limit).cloned().collect())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        match std::mem::replace(&mut self.state, TxState::Done) {
            TxState::Write { _guard, work } => {
                let mut current = self.shared.current.write().map_err(poisoned)?;
                *current = Arc::new(work);
                Ok(())
            }
            TxState::Read(_) => Ok(()),
            TxState::Done => Err(StoreError::Finished),
        }
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        match std::mem::replace(&mut self.state, TxState::Done) {
            TxState::Done => Err(StoreError::Finished),
            _ => Ok(()),
        }
    }
}
