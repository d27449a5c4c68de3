//! Role resolution: ordered, snapshot-consistent views over the user↔role graph.
//!
//! Both views are served by a [`Cursor`] that owns one read-only transaction
//! and pulls rows in keyset-paginated batches. The transaction is released
//! as soon as the cursor is exhausted, when [`Cursor::close`] is called, or
//! when the cursor is dropped (early break, error).

use std::collections::VecDeque;

use tracing::{debug, instrument};

use a11n_auth::{Role, User};
use a11n_core::{RoleId, UserId};

use crate::config::StoreConfig;
use crate::store::{EntityStore, RolePageKey, StoreResult, StoreTx, UserPageKey};

/// Rows per batch when none is configured.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// One ordered query that can be fetched page by page.
#[async_trait::async_trait]
pub trait PageSource: Send + Sync {
    type Item: Send;
    type Key: Send + Sync;

    async fn fetch<T: StoreTx>(
        &self,
        tx: &mut T,
        after: Option<&Self::Key>,
        limit: usize,
    ) -> StoreResult<Vec<Self::Item>>;

    fn key_of(item: &Self::Item) -> Self::Key;
}

/// Live roles of a user, `priority` descending.
#[derive(Debug, Clone, Copy)]
pub struct RolesOfUser(pub UserId);

#[async_trait::async_trait]
impl PageSource for RolesOfUser {
    type Item = Role;
    type Key = RolePageKey;

    async fn fetch<T: StoreTx>(
        &self,
        tx: &mut T,
        after: Option<&RolePageKey>,
        limit: usize,
    ) -> StoreResult<Vec<Role>> {
        tx.active_roles_page(self.0, after, limit).await
    }

    fn key_of(role: &Role) -> RolePageKey {
        (role.priority, role.id)
    }
}

/// Live holders of a role, `displayname` ascending.
#[derive(Debug, Clone, Copy)]
pub struct UsersOfRole(pub RoleId);

#[async_trait::async_trait]
impl PageSource for UsersOfRole {
    type Item = User;
    type Key = UserPageKey;

    async fn fetch<T: StoreTx>(
        &self,
        tx: &mut T,
        after: Option<&UserPageKey>,
        limit: usize,
    ) -> StoreResult<Vec<User>> {
        tx.active_users_page(self.0, after, limit).await
    }

    fn key_of(user: &User) -> UserPageKey {
        (user.displayname.clone(), user.id)
    }
}

/// Finite, single-pass, non-restartable sequence backed by one transaction.
pub struct Cursor<T: StoreTx, P: PageSource> {
    tx: Option<T>,
    source: P,
    buffer: VecDeque<P::Item>,
    after: Option<P::Key>,
    batch_size: usize,
}

impl<T: StoreTx, P: PageSource> Cursor<T, P> {
    pub fn new(tx: T, source: P, batch_size: usize) -> Self {
        Self {
            tx: Some(tx),
            source,
            buffer: VecDeque::new(),
            after: None,
            batch_size: batch_size.max(1),
        }
    }

    /// Next item, fetching another batch when the buffer runs dry.
    ///
    /// Returns `Ok(None)` once exhausted; the transaction is released as soon
    /// as the last page has been fetched.
    /// On error the transaction is released and the cursor stays exhausted.
    pub async fn next(&mut self) -> StoreResult<Option<P::Item>> {
        if let Some(item) = self.buffer.pop_front() {
            return Ok(Some(item));
        }
        let Some(tx) = self.tx.as_mut() else {
            return Ok(None);
        };

        let fetched = self.source.fetch(tx, self.after.as_ref(), self.batch_size).await;
        let page = match fetched {
            Ok(page) => page,
            Err(err) => {
                // Dropping the transaction rolls it back.
                self.tx = None;
                return Err(err);
            }
        };

        let exhausted = page.len() < self.batch_size;
        if let Some(last) = page.last() {
            self.after = Some(P::key_of(last));
        }
        self.buffer.extend(page);
        if exhausted {
            // The final page stays buffered even if the rollback fails.
            self.release().await?;
        }
        Ok(self.buffer.pop_front())
    }

    /// Release the transaction now. Buffered items are discarded and every
    /// later [`Self::next`] returns `Ok(None)`.
    pub async fn close(&mut self) -> StoreResult<()> {
        self.buffer.clear();
        self.after = None;
        self.release().await
    }

    async fn release(&mut self) -> StoreResult<()> {
        if let Some(mut tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }

    /// `true` while the cursor still holds its transaction.
    pub fn is_open(&self) -> bool {
        self.tx.is_some()
    }

    /// Drain the remainder into memory.
    pub async fn try_collect(mut self) -> StoreResult<Vec<P::Item>> {
        let mut out = Vec::new();
        while let Some(item) = self.next().await? {
            out.push(item);
        }
        Ok(out)
    }
}

pub type RoleCursor<S> = Cursor<<S as EntityStore>::Tx, RolesOfUser>;
pub type UserCursor<S> = Cursor<<S as EntityStore>::Tx, UsersOfRole>;

/// Entry point for the ordered views.
#[derive(Debug, Clone)]
pub struct RoleResolution<S> {
    store: S,
    batch_size: usize,
}

impl<S: EntityStore> RoleResolution<S> {
    pub fn new(store: S) -> Self {
        Self::with_batch_size(store, DEFAULT_BATCH_SIZE)
    }

    pub fn with_batch_size(store: S, batch_size: usize) -> Self {
        Self { store, batch_size }
    }

    /// Batch size taken from `A11N_CURSOR_BATCH_SIZE`.
    pub fn from_config(store: S, config: &StoreConfig) -> Self {
        Self::with_batch_size(store, config.cursor_batch_size)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Roles held by `user` through live links, lowest precedence first
    /// (`priority` descending), ties by pk.
    #[instrument(skip(self, user), fields(user = %user.id), err)]
    pub async fn active_roles_of(&self, user: &User) -> StoreResult<RoleCursor<S>> {
        let tx = self.store.begin_read().await?;
        debug!("opened role cursor");
        Ok(Cursor::new(tx, RolesOfUser(user.id), self.batch_size))
    }

    /// Users holding `role` through live links, `displayname` ascending.
    ///
    /// Popular roles can have many holders; stream rather than collect.
    #[instrument(skip(self, role), fields(role = %role.id), err)]
    pub async fn active_users_of(&self, role: &Role) -> StoreResult<UserCursor<S>> {
        let tx = self.store.begin_read().await?;
        debug!("opened user cursor");
        Ok(Cursor::new(tx, UsersOfRole(role.id), self.batch_size))
    }
}
