//! Plain CRUD over users, roles and tokens.
//!
//! Each call runs in its own transaction. Early returns drop the open
//! transaction, which rolls it back.

use std::marker::PhantomData;

use chrono::Utc;
use tracing::{instrument, warn};

use a11n_auth::{Role, Token, User};
use a11n_core::{DomainError, DomainResult, Patchable};

use crate::error::Result;
use crate::store::{constraints, EntityStore, StoreError, StoreResult, StoreTx};

/// Entity with a table behind it.
#[async_trait::async_trait]
pub trait Persisted: Patchable + Clone + Send + Sync + 'static {
    async fn fetch<T: StoreTx>(tx: &mut T, id: Self::Id) -> StoreResult<Option<Self>>;
    async fn insert<T: StoreTx>(tx: &mut T, entity: &Self) -> StoreResult<()>;
    async fn update<T: StoreTx>(tx: &mut T, entity: &Self) -> StoreResult<()>;
    async fn delete<T: StoreTx>(tx: &mut T, id: Self::Id) -> StoreResult<bool>;

    /// Checks that only apply to the first write.
    fn check_insert(&self) -> DomainResult<()> {
        Ok(())
    }

    /// Message for a unique constraint rejecting this entity.
    fn describe_conflict(constraint: &str) -> String {
        format!("{} violates {}", Self::KIND, constraint)
    }
}

#[async_trait::async_trait]
impl Persisted for User {
    async fn fetch<T: StoreTx>(tx: &mut T, id: Self::Id) -> StoreResult<Option<Self>> {
        tx.get_user(id).await
    }

    async fn insert<T: StoreTx>(tx: &mut T, entity: &Self) -> StoreResult<()> {
        tx.insert_user(entity).await
    }

    async fn update<T: StoreTx>(tx: &mut T, entity: &Self) -> StoreResult<()> {
        tx.update_user(entity).await
    }

    async fn delete<T: StoreTx>(tx: &mut T, id: Self::Id) -> StoreResult<bool> {
        tx.delete_user(id).await
    }

    fn describe_conflict(constraint: &str) -> String {
        match constraint {
            constraints::USERS_EMAIL => "email already in use".to_string(),
            constraints::USERS_SMS => "sms already in use".to_string(),
            other => format!("user violates {other}"),
        }
    }
}

#[async_trait::async_trait]
impl Persisted for Role {
    async fn fetch<T: StoreTx>(tx: &mut T, id: Self::Id) -> StoreResult<Option<Self>> {
        tx.get_role(id).await
    }

    async fn insert<T: StoreTx>(tx: &mut T, entity: &Self) -> StoreResult<()> {
        tx.insert_role(entity).await
    }

    async fn update<T: StoreTx>(tx: &mut T, entity: &Self) -> StoreResult<()> {
        tx.update_role(entity).await
    }

    async fn delete<T: StoreTx>(tx: &mut T, id: Self::Id) -> StoreResult<bool> {
        tx.delete_role(id).await
    }
}

#[async_trait::async_trait]
impl Persisted for Token {
    async fn fetch<T: StoreTx>(tx: &mut T, id: Self::Id) -> StoreResult<Option<Self>> {
        tx.get_token(id).await
    }

    async fn insert<T: StoreTx>(tx: &mut T, entity: &Self) -> StoreResult<()> {
        tx.insert_token(entity).await
    }

    async fn update<T: StoreTx>(tx: &mut T, entity: &Self) -> StoreResult<()> {
        tx.update_token(entity).await
    }

    async fn delete<T: StoreTx>(tx: &mut T, id: Self::Id) -> StoreResult<bool> {
        tx.delete_token(id).await
    }

    fn check_insert(&self) -> DomainResult<()> {
        self.validate_for_insert()
    }
}

pub type UserRepository<S> = Repository<S, User>;
pub type RoleRepository<S> = Repository<S, Role>;
pub type TokenRepository<S> = Repository<S, Token>;

/// CRUD for one entity type over an [`EntityStore`].
#[derive(Debug, Clone)]
pub struct Repository<S, E> {
    store: S,
    _entity: PhantomData<fn() -> E>,
}

impl<S, E> Repository<S, E>
where
    S: EntityStore,
    E: Persisted,
    E::Patch: Send,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            _entity: PhantomData,
        }
    }

    fn map_write_error(err: StoreError) -> crate::Error {
        match err {
            StoreError::UniqueViolation { constraint } => {
                warn!(kind = E::KIND, %constraint, "unique constraint rejected write");
                DomainError::conflict(E::describe_conflict(&constraint)).into()
            }
            other => other.into(),
        }
    }

    #[instrument(skip(self, entity), fields(kind = E::KIND, id = %entity.id()), err)]
    pub async fn create(&self, entity: E) -> Result<E> {
        entity.check_insert()?;

        let mut tx = self.store.begin().await?;
        E::insert(&mut tx, &entity).await.map_err(Self::map_write_error)?;
        tx.commit().await?;
        Ok(entity)
    }

    /// Live record by id; `Ok(None)` when absent or soft-deleted.
    pub async fn get(&self, id: E::Id) -> Result<Option<E>> {
        Ok(self.get_raw(id).await?.filter(|e| e.is_live()))
    }

    /// Record by id in any delete state.
    pub async fn get_raw(&self, id: E::Id) -> Result<Option<E>> {
        let mut tx = self.store.begin_read().await?;
        let found = E::fetch(&mut tx, id).await?;
        tx.rollback().await?;
        Ok(found)
    }

    /// Apply a partial update to a live record.
    #[instrument(skip(self, patch), fields(kind = E::KIND), err)]
    pub async fn update(&self, id: E::Id, patch: E::Patch) -> Result<E> {
        let mut tx = self.store.begin().await?;
        let mut entity = match E::fetch(&mut tx, id).await? {
            Some(e) if e.is_live() => e,
            _ => return Err(DomainError::not_found().into()),
        };

        entity.apply_patch(patch, Utc::now())?;
        E::update(&mut tx, &entity).await.map_err(Self::map_write_error)?;
        tx.commit().await?;
        Ok(entity)
    }

    /// Mark deleted. `Ok(false)` when absent or already deleted.
    #[instrument(skip(self), fields(kind = E::KIND), err)]
    pub async fn soft_delete(&self, id: E::Id) -> Result<bool> {
        let mut tx = self.store.begin().await?;
        let Some(mut entity) = E::fetch(&mut tx, id).await? else {
            return Ok(false);
        };
        if !entity.lifecycle_mut().soft_delete(Utc::now()) {
            return Ok(false);
        }
        E::update(&mut tx, &entity).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Physically remove the row (and rows that reference it).
    #[instrument(skip(self), fields(kind = E::KIND), err)]
    pub async fn hard_delete(&self, id: E::Id) -> Result<bool> {
        let mut tx = self.store.begin().await?;
        let removed = E::delete(&mut tx, id).await?;
        tx.commit().await?;
        Ok(removed)
    }
}
