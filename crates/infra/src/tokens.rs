//! Token Lifecycle: issue, persist, check and consume one-time tokens.

use chrono::{Duration, Utc};
use tracing::{debug, instrument, warn};

use a11n_auth::{Expiry, Token, User};
use a11n_core::{DomainError, Entity, JsonMap, TokenId};

use crate::config::StoreConfig;
use crate::error::Result;
use crate::repository::TokenRepository;
use crate::store::{EntityStore, StoreTx};

#[derive(Debug, Clone)]
pub struct TokenService<S> {
    store: S,
    default_ttl: Duration,
}

impl<S: EntityStore + Clone> TokenService<S> {
    pub fn new(store: S) -> Self {
        Self::with_default_ttl(store, a11n_auth::default_token_ttl())
    }

    pub fn with_default_ttl(store: S, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    /// Default lifetime taken from `A11N_TOKEN_TTL_SECS`.
    pub fn from_config(store: S, config: &StoreConfig) -> Self {
        Self::with_default_ttl(store, config.token_ttl)
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// CRUD access to the token table.
    pub fn repository(&self) -> TokenRepository<S> {
        TokenRepository::new(self.store.clone())
    }

    /// Build a token for `user` without persisting it.
    ///
    /// Set `sent_to` (and optionally `redirect`) before calling [`Self::persist`].
    pub fn issue_for(&self, user: &User, expiry: Option<Expiry>) -> Token {
        Token::for_user_with_ttl(user, expiry, self.default_ttl, Utc::now())
    }

    #[instrument(skip(self, token), fields(token = %token.id, user = %token.user), err)]
    pub async fn persist(&self, token: Token) -> Result<Token> {
        self.repository().create(token).await
    }

    pub fn is_valid(&self, token: &Token) -> bool {
        token.is_valid(Utc::now())
    }

    /// Record first use of `token`, both in storage and in the caller's copy.
    ///
    /// Non-empty `audit_meta` is rejected before anything is written. A token
    /// already consumed (by this or another caller) is a conflict.
    #[instrument(skip(self, token, audit_meta), fields(token = %token.id), err)]
    pub async fn mark_used(&self, token: &mut Token, audit_meta: Option<&JsonMap>) -> Result<()> {
        let now = Utc::now();
        token.clone().mark_used(audit_meta, now)?;

        let mut tx = self.store.begin().await?;
        let mut stored = tx
            .get_token(token.id)
            .await?
            .filter(|t| t.is_live())
            .ok_or_else(DomainError::not_found)?;
        stored.mark_used(None, now)?;
        tx.update_token(&stored).await?;
        tx.commit().await?;

        debug!(user = %stored.user, "token marked used");
        *token = stored;
        Ok(())
    }

    /// Look up a token by id, check it and mark it used in one transaction.
    #[instrument(skip(self), err)]
    pub async fn consume(&self, id: TokenId) -> Result<Token> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let mut token = tx
            .get_token(id)
            .await?
            .filter(|t| t.is_live())
            .ok_or_else(DomainError::not_found)?;

        if let Err(reason) = token.check(now) {
            warn!(%reason, "rejected token");
            return Err(DomainError::conflict("token expired or already used").into());
        }

        token.mark_used(None, now)?;
        tx.update_token(&token).await?;
        tx.commit().await?;
        Ok(token)
    }
}
