//! One-time login tokens.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use a11n_core::{DomainError, DomainResult, Entity, JsonMap, Lifecycle, Patchable, TokenId, UserId};

use crate::user::User;

/// Lifetime of a token issued without an explicit expiry.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 5 * 60;

pub fn default_token_ttl() -> Duration {
    Duration::seconds(DEFAULT_TOKEN_TTL_SECS)
}

/// Requested expiry: either a fixed instant or a lifetime counted from issuance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    At(DateTime<Utc>),
    In(Duration),
}

impl Expiry {
    pub fn resolve(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Expiry::At(at) => at,
            Expiry::In(ttl) => now + ttl,
        }
    }
}

impl From<DateTime<Utc>> for Expiry {
    fn from(value: DateTime<Utc>) -> Self {
        Expiry::At(value)
    }
}

impl From<Duration> for Expiry {
    fn from(value: Duration) -> Self {
        Expiry::In(value)
    }
}

/// Single-use, time-bound login credential.
///
/// # Invariants
/// - Valid iff `now < expires` and `used` is unset.
/// - `used` is set at most once and never cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    #[serde(rename = "pk")]
    pub id: TokenId,
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
    pub user: UserId,
    /// Delivery address; must be set before the token is persisted.
    pub sent_to: String,
    pub redirect: Option<String>,
    pub expires: DateTime<Utc>,
    pub used: Option<DateTime<Utc>>,
    pub audit_meta: JsonMap,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token has already been used")]
    AlreadyUsed,
}

/// Partial update for a token. `used` is deliberately absent: see [`Token::mark_used`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenPatch {
    #[serde(default)]
    pub sent_to: Option<String>,
    #[serde(default)]
    pub redirect: Option<Option<String>>,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
}

impl Token {
    /// Build (but do not persist) a token for `user`.
    ///
    /// `expiry` defaults to [`DEFAULT_TOKEN_TTL_SECS`] from `now`.
    pub fn for_user(user: &User, expiry: Option<Expiry>, now: DateTime<Utc>) -> Self {
        Self::for_user_with_ttl(user, expiry, default_token_ttl(), now)
    }

    pub fn for_user_with_ttl(
        user: &User,
        expiry: Option<Expiry>,
        default_ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let expires = expiry.unwrap_or(Expiry::In(default_ttl)).resolve(now);
        Self {
            id: TokenId::new(),
            lifecycle: Lifecycle::new(now),
            user: user.id,
            sent_to: String::new(),
            redirect: None,
            expires,
            used: None,
            audit_meta: JsonMap::new(),
        }
    }

    pub fn with_sent_to(mut self, sent_to: impl Into<String>) -> Self {
        self.sent_to = sent_to.into();
        self
    }

    pub fn with_redirect(mut self, redirect: impl Into<String>) -> Self {
        self.redirect = Some(redirect.into());
        self
    }

    /// Check the token at `now`.
    pub fn check(&self, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
        if self.used.is_some() {
            return Err(TokenValidationError::AlreadyUsed);
        }
        if now >= self.expires {
            return Err(TokenValidationError::Expired);
        }
        Ok(())
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.check(now).is_ok()
    }

    /// Fields required before the first write.
    pub fn validate_for_insert(&self) -> DomainResult<()> {
        if self.sent_to.trim().is_empty() {
            return Err(DomainError::validation("token sent_to must be set before saving"));
        }
        Ok(())
    }

    /// Consume the token.
    ///
    /// Supplying non-empty `audit_meta` is rejected: how it should combine
    /// with the stored metadata is not decided yet.
    pub fn mark_used(&mut self, audit_meta: Option<&JsonMap>, now: DateTime<Utc>) -> DomainResult<()> {
        if audit_meta.is_some_and(|meta| !meta.is_empty()) {
            return Err(DomainError::unsupported(
                "merging audit metadata on token use is not supported",
            ));
        }
        if self.used.is_some() {
            return Err(DomainError::conflict("token already used"));
        }
        self.used = Some(now);
        self.lifecycle.touch(now);
        Ok(())
    }
}

impl Entity for Token {
    type Id = TokenId;

    const KIND: &'static str = "token";

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

impl Patchable for Token {
    type Patch = TokenPatch;

    fn apply_patch(&mut self, patch: TokenPatch, now: DateTime<Utc>) -> DomainResult<()> {
        if patch.sent_to.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(DomainError::validation("token sent_to cannot be blank"));
        }

        if let Some(sent_to) = patch.sent_to {
            self.sent_to = sent_to;
        }
        if let Some(redirect) = patch.redirect {
            self.redirect = redirect;
        }
        if let Some(expires) = patch.expires {
            self.expires = expires;
        }
        self.lifecycle.touch(now);
        Ok(())
    }
}
