//! User entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use a11n_core::{DomainError, DomainResult, Entity, JsonMap, Lifecycle, Patchable, UserId};

// ─────────────────────────────────────────────────────────────────────────────
// User
// ─────────────────────────────────────────────────────────────────────────────

/// A user that can receive login tokens and hold roles.
///
/// # Invariants
/// - `email` is non-empty, contains `@`, and is stored trimmed + lowercased.
/// - `displayname` is never empty (falls back to `email` at creation).
/// - `sms`, when present, is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "pk")]
    pub id: UserId,
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
    pub email: String,
    pub sms: Option<String>,
    pub displayname: String,
    pub profile: JsonMap,
}

/// Input for creating a user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    #[serde(default)]
    pub sms: Option<String>,
    /// Defaults to `email` when absent or blank.
    #[serde(default)]
    pub displayname: Option<String>,
    #[serde(default)]
    pub profile: JsonMap,
}

impl NewUser {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            ..Default::default()
        }
    }

    pub fn with_sms(mut self, sms: impl Into<String>) -> Self {
        self.sms = Some(sms.into());
        self
    }

    pub fn with_displayname(mut self, displayname: impl Into<String>) -> Self {
        self.displayname = Some(displayname.into());
        self
    }

    pub fn with_profile(mut self, profile: JsonMap) -> Self {
        self.profile = profile;
        self
    }
}

/// Partial update for a user. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPatch {
    #[serde(default)]
    pub email: Option<String>,
    /// `Some(None)` clears the number.
    #[serde(default)]
    pub sms: Option<Option<String>>,
    #[serde(default)]
    pub displayname: Option<String>,
    #[serde(default)]
    pub profile: Option<JsonMap>,
}

impl User {
    /// Build a new live user, filling defaults.
    pub fn create(new: NewUser, now: DateTime<Utc>) -> DomainResult<Self> {
        Self::create_with_id(UserId::new(), new, now)
    }

    pub fn create_with_id(id: UserId, new: NewUser, now: DateTime<Utc>) -> DomainResult<Self> {
        let email = normalize_email(&new.email)?;
        let sms = normalize_sms(new.sms)?;

        let displayname = match new.displayname {
            Some(dn) if !dn.trim().is_empty() => dn.trim().to_string(),
            _ => email.clone(),
        };

        Ok(Self {
            id,
            lifecycle: Lifecycle::new(now),
            email,
            sms,
            displayname,
            profile: new.profile,
        })
    }
}

impl Entity for User {
    type Id = UserId;

    const KIND: &'static str = "user";

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

impl Patchable for User {
    type Patch = UserPatch;

    fn apply_patch(&mut self, patch: UserPatch, now: DateTime<Utc>) -> DomainResult<()> {
        // Validate everything before touching state.
        let email = patch.email.as_deref().map(normalize_email).transpose()?;
        let sms = patch.sms.map(normalize_sms).transpose()?;
        let displayname = match patch.displayname {
            Some(dn) if dn.trim().is_empty() => {
                return Err(DomainError::validation("displayname cannot be empty"));
            }
            Some(dn) => Some(dn.trim().to_string()),
            None => None,
        };

        if let Some(email) = email {
            self.email = email;
        }
        if let Some(sms) = sms {
            self.sms = sms;
        }
        if let Some(dn) = displayname {
            self.displayname = dn;
        }
        if let Some(profile) = patch.profile {
            self.profile = profile;
        }
        self.lifecycle.touch(now);
        Ok(())
    }
}

fn normalize_email(raw: &str) -> DomainResult<String> {
    let email = raw.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(DomainError::validation("invalid email format"));
    }
    Ok(email.to_lowercase())
}

fn normalize_sms(raw: Option<String>) -> DomainResult<Option<String>> {
    match raw {
        Some(s) if s.trim().is_empty() => Err(DomainError::validation("sms cannot be blank")),
        Some(s) => Ok(Some(s.trim().to_string())),
        None => Ok(None),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
