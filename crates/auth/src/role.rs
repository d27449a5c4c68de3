use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use a11n_core::{DomainError, DomainResult, Entity, Lifecycle, Patchable, RoleId};

use crate::acl::Acl;

/// Merge priority given to roles that do not specify one.
pub const DEFAULT_PRIORITY: i32 = 1000;

/// A named bundle of ACL entries.
///
/// `priority` orders roles when their ACLs are merged: a **lower** number
/// means **higher** precedence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    #[serde(rename = "pk")]
    pub id: RoleId,
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
    pub displayname: String,
    pub acl: Acl,
    pub priority: i32,
}

/// Input for creating a role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRole {
    pub displayname: String,
    #[serde(default)]
    pub acl: Acl,
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

impl NewRole {
    pub fn new(displayname: impl Into<String>) -> Self {
        Self {
            displayname: displayname.into(),
            acl: Acl::new(),
            priority: DEFAULT_PRIORITY,
        }
    }

    pub fn with_acl(mut self, acl: impl Into<Acl>) -> Self {
        self.acl = acl.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Partial update for a role. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RolePatch {
    #[serde(default)]
    pub displayname: Option<String>,
    #[serde(default)]
    pub acl: Option<Acl>,
    #[serde(default)]
    pub priority: Option<i32>,
}

impl Role {
    pub fn create(new: NewRole, now: DateTime<Utc>) -> DomainResult<Self> {
        Self::create_with_id(RoleId::new(), new, now)
    }

    pub fn create_with_id(id: RoleId, new: NewRole, now: DateTime<Utc>) -> DomainResult<Self> {
        Ok(Self {
            id,
            lifecycle: Lifecycle::new(now),
            displayname: validate_displayname(&new.displayname)?,
            acl: new.acl,
            priority: new.priority,
        })
    }
}

impl Entity for Role {
    type Id = RoleId;

    const KIND: &'static str = "role";

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

impl Patchable for Role {
    type Patch = RolePatch;

    fn apply_patch(&mut self, patch: RolePatch, now: DateTime<Utc>) -> DomainResult<()> {
        let displayname = patch.displayname.as_deref().map(validate_displayname).transpose()?;

        if let Some(dn) = displayname {
            self.displayname = dn;
        }
        if let Some(acl) = patch.acl {
            self.acl = acl;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        self.lifecycle.touch(now);
        Ok(())
    }
}

fn validate_displayname(raw: &str) -> DomainResult<String> {
    let dn = raw.trim();
    if dn.is_empty() {
        return Err(DomainError::validation("role displayname cannot be empty"));
    }
    Ok(dn.to_string())
}
