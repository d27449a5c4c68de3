//! ACL entries and ordered ACL lists.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use a11n_core::ValueObject;

/// Privilege identifier.
///
/// Privileges are opaque dotted names (e.g. "fi.arki.superadmin"); this layer
/// attaches no meaning to the segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Privilege(Cow<'static, str>);

impl Privilege {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Privilege {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Privilege {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Privilege {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Tri-state ACL action.
///
/// Stored as a nullable boolean: `true` grants, `false` denies, `null` inherits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum Action {
    Grant,
    #[default]
    Deny,
    Inherit,
}

impl Action {
    pub fn is_deny(self) -> bool {
        self == Action::Deny
    }
}

impl From<Option<bool>> for Action {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => Action::Grant,
            Some(false) => Action::Deny,
            None => Action::Inherit,
        }
    }
}

impl From<Action> for Option<bool> {
    fn from(value: Action) -> Self {
        match value {
            Action::Grant => Some(true),
            Action::Deny => Some(false),
            Action::Inherit => None,
        }
    }
}

/// One ACL entry.
///
/// A missing `action` deserializes as [`Action::Deny`]; an explicit `null`
/// as [`Action::Inherit`]. A missing `target` means global scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AclItem {
    pub privilege: Privilege,
    #[serde(default)]
    pub action: Action,
    #[serde(default)]
    pub target: Option<String>,
}

impl ValueObject for AclItem {}

impl AclItem {
    pub fn new(privilege: impl Into<Privilege>, action: Action) -> Self {
        Self {
            privilege: privilege.into(),
            action,
            target: None,
        }
    }

    pub fn grant(privilege: impl Into<Privilege>) -> Self {
        Self::new(privilege, Action::Grant)
    }

    pub fn deny(privilege: impl Into<Privilege>) -> Self {
        Self::new(privilege, Action::Deny)
    }

    pub fn inherit(privilege: impl Into<Privilege>) -> Self {
        Self::new(privilege, Action::Inherit)
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// `true` if this entry applies to `target` (global entries apply everywhere).
    pub fn covers(&self, target: Option<&str>) -> bool {
        match (&self.target, target) {
            (None, _) => true,
            (Some(own), Some(asked)) => own == asked,
            (Some(_), None) => false,
        }
    }
}

/// Ordered sequence of ACL entries.
///
/// Privileges need not be unique; precedence is decided when merging.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Acl(Vec<AclItem>);

impl ValueObject for Acl {}

impl Acl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: AclItem) {
        self.0.push(item);
    }

    pub fn iter(&self) -> core::slice::Iter<'_, AclItem> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[AclItem] {
        &self.0
    }
}

impl From<Vec<AclItem>> for Acl {
    fn from(value: Vec<AclItem>) -> Self {
        Self(value)
    }
}

impl FromIterator<AclItem> for Acl {
    fn from_iter<I: IntoIterator<Item = AclItem>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Acl {
    type Item = AclItem;
    type IntoIter = std::vec::IntoIter<AclItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Acl {
    type Item = &'a AclItem;
    type IntoIter = core::slice::Iter<'a, AclItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
