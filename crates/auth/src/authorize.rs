use serde::Serialize;
use thiserror::Error;

use crate::acl::{AclItem, Action};
use crate::merge::EffectiveAcl;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: privilege '{0}' is denied")]
    Denied(String),

    #[error("forbidden: missing privilege '{0}'")]
    Forbidden(String),
}

/// Check `privilege` at `target` against a merged ACL.
///
/// Only an explicit grant passes; inherit and missing entries are refused.
/// No IO, no panics.
pub fn authorize(acl: &EffectiveAcl, privilege: &str, target: Option<&str>) -> Result<(), AuthzError> {
    match acl.decision(privilege, target) {
        Action::Grant => Ok(()),
        Action::Deny => Err(AuthzError::Denied(privilege.to_string())),
        Action::Inherit => Err(AuthzError::Forbidden(privilege.to_string())),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Why a privilege check came out the way it did.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub privilege: String,
    pub target: Option<String>,
    pub granted: bool,
    pub reason: String,
    /// The merged entry that decided the outcome, if any.
    pub matched: Option<AclItem>,
    pub denial: Option<DenialKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    ExplicitDeny,
    Inherited,
    OutOfScope,
    NoEntry,
}

pub fn explain_authorization(
    acl: &EffectiveAcl,
    privilege: &str,
    target: Option<&str>,
) -> AuthorizationExplanation {
    let matched = acl.get(privilege).cloned();

    let (granted, denial, reason) = match &matched {
        None => (
            false,
            Some(DenialKind::NoEntry),
            format!("no role or default entry mentions '{privilege}'"),
        ),
        Some(item) if !item.covers(target) => (
            false,
            Some(DenialKind::OutOfScope),
            format!(
                "entry for '{privilege}' is scoped to {:?}, requested {:?}",
                item.target, target
            ),
        ),
        Some(item) => match item.action {
            Action::Grant => (true, None, format!("'{privilege}' is granted")),
            Action::Deny => (
                false,
                Some(DenialKind::ExplicitDeny),
                format!("'{privilege}' is explicitly denied"),
            ),
            Action::Inherit => (
                false,
                Some(DenialKind::Inherited),
                format!("'{privilege}' is left to inherit and nothing grants it"),
            ),
        },
    };

    AuthorizationExplanation {
        privilege: privilege.to_string(),
        target: target.map(str::to_string),
        granted,
        reason,
        matched,
        denial,
    }
}
