//! `a11n-core`: foundation building blocks for the authentication data layer.
//!
//! This crate contains **pure** primitives (no storage or transport concerns):
//! identifiers, the audit/soft-delete lifecycle shared by every entity, and the
//! domain error model.

pub mod entity;
pub mod error;
pub mod id;
pub mod lifecycle;
pub mod value_object;

pub use entity::{Entity, Patchable};
pub use error::{DomainError, DomainResult};
pub use id::{RoleId, TokenId, UserId, UserRoleId};
pub use lifecycle::Lifecycle;
pub use value_object::ValueObject;

/// Opaque key-value document (user profile, token audit metadata).
pub type JsonMap = serde_json::Map<String, serde_json::Value>;
