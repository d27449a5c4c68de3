//! `a11n-auth`: users, roles, tokens and ACL resolution.
//!
//! Pure domain types and rules. Storage lives in `a11n-infra`.

pub mod acl;
pub mod authorize;
pub mod merge;
pub mod role;
pub mod token;
pub mod user;
pub mod user_role;

pub use acl::{Acl, AclItem, Action, Privilege};
pub use authorize::{authorize, explain_authorization, AuthorizationExplanation, AuthzError, DenialKind};
pub use merge::{merge_acl, AclMerger, DefaultAcl, EffectiveAcl, SELF_READ, SELF_UPDATE};
pub use role::{NewRole, Role, RolePatch, DEFAULT_PRIORITY};
pub use token::{default_token_ttl, Expiry, Token, TokenPatch, TokenValidationError, DEFAULT_TOKEN_TTL_SECS};
pub use user::{NewUser, User, UserPatch};
pub use user_role::{LinkChange, UserRole};
