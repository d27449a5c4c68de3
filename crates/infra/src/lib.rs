//! Infrastructure layer: entity store backends, configuration, and the
//! services built on them (CRUD, link lifecycle, role resolution, effective
//! ACLs, tokens).

pub mod acl;
pub mod config;
pub mod error;
pub mod links;
pub mod repository;
pub mod resolution;
pub mod store;
pub mod tokens;

mod integration_tests;

pub use acl::AclResolver;
pub use config::StoreConfig;
pub use error::{Error, Result};
pub use links::LinkManager;
pub use repository::{Persisted, Repository, RoleRepository, TokenRepository, UserRepository};
pub use resolution::{Cursor, RoleResolution};
pub use store::{EntityStore, InMemoryStore, PostgresStore, StoreError, StoreResult, StoreTx};
pub use tokens::TokenService;
