//! Service-level error: a domain rule failed or the store did.

use thiserror::Error;

use a11n_core::DomainError;

use crate::store::StoreError;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    /// `true` for data-integrity defects, whichever layer detected them.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Error::Domain(DomainError::Integrity(_)) | Error::Store(StoreError::Integrity(_))
        )
    }
}
