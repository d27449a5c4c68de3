//! Entity trait: identity + continuity across state changes.

use crate::lifecycle::Lifecycle;

/// Persisted record with an immutable identifier and an audit lifecycle.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug + core::fmt::Display + Send + Sync + 'static;

    /// Human-readable kind, used in logs and error messages.
    const KIND: &'static str;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;

    fn lifecycle(&self) -> &Lifecycle;

    fn lifecycle_mut(&mut self) -> &mut Lifecycle;

    /// `true` unless the record has been soft-deleted.
    fn is_live(&self) -> bool {
        self.lifecycle().is_live()
    }
}

/// Entity that accepts partial updates.
///
/// Implementations apply only the fields present in the patch, validate the
/// result, and bump `updated` via [`Lifecycle::touch`].
pub trait Patchable: Entity {
    type Patch;

    fn apply_patch(
        &mut self,
        patch: Self::Patch,
        now: chrono::DateTime<chrono::Utc>,
    ) -> crate::DomainResult<()>;
}
