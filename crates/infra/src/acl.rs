//! Effective ACL resolution: fold a user's ordered roles into one ACL.

use tracing::{debug, instrument};

use a11n_auth::{AclMerger, DefaultAcl, EffectiveAcl, User};

use crate::resolution::RoleResolution;
use crate::store::{EntityStore, StoreResult};

#[derive(Debug, Clone)]
pub struct AclResolver<S> {
    resolution: RoleResolution<S>,
    default: DefaultAcl,
}

impl<S: EntityStore> AclResolver<S> {
    pub fn new(resolution: RoleResolution<S>, default: DefaultAcl) -> Self {
        Self { resolution, default }
    }

    pub fn default_acl(&self) -> &DefaultAcl {
        &self.default
    }

    pub fn resolution(&self) -> &RoleResolution<S> {
        &self.resolution
    }

    /// Merge the default ACL with every active role of `user`.
    ///
    /// Roles are consumed straight off the cursor; nothing is mutated.
    #[instrument(skip(self, user), fields(user = %user.id), err)]
    pub async fn effective_acl(&self, user: &User) -> StoreResult<EffectiveAcl> {
        let mut roles = self.resolution.active_roles_of(user).await?;
        let mut merger = AclMerger::seeded(&self.default);

        let mut applied = 0usize;
        while let Some(role) = roles.next().await? {
            merger.apply_role(&role);
            applied += 1;
        }

        let acl = merger.finish();
        debug!(roles = applied, entries = acl.len(), "effective acl resolved");
        Ok(acl)
    }
}
