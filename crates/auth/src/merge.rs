//! Effective ACL computation.
//!
//! A user's effective ACL is their default ACL overlaid with the ACLs of all
//! their live roles. Entries are keyed by privilege and a later entry replaces
//! an earlier one according to these rules, checked in order:
//!
//! 1. An existing **deny** is never replaced by a grant or inherit.
//! 2. A new **deny** always replaces the existing entry.
//! 3. A new entry from a role of higher or equal precedence (lower or equal
//!    `priority` number) replaces the existing entry; ties go to the entry
//!    seen last.
//! 4. Otherwise the existing entry is kept.
//!
//! Default entries rank below every role. Roles are expected in descending
//! `priority` order (see role resolution) but the result does not depend on it
//! except for the order of equal-priority ties.

use std::collections::HashMap;

use serde::{Serialize, Serializer};

use crate::acl::{Acl, AclItem, Action};
use crate::role::Role;

/// Self-service privileges granted by [`DefaultAcl::self_service`].
pub const SELF_READ: &str = "a11n.self.read";
pub const SELF_UPDATE: &str = "a11n.self.update";

/// ACL every user starts from before any role is applied.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DefaultAcl(Acl);

impl DefaultAcl {
    pub fn new(acl: impl Into<Acl>) -> Self {
        Self(acl.into())
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Read and update access to one's own record.
    pub fn self_service() -> Self {
        Self::new(vec![AclItem::grant(SELF_READ), AclItem::grant(SELF_UPDATE)])
    }

    pub fn acl(&self) -> &Acl {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Default,
    Role(i32),
}

impl Source {
    /// Smaller is stronger.
    fn rank(self) -> i64 {
        match self {
            Source::Default => i64::MAX,
            Source::Role(priority) => i64::from(priority),
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    item: AclItem,
    source: Source,
}

fn supersedes(new: &AclItem, source: Source, old: &Slot) -> bool {
    if old.item.action.is_deny() && !new.action.is_deny() {
        return false;
    }
    if new.action.is_deny() {
        return true;
    }
    source.rank() <= old.source.rank()
}

/// Incremental merger: seed once, feed roles one at a time, then finish.
///
/// Lets callers fold roles straight off a storage cursor without collecting
/// them first.
#[derive(Debug, Clone)]
pub struct AclMerger {
    slots: Vec<Slot>,
    index: HashMap<String, usize>,
}

impl AclMerger {
    pub fn seeded(default: &DefaultAcl) -> Self {
        let mut merger = Self {
            slots: Vec::with_capacity(default.acl().len()),
            index: HashMap::new(),
        };
        for item in default.acl() {
            merger.offer(item, Source::Default);
        }
        merger
    }

    pub fn apply_role(&mut self, role: &Role) {
        for item in &role.acl {
            self.offer(item, Source::Role(role.priority));
        }
    }

    fn offer(&mut self, item: &AclItem, source: Source) {
        match self.index.get(item.privilege.as_str()) {
            None => {
                self.index
                    .insert(item.privilege.as_str().to_string(), self.slots.len());
                self.slots.push(Slot {
                    item: item.clone(),
                    source,
                });
            }
            Some(&pos) => {
                let slot = &mut self.slots[pos];
                if supersedes(item, source, slot) {
                    slot.item = item.clone();
                    slot.source = source;
                }
            }
        }
    }

    pub fn finish(self) -> EffectiveAcl {
        EffectiveAcl {
            items: self.slots.into_iter().map(|s| s.item).collect(),
            index: self.index,
        }
    }
}

/// Merge `roles` over `default` in one go.
pub fn merge_acl<'a, I>(default: &DefaultAcl, roles: I) -> EffectiveAcl
where
    I: IntoIterator<Item = &'a Role>,
{
    let mut merger = AclMerger::seeded(default);
    for role in roles {
        merger.apply_role(role);
    }
    merger.finish()
}

/// Merged ACL for one user: at most one entry per privilege, in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveAcl {
    items: Vec<AclItem>,
    index: HashMap<String, usize>,
}

impl EffectiveAcl {
    pub fn get(&self, privilege: &str) -> Option<&AclItem> {
        self.index.get(privilege).map(|&pos| &self.items[pos])
    }

    /// Resolved action for `privilege` at `target`.
    ///
    /// Returns [`Action::Inherit`] when no entry exists or the entry is scoped
    /// to a different target.
    pub fn decision(&self, privilege: &str, target: Option<&str>) -> Action {
        match self.get(privilege) {
            Some(item) if item.covers(target) => item.action,
            _ => Action::Inherit,
        }
    }

    pub fn is_granted(&self, privilege: &str, target: Option<&str>) -> bool {
        self.decision(privilege, target) == Action::Grant
    }

    pub fn iter(&self) -> core::slice::Iter<'_, AclItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_acl(self) -> Acl {
        self.items.into()
    }
}

impl Serialize for EffectiveAcl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.items.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use proptest::prelude::*;

    use super::*;
    use crate::role::NewRole;

    fn role(name: &str, priority: i32, items: Vec<AclItem>) -> Role {
        Role::create(NewRole::new(name).with_priority(priority).with_acl(items), Utc::now()).unwrap()
    }

    #[test]
    fn no_roles_yields_default_unchanged() {
        let default = DefaultAcl::self_service();
        let merged = merge_acl(&default, std::iter::empty::<&Role>());
        assert_eq!(merged.into_acl(), default.acl().clone());
    }

    #[test]
    fn empty_role_acl_contributes_nothing() {
        let default = DefaultAcl::self_service();
        let nothing = role("empty", 1, vec![]);
        let merged = merge_acl(&default, [&nothing]);
        assert_eq!(merged.len(), 2);
        assert!(merged.is_granted(SELF_READ, None));
    }

    #[test]
    fn deny_overrides_higher_precedence_grant() {
        // Descending priority order, as role resolution produces it.
        let b = role("B", 100, vec![AclItem::deny("p1")]);
        let a = role("A", 1, vec![AclItem::grant("p1")]);

        let merged = merge_acl(&DefaultAcl::empty(), [&b, &a]);
        assert_eq!(merged.decision("p1", None), Action::Deny);

        // Same outcome if fed the other way round.
        let merged = merge_acl(&DefaultAcl::empty(), [&a, &b]);
        assert_eq!(merged.decision("p1", None), Action::Deny);
    }

    #[test]
    fn higher_precedence_replaces_non_deny() {
        let low = role("low", 1000, vec![AclItem::inherit("p")]);
        let high = role("high", 1, vec![AclItem::grant("p").with_target("svc")]);

        let merged = merge_acl(&DefaultAcl::empty(), [&low, &high]);
        assert_eq!(merged.decision("p", Some("svc")), Action::Grant);

        // Lower precedence arriving late does not win.
        let merged = merge_acl(&DefaultAcl::empty(), [&high, &low]);
        assert_eq!(merged.decision("p", Some("svc")), Action::Grant);
    }

    #[test]
    fn equal_priority_last_seen_wins() {
        let first = role("first", 50, vec![AclItem::grant("p").with_target("one")]);
        let second = role("second", 50, vec![AclItem::grant("p").with_target("two")]);

        let merged = merge_acl(&DefaultAcl::empty(), [&first, &second]);
        assert_eq!(merged.get("p").unwrap().target.as_deref(), Some("two"));
    }

    #[test]
    fn roles_override_default_grants() {
        let lockdown = role("lockdown", 1000, vec![AclItem::inherit(SELF_UPDATE)]);
        let merged = merge_acl(&DefaultAcl::self_service(), [&lockdown]);

        assert_eq!(merged.decision(SELF_UPDATE, None), Action::Inherit);
        assert!(merged.is_granted(SELF_READ, None));
    }

    #[test]
    fn result_keeps_first_seen_order() {
        let r1 = role("r1", 1000, vec![AclItem::grant("b"), AclItem::grant("a")]);
        let r2 = role("r2", 10, vec![AclItem::grant("c"), AclItem::deny("b")]);

        let merged = merge_acl(&DefaultAcl::empty(), [&r1, &r2]);
        let order: Vec<&str> = merged.iter().map(|i| i.privilege.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
        assert_eq!(merged.decision("b", None), Action::Deny);
    }

    fn arb_action() -> impl Strategy<Value = Action> {
        prop_oneof![Just(Action::Grant), Just(Action::Deny), Just(Action::Inherit)]
    }

    fn arb_roles() -> impl Strategy<Value = Vec<Role>> {
        prop::collection::vec(
            (
                1i32..2000,
                prop::collection::vec(("p[0-3]", arb_action()), 0..6),
            ),
            0..6,
        )
        .prop_map(|specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(n, (priority, items))| {
                    let acl: Vec<AclItem> = items
                        .into_iter()
                        .map(|(p, action)| AclItem::new(p, action))
                        .collect();
                    role(&format!("r{n}"), priority, acl)
                })
                .collect()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: any deny for a privilege in any role means the merged entry is a deny.
        #[test]
        fn deny_is_sticky(mut roles in arb_roles()) {
            roles.sort_by(|a, b| b.priority.cmp(&a.priority));
            let merged = merge_acl(&DefaultAcl::empty(), &roles);

            for role in &roles {
                for item in &role.acl {
                    if item.action.is_deny() {
                        prop_assert_eq!(merged.decision(item.privilege.as_str(), None), Action::Deny);
                    }
                }
            }
        }

        /// Property: every privilege mentioned anywhere appears exactly once.
        #[test]
        fn one_entry_per_privilege(roles in arb_roles()) {
            let merged = merge_acl(&DefaultAcl::self_service(), &roles);

            let mut seen = std::collections::HashSet::new();
            for item in merged.iter() {
                prop_assert!(seen.insert(item.privilege.as_str().to_string()));
            }
            for role in &roles {
                for item in &role.acl {
                    prop_assert!(merged.get(item.privilege.as_str()).is_some());
                }
            }
        }

        /// Property: a non-deny winner comes from the strongest role offering that privilege.
        #[test]
        fn non_deny_winner_has_top_precedence(mut roles in arb_roles()) {
            roles.sort_by(|a, b| b.priority.cmp(&a.priority));
            let merged = merge_acl(&DefaultAcl::empty(), &roles);

            for item in merged.iter().filter(|i| !i.action.is_deny()) {
                let best = roles
                    .iter()
                    .filter(|r| r.acl.iter().any(|i| i.privilege == item.privilege))
                    .map(|r| r.priority)
                    .min();
                let winner_ok = roles.iter().any(|r| {
                    Some(r.priority) == best && r.acl.iter().any(|i| i == item)
                });
                prop_assert!(winner_ok);
            }
        }
    }
}
