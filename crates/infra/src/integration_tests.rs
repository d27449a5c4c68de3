//! Integration tests for the full access-control pipeline.
//!
//! Tests: Store → LinkManager → RoleResolution → AclResolver, plus tokens and CRUD
//!
//! Verifies:
//! - assign/remove are idempotent and reuse the link row
//! - resolution order and soft-delete filtering
//! - deny-override in the effective ACL
//! - token validity and single use
//! - not-found is an explicit absence

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use a11n_auth::{
        AclItem, Action, DefaultAcl, Expiry, NewRole, NewUser, Role, RolePatch, User, UserPatch,
        SELF_READ,
    };
    use a11n_core::{DomainError, JsonMap, RoleId, TokenId, UserId};

    use crate::acl::AclResolver;
    use crate::error::Error;
    use crate::links::LinkManager;
    use crate::repository::{RoleRepository, UserRepository};
    use crate::resolution::RoleResolution;
    use crate::store::{EntityStore, InMemoryStore, StoreError, StoreTx};
    use crate::tokens::TokenService;

    struct Fixture {
        store: InMemoryStore,
        users: UserRepository<InMemoryStore>,
        roles: RoleRepository<InMemoryStore>,
        links: LinkManager<InMemoryStore>,
        resolution: RoleResolution<InMemoryStore>,
    }

    fn setup() -> Fixture {
        a11n_observability::init_for_tests();

        let store = InMemoryStore::new();
        Fixture {
            users: UserRepository::new(store.clone()),
            roles: RoleRepository::new(store.clone()),
            links: LinkManager::new(store.clone()),
            // Small batches so pagination is exercised.
            resolution: RoleResolution::with_batch_size(store.clone(), 2),
            store,
        }
    }

    impl Fixture {
        async fn user(&self, email: &str, displayname: &str) -> User {
            let user = User::create(NewUser::new(email).with_displayname(displayname), Utc::now()).unwrap();
            self.users.create(user).await.unwrap()
        }

        async fn role(&self, name: &str, priority: i32, acl: Vec<AclItem>) -> Role {
            let role = Role::create(NewRole::new(name).with_priority(priority).with_acl(acl), Utc::now()).unwrap();
            self.roles.create(role).await.unwrap()
        }

        async fn raw_link(&self, user: UserId, role: RoleId) -> Option<a11n_auth::UserRole> {
            let mut tx = self.store.begin_read().await.unwrap();
            tx.find_link(user, role).await.unwrap()
        }

        async fn role_names(&self, user: &User) -> Vec<String> {
            let cursor = self.resolution.active_roles_of(user).await.unwrap();
            cursor
                .try_collect()
                .await
                .unwrap()
                .into_iter()
                .map(|r| r.displayname)
                .collect()
        }

        async fn holder_names(&self, role: &Role) -> Vec<String> {
            let cursor = self.resolution.active_users_of(role).await.unwrap();
            cursor
                .try_collect()
                .await
                .unwrap()
                .into_iter()
                .map(|u| u.displayname)
                .collect()
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Link lifecycle
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn assign_and_remove_are_idempotent() {
        let fx = setup();
        let user = fx.user("idem@example.com", "Idem").await;
        let role = fx.role("staff", 1000, vec![]).await;

        assert!(fx.links.assign(&role, &user).await.unwrap());
        assert!(!fx.links.assign(&role, &user).await.unwrap());

        assert!(fx.links.remove(&role, &user).await.unwrap());
        assert!(!fx.links.remove(&role, &user).await.unwrap());
    }

    #[tokio::test]
    async fn remove_without_link_is_noop() {
        let fx = setup();
        let user = fx.user("none@example.com", "None").await;
        let role = fx.role("staff", 1000, vec![]).await;

        assert!(!fx.links.remove(&role, &user).await.unwrap());
        assert!(fx.raw_link(user.id, role.id).await.is_none());
    }

    #[tokio::test]
    async fn reassign_undeletes_the_same_row() {
        let fx = setup();
        let user = fx.user("undelete@example.com", "Undelete").await;
        let role = fx.role("staff", 1000, vec![]).await;

        let outcomes = (
            fx.links.assign(&role, &user).await.unwrap(),
            fx.links.remove(&role, &user).await.unwrap(),
            fx.links.assign(&role, &user).await.unwrap(),
        );
        assert_eq!(outcomes, (true, true, true));

        let first_id = fx.raw_link(user.id, role.id).await.unwrap().id;
        fx.links.remove(&role, &user).await.unwrap();
        fx.links.assign(&role, &user).await.unwrap();

        let link = fx.raw_link(user.id, role.id).await.unwrap();
        assert_eq!(link.id, first_id);
        assert!(link.lifecycle.is_live());
        assert!(link.lifecycle.created <= link.lifecycle.updated);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_assign_yields_one_live_link() {
        let fx = setup();
        let user = fx.user("race@example.com", "Race").await;
        let role = fx.role("staff", 1000, vec![]).await;

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let links = fx.links.clone();
                let (role, user) = (role.clone(), user.clone());
                tokio::spawn(async move { links.assign(&role, &user).await })
            })
            .collect();

        let mut created = 0;
        for task in tasks {
            if task.await.unwrap().unwrap() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(fx.role_names(&user).await, vec!["staff"]);
    }

    #[tokio::test]
    async fn duplicate_pair_insert_is_a_unique_violation() {
        let fx = setup();
        let user = fx.user("dup@example.com", "Dup").await;
        let role = fx.role("staff", 1000, vec![]).await;
        fx.links.assign(&role, &user).await.unwrap();

        let mut tx = fx.store.begin().await.unwrap();
        let err = tx
            .insert_link(&a11n_auth::UserRole::link(user.id, role.id, Utc::now()))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn assigning_unsaved_user_is_an_integrity_error() {
        let fx = setup();
        let role = fx.role("staff", 1000, vec![]).await;
        let ghost = User::create(NewUser::new("ghost@example.com"), Utc::now()).unwrap();

        let err = fx.links.assign(&role, &ghost).await.unwrap_err();
        assert!(err.is_integrity());
    }

    // ─────────────────────────────────────────────────────────────────────
    // Role resolution
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn roles_come_lowest_precedence_first() {
        let fx = setup();
        let user = fx.user("order@example.com", "Order").await;
        for (name, priority) in [("p100", 100), ("p1", 1), ("p1000", 1000)] {
            let role = fx.role(name, priority, vec![]).await;
            fx.links.assign(&role, &user).await.unwrap();
        }

        assert_eq!(fx.role_names(&user).await, vec!["p1000", "p100", "p1"]);
    }

    #[tokio::test]
    async fn equal_priorities_page_without_loss_or_duplicates() {
        let fx = setup();
        let user = fx.user("ties@example.com", "Ties").await;
        let mut expected = Vec::new();
        for n in 0..5 {
            let role = fx.role(&format!("tie{n}"), 500, vec![]).await;
            fx.links.assign(&role, &user).await.unwrap();
            expected.push(role);
        }
        expected.sort_by_key(|r| r.id);

        let cursor = fx.resolution.active_roles_of(&user).await.unwrap();
        let got: Vec<RoleId> = cursor.try_collect().await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(got, expected.iter().map(|r| r.id).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn holders_are_sorted_by_displayname() {
        let fx = setup();
        let role = fx.role("crew", 1000, vec![]).await;
        for (email, dn) in [
            ("c@example.com", "Charlie"),
            ("a@example.com", "Alpha"),
            ("b@example.com", "Bravo"),
        ] {
            let user = fx.user(email, dn).await;
            fx.links.assign(&role, &user).await.unwrap();
        }

        assert_eq!(fx.holder_names(&role).await, vec!["Alpha", "Bravo", "Charlie"]);
    }

    #[tokio::test]
    async fn soft_deleted_links_are_hidden_but_kept() {
        let fx = setup();
        let user = fx.user("hidden@example.com", "Hidden").await;
        let role = fx.role("staff", 1000, vec![]).await;
        fx.links.assign(&role, &user).await.unwrap();
        fx.links.remove(&role, &user).await.unwrap();

        assert!(fx.role_names(&user).await.is_empty());
        assert!(fx.holder_names(&role).await.is_empty());

        let raw = fx.raw_link(user.id, role.id).await.unwrap();
        assert!(raw.lifecycle.is_deleted());
    }

    #[tokio::test]
    async fn soft_deleted_roles_and_users_drop_out() {
        let fx = setup();
        let user = fx.user("gone@example.com", "Gone").await;
        let keep = fx.role("keep", 10, vec![]).await;
        let dropped = fx.role("dropped", 20, vec![]).await;
        fx.links.assign(&keep, &user).await.unwrap();
        fx.links.assign(&dropped, &user).await.unwrap();

        assert!(fx.roles.soft_delete(dropped.id).await.unwrap());
        assert_eq!(fx.role_names(&user).await, vec!["keep"]);

        assert!(fx.users.soft_delete(user.id).await.unwrap());
        assert!(fx.holder_names(&keep).await.is_empty());
    }

    #[tokio::test]
    async fn cursor_sees_its_snapshot_and_releases_when_done() {
        let fx = setup();
        let user = fx.user("snap@example.com", "Snap").await;
        let a = fx.role("a", 10, vec![]).await;
        let b = fx.role("b", 20, vec![]).await;
        fx.links.assign(&a, &user).await.unwrap();

        let mut cursor = fx.resolution.active_roles_of(&user).await.unwrap();
        // A write landing mid-iteration is not observed.
        fx.links.assign(&b, &user).await.unwrap();

        assert_eq!(cursor.next().await.unwrap().map(|r| r.id), Some(a.id));
        assert!(!cursor.is_open());
        assert!(cursor.next().await.unwrap().is_none());

        assert_eq!(fx.role_names(&user).await, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn early_close_releases_the_cursor() {
        let fx = setup();
        let user = fx.user("early@example.com", "Early").await;
        for n in 0..5 {
            let role = fx.role(&format!("r{n}"), n, vec![]).await;
            fx.links.assign(&role, &user).await.unwrap();
        }

        let mut cursor = fx.resolution.active_roles_of(&user).await.unwrap();
        assert!(cursor.next().await.unwrap().is_some());
        assert!(cursor.is_open());
        cursor.close().await.unwrap();
        assert!(!cursor.is_open());
        assert!(cursor.next().await.unwrap().is_none());
    }

    // ─────────────────────────────────────────────────────────────────────
    // Effective ACL
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn deny_wins_over_higher_precedence_grant() {
        let fx = setup();
        let user = fx.user("acl@example.com", "Acl").await;
        let a = fx.role("A", 1, vec![AclItem::grant("p1")]).await;
        let b = fx.role("B", 100, vec![AclItem::deny("p1")]).await;
        fx.links.assign(&a, &user).await.unwrap();
        fx.links.assign(&b, &user).await.unwrap();

        let resolver = AclResolver::new(fx.resolution.clone(), DefaultAcl::self_service());
        let acl = resolver.effective_acl(&user).await.unwrap();

        assert_eq!(acl.decision("p1", None), Action::Deny);
        assert!(acl.is_granted(SELF_READ, None));
    }

    #[tokio::test]
    async fn user_without_roles_gets_default_acl() {
        let fx = setup();
        let user = fx.user("lonely@example.com", "Lonely").await;
        let default = DefaultAcl::self_service();

        let resolver = AclResolver::new(fx.resolution.clone(), default.clone());
        let acl = resolver.effective_acl(&user).await.unwrap();

        assert_eq!(acl.into_acl(), default.acl().clone());
    }

    #[tokio::test]
    async fn removed_role_no_longer_contributes() {
        let fx = setup();
        let user = fx.user("revoke@example.com", "Revoke").await;
        let admin = fx.role("admin", 1, vec![AclItem::grant("fi.arki.superadmin")]).await;
        fx.links.assign(&admin, &user).await.unwrap();

        let resolver = AclResolver::new(fx.resolution.clone(), DefaultAcl::empty());
        assert!(resolver.effective_acl(&user).await.unwrap().is_granted("fi.arki.superadmin", None));

        fx.links.remove(&admin, &user).await.unwrap();
        assert!(resolver.effective_acl(&user).await.unwrap().get("fi.arki.superadmin").is_none());
    }

    // ─────────────────────────────────────────────────────────────────────
    // Tokens
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn token_validity_and_single_use() {
        let fx = setup();
        let user = fx.user("token@example.com", "Token").await;
        let tokens = TokenService::new(fx.store.clone());

        let issued = tokens.issue_for(&user, Some(Expiry::In(Duration::seconds(5))));
        assert!(tokens.is_valid(&issued));
        assert!(!issued.is_valid(issued.expires));
        assert!(!issued.is_valid(Utc::now() + Duration::seconds(6)));

        let mut token = tokens.persist(issued.with_sent_to("token@example.com")).await.unwrap();
        tokens.mark_used(&mut token, None).await.unwrap();
        assert!(!tokens.is_valid(&token));

        let stored = tokens.repository().get(token.id).await.unwrap().unwrap();
        assert!(stored.used.is_some());

        let err = tokens.mark_used(&mut token, None).await.unwrap_err();
        assert!(matches!(err, Error::Domain(DomainError::Conflict(_))));
    }

    #[tokio::test]
    async fn token_needs_delivery_address() {
        let fx = setup();
        let user = fx.user("nosend@example.com", "NoSend").await;
        let tokens = TokenService::new(fx.store.clone());

        let err = tokens.persist(tokens.issue_for(&user, None)).await.unwrap_err();
        assert!(matches!(err, Error::Domain(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn audit_meta_on_use_is_rejected_without_change() {
        let fx = setup();
        let user = fx.user("audit@example.com", "Audit").await;
        let tokens = TokenService::new(fx.store.clone());
        let mut token = tokens
            .persist(tokens.issue_for(&user, None).with_sent_to("audit@example.com"))
            .await
            .unwrap();

        let mut meta = JsonMap::new();
        meta.insert("ip".into(), serde_json::json!("192.0.2.1"));

        let err = tokens.mark_used(&mut token, Some(&meta)).await.unwrap_err();
        assert!(matches!(err, Error::Domain(DomainError::Unsupported(_))));
        assert!(token.used.is_none());

        let stored = tokens.repository().get(token.id).await.unwrap().unwrap();
        assert!(stored.used.is_none());
    }

    #[tokio::test]
    async fn consume_checks_then_burns() {
        let fx = setup();
        let user = fx.user("consume@example.com", "Consume").await;
        let tokens = TokenService::new(fx.store.clone());

        let live = tokens
            .persist(tokens.issue_for(&user, None).with_sent_to("consume@example.com"))
            .await
            .unwrap();
        let used = tokens.consume(live.id).await.unwrap();
        assert!(used.used.is_some());
        assert!(matches!(
            tokens.consume(live.id).await,
            Err(Error::Domain(DomainError::Conflict(_)))
        ));

        let past = Utc::now() - Duration::minutes(1);
        let expired = tokens
            .persist(
                tokens
                    .issue_for(&user, Some(Expiry::At(past)))
                    .with_sent_to("consume@example.com"),
            )
            .await
            .unwrap();
        assert!(matches!(
            tokens.consume(expired.id).await,
            Err(Error::Domain(DomainError::Conflict(_)))
        ));

        assert!(matches!(
            tokens.consume(TokenId::new()).await,
            Err(Error::Domain(DomainError::NotFound))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consume_burns_each_token_once() {
        let fx = setup();
        let user = fx.user("burn@example.com", "Burn").await;
        let tokens = TokenService::new(fx.store.clone());

        for _ in 0..10 {
            let id = tokens
                .persist(tokens.issue_for(&user, None).with_sent_to("burn@example.com"))
                .await
                .unwrap()
                .id;

            let racers: Vec<_> = (0..2)
                .map(|_| {
                    let tokens = tokens.clone();
                    tokio::spawn(async move { tokens.consume(id).await })
                })
                .collect();

            let mut consumed = 0;
            for racer in racers {
                match racer.await.unwrap() {
                    Ok(_) => consumed += 1,
                    Err(err) => assert!(matches!(err, Error::Domain(DomainError::Conflict(_)))),
                }
            }
            assert_eq!(consumed, 1);
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // CRUD
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn unknown_ids_are_absent_not_errors() {
        let fx = setup();
        assert!(fx.users.get(UserId::new()).await.unwrap().is_none());
        assert!(fx.roles.get_raw(RoleId::new()).await.unwrap().is_none());
        assert!(!fx.users.soft_delete(UserId::new()).await.unwrap());

        let err = fx.users.update(UserId::new(), UserPatch::default()).await.unwrap_err();
        assert_eq!(err, Error::Domain(DomainError::NotFound));
    }

    #[tokio::test]
    async fn soft_deleted_user_is_raw_only() {
        let fx = setup();
        let user = fx.user("soft@example.com", "Soft").await;

        assert!(fx.users.soft_delete(user.id).await.unwrap());
        assert!(!fx.users.soft_delete(user.id).await.unwrap());
        assert!(fx.users.get(user.id).await.unwrap().is_none());

        let raw = fx.users.get_raw(user.id).await.unwrap().unwrap();
        assert!(raw.lifecycle.is_deleted());
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let fx = setup();
        fx.user("taken@example.com", "First").await;

        let second = User::create(NewUser::new("Taken@Example.com"), Utc::now()).unwrap();
        let err = fx.users.create(second).await.unwrap_err();
        assert_eq!(err, Error::Domain(DomainError::conflict("email already in use")));
    }

    #[tokio::test]
    async fn partial_updates_persist() {
        let fx = setup();
        let user = fx.user("patch@example.com", "Patch").await;
        let role = fx.role("ops", 1000, vec![]).await;

        let updated = fx
            .users
            .update(
                user.id,
                UserPatch {
                    displayname: Some("Patched".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.displayname, "Patched");
        assert_eq!(updated.email, "patch@example.com");

        fx.roles
            .update(
                role.id,
                RolePatch {
                    priority: Some(5),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(fx.roles.get(role.id).await.unwrap().unwrap().priority, 5);
    }

    #[tokio::test]
    async fn hard_delete_cascades_links() {
        let fx = setup();
        let user = fx.user("hard@example.com", "Hard").await;
        let role = fx.role("ops", 1000, vec![]).await;
        fx.links.assign(&role, &user).await.unwrap();

        assert!(fx.roles.hard_delete(role.id).await.unwrap());
        assert!(fx.roles.get_raw(role.id).await.unwrap().is_none());
        assert!(fx.raw_link(user.id, role.id).await.is_none());
        assert!(!fx.roles.hard_delete(role.id).await.unwrap());
    }

    #[tokio::test]
    async fn writes_through_read_transaction_fail() {
        let fx = setup();
        let user = User::create(NewUser::new("ro@example.com"), Utc::now()).unwrap();
        let mut tx = fx.store.begin_read().await.unwrap();
        assert_eq!(tx.insert_user(&user).await, Err(StoreError::ReadOnly));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_patches_to_different_fields_both_land() {
        let fx = setup();
        let id = fx.user("both@example.com", "Both").await.id;

        let rename = {
            let users = fx.users.clone();
            tokio::spawn(async move {
                users
                    .update(id, UserPatch { displayname: Some("Renamed".into()), ..Default::default() })
                    .await
            })
        };
        let renumber = {
            let users = fx.users.clone();
            tokio::spawn(async move {
                users
                    .update(id, UserPatch { sms: Some(Some("+15550100".into())), ..Default::default() })
                    .await
            })
        };
        rename.await.unwrap().unwrap();
        renumber.await.unwrap().unwrap();

        let stored = fx.users.get(id).await.unwrap().unwrap();
        assert_eq!(stored.displayname, "Renamed");
        assert_eq!(stored.sms.as_deref(), Some("+15550100"));
    }
}
