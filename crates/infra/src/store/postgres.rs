//! Postgres-backed entity store.
//!
//! Tables live in the `a11n` schema (see `migrations/0001_a11n.sql`). JSON
//! columns (`profile`, `acl`, `audit_meta`) are `jsonb`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `UniqueViolation` | Duplicate email/sms, or a concurrent link insert for the same pair |
//! | Database (foreign key violation) | `23503` | `Integrity` | Link or token referencing a missing user/role |
//! | Database (check constraint violation) | `23514` | `Integrity` | Row rejected by a table check |
//! | Database (read-only transaction) | `25006` | `ReadOnly` | Write issued through `begin_read` |
//! | Database (other) | Any other | `Backend` | Other database errors |
//! | PoolClosed / PoolTimedOut | N/A | `Backend` | Pool unavailable |
//! | Other | N/A | `Backend` | Network errors, decode failures, etc. |
//!
//! ## Snapshots
//!
//! `begin_read` runs at `REPEATABLE READ, READ ONLY`, so every page fetched by
//! a resolution cursor sees the same snapshot.
//!
//! ## Row Locks
//!
//! `begin` transactions lock every row returned by a point lookup
//! (`get_*`, `find_link`) until commit. Token consumption, partial updates
//! and link transitions are read-modify-write sequences and rely on this.

use sqlx::postgres::{PgConnection, PgRow};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use a11n_auth::{Acl, Role, Token, User, UserRole};
use a11n_core::{JsonMap, Lifecycle, RoleId, TokenId, UserId, UserRoleId};

use super::{EntityStore, RolePageKey, StoreError, StoreResult, StoreTx, UserPageKey};

/// Postgres-backed [`EntityStore`].
///
/// Uses the SQLx connection pool, which is thread-safe; clone freely.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl EntityStore for PostgresStore {
    type Tx = PostgresTx;

    async fn begin(&self) -> StoreResult<PostgresTx> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(PostgresTx {
            tx: Some(tx),
            lock_rows: true,
        })
    }

    #[instrument(skip(self), err)]
    async fn begin_read(&self) -> StoreResult<PostgresTx> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_transaction", e))?;

        Ok(PostgresTx {
            tx: Some(tx),
            lock_rows: false,
        })
    }
}

/// One open Postgres transaction. Dropping it unfinished rolls back.
///
/// Point lookups in a read-write transaction take `FOR UPDATE`, so a
/// read-modify-write of one row waits for any concurrent writer and then sees
/// its committed result.
pub struct PostgresTx {
    tx: Option<Transaction<'static, Postgres>>,
    lock_rows: bool,
}

impl PostgresTx {
    fn conn(&mut self) -> StoreResult<&mut PgConnection> {
        self.tx.as_deref_mut().ok_or(StoreError::Finished)
    }

    fn locking(&self, select: &str) -> String {
        if self.lock_rows {
            format!("{select} FOR UPDATE")
        } else {
            select.to_string()
        }
    }
}

#[async_trait::async_trait]
impl StoreTx for PostgresTx {
    async fn get_user(&mut self, id: UserId) -> StoreResult<Option<User>> {
        let sql = self.locking(
            r#"
            SELECT pk, created, updated, deleted, email, sms, displayname, profile
            FROM a11n.users
            WHERE pk = $1
            "#,
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("get_user", e))?;

        Ok(row.map(|r| r.0))
    }

    async fn insert_user(&mut self, user: &User) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO a11n.users (pk, created, updated, deleted, email, sms, displayname, profile)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(*user.id.as_uuid())
        .bind(user.lifecycle.created)
        .bind(user.lifecycle.updated)
        .bind(user.lifecycle.deleted)
        .bind(&user.email)
        .bind(&user.sms)
        .bind(&user.displayname)
        .bind(Json(&user.profile))
        .execute(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("insert_user", e))?;
        Ok(())
    }

    async fn update_user(&mut self, user: &User) -> StoreResult<()> {
        let done = sqlx::query(
            r#"
            UPDATE a11n.users
            SET updated = $2, deleted = $3, email = $4, sms = $5, displayname = $6, profile = $7
            WHERE pk = $1
            "#,
        )
        .bind(*user.id.as_uuid())
        .bind(user.lifecycle.updated)
        .bind(user.lifecycle.deleted)
        .bind(&user.email)
        .bind(&user.sms)
        .bind(&user.displayname)
        .bind(Json(&user.profile))
        .execute(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("update_user", e))?;

        if done.rows_affected() == 0 {
            return Err(StoreError::not_found("user", user.id));
        }
        Ok(())
    }

    async fn delete_user(&mut self, id: UserId) -> StoreResult<bool> {
        let done = sqlx::query("DELETE FROM a11n.users WHERE pk = $1")
            .bind(*id.as_uuid())
            .execute(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("delete_user", e))?;
        Ok(done.rows_affected() > 0)
    }

    async fn get_role(&mut self, id: RoleId) -> StoreResult<Option<Role>> {
        let sql = self.locking(
            r#"
            SELECT pk, created, updated, deleted, displayname, acl, priority
            FROM a11n.roles
            WHERE pk = $1
            "#,
        );
        let row = sqlx::query_as::<_, RoleRow>(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("get_role", e))?;

        Ok(row.map(|r| r.0))
    }

    async fn insert_role(&mut self, role: &Role) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO a11n.roles (pk, created, updated, deleted, displayname, acl, priority)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(*role.id.as_uuid())
        .bind(role.lifecycle.created)
        .bind(role.lifecycle.updated)
        .bind(role.lifecycle.deleted)
        .bind(&role.displayname)
        .bind(Json(&role.acl))
        .bind(role.priority)
        .execute(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("insert_role", e))?;
        Ok(())
    }

    async fn update_role(&mut self, role: &Role) -> StoreResult<()> {
        let done = sqlx::query(
            r#"
            UPDATE a11n.roles
            SET updated = $2, deleted = $3, displayname = $4, acl = $5, priority = $6
            WHERE pk = $1
            "#,
        )
        .bind(*role.id.as_uuid())
        .bind(role.lifecycle.updated)
        .bind(role.lifecycle.deleted)
        .bind(&role.displayname)
        .bind(Json(&role.acl))
        .bind(role.priority)
        .execute(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("update_role", e))?;

        if done.rows_affected() == 0 {
            return Err(StoreError::not_found("role", role.id));
        }
        Ok(())
    }

    async fn delete_role(&mut self, id: RoleId) -> StoreResult<bool> {
        let done = sqlx::query("DELETE FROM a11n.roles WHERE pk = $1")
            .bind(*id.as_uuid())
            .execute(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;
        Ok(done.rows_affected() > 0)
    }

    async fn get_token(&mut self, id: TokenId) -> StoreResult<Option<Token>> {
        let sql = self.locking(
            r#"
            SELECT pk, created, updated, deleted, "user", sent_to, redirect, expires, used, audit_meta
            FROM a11n.tokens
            WHERE pk = $1
            "#,
        );
        let row = sqlx::query_as::<_, TokenRow>(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("get_token", e))?;

        Ok(row.map(|r| r.0))
    }

    async fn insert_token(&mut self, token: &Token) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO a11n.tokens
                (pk, created, updated, deleted, "user", sent_to, redirect, expires, used, audit_meta)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(*token.id.as_uuid())
        .bind(token.lifecycle.created)
        .bind(token.lifecycle.updated)
        .bind(token.lifecycle.deleted)
        .bind(*token.user.as_uuid())
        .bind(&token.sent_to)
        .bind(&token.redirect)
        .bind(token.expires)
        .bind(token.used)
        .bind(Json(&token.audit_meta))
        .execute(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("insert_token", e))?;
        Ok(())
    }

    async fn update_token(&mut self, token: &Token) -> StoreResult<()> {
        let done = sqlx::query(
            r#"
            UPDATE a11n.tokens
            SET updated = $2, deleted = $3, sent_to = $4, redirect = $5, expires = $6,
                used = $7, audit_meta = $8
            WHERE pk = $1
            "#,
        )
        .bind(*token.id.as_uuid())
        .bind(token.lifecycle.updated)
        .bind(token.lifecycle.deleted)
        .bind(&token.sent_to)
        .bind(&token.redirect)
        .bind(token.expires)
        .bind(token.used)
        .bind(Json(&token.audit_meta))
        .execute(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("update_token", e))?;

        if done.rows_affected() == 0 {
            return Err(StoreError::not_found("token", token.id));
        }
        Ok(())
    }

    async fn delete_token(&mut self, id: TokenId) -> StoreResult<bool> {
        let done = sqlx::query("DELETE FROM a11n.tokens WHERE pk = $1")
            .bind(*id.as_uuid())
            .execute(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("delete_token", e))?;
        Ok(done.rows_affected() > 0)
    }

    async fn find_link(&mut self, user: UserId, role: RoleId) -> StoreResult<Option<UserRole>> {
        let sql = self.locking(
            r#"
            SELECT pk, created, updated, deleted, "user", role
            FROM a11n.userroles
            WHERE "user" = $1 AND role = $2
            "#,
        );
        let row = sqlx::query_as::<_, UserRoleRow>(&sql)
            .bind(*user.as_uuid())
            .bind(*role.as_uuid())
            .fetch_optional(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("find_link", e))?;

        Ok(row.map(|r| r.0))
    }

    async fn insert_link(&mut self, link: &UserRole) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO a11n.userroles (pk, created, updated, deleted, "user", role)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(*link.id.as_uuid())
        .bind(link.lifecycle.created)
        .bind(link.lifecycle.updated)
        .bind(link.lifecycle.deleted)
        .bind(*link.user.as_uuid())
        .bind(*link.role.as_uuid())
        .execute(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("insert_link", e))?;
        Ok(())
    }

    async fn update_link(&mut self, link: &UserRole) -> StoreResult<()> {
        let done = sqlx::query(
            r#"
            UPDATE a11n.userroles
            SET updated = $2, deleted = $3
            WHERE pk = $1 AND "user" = $4 AND role = $5
            "#,
        )
        .bind(*link.id.as_uuid())
        .bind(link.lifecycle.updated)
        .bind(link.lifecycle.deleted)
        .bind(*link.user.as_uuid())
        .bind(*link.role.as_uuid())
        .execute(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("update_link", e))?;

        if done.rows_affected() == 0 {
            return Err(StoreError::not_found("userrole", link.id));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn active_roles_page(
        &mut self,
        user: UserId,
        after: Option<&RolePageKey>,
        limit: usize,
    ) -> StoreResult<Vec<Role>> {
        let rows = sqlx::query_as::<_, RoleRow>(
            r#"
            SELECT r.pk, r.created, r.updated, r.deleted, r.displayname, r.acl, r.priority
            FROM a11n.roles r
            JOIN a11n.userroles ur ON ur.role = r.pk
            WHERE ur."user" = $1
              AND ur.deleted IS NULL
              AND r.deleted IS NULL
              AND ($2::int IS NULL OR r.priority < $2 OR (r.priority = $2 AND r.pk > $3::uuid))
            ORDER BY r.priority DESC, r.pk ASC
            LIMIT $4
            "#,
        )
        .bind(*user.as_uuid())
        .bind(after.map(|(priority, _)| *priority))
        .bind(after.map(|(_, id)| *id.as_uuid()))
        .bind(page_limit(limit))
        .fetch_all(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("active_roles_page", e))?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    #[instrument(skip(self), err)]
    async fn active_users_page(
        &mut self,
        role: RoleId,
        after: Option<&UserPageKey>,
        limit: usize,
    ) -> StoreResult<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT u.pk, u.created, u.updated, u.deleted, u.email, u.sms, u.displayname, u.profile
            FROM a11n.users u
            JOIN a11n.userroles ur ON ur."user" = u.pk
            WHERE ur.role = $1
              AND ur.deleted IS NULL
              AND u.deleted IS NULL
              AND ($2::text IS NULL
                   OR u.displayname COLLATE "C" > $2::text
                   OR (u.displayname = $2::text AND u.pk > $3::uuid))
            ORDER BY u.displayname COLLATE "C" ASC, u.pk ASC
            LIMIT $4
            "#,
        )
        .bind(*role.as_uuid())
        .bind(after.map(|(displayname, _)| displayname.as_str()))
        .bind(after.map(|(_, id)| *id.as_uuid()))
        .bind(page_limit(limit))
        .fetch_all(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("active_users_page", e))?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        let tx = self.tx.take().ok_or(StoreError::Finished)?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        let tx = self.tx.take().ok_or(StoreError::Finished)?;
        tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))
    }
}

fn page_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());

            match db_err.code().as_deref() {
                Some("23505") => StoreError::UniqueViolation {
                    constraint: db_err.constraint().unwrap_or("unknown").to_string(),
                },
                Some("23503") | Some("23514") => StoreError::Integrity(msg),
                Some("25006") => StoreError::ReadOnly,
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Backend(format!("timed out acquiring connection in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

// SQLx row types

fn lifecycle_from_row(row: &PgRow) -> Result<Lifecycle, sqlx::Error> {
    Ok(Lifecycle {
        created: row.try_get("created")?,
        updated: row.try_get("updated")?,
        deleted: row.try_get("deleted")?,
    })
}

struct UserRow(User);

impl<'r> FromRow<'r, PgRow> for UserRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(UserRow(User {
            id: UserId::from_uuid(row.try_get("pk")?),
            lifecycle: lifecycle_from_row(row)?,
            email: row.try_get("email")?,
            sms: row.try_get("sms")?,
            displayname: row.try_get("displayname")?,
            profile: row.try_get::<Json<JsonMap>, _>("profile")?.0,
        }))
    }
}

struct RoleRow(Role);

impl<'r> FromRow<'r, PgRow> for RoleRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(RoleRow(Role {
            id: RoleId::from_uuid(row.try_get("pk")?),
            lifecycle: lifecycle_from_row(row)?,
            displayname: row.try_get("displayname")?,
            acl: row.try_get::<Json<Acl>, _>("acl")?.0,
            priority: row.try_get("priority")?,
        }))
    }
}

struct TokenRow(Token);

impl<'r> FromRow<'r, PgRow> for TokenRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(TokenRow(Token {
            id: TokenId::from_uuid(row.try_get("pk")?),
            lifecycle: lifecycle_from_row(row)?,
            user: UserId::from_uuid(row.try_get("user")?),
            sent_to: row.try_get("sent_to")?,
            redirect: row.try_get("redirect")?,
            expires: row.try_get("expires")?,
            used: row.try_get("used")?,
            audit_meta: row.try_get::<Json<JsonMap>, _>("audit_meta")?.0,
        }))
    }
}

struct UserRoleRow(UserRole);

impl<'r> FromRow<'r, PgRow> for UserRoleRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(UserRoleRow(UserRole {
            id: UserRoleId::from_uuid(row.try_get("pk")?),
            lifecycle: lifecycle_from_row(row)?,
            user: UserId::from_uuid(row.try_get("user")?),
            role: RoleId::from_uuid(row.try_get("role")?),
        }))
    }
}
