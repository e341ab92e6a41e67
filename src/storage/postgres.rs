//! Postgres-backed storage and session store.
//!
//! Flow Overview: connect a small pool, apply the embedded schema, then serve
//! every lookup with a single parameterized statement. Unique violations map to
//! [`StorageError::Conflict`] so registration can reject duplicate accounts
//! without a second round-trip.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    types::Json,
    PgPool, Row,
};
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{Asset, AssetValue, Risk, Scope, Storage, StorageError, User};
use crate::access::{
    session::{Session, SessionStore},
    Identity, Role,
};

const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

const ASSET_COLUMNS: &str = "id, create_time, scope_id, big_category, small_category, name, \
     owner, confidentiality, integrity, availability, risks";

#[derive(Clone, Debug)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    /// Connect to Postgres and make sure the schema exists.
    ///
    /// # Errors
    /// Returns an error if the pool cannot connect or a schema statement fails.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;

        let storage = Self { pool };
        storage.apply_schema().await?;
        Ok(storage)
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn apply_schema(&self) -> Result<()> {
        for (index, statement) in split_sql_statements(SCHEMA_SQL).iter().enumerate() {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .with_context(|| format!("failed to execute schema statement {}", index + 1))?;
        }
        debug!("schema applied");
        Ok(())
    }
}

/// Split a schema file into statements.
///
/// A statement ends at a line whose trimmed text ends with `;`. Whole-line `--`
/// comments are dropped wherever they appear, including between the lines of a
/// multi-line statement; trailing comments after code are kept verbatim. A tail
/// with no closing `;` becomes the last statement.
fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut pending: Vec<&str> = Vec::new();

    let code_lines = sql
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"));
    for line in code_lines {
        pending.push(line);
        if line.trim_end().ends_with(';') {
            push_statement(&mut statements, &pending);
            pending.clear();
        }
    }
    push_statement(&mut statements, &pending);

    statements
}

fn push_statement(statements: &mut Vec<String>, lines: &[&str]) {
    let statement = lines.join("\n");
    let statement = statement.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
}

fn map_write_error(err: sqlx::Error) -> StorageError {
    match &err {
        sqlx::Error::Database(db_err)
            if db_err.code().is_some_and(|code| code.as_ref() == "23505") =>
        {
            StorageError::Conflict
        }
        _ => StorageError::Database(err),
    }
}

fn role_from_row(code: i16) -> Result<Role, StorageError> {
    Role::from_code(code).ok_or_else(|| StorageError::Corrupt(format!("unknown role code {code}")))
}

fn rating_from_db(value: i32) -> Result<u16, StorageError> {
    u16::try_from(value).map_err(|_| StorageError::Corrupt(format!("rating {value} out of range")))
}

fn user_from_row(row: &PgRow) -> Result<User, StorageError> {
    Ok(User {
        id: row.try_get("id")?,
        create_time: row.try_get("create_time")?,
        account: row.try_get("account")?,
        password_hash: row.try_get("password_hash")?,
        role: role_from_row(row.try_get("role")?)?,
        scopes: row.try_get("scopes")?,
    })
}

fn scope_from_row(row: &PgRow) -> Result<Scope, StorageError> {
    Ok(Scope {
        id: row.try_get("id")?,
        create_time: row.try_get("create_time")?,
        name: row.try_get("name")?,
    })
}

fn asset_from_row(row: &PgRow) -> Result<Asset, StorageError> {
    let risks: Json<Vec<Risk>> = row.try_get("risks")?;
    Ok(Asset {
        id: row.try_get("id")?,
        create_time: row.try_get("create_time")?,
        scope: row.try_get("scope_id")?,
        big_category: row.try_get("big_category")?,
        small_category: row.try_get("small_category")?,
        name: row.try_get("name")?,
        owner: row.try_get("owner")?,
        value: AssetValue {
            confidentiality: rating_from_db(row.try_get("confidentiality")?)?,
            integrity: rating_from_db(row.try_get("integrity")?)?,
            availability: rating_from_db(row.try_get("availability")?)?,
        },
        risks: risks.0,
    })
}

fn expect_one(rows_affected: u64) -> Result<(), StorageError> {
    if rows_affected == 0 {
        Err(StorageError::NotFound)
    } else {
        Ok(())
    }
}

#[async_trait]
impl Storage for PgStorage {
    #[instrument(skip(self))]
    async fn find_user_by_id(&self, id: Uuid) -> Result<User, StorageError> {
        let row = sqlx::query(
            "SELECT id, create_time, account, password_hash, role, scopes FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StorageError::NotFound)?;
        user_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn find_user_by_account(&self, account: &str) -> Result<User, StorageError> {
        let row = sqlx::query(
            "SELECT id, create_time, account, password_hash, role, scopes FROM users WHERE account = $1",
        )
        .bind(account)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StorageError::NotFound)?;
        user_from_row(&row)
    }

    #[instrument(skip(self, password_hash))]
    async fn find_user_by_account_and_password_hash(
        &self,
        account: &str,
        password_hash: &str,
    ) -> Result<User, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, create_time, account, password_hash, role, scopes
            FROM users
            WHERE account = $1 AND password_hash = $2
            ",
        )
        .bind(account)
        .bind(password_hash)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StorageError::NotFound)?;
        user_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn count_users(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        u64::try_from(count).map_err(|_| StorageError::Corrupt(format!("user count {count}")))
    }

    #[instrument(skip(self, user), fields(user_id = %user.id))]
    async fn insert_user(&self, user: &User) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO users (id, create_time, account, password_hash, role, scopes)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(user.id)
        .bind(user.create_time)
        .bind(&user.account)
        .bind(&user.password_hash)
        .bind(user.role.code())
        .bind(&user.scopes)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;
        Ok(())
    }

    #[instrument(skip(self, user), fields(user_id = %user.id))]
    async fn replace_user(&self, user: &User) -> Result<(), StorageError> {
        let result = sqlx::query(
            r"
            UPDATE users
            SET create_time = $2, account = $3, password_hash = $4, role = $5, scopes = $6
            WHERE id = $1
            ",
        )
        .bind(user.id)
        .bind(user.create_time)
        .bind(&user.account)
        .bind(&user.password_hash)
        .bind(user.role.code())
        .bind(&user.scopes)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;
        expect_one(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn find_scope_by_id(&self, id: Uuid) -> Result<Scope, StorageError> {
        let row = sqlx::query("SELECT id, create_time, name FROM scopes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StorageError::NotFound)?;
        scope_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn find_scopes_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Scope>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, create_time, name FROM scopes WHERE id = ANY($1) ORDER BY create_time, id",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(scope_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn list_scopes(&self) -> Result<Vec<Scope>, StorageError> {
        let rows = sqlx::query("SELECT id, create_time, name FROM scopes ORDER BY create_time, id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(scope_from_row).collect()
    }

    #[instrument(skip(self, scope), fields(scope_id = %scope.id))]
    async fn insert_scope(&self, scope: &Scope) -> Result<(), StorageError> {
        sqlx::query("INSERT INTO scopes (id, create_time, name) VALUES ($1, $2, $3)")
            .bind(scope.id)
            .bind(scope.create_time)
            .bind(&scope.name)
            .execute(&self.pool)
            .await
            .map_err(map_write_error)?;
        Ok(())
    }

    #[instrument(skip(self, scope), fields(scope_id = %scope.id))]
    async fn replace_scope(&self, scope: &Scope) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE scopes SET create_time = $2, name = $3 WHERE id = $1")
            .bind(scope.id)
            .bind(scope.create_time)
            .bind(&scope.name)
            .execute(&self.pool)
            .await
            .map_err(map_write_error)?;
        expect_one(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn find_asset_by_id(&self, id: Uuid) -> Result<Asset, StorageError> {
        let row = sqlx::query(&format!("SELECT {ASSET_COLUMNS} FROM assets WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StorageError::NotFound)?;
        asset_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn find_assets_by_scope(&self, scope: Uuid) -> Result<Vec<Asset>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE scope_id = $1 ORDER BY seq"
        ))
        .bind(scope)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(asset_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn list_assets(&self, offset: u64, limit: u64) -> Result<Vec<Asset>, StorageError> {
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        // LIMIT NULL is unbounded in Postgres.
        let limit = match limit {
            0 => None,
            n => Some(i64::try_from(n).unwrap_or(i64::MAX)),
        };
        let rows = sqlx::query(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets ORDER BY seq OFFSET $1 LIMIT $2"
        ))
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(asset_from_row).collect()
    }

    #[instrument(skip(self, asset), fields(asset_id = %asset.id))]
    async fn insert_asset(&self, asset: &Asset) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO assets (id, create_time, scope_id, big_category, small_category, name,
                                owner, confidentiality, integrity, availability, risks)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ",
        )
        .bind(asset.id)
        .bind(asset.create_time)
        .bind(asset.scope)
        .bind(&asset.big_category)
        .bind(&asset.small_category)
        .bind(&asset.name)
        .bind(&asset.owner)
        .bind(i32::from(asset.value.confidentiality))
        .bind(i32::from(asset.value.integrity))
        .bind(i32::from(asset.value.availability))
        .bind(Json(&asset.risks))
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;
        Ok(())
    }

    #[instrument(skip(self, asset), fields(asset_id = %asset.id))]
    async fn replace_asset(&self, asset: &Asset) -> Result<(), StorageError> {
        let result = sqlx::query(
            r"
            UPDATE assets
            SET create_time = $2, scope_id = $3, big_category = $4, small_category = $5,
                name = $6, owner = $7, confidentiality = $8, integrity = $9,
                availability = $10, risks = $11
            WHERE id = $1
            ",
        )
        .bind(asset.id)
        .bind(asset.create_time)
        .bind(asset.scope)
        .bind(&asset.big_category)
        .bind(&asset.small_category)
        .bind(&asset.name)
        .bind(&asset.owner)
        .bind(i32::from(asset.value.confidentiality))
        .bind(i32::from(asset.value.integrity))
        .bind(i32::from(asset.value.availability))
        .bind(Json(&asset.risks))
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;
        expect_one(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn delete_asset(&self, id: Uuid) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM assets WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_one(result.rows_affected())
    }
}

/// Session slots kept in the `sessions` table, keyed by the token digest.
#[derive(Clone, Debug)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn save(&self, session: &Session) -> Result<(), StorageError> {
        let (user_id, role) = match &session.identity {
            Some(identity) => (Some(identity.id), Some(identity.role.code())),
            None => (None, None),
        };
        sqlx::query(
            r"
            INSERT INTO sessions (session_id, user_id, role, csrf_secret, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (session_id) DO UPDATE
            SET user_id = EXCLUDED.user_id,
                role = EXCLUDED.role,
                csrf_secret = EXCLUDED.csrf_secret,
                expires_at = EXCLUDED.expires_at
            ",
        )
        .bind(&session.id)
        .bind(user_id)
        .bind(role)
        .bind(&session.csrf_secret)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<Session>, StorageError> {
        let Some(row) = sqlx::query(
            "SELECT session_id, user_id, role, csrf_secret, expires_at FROM sessions WHERE session_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let user_id: Option<Uuid> = row.try_get("user_id")?;
        let role: Option<i16> = row.try_get("role")?;
        let identity = match (user_id, role) {
            (Some(id), Some(code)) => Some(Identity {
                id,
                role: role_from_row(code)?,
            }),
            _ => None,
        };
        let expires_at: DateTime<Utc> = row.try_get("expires_at")?;

        Ok(Some(Session {
            id: row.try_get("session_id")?,
            identity,
            csrf_secret: row.try_get("csrf_secret")?,
            expires_at,
        }))
    }

    async fn remove(&self, id: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM sessions WHERE session_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
