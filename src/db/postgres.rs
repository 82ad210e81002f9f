use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::db::models::{Role, SecretToken, SecretTokenKind, User};
use crate::db::IdentityStore;
use crate::error::{AppError, DuplicateError, StorageError};

const USER_COLUMNS: &str =
    "id, username, email, password_hash, role, enabled, created_at, updated_at, last_login";
const TOKEN_COLUMNS: &str = "id, user_id, kind, value, used, expires_at, created_at";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| AppError::Storage(StorageError::Connection(e.to_string())))?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Storage(StorageError::Query(e.to_string())))
    }
}

fn decode_error(column: &str, message: String) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: message.into(),
    }
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    let role: String = row.try_get("role")?;
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        role: Role::from_str(&role).map_err(|e| decode_error("role", e))?,
        enabled: row.try_get("enabled")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        last_login: row.try_get("last_login")?,
    })
}

fn token_from_row(row: &PgRow) -> Result<SecretToken, sqlx::Error> {
    let kind: String = row.try_get("kind")?;
    Ok(SecretToken {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        kind: SecretTokenKind::from_str(&kind).map_err(|e| decode_error("kind", e))?,
        value: row.try_get("value")?,
        used: row.try_get("used")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Turns a unique-constraint violation into the duplicate it names, so a
/// registration losing a concurrent race reports the conflicting field just
/// like the pre-insert existence checks do.
fn map_unique_violation(err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(ref db_err) = err {
        if let Some(constraint) = db_err.constraint() {
            if constraint.contains("username") {
                return DuplicateError::UsernameTaken.into();
            }
            if constraint.contains("email") {
                return DuplicateError::EmailTaken.into();
            }
        }
    }
    err.into()
}

#[async_trait]
impl IdentityStore for PgStore {
    async fn create_user(
        &self,
        user: &User,
        verification: &SecretToken,
    ) -> Result<User, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "INSERT INTO users (id, username, email, password_hash, role, enabled, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {USER_COLUMNS}"
        ))
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.enabled)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_unique_violation)?;

        let created = user_from_row(&row).map_err(AppError::from)?;

        sqlx::query(
            "INSERT INTO secret_tokens (id, user_id, kind, value, used, expires_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(verification.id)
        .bind(verification.user_id)
        .bind(verification.kind.as_str())
        .bind(&verification.value)
        .bind(verification.used)
        .bind(verification.expires_at)
        .bind(verification.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(created)
    }

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| user_from_row(&r)).transpose().map_err(Into::into)
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| user_from_row(&r)).transpose().map_err(Into::into)
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| user_from_row(&r)).transpose().map_err(Into::into)
    }

    async fn enable_user(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET enabled = TRUE, updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET password_hash = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn touch_last_login(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET last_login = $2, updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn token_by_value(
        &self,
        value: &str,
        kind: SecretTokenKind,
    ) -> Result<Option<SecretToken>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {TOKEN_COLUMNS} FROM secret_tokens WHERE value = $1 AND kind = $2"
        ))
        .bind(value)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| token_from_row(&r)).transpose().map_err(Into::into)
    }

    async fn remove_token(
        &self,
        value: &str,
        kind: SecretTokenKind,
    ) -> Result<Option<SecretToken>, AppError> {
        let row = sqlx::query(&format!(
            "DELETE FROM secret_tokens WHERE value = $1 AND kind = $2 RETURNING {TOKEN_COLUMNS}"
        ))
        .bind(value)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| token_from_row(&r)).transpose().map_err(Into::into)
    }

    async fn replace_reset_token(&self, token: &SecretToken) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM secret_tokens WHERE user_id = $1 AND kind = $2 AND used = FALSE",
        )
        .bind(token.user_id)
        .bind(SecretTokenKind::PasswordReset.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO secret_tokens (id, user_id, kind, value, used, expires_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(token.kind.as_str())
        .bind(&token.value)
        .bind(token.used)
        .bind(token.expires_at)
        .bind(token.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn mark_token_used(&self, value: &str) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE secret_tokens SET used = TRUE WHERE value = $1 AND used = FALSE")
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn purge_expired_tokens(&self) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM secret_tokens WHERE expires_at < $1")
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
