// Database repositories for users and refresh tokens

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::{
    error::AuthError,
    models::{RefreshToken, Role, User},
};

/// Credential store consulted by the auth service
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a new user; fails with `EmailAlreadyExists` on a duplicate email
    async fn create_user(&self, email: &str, password_hash: &str, role: Role) -> Result<User, AuthError>;

    /// Find a user by email (case-insensitive)
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError>;

    async fn find_by_id(&self, id: i32) -> Result<Option<User>, AuthError>;

    async fn update_password_hash(&self, id: i32, password_hash: &str) -> Result<(), AuthError>;

    async fn list_by_role(&self, role: Role) -> Result<Vec<User>, AuthError>;

    /// Delete a user holding `role`; returns false when no such user exists
    async fn delete_with_role(&self, id: i32, role: Role) -> Result<bool, AuthError>;
}

/// Replacement token written in place of a rotated one
#[derive(Debug, Clone)]
pub struct Replacement {
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of an atomic rotation attempt
#[derive(Debug, Clone)]
pub enum RotationOutcome {
    /// Presented token consumed; the new token row is returned
    Rotated(RefreshToken),
    /// Presented token was already rotated or revoked; its session is now revoked
    Reused { user_id: i32, session_id: Uuid },
    Expired,
    Unknown,
}

/// Server-side refresh token storage
///
/// `rotate` must be linearizable per token hash: of two concurrent calls on the
/// same hash at most one may return `Rotated`.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Store the first token of a new session
    async fn insert(
        &self,
        user_id: i32,
        session_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshToken, AuthError>;

    /// Look up a token by hash without touching it
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>, AuthError>;

    /// Consume `presented_hash` and insert `replacement` in the same session, atomically
    async fn rotate(
        &self,
        presented_hash: &str,
        replacement: Replacement,
        now: DateTime<Utc>,
    ) -> Result<RotationOutcome, AuthError>;

    /// Revoke every token in the session of `token_hash`; unknown hashes are ignored
    async fn revoke_session(&self, token_hash: &str, now: DateTime<Utc>) -> Result<(), AuthError>;

    /// Revoke every session of the user, returning the number of live tokens revoked
    async fn revoke_user(&self, user_id: i32, now: DateTime<Utc>) -> Result<u64, AuthError>;

    /// Delete tokens whose expiry has passed
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError>;
}

const USER_COLUMNS: &str = "id, email, password_hash, role, created_at";
const TOKEN_COLUMNS: &str =
    "id, user_id, session_id, token_hash, expires_at, created_at, rotated_at, revoked_at";

/// Postgres-backed user repository
#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create_user(&self, email: &str, password_hash: &str, role: Role) -> Result<User, AuthError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (email, password_hash, role) VALUES ($1, $2, $3) RETURNING {}",
            USER_COLUMNS
        ))
        .bind(email)
        .bind(password_hash)
        .bind(role)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            // Check for unique constraint violation
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.is_unique_violation() {
                    return AuthError::EmailAlreadyExists;
                }
            }
            AuthError::from(e)
        })?;

        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE LOWER(email) = LOWER($1)",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_id(&self, id: i32) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    async fn update_password_hash(&self, id: i32, password_hash: &str) -> Result<(), AuthError> {
        let result = sqlx::query("UPDATE users SET password_hash = $1 WHERE id = $2")
            .bind(password_hash)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::UserNotFound(id));
        }
        Ok(())
    }

    async fn list_by_role(&self, role: Role) -> Result<Vec<User>, AuthError> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE role = $1 ORDER BY id",
            USER_COLUMNS
        ))
        .bind(role)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    async fn delete_with_role(&self, id: i32, role: Role) -> Result<bool, AuthError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1 AND role = $2")
            .bind(id)
            .bind(role)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Postgres-backed refresh token store
///
/// Rotation locks the presented row with `SELECT ... FOR UPDATE` so concurrent
/// rotations of one token serialize inside their transactions.
#[derive(Clone)]
pub struct PgRefreshTokenStore {
    pool: PgPool,
}

impl PgRefreshTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn insert(
        &self,
        user_id: i32,
        session_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshToken, AuthError> {
        let token = sqlx::query_as::<_, RefreshToken>(&format!(
            "INSERT INTO refresh_tokens (id, user_id, session_id, token_hash, expires_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            TOKEN_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(session_id)
        .bind(token_hash)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(token)
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>, AuthError> {
        let token = sqlx::query_as::<_, RefreshToken>(&format!(
            "SELECT {} FROM refresh_tokens WHERE token_hash = $1",
            TOKEN_COLUMNS
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(token)
    }

    async fn rotate(
        &self,
        presented_hash: &str,
        replacement: Replacement,
        now: DateTime<Utc>,
    ) -> Result<RotationOutcome, AuthError> {
        // Dropping the transaction without commit rolls everything back
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, RefreshToken>(&format!(
            "SELECT {} FROM refresh_tokens WHERE token_hash = $1 FOR UPDATE",
            TOKEN_COLUMNS
        ))
        .bind(presented_hash)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(current) = current else {
            return Ok(RotationOutcome::Unknown);
        };

        if current.is_spent() {
            sqlx::query(
                "UPDATE refresh_tokens SET revoked_at = $1 WHERE session_id = $2 AND revoked_at IS NULL",
            )
            .bind(now)
            .bind(current.session_id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            return Ok(RotationOutcome::Reused {
                user_id: current.user_id,
                session_id: current.session_id,
            });
        }

        if current.is_expired(now) {
            sqlx::query("UPDATE refresh_tokens SET revoked_at = $1 WHERE id = $2")
                .bind(now)
                .bind(current.id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(RotationOutcome::Expired);
        }

        sqlx::query("UPDATE refresh_tokens SET rotated_at = $1 WHERE id = $2")
            .bind(now)
            .bind(current.id)
            .execute(&mut *tx)
            .await?;

        let next = sqlx::query_as::<_, RefreshToken>(&format!(
            "INSERT INTO refresh_tokens (id, user_id, session_id, token_hash, expires_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            TOKEN_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(current.user_id)
        .bind(current.session_id)
        .bind(&replacement.token_hash)
        .bind(replacement.expires_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(RotationOutcome::Rotated(next))
    }

    async fn revoke_session(&self, token_hash: &str, now: DateTime<Utc>) -> Result<(), AuthError> {
        sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $1 \
             WHERE revoked_at IS NULL \
               AND session_id IN (SELECT session_id FROM refresh_tokens WHERE token_hash = $2)",
        )
        .bind(now)
        .bind(token_hash)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn revoke_user(&self, user_id: i32, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $1 \
             WHERE user_id = $2 AND revoked_at IS NULL AND rotated_at IS NULL",
        )
        .bind(now)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
