// In-memory credential and refresh-token stores
//
// Same contracts as the Postgres stores; a single mutex per store provides the
// atomicity the database gets from transactions and row locks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::{
    error::AuthError,
    models::{RefreshToken, Role, User},
    repository::{RefreshTokenStore, Replacement, RotationOutcome, UserRepository},
};

#[derive(Default)]
struct UserTable {
    next_id: i32,
    users: HashMap<i32, User>,
}

/// In-memory user repository
#[derive(Default)]
pub struct InMemoryUserRepository {
    inner: Mutex<UserTable>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create_user(&self, email: &str, password_hash: &str, role: Role) -> Result<User, AuthError> {
        let mut table = self.inner.lock().await;
        let taken = table
            .users
            .values()
            .any(|user| user.email.eq_ignore_ascii_case(email));
        if taken {
            return Err(AuthError::EmailAlreadyExists);
        }

        table.next_id += 1;
        let user = User {
            id: table.next_id,
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            role,
            created_at: Utc::now(),
        };
        table.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let table = self.inner.lock().await;
        Ok(table
            .users
            .values()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_by_id(&self, id: i32) -> Result<Option<User>, AuthError> {
        Ok(self.inner.lock().await.users.get(&id).cloned())
    }

    async fn update_password_hash(&self, id: i32, password_hash: &str) -> Result<(), AuthError> {
        let mut table = self.inner.lock().await;
        let user = table.users.get_mut(&id).ok_or(AuthError::UserNotFound(id))?;
        user.password_hash = password_hash.to_string();
        Ok(())
    }

    async fn list_by_role(&self, role: Role) -> Result<Vec<User>, AuthError> {
        let table = self.inner.lock().await;
        let mut users: Vec<User> = table.users.values().filter(|u| u.role == role).cloned().collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    async fn delete_with_role(&self, id: i32, role: Role) -> Result<bool, AuthError> {
        let mut table = self.inner.lock().await;
        match table.users.get(&id) {
            Some(user) if user.role == role => {
                table.users.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// In-memory refresh token store keyed by token hash
#[derive(Default)]
pub struct InMemoryRefreshTokenStore {
    tokens: Mutex<HashMap<String, RefreshToken>>,
}

impl InMemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tokens that are neither spent nor expired
    pub async fn live_count(&self, now: DateTime<Utc>) -> usize {
        self.tokens
            .lock()
            .await
            .values()
            .filter(|t| !t.is_spent() && !t.is_expired(now))
            .count()
    }
}

fn new_row(user_id: i32, session_id: Uuid, token_hash: &str, expires_at: DateTime<Utc>) -> RefreshToken {
    RefreshToken {
        id: Uuid::new_v4(),
        user_id,
        session_id,
        token_hash: token_hash.to_string(),
        expires_at,
        created_at: Utc::now(),
        rotated_at: None,
        revoked_at: None,
    }
}

fn revoke_where<F>(tokens: &mut HashMap<String, RefreshToken>, now: DateTime<Utc>, predicate: F) -> u64
where
    F: Fn(&RefreshToken) -> bool,
{
    let mut revoked = 0;
    for token in tokens.values_mut() {
        if token.revoked_at.is_none() && predicate(token) {
            token.revoked_at = Some(now);
            revoked += 1;
        }
    }
    revoked
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn insert(
        &self,
        user_id: i32,
        session_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshToken, AuthError> {
        let row = new_row(user_id, session_id, token_hash, expires_at);
        self.tokens
            .lock()
            .await
            .insert(token_hash.to_string(), row.clone());
        Ok(row)
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>, AuthError> {
        Ok(self.tokens.lock().await.get(token_hash).cloned())
    }

    async fn rotate(
        &self,
        presented_hash: &str,
        replacement: Replacement,
        now: DateTime<Utc>,
    ) -> Result<RotationOutcome, AuthError> {
        let mut tokens = self.tokens.lock().await;

        let Some(current) = tokens.get(presented_hash).cloned() else {
            return Ok(RotationOutcome::Unknown);
        };

        if current.is_spent() {
            revoke_where(&mut tokens, now, |t| t.session_id == current.session_id);
            return Ok(RotationOutcome::Reused {
                user_id: current.user_id,
                session_id: current.session_id,
            });
        }

        if current.is_expired(now) {
            revoke_where(&mut tokens, now, |t| t.id == current.id);
            return Ok(RotationOutcome::Expired);
        }

        if let Some(row) = tokens.get_mut(presented_hash) {
            row.rotated_at = Some(now);
        }
        let next = new_row(
            current.user_id,
            current.session_id,
            &replacement.token_hash,
            replacement.expires_at,
        );
        tokens.insert(replacement.token_hash, next.clone());

        Ok(RotationOutcome::Rotated(next))
    }

    async fn revoke_session(&self, token_hash: &str, now: DateTime<Utc>) -> Result<(), AuthError> {
        let mut tokens = self.tokens.lock().await;
        if let Some(session_id) = tokens.get(token_hash).map(|t| t.session_id) {
            revoke_where(&mut tokens, now, |t| t.session_id == session_id);
        }
        Ok(())
    }

    async fn revoke_user(&self, user_id: i32, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let mut tokens = self.tokens.lock().await;
        Ok(revoke_where(&mut tokens, now, |t| {
            t.user_id == user_id && t.rotated_at.is_none()
        }))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let mut tokens = self.tokens.lock().await;
        let before = tokens.len();
        tokens.retain(|_, t| t.expires_at >= now);
        Ok((before - tokens.len()) as u64)
    }
}
