// Authentication service - business logic layer

use chrono::Utc;
use once_cell::sync::Lazy;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{
    error::AuthError,
    models::{
        ChangePasswordRequest, CreateModeratorRequest, Identity, Role, SessionTokens, SignInRequest,
        SignUpRequest, User, UserResponse,
    },
    password::PasswordService,
    repository::{RefreshTokenStore, Replacement, RotationOutcome, UserRepository},
    token::TokenService,
};

/// Verified when the email is unknown so every failed sign-in costs one argon2 run
static PLACEHOLDER_HASH: Lazy<Option<String>> =
    Lazy::new(|| PasswordService::hash_password("placeholder-password-0").ok());

/// Authentication service coordinating all auth operations
pub struct AuthService {
    user_repo: Arc<dyn UserRepository>,
    token_store: Arc<dyn RefreshTokenStore>,
    token_service: Arc<TokenService>,
}

impl AuthService {
    /// Create a new AuthService
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        token_store: Arc<dyn RefreshTokenStore>,
        token_service: Arc<TokenService>,
    ) -> Self {
        Lazy::force(&PLACEHOLDER_HASH);
        Self {
            user_repo,
            token_store,
            token_service,
        }
    }

    pub fn token_service(&self) -> &TokenService {
        &self.token_service
    }

    /// Register a new client and open a session
    pub async fn sign_up(&self, request: SignUpRequest) -> Result<SessionTokens, AuthError> {
        request.validate()?;
        PasswordService::validate_password_strength(&request.password)?;

        let email = normalize_email(&request.email);
        let password_hash = PasswordService::hash_password(&request.password)?;
        let user = self
            .user_repo
            .create_user(&email, &password_hash, Role::Client)
            .await?;

        tracing::info!("Registered user {}", user.id);
        self.issue(&user).await
    }

    /// Check credentials and open a session
    pub async fn sign_in(&self, request: SignInRequest) -> Result<SessionTokens, AuthError> {
        request.validate()?;

        let Some(user) = self
            .user_repo
            .find_by_email(&normalize_email(&request.email))
            .await?
        else {
            if let Some(hash) = PLACEHOLDER_HASH.as_deref() {
                let _ = PasswordService::verify_password(&request.password, hash);
            }
            tracing::debug!("Sign-in for unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        if !PasswordService::verify_password(&request.password, &user.password_hash)? {
            tracing::debug!("Wrong password for user {}", user.id);
            return Err(AuthError::InvalidCredentials);
        }

        self.issue(&user).await
    }

    /// Mint an access token and the first refresh token of a new session
    pub async fn issue(&self, user: &User) -> Result<SessionTokens, AuthError> {
        let now = Utc::now();
        let identity = user.identity();
        let access = self.token_service.issue_access_token_at(&identity, now)?;
        let refresh = self.token_service.generate_refresh_token(now);

        self.token_store
            .insert(user.id, Uuid::new_v4(), &refresh.hash, refresh.expires_at)
            .await?;

        Ok(SessionTokens {
            access_token: access.token,
            access_expires_at: access.expires_at,
            refresh_token: refresh.value,
            refresh_expires_at: refresh.expires_at,
            user: UserResponse::from(user.clone()),
        })
    }

    /// Exchange a refresh token for a new token pair (rotation-on-use)
    ///
    /// Unknown, expired and reused tokens all fail with `InvalidToken`; reuse
    /// also revokes the whole session inside the store.
    pub async fn rotate(&self, refresh_token: &str) -> Result<SessionTokens, AuthError> {
        if refresh_token.trim().is_empty() {
            return Err(AuthError::InvalidToken);
        }

        let now = Utc::now();
        let presented_hash = TokenService::hash_refresh_token(refresh_token);

        let Some(presented) = self.token_store.find_by_hash(&presented_hash).await? else {
            tracing::debug!("Unknown refresh token presented");
            return Err(AuthError::InvalidToken);
        };

        // Fallible steps run before the swap commits
        let user = match self.user_repo.find_by_id(presented.user_id).await? {
            Some(user) => user,
            None => {
                self.token_store.revoke_session(&presented_hash, now).await?;
                return Err(AuthError::InvalidToken);
            }
        };
        let access = self.token_service.issue_access_token_at(&user.identity(), now)?;

        let next = self.token_service.generate_refresh_token(now);
        let replacement = Replacement {
            token_hash: next.hash.clone(),
            expires_at: next.expires_at,
        };

        match self.token_store.rotate(&presented_hash, replacement, now).await? {
            RotationOutcome::Rotated(_) => {}
            RotationOutcome::Reused { user_id, session_id } => {
                tracing::warn!(
                    "Refresh token reuse detected for user {}; session {} revoked",
                    user_id,
                    session_id
                );
                return Err(AuthError::InvalidToken);
            }
            RotationOutcome::Expired => {
                tracing::debug!("Expired refresh token presented");
                return Err(AuthError::InvalidToken);
            }
            RotationOutcome::Unknown => {
                tracing::debug!("Refresh token vanished before rotation");
                return Err(AuthError::InvalidToken);
            }
        }

        tracing::debug!("Rotated refresh token for user {}", user.id);

        Ok(SessionTokens {
            access_token: access.token,
            access_expires_at: access.expires_at,
            refresh_token: next.value,
            refresh_expires_at: next.expires_at,
            user: UserResponse::from(user),
        })
    }

    /// Revoke the session holding this refresh token (logout)
    ///
    /// Idempotent: unknown or already revoked tokens are not an error.
    pub async fn revoke(&self, refresh_token: &str) -> Result<(), AuthError> {
        if refresh_token.trim().is_empty() {
            return Ok(());
        }
        let hash = TokenService::hash_refresh_token(refresh_token);
        self.token_store.revoke_session(&hash, Utc::now()).await
    }

    /// Get current user information
    pub async fn current_user(&self, identity: &Identity) -> Result<UserResponse, AuthError> {
        self.user_repo
            .find_by_id(identity.user_id)
            .await?
            .map(UserResponse::from)
            .ok_or(AuthError::UserNotFound(identity.user_id))
    }

    /// Replace the password hash, end every session, and open a fresh one
    pub async fn change_password(
        &self,
        identity: &Identity,
        request: ChangePasswordRequest,
    ) -> Result<SessionTokens, AuthError> {
        request.validate()?;
        PasswordService::validate_password_strength(&request.new_password)?;

        let user = self
            .user_repo
            .find_by_id(identity.user_id)
            .await?
            .ok_or(AuthError::UserNotFound(identity.user_id))?;

        if !PasswordService::verify_password(&request.old_password, &user.password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }

        let new_hash = PasswordService::hash_password(&request.new_password)?;
        self.user_repo.update_password_hash(user.id, &new_hash).await?;

        let revoked = self.token_store.revoke_user(user.id, Utc::now()).await?;
        tracing::info!("Password changed for user {}; {} sessions revoked", user.id, revoked);

        self.issue(&user).await
    }

    /// Create a moderator account (super admin only)
    pub async fn create_moderator(&self, request: CreateModeratorRequest) -> Result<UserResponse, AuthError> {
        request.validate()?;
        PasswordService::validate_password_strength(&request.password)?;

        let password_hash = PasswordService::hash_password(&request.password)?;
        let user = self
            .user_repo
            .create_user(&normalize_email(&request.email), &password_hash, Role::Moderator)
            .await?;

        tracing::info!("Created moderator {}", user.id);
        Ok(user.into())
    }

    pub async fn list_moderators(&self) -> Result<Vec<UserResponse>, AuthError> {
        let users = self.user_repo.list_by_role(Role::Moderator).await?;
        Ok(users.into_iter().map(UserResponse::from).collect())
    }

    /// Delete a moderator account and end its sessions
    pub async fn delete_moderator(&self, moderator_id: i32) -> Result<(), AuthError> {
        // Only a row that really holds the moderator role loses its sessions
        if !self.user_repo.delete_with_role(moderator_id, Role::Moderator).await? {
            return Err(AuthError::UserNotFound(moderator_id));
        }

        // Postgres cascades the token rows; other stores need the explicit revoke
        let revoked = self.token_store.revoke_user(moderator_id, Utc::now()).await?;
        tracing::info!("Deleted moderator {}; {} sessions revoked", moderator_id, revoked);
        Ok(())
    }

    /// Remove expired refresh tokens
    pub async fn purge_expired_tokens(&self) -> Result<u64, AuthError> {
        self.token_store.purge_expired(Utc::now()).await
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
