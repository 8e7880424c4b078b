// JWT access tokens and opaque refresh token generation

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::auth::error::AuthError;
use crate::auth::models::{Identity, Role};

const REFRESH_TOKEN_LEN: usize = 64;

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i32, // user_id
    pub email: String,
    pub role: Role,
    pub iat: i64, // issued at timestamp
    pub exp: i64, // expiration timestamp
}

/// Signed access token plus its expiry
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Freshly generated refresh token
///
/// `value` goes to the client; only `hash` is ever stored.
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub value: String,
    pub hash: String,
    pub expires_at: DateTime<Utc>,
}

/// Token service for JWT operations
///
/// Access-token verification is pure: signature and expiry only, no storage.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_token_ttl: Duration,
    refresh_token_ttl: Duration,
}

impl TokenService {
    /// Create a TokenService with the default lifetimes
    /// Access tokens expire in 15 minutes, refresh tokens in 30 days
    pub fn new(secret: &str) -> Self {
        Self::with_ttl(secret, 900, 2_592_000)
    }

    /// Create a TokenService with lifetimes in seconds
    pub fn with_ttl(secret: &str, access_ttl_secs: i64, refresh_ttl_secs: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            access_token_ttl: Duration::seconds(access_ttl_secs),
            refresh_token_ttl: Duration::seconds(refresh_ttl_secs),
        }
    }

    pub fn access_token_ttl(&self) -> Duration {
        self.access_token_ttl
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        self.refresh_token_ttl
    }

    /// Sign an access token for the identity, valid from now
    pub fn issue_access_token(&self, identity: &Identity) -> Result<AccessToken, AuthError> {
        self.issue_access_token_at(identity, Utc::now())
    }

    /// Sign an access token as if issued at `issued_at`
    pub fn issue_access_token_at(
        &self,
        identity: &Identity,
        issued_at: DateTime<Utc>,
    ) -> Result<AccessToken, AuthError> {
        let expires_at = issued_at + self.access_token_ttl;
        let claims = Claims {
            sub: identity.user_id,
            email: identity.email.clone(),
            role: identity.role,
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::TokenGeneration(e.to_string()))?;

        Ok(AccessToken { token, expires_at })
    }

    /// Verify signature and expiry and return the identity in the claims
    ///
    /// Every failure collapses into `Unauthenticated`; the cause is only logged.
    pub fn verify_access(&self, token: &str) -> Result<Identity, AuthError> {
        self.decode_claims(token).map(|claims| Identity {
            user_id: claims.sub,
            email: claims.email,
            role: claims.role,
        })
    }

    /// Decode and validate claims
    pub fn decode_claims(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("Access token rejected: {:?}", e.kind());
                AuthError::Unauthenticated
            })
    }

    /// Generate a high-entropy opaque refresh token valid from `now`
    pub fn generate_refresh_token(&self, now: DateTime<Utc>) -> IssuedRefreshToken {
        let value: String = OsRng
            .sample_iter(&Alphanumeric)
            .take(REFRESH_TOKEN_LEN)
            .map(char::from)
            .collect();
        let hash = Self::hash_refresh_token(&value);

        IssuedRefreshToken {
            value,
            hash,
            expires_at: now + self.refresh_token_ttl,
        }
    }

    /// Hash a refresh token using SHA-256
    pub fn hash_refresh_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}
