// HTTP handlers for authentication and account endpoints

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use chrono::Utc;
use std::sync::Arc;

use crate::auth::{
    error::AuthError,
    middleware::AuthenticatedUser,
    models::{
        AuthResponse, ChangePasswordRequest, CreateModeratorRequest, ModeratorIdQuery, SessionTokens,
        SignInRequest, SignUpRequest, UserResponse,
    },
    service::AuthService,
};
use crate::config::CookieConfig;

/// Build the HTTP-only cookie carrying the refresh token
fn refresh_cookie(config: &CookieConfig, tokens: &SessionTokens) -> Cookie<'static> {
    let max_age = (tokens.refresh_expires_at - Utc::now()).num_seconds().max(0);

    Cookie::build((config.name.clone(), tokens.refresh_token.clone()))
        .http_only(true)
        .secure(config.secure)
        .same_site(config.same_site)
        .path("/")
        .max_age(time::Duration::seconds(max_age))
        .build()
}

fn clear_refresh_cookie(jar: CookieJar, config: &CookieConfig) -> CookieJar {
    jar.remove(Cookie::build((config.name.clone(), "")).path("/"))
}

fn presented_refresh_token(jar: &CookieJar, config: &CookieConfig) -> Option<String> {
    jar.get(&config.name).map(|cookie| cookie.value().to_string())
}

/// Register a new client
/// POST /auth/sign-up
pub async fn sign_up_handler(
    State(service): State<Arc<AuthService>>,
    State(cookies): State<CookieConfig>,
    jar: CookieJar,
    Json(request): Json<SignUpRequest>,
) -> Result<(StatusCode, CookieJar, Json<AuthResponse>), AuthError> {
    let tokens = service.sign_up(request).await?;
    let jar = jar.add(refresh_cookie(&cookies, &tokens));
    Ok((StatusCode::CREATED, jar, Json(AuthResponse::from(&tokens))))
}

/// Sign in with email and password
/// POST /auth/sign-in
pub async fn sign_in_handler(
    State(service): State<Arc<AuthService>>,
    State(cookies): State<CookieConfig>,
    jar: CookieJar,
    Json(request): Json<SignInRequest>,
) -> Result<(CookieJar, Json<AuthResponse>), AuthError> {
    let tokens = service.sign_in(request).await?;
    let jar = jar.add(refresh_cookie(&cookies, &tokens));
    Ok((jar, Json(AuthResponse::from(&tokens))))
}

/// Rotate the refresh cookie and mint a new access token
/// POST /auth/refresh
///
/// A rejected token clears the cookie on the client; server-side failures
/// leave it in place so the client can retry.
pub async fn refresh_handler(
    State(service): State<Arc<AuthService>>,
    State(cookies): State<CookieConfig>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<AuthResponse>), (CookieJar, AuthError)> {
    let Some(presented) = presented_refresh_token(&jar, &cookies) else {
        tracing::debug!("Refresh attempted without a refresh cookie");
        return Err((clear_refresh_cookie(jar, &cookies), AuthError::InvalidToken));
    };

    match service.rotate(&presented).await {
        Ok(tokens) => {
            let jar = jar.add(refresh_cookie(&cookies, &tokens));
            Ok((jar, Json(AuthResponse::from(&tokens))))
        }
        Err(AuthError::InvalidToken) => {
            Err((clear_refresh_cookie(jar, &cookies), AuthError::InvalidToken))
        }
        // The presented token is still live after a server-side failure
        Err(err) => Err((jar, err)),
    }
}

/// End the current session
/// DELETE /api/client/logout
pub async fn logout_handler(
    AuthenticatedUser(identity): AuthenticatedUser,
    State(service): State<Arc<AuthService>>,
    State(cookies): State<CookieConfig>,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), AuthError> {
    if let Some(presented) = presented_refresh_token(&jar, &cookies) {
        service.revoke(&presented).await?;
    }
    tracing::debug!("User {} logged out", identity.user_id);

    Ok((clear_refresh_cookie(jar, &cookies), StatusCode::NO_CONTENT))
}

/// Get current user information
/// GET /api/client/personal-info
pub async fn personal_info_handler(
    AuthenticatedUser(identity): AuthenticatedUser,
    State(service): State<Arc<AuthService>>,
) -> Result<Json<UserResponse>, AuthError> {
    Ok(Json(service.current_user(&identity).await?))
}

/// Change password; every other session is ended and a fresh one issued
/// PUT /api/client/change-password
pub async fn change_password_handler(
    AuthenticatedUser(identity): AuthenticatedUser,
    State(service): State<Arc<AuthService>>,
    State(cookies): State<CookieConfig>,
    jar: CookieJar,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<(CookieJar, Json<AuthResponse>), AuthError> {
    let tokens = service.change_password(&identity, request).await?;
    let jar = jar.add(refresh_cookie(&cookies, &tokens));
    Ok((jar, Json(AuthResponse::from(&tokens))))
}

/// GET /api/admin/super/moderator
pub async fn list_moderators_handler(
    State(service): State<Arc<AuthService>>,
) -> Result<Json<Vec<UserResponse>>, AuthError> {
    Ok(Json(service.list_moderators().await?))
}

/// POST /api/admin/super/moderator
pub async fn create_moderator_handler(
    State(service): State<Arc<AuthService>>,
    Json(request): Json<CreateModeratorRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AuthError> {
    let moderator = service.create_moderator(request).await?;
    Ok((StatusCode::CREATED, Json(moderator)))
}

/// DELETE /api/admin/super/moderator?id=
pub async fn delete_moderator_handler(
    State(service): State<Arc<AuthService>>,
    Query(query): Query<ModeratorIdQuery>,
) -> Result<StatusCode, AuthError> {
    service.delete_moderator(query.id).await?;
    Ok(StatusCode::NO_CONTENT)
}
