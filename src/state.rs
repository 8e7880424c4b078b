// Application state shared across handlers

use axum::extract::FromRef;
use std::sync::Arc;

use crate::auth::{
    memory::{InMemoryRefreshTokenStore, InMemoryUserRepository},
    repository::{PgRefreshTokenStore, PgUserRepository, RefreshTokenStore, UserRepository},
    AuthService, TokenService,
};
use crate::config::{Config, CookieConfig};
use crate::db::DbPool;
use crate::orders::{InMemoryOrderStore, OrderService, OrderStore, PgOrderStore};

#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub orders: Arc<OrderService>,
    pub tokens: Arc<TokenService>,
    pub cookies: CookieConfig,
}

impl AppState {
    /// Wire services over arbitrary stores
    pub fn from_parts(
        config: &Config,
        users: Arc<dyn UserRepository>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        orders: Arc<dyn OrderStore>,
    ) -> Self {
        let tokens = Arc::new(TokenService::with_ttl(
            &config.jwt_secret,
            config.access_token_ttl,
            config.refresh_token_ttl,
        ));

        Self {
            auth: Arc::new(AuthService::new(users, refresh_tokens, tokens.clone())),
            orders: Arc::new(OrderService::new(orders)),
            tokens,
            cookies: config.refresh_cookie.clone(),
        }
    }

    /// Services backed by Postgres
    pub fn postgres(pool: DbPool, config: &Config) -> Self {
        Self::from_parts(
            config,
            Arc::new(PgUserRepository::new(pool.clone())),
            Arc::new(PgRefreshTokenStore::new(pool.clone())),
            Arc::new(PgOrderStore::new(pool)),
        )
    }

    /// Services backed by in-memory stores; the order store is returned for seeding
    pub fn in_memory(config: &Config) -> (Self, Arc<InMemoryOrderStore>, Arc<InMemoryUserRepository>) {
        let users = Arc::new(InMemoryUserRepository::new());
        let orders = Arc::new(InMemoryOrderStore::new());
        let state = Self::from_parts(
            config,
            users.clone(),
            Arc::new(InMemoryRefreshTokenStore::new()),
            orders.clone(),
        );
        (state, orders, users)
    }
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

impl FromRef<AppState> for Arc<OrderService> {
    fn from_ref(state: &AppState) -> Self {
        state.orders.clone()
    }
}

impl FromRef<AppState> for CookieConfig {
    fn from_ref(state: &AppState) -> Self {
        state.cookies.clone()
    }
}
