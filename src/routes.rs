// Route surface: which paths sit behind which gate

use axum::{
    http::{header, HeaderValue, Method},
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::{
    handlers as auth_handlers,
    middleware::{enforce_gate, USER_CART_HEADER},
    Gate, IdentityInterceptor, RoleInterceptor, ShoppingContextInterceptor,
};
use crate::config::Config;
use crate::orders::handlers as order_handlers;
use crate::state::AppState;

/// Gates for every route tier, each built on its parent
#[derive(Clone)]
pub struct Gates {
    pub authenticated: Gate,
    pub client: Gate,
    pub shopping: Gate,
    pub moderator: Gate,
    pub super_admin: Gate,
}

impl Gates {
    pub fn new(state: &AppState) -> Self {
        let authenticated = Gate::public().then(IdentityInterceptor::new(state.tokens.clone()));
        let moderator = authenticated.then(RoleInterceptor::moderator_permission());

        Self {
            client: authenticated.then(RoleInterceptor::user_authorized()),
            shopping: Gate::public().then(ShoppingContextInterceptor::new(state.tokens.clone())),
            super_admin: moderator.then(RoleInterceptor::super_admin_permission()),
            moderator,
            authenticated,
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

fn cors_layer(config: &Config) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, USER_CART_HEADER.clone()])
        .expose_headers([USER_CART_HEADER.clone()]);

    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    // Credentialed requests (the refresh cookie) need explicit origins
    if origins.is_empty() {
        base.allow_origin(Any)
    } else {
        base.allow_origin(origins).allow_credentials(true)
    }
}

/// Creates and configures the application router
pub fn create_router(state: AppState, config: &Config) -> Router {
    let gates = Gates::new(&state);

    let auth = Router::new()
        .route("/sign-up", post(auth_handlers::sign_up_handler))
        .route("/sign-in", post(auth_handlers::sign_in_handler))
        .route("/refresh", post(auth_handlers::refresh_handler));

    let client = Router::new()
        .route("/logout", delete(auth_handlers::logout_handler))
        .route("/personal-info", get(auth_handlers::personal_info_handler))
        .route("/change-password", put(auth_handlers::change_password_handler))
        .route("/user-orders", get(order_handlers::user_orders_handler))
        .route_layer(from_fn_with_state(gates.client.clone(), enforce_gate));

    let invoice = Router::new()
        .route("/invoice", get(order_handlers::invoice_handler))
        .route_layer(from_fn_with_state(gates.authenticated.clone(), enforce_gate));

    let shopping = Router::new()
        .route("/order", post(order_handlers::place_order_handler))
        .route_layer(from_fn_with_state(gates.shopping.clone(), enforce_gate));

    let admin = Router::new()
        .route("/orders", get(order_handlers::list_orders_handler))
        .route(
            "/order",
            get(order_handlers::get_order_handler).post(order_handlers::admin_create_order_handler),
        )
        .route("/processed-order", put(order_handlers::process_order_handler))
        .route("/complete-order", put(order_handlers::complete_order_handler))
        .route_layer(from_fn_with_state(gates.moderator.clone(), enforce_gate));

    let super_admin = Router::new()
        .route(
            "/moderator",
            get(auth_handlers::list_moderators_handler)
                .post(auth_handlers::create_moderator_handler)
                .delete(auth_handlers::delete_moderator_handler),
        )
        .route_layer(from_fn_with_state(gates.super_admin.clone(), enforce_gate));

    Router::new()
        .route("/health", get(health))
        .nest("/auth", auth)
        .nest("/api/client", client)
        .nest("/api", invoice)
        .nest("/api/shopping", shopping)
        .nest("/api/admin/super", super_admin)
        .nest("/api/admin", admin)
        .layer(cors_layer(config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
