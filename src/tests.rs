// Router tests for the Storefront API
// Full gate + handler stack over in-memory stores

use super::*;
use crate::auth::{password::PasswordService, repository::UserRepository, Role};
use crate::config::CookieConfig;
use crate::orders::InMemoryOrderStore;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum_extra::extract::cookie::SameSite;
use axum_test::{TestResponse, TestServer};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::Arc;

const PASSWORD: &str = "s3cret-password";

// ============================================================================
// Test Helpers
// ============================================================================

fn test_config() -> Config {
    Config {
        database_url: "postgres://unused".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        db_max_connections: 1,
        jwt_secret: "test_secret_key_for_testing_purposes_0123".to_string(),
        access_token_ttl: 900,
        refresh_token_ttl: 2_592_000,
        refresh_cookie: CookieConfig {
            name: "refresh_token".to_string(),
            secure: false,
            same_site: SameSite::Lax,
        },
        cors_allowed_origins: vec![],
        token_purge_interval: std::time::Duration::from_secs(3600),
    }
}

struct TestApp {
    server: TestServer,
    orders: Arc<InMemoryOrderStore>,
    users: Arc<crate::auth::memory::InMemoryUserRepository>,
}

fn create_test_app() -> TestApp {
    let config = test_config();
    let (state, orders, users) = AppState::in_memory(&config);
    let server = TestServer::new(create_router(state, &config)).unwrap();
    TestApp { server, orders, users }
}

impl TestApp {
    async fn seed_user(&self, email: &str, role: Role) {
        let hash = PasswordService::hash_password(PASSWORD).unwrap();
        self.users.create_user(email, &hash, role).await.unwrap();
    }

    async fn sign_up(&self, email: &str) -> Session {
        let response = self
            .server
            .post("/auth/sign-up")
            .json(&json!({ "email": email, "password": PASSWORD }))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);
        Session::from_response(&response)
    }

    async fn sign_in(&self, email: &str) -> Session {
        let response = self
            .server
            .post("/auth/sign-in")
            .json(&json!({ "email": email, "password": PASSWORD }))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        Session::from_response(&response)
    }

    async fn refresh(&self, refresh_token: &str) -> TestResponse {
        self.server
            .post("/auth/refresh")
            .add_header(header::COOKIE, cookie_header(refresh_token))
            .await
    }
}

/// Access token from the body plus refresh token from Set-Cookie
struct Session {
    access_token: String,
    refresh_token: String,
}

impl Session {
    fn from_response(response: &TestResponse) -> Self {
        let body: Value = response.json();
        Self {
            access_token: body["access_token"].as_str().unwrap().to_string(),
            refresh_token: refresh_cookie_value(response).expect("refresh cookie set"),
        }
    }

    fn bearer(&self) -> HeaderValue {
        bearer(&self.access_token)
    }
}

fn bearer(token: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("Bearer {}", token)).unwrap()
}

fn cookie_header(refresh_token: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("refresh_token={}", refresh_token)).unwrap()
}

fn set_cookie_for_refresh(response: &TestResponse) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with("refresh_token="))
        .map(str::to_string)
}

fn refresh_cookie_value(response: &TestResponse) -> Option<String> {
    set_cookie_for_refresh(response).map(|cookie| {
        cookie["refresh_token=".len()..]
            .split(';')
            .next()
            .unwrap_or_default()
            .to_string()
    })
}

fn user_cart() -> HeaderName {
    HeaderName::from_static("usercart")
}

// ============================================================================
// Public routes
// ============================================================================

#[tokio::test]
async fn test_health() {
    let app = create_test_app();
    let response = app.server.get("/health").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>()["status"], "ok");
}

#[tokio::test]
async fn test_sign_up_sets_http_only_refresh_cookie() {
    let app = create_test_app();
    let response = app
        .server
        .post("/auth/sign-up")
        .json(&json!({ "email": "new@example.com", "password": PASSWORD }))
        .await;

    assert_eq!(response.status_code(), StatusCode::CREATED);
    let body: Value = response.json();
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["user"]["role"], "client");
    assert!(body.get("refresh_token").is_none());

    let cookie = set_cookie_for_refresh(&response).unwrap();
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("Path=/"));
}

#[tokio::test]
async fn test_sign_up_validation_and_duplicates() {
    let app = create_test_app();
    app.sign_up("dup@example.com").await;

    let response = app
        .server
        .post("/auth/sign-up")
        .json(&json!({ "email": "dup@example.com", "password": PASSWORD }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);

    let response = app
        .server
        .post("/auth/sign-up")
        .json(&json!({ "email": "not-an-email", "password": PASSWORD }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error_code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_sign_in_wrong_password() {
    let app = create_test_app();
    app.sign_up("user@example.com").await;

    let response = app
        .server
        .post("/auth/sign-in")
        .json(&json!({ "email": "user@example.com", "password": "wrong-password1" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<Value>()["error_code"], "INVALID_CREDENTIALS");
}

// ============================================================================
// Gate tiers
// ============================================================================

#[tokio::test]
async fn test_protected_route_without_token_is_401_with_fixed_message() {
    let app = create_test_app();

    for authorization in [None, Some("Bearer garbage"), Some("Basic dXNlcjpwYXNz")] {
        let mut request = app.server.get("/api/client/personal-info");
        if let Some(value) = authorization {
            request = request.add_header(header::AUTHORIZATION, HeaderValue::from_static(value));
        }
        let response = request.await;

        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
        let body: Value = response.json();
        assert_eq!(body["error_code"], "UNAUTHENTICATED");
        assert_eq!(body["message"], crate::auth::error::UNAUTHENTICATED_MESSAGE);
    }
}

#[tokio::test]
async fn test_personal_info_for_client() {
    let app = create_test_app();
    let session = app.sign_up("me@example.com").await;

    let response = app
        .server
        .get("/api/client/personal-info")
        .add_header(header::AUTHORIZATION, session.bearer())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>()["email"], "me@example.com");
}

#[tokio::test]
async fn test_client_is_forbidden_from_admin_routes() {
    let app = create_test_app();
    let session = app.sign_up("client@example.com").await;

    let response = app
        .server
        .get("/api/admin/orders")
        .add_header(header::AUTHORIZATION, session.bearer())
        .await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(response.json::<Value>()["error_code"], "FORBIDDEN");
}

#[tokio::test]
async fn test_moderator_is_forbidden_from_super_admin_routes() {
    let app = create_test_app();
    app.seed_user("mod@example.com", Role::Moderator).await;
    let moderator = app.sign_in("mod@example.com").await;

    let response = app
        .server
        .get("/api/admin/orders")
        .add_header(header::AUTHORIZATION, moderator.bearer())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let response = app
        .server
        .get("/api/admin/super/moderator")
        .add_header(header::AUTHORIZATION, moderator.bearer())
        .await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_super_admin_manages_moderators() {
    let app = create_test_app();
    app.seed_user("root@example.com", Role::SuperAdmin).await;
    let root = app.sign_in("root@example.com").await;

    let response = app
        .server
        .post("/api/admin/super/moderator")
        .add_header(header::AUTHORIZATION, root.bearer())
        .json(&json!({ "email": "newmod@example.com", "password": PASSWORD }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    let moderator_id = response.json::<Value>()["id"].as_i64().unwrap();

    // The new moderator can reach admin routes
    let moderator = app.sign_in("newmod@example.com").await;
    let response = app
        .server
        .get("/api/admin/orders")
        .add_header(header::AUTHORIZATION, moderator.bearer())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let response = app
        .server
        .get("/api/admin/super/moderator")
        .add_header(header::AUTHORIZATION, root.bearer())
        .await;
    assert_eq!(response.json::<Value>().as_array().unwrap().len(), 1);

    let response = app
        .server
        .delete(&format!("/api/admin/super/moderator?id={}", moderator_id))
        .add_header(header::AUTHORIZATION, root.bearer())
        .await;
    assert_eq!(response.status_code(), StatusCode::NO_CONTENT);

    // Deletion ended the moderator's sessions
    let response = app.refresh(&moderator.refresh_token).await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

// ============================================================================
// Refresh rotation
// ============================================================================

#[tokio::test]
async fn test_refresh_rotation_reuse_and_logout() {
    let app = create_test_app();
    app.sign_up("flow@example.com").await;
    let first = app.sign_in("flow@example.com").await;

    // refresh(R1) → A2 + R2
    let response = app.refresh(&first.refresh_token).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let second = Session::from_response(&response);
    assert_ne!(second.refresh_token, first.refresh_token);

    let response = app
        .server
        .get("/api/client/personal-info")
        .add_header(header::AUTHORIZATION, second.bearer())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    // Replaying R1 fails and clears the cookie
    let response = app.refresh(&first.refresh_token).await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<Value>()["error_code"], "INVALID_TOKEN");
    assert_eq!(refresh_cookie_value(&response).as_deref(), Some(""));

    // Reuse revoked the whole session, R2 included
    let response = app.refresh(&second.refresh_token).await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_then_refresh_fails() {
    let app = create_test_app();
    app.sign_up("bye@example.com").await;
    let session = app.sign_in("bye@example.com").await;

    let response = app
        .server
        .delete("/api/client/logout")
        .add_header(header::AUTHORIZATION, session.bearer())
        .add_header(header::COOKIE, cookie_header(&session.refresh_token))
        .await;
    assert_eq!(response.status_code(), StatusCode::NO_CONTENT);
    assert_eq!(refresh_cookie_value(&response).as_deref(), Some(""));

    let response = app.refresh(&session.refresh_token).await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_without_cookie() {
    let app = create_test_app();
    let response = app.server.post("/auth/refresh").await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_change_password_issues_new_session() {
    let app = create_test_app();
    let old = app.sign_up("pw@example.com").await;

    let response = app
        .server
        .put("/api/client/change-password")
        .add_header(header::AUTHORIZATION, old.bearer())
        .json(&json!({ "old_password": PASSWORD, "new_password": "brand-new-pass7" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let fresh = Session::from_response(&response);

    assert_eq!(app.refresh(&old.refresh_token).await.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.refresh(&fresh.refresh_token).await.status_code(), StatusCode::OK);
}

// ============================================================================
// Orders
// ============================================================================

#[tokio::test]
async fn test_guest_order_gets_cart_session_header() {
    let app = create_test_app();
    let product = app.orders.add_product("000123", "Lamp", dec!(10.00), 5).await;

    let response = app
        .server
        .post("/api/shopping/order")
        .json(&json!({ "items": [{ "product_id": product.id, "quantity": 2 }] }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);

    let cart = response.header(user_cart());
    let cart = cart.to_str().unwrap();
    let body: Value = response.json();
    assert_eq!(body["status"], "IN_PROGRESS");
    assert_eq!(body["cart_session"], cart);
    assert_eq!(app.orders.stock_of(product.id).await, Some(3));

    // A returning guest keeps its cart session
    let response = app
        .server
        .post("/api/shopping/order")
        .add_header(user_cart(), HeaderValue::from_str(cart).unwrap())
        .json(&json!({ "items": [{ "product_id": product.id, "quantity": 1 }] }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    assert!(response.headers().get(user_cart()).is_none());
    assert_eq!(response.json::<Value>()["cart_session"], cart);
}

#[tokio::test]
async fn test_shopping_with_invalid_token_is_401() {
    let app = create_test_app();
    let product = app.orders.add_product("000124", "Shade", dec!(3.00), 5).await;

    let response = app
        .server
        .post("/api/shopping/order")
        .add_header(header::AUTHORIZATION, bearer("forged.token.value"))
        .json(&json!({ "items": [{ "product_id": product.id, "quantity": 1 }] }))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.orders.stock_of(product.id).await, Some(5));
}

#[tokio::test]
async fn test_insufficient_stock_is_409() {
    let app = create_test_app();
    let session = app.sign_up("buyer@example.com").await;
    let product = app.orders.add_product("000123", "Lamp", dec!(10.00), 5).await;

    let order = |quantity: i32| json!({ "items": [{ "product_id": product.id, "quantity": quantity }] });

    let response = app
        .server
        .post("/api/shopping/order")
        .add_header(header::AUTHORIZATION, session.bearer())
        .json(&order(5))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    assert_eq!(app.orders.stock_of(product.id).await, Some(0));

    let response = app
        .server
        .post("/api/shopping/order")
        .add_header(header::AUTHORIZATION, session.bearer())
        .json(&order(1))
        .await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["error_code"], "INSUFFICIENT_STOCK");
    assert_eq!(body["details"]["available"], 0);
    assert_eq!(app.orders.stock_of(product.id).await, Some(0));

    let response = app
        .server
        .get("/api/client/user-orders")
        .add_header(header::AUTHORIZATION, session.bearer())
        .await;
    assert_eq!(response.json::<Value>().as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_admin_order_lifecycle_and_invoice() {
    let app = create_test_app();
    app.seed_user("mod@example.com", Role::Moderator).await;
    let moderator = app.sign_in("mod@example.com").await;
    let client = app.sign_up("owner@example.com").await;
    let product = app.orders.add_product("000555", "Table", dec!(120.00), 2).await;

    let response = app
        .server
        .post("/api/shopping/order")
        .add_header(header::AUTHORIZATION, client.bearer())
        .json(&json!({ "items": [{ "product_id": product.id, "quantity": 2 }] }))
        .await;
    let order_id = response.json::<Value>()["id"].as_str().unwrap().to_string();

    // Completing before processing is rejected and changes nothing
    let response = app
        .server
        .put("/api/admin/complete-order")
        .add_header(header::AUTHORIZATION, moderator.bearer())
        .json(&json!({ "id": order_id }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["error_code"], "INVALID_TRANSITION");
    assert_eq!(body["details"]["from"], "IN_PROGRESS");

    let response = app
        .server
        .get(&format!("/api/invoice?order_id={}", order_id))
        .add_header(header::AUTHORIZATION, client.bearer())
        .await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);
    assert_eq!(response.json::<Value>()["error_code"], "INVOICE_UNAVAILABLE");

    for path in ["/api/admin/processed-order", "/api/admin/complete-order"] {
        let response = app
            .server
            .put(path)
            .add_header(header::AUTHORIZATION, moderator.bearer())
            .json(&json!({ "id": order_id }))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
    }

    let response = app
        .server
        .get(&format!("/api/admin/order?id={}", order_id))
        .add_header(header::AUTHORIZATION, moderator.bearer())
        .await;
    assert_eq!(response.json::<Value>()["status"], "COMPLETED");

    let response = app
        .server
        .get(&format!("/api/invoice?order_id={}", order_id))
        .add_header(header::AUTHORIZATION, client.bearer())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let invoice: Value = response.json();
    assert_eq!(invoice["lines"][0]["article"], "000555");
    assert_eq!(invoice["lines"].as_array().unwrap().len(), 1);

    let response = app
        .server
        .get("/api/admin/orders?status=COMPLETED")
        .add_header(header::AUTHORIZATION, moderator.bearer())
        .await;
    assert_eq!(response.json::<Value>()["total"], 1);
}

#[tokio::test]
async fn test_admin_created_order() {
    let app = create_test_app();
    app.seed_user("mod@example.com", Role::Moderator).await;
    let moderator = app.sign_in("mod@example.com").await;
    let product = app.orders.add_product("000900", "Shelf", dec!(45.00), 4).await;

    let response = app
        .server
        .post("/api/admin/order")
        .add_header(header::AUTHORIZATION, moderator.bearer())
        .json(&json!({ "owner_id": null, "items": [{ "product_id": product.id, "quantity": 3 }] }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    assert_eq!(app.orders.stock_of(product.id).await, Some(1));

    let response = app
        .server
        .get(&format!("/api/admin/order?id={}", uuid::Uuid::new_v4()))
        .add_header(header::AUTHORIZATION, moderator.bearer())
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}
