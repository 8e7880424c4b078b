// Authorization gate: ordered interceptor chains for protected routes

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::{
    error::AuthError,
    models::{Identity, Role},
    token::TokenService,
};

/// Header carrying the anonymous cart session of a guest shopper
pub static USER_CART_HEADER: HeaderName = HeaderName::from_static("usercart");

/// Per-request state produced by a gate and read by extractors
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub identity: Option<Identity>,
    pub cart_session: Option<String>,
    /// The cart session was generated by this request and must be echoed back
    pub cart_session_issued: bool,
}

/// One step of a gate
///
/// Interceptors run in order; the first error stops the chain.
pub trait Interceptor: Send + Sync {
    fn intercept(&self, headers: &HeaderMap, ctx: &mut RequestContext) -> Result<(), AuthError>;
}

/// Immutable, ordered chain of interceptors
///
/// `then` returns a child gate, so route groups compose by nesting:
/// `admin = auth.then(moderator)`, `super_admin = admin.then(super_admin)`.
#[derive(Clone, Default)]
pub struct Gate {
    chain: Arc<Vec<Arc<dyn Interceptor>>>,
}

impl Gate {
    /// A gate with no interceptors
    pub fn public() -> Self {
        Self::default()
    }

    /// Parent chain followed by `interceptor`
    pub fn then<I>(&self, interceptor: I) -> Self
    where
        I: Interceptor + 'static,
    {
        let mut chain: Vec<Arc<dyn Interceptor>> = self.chain.iter().cloned().collect();
        chain.push(Arc::new(interceptor));
        Self {
            chain: Arc::new(chain),
        }
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Run every interceptor against the request headers
    pub fn run(&self, headers: &HeaderMap) -> Result<RequestContext, AuthError> {
        let mut ctx = RequestContext::default();
        for interceptor in self.chain.iter() {
            interceptor.intercept(headers, &mut ctx)?;
        }
        Ok(ctx)
    }
}

/// Axum adapter: run the gate before the handler
///
/// Mount with `axum::middleware::from_fn_with_state(gate, enforce_gate)`.
pub async fn enforce_gate(
    State(gate): State<Gate>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let endpoint = request.uri().path().to_string();
    let ctx = gate.run(request.headers()).map_err(|e| {
        debug!("Gate rejected request to {}: {}", endpoint, e);
        e
    })?;

    let issued_cart = if ctx.cart_session_issued {
        ctx.cart_session.clone()
    } else {
        None
    };

    request.extensions_mut().insert(ctx);
    let mut response = next.run(request).await;

    if let Some(session) = issued_cart {
        if let Ok(value) = HeaderValue::from_str(&session) {
            response.headers_mut().insert(USER_CART_HEADER.clone(), value);
        }
    }

    Ok(response)
}

/// Extract the bearer token from the Authorization header
///
/// `Ok(None)` when the header is absent; a present but unusable header is an error.
fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, AuthError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    let value = value.to_str().map_err(|_| {
        debug!("Authorization header is not valid ASCII");
        AuthError::Unauthenticated
    })?;

    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(Some)
        .ok_or_else(|| {
            debug!("Authorization header missing 'Bearer ' prefix");
            AuthError::Unauthenticated
        })
}

/// Resolves the caller from `Authorization: Bearer <token>`
pub struct IdentityInterceptor {
    tokens: Arc<TokenService>,
}

impl IdentityInterceptor {
    pub fn new(tokens: Arc<TokenService>) -> Self {
        Self { tokens }
    }
}

impl Interceptor for IdentityInterceptor {
    fn intercept(&self, headers: &HeaderMap, ctx: &mut RequestContext) -> Result<(), AuthError> {
        let token = bearer_token(headers)?.ok_or_else(|| {
            debug!("Missing Authorization header");
            AuthError::Unauthenticated
        })?;

        ctx.identity = Some(self.tokens.verify_access(token)?);
        Ok(())
    }
}

/// Requires the attached identity to hold at least `required`
#[derive(Debug, Clone, Copy)]
pub struct RoleInterceptor {
    required: Role,
}

impl RoleInterceptor {
    pub fn new(required: Role) -> Self {
        Self { required }
    }

    /// Any signed-in client
    pub fn user_authorized() -> Self {
        Self::new(Role::Client)
    }

    pub fn moderator_permission() -> Self {
        Self::new(Role::Moderator)
    }

    pub fn super_admin_permission() -> Self {
        Self::new(Role::SuperAdmin)
    }

    pub fn required(&self) -> Role {
        self.required
    }
}

impl Interceptor for RoleInterceptor {
    fn intercept(&self, _headers: &HeaderMap, ctx: &mut RequestContext) -> Result<(), AuthError> {
        let identity = ctx.identity.as_ref().ok_or(AuthError::Unauthenticated)?;

        if !identity.role.meets_minimum(self.required) {
            warn!(
                "Authorization failed: user_id={}, required_role={}, actual_role={}",
                identity.user_id, self.required, identity.role
            );
            return Err(AuthError::Forbidden {
                required: self.required,
                actual: identity.role,
            });
        }

        Ok(())
    }
}

/// Signed-in customer or anonymous guest with a cart session
pub struct ShoppingContextInterceptor {
    tokens: Arc<TokenService>,
}

impl ShoppingContextInterceptor {
    pub fn new(tokens: Arc<TokenService>) -> Self {
        Self { tokens }
    }
}

impl Interceptor for ShoppingContextInterceptor {
    fn intercept(&self, headers: &HeaderMap, ctx: &mut RequestContext) -> Result<(), AuthError> {
        // A token that is sent must be valid; guests send none
        if let Some(token) = bearer_token(headers)? {
            ctx.identity = Some(self.tokens.verify_access(token)?);
            return Ok(());
        }

        let presented = headers
            .get(&USER_CART_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        match presented {
            Some(session) => ctx.cart_session = Some(session),
            None => {
                ctx.cart_session = Some(Uuid::new_v4().to_string());
                ctx.cart_session_issued = true;
            }
        }
        Ok(())
    }
}

fn request_context(parts: &Parts) -> Result<&RequestContext, AuthError> {
    parts.extensions.get::<RequestContext>().ok_or_else(|| {
        AuthError::Config("route is not behind an authorization gate".to_string())
    })
}

/// Authenticated user extractor for gated routes
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        request_context(parts)?
            .identity
            .clone()
            .map(AuthenticatedUser)
            .ok_or(AuthError::Unauthenticated)
    }
}

/// Whoever is placing an order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shopper {
    Customer(Identity),
    Guest { cart_session: String },
}

#[async_trait]
impl<S> FromRequestParts<S> for Shopper
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ctx = request_context(parts)?;
        match (&ctx.identity, &ctx.cart_session) {
            (Some(identity), _) => Ok(Shopper::Customer(identity.clone())),
            (None, Some(cart_session)) => Ok(Shopper::Guest {
                cart_session: cart_session.clone(),
            }),
            (None, None) => Err(AuthError::Config(
                "shopping route is missing its shopping context".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;
    use proptest::prelude::*;

    fn tokens() -> Arc<TokenService> {
        Arc::new(TokenService::new("test_secret_key_for_testing_purposes_0123"))
    }

    fn identity(role: Role) -> Identity {
        Identity {
            user_id: 7,
            email: "someone@example.com".to_string(),
            role,
        }
    }

    fn bearer_headers(tokens: &TokenService, role: Role) -> HeaderMap {
        let token = tokens.issue_access_token(&identity(role)).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token.token)).unwrap(),
        );
        headers
    }

    fn auth_header(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn role_gate(tokens: Arc<TokenService>, required: Role) -> Gate {
        Gate::public()
            .then(IdentityInterceptor::new(tokens))
            .then(RoleInterceptor::new(required))
    }

    fn role_strategy() -> impl Strategy<Value = Role> {
        prop_oneof![
            Just(Role::Guest),
            Just(Role::Client),
            Just(Role::Moderator),
            Just(Role::SuperAdmin),
        ]
    }

    fn parts_with(ctx: Option<RequestContext>) -> Parts {
        let mut request = HttpRequest::builder().uri("/").body(()).unwrap();
        if let Some(ctx) = ctx {
            request.extensions_mut().insert(ctx);
        }
        request.into_parts().0
    }

    #[test]
    fn test_public_gate_passes_everything() {
        let ctx = Gate::public().run(&HeaderMap::new()).unwrap();
        assert!(ctx.identity.is_none());
        assert!(ctx.cart_session.is_none());
    }

    #[test]
    fn test_then_extends_without_mutating_parent() {
        let tokens = tokens();
        let auth = Gate::public().then(IdentityInterceptor::new(tokens));
        let admin = auth.then(RoleInterceptor::moderator_permission());
        let super_admin = admin.then(RoleInterceptor::super_admin_permission());

        assert_eq!(auth.len(), 1);
        assert_eq!(admin.len(), 2);
        assert_eq!(super_admin.len(), 3);
    }

    #[test]
    fn test_identity_interceptor_attaches_identity() {
        let tokens = tokens();
        let gate = Gate::public().then(IdentityInterceptor::new(tokens.clone()));

        let ctx = gate.run(&bearer_headers(&tokens, Role::Client)).unwrap();
        assert_eq!(ctx.identity, Some(identity(Role::Client)));
    }

    #[test]
    fn test_missing_or_malformed_header_is_unauthenticated() {
        let gate = Gate::public().then(IdentityInterceptor::new(tokens()));

        assert!(matches!(gate.run(&HeaderMap::new()), Err(AuthError::Unauthenticated)));
        for value in ["token_without_bearer", "Basic dXNlcjpwYXNz", "Bearer ", "Bearer not.a.jwt"] {
            assert!(matches!(gate.run(&auth_header(value)), Err(AuthError::Unauthenticated)));
        }
    }

    #[test]
    fn test_chain_stops_at_first_rejection() {
        // The role check never sees a request whose identity failed
        let gate = role_gate(tokens(), Role::SuperAdmin);
        assert!(matches!(gate.run(&HeaderMap::new()), Err(AuthError::Unauthenticated)));
    }

    #[test]
    fn test_client_rejected_from_moderator_gate() {
        let tokens = tokens();
        let gate = role_gate(tokens.clone(), Role::Moderator);

        let result = gate.run(&bearer_headers(&tokens, Role::Client));
        assert!(matches!(
            result,
            Err(AuthError::Forbidden { required: Role::Moderator, actual: Role::Client })
        ));
        assert!(gate.run(&bearer_headers(&tokens, Role::SuperAdmin)).is_ok());
    }

    #[test]
    fn test_role_interceptor_without_identity_is_unauthenticated() {
        let gate = Gate::public().then(RoleInterceptor::user_authorized());
        assert!(matches!(gate.run(&HeaderMap::new()), Err(AuthError::Unauthenticated)));
    }

    #[test]
    fn test_shopping_context_guest_gets_fresh_cart_session() {
        let gate = Gate::public().then(ShoppingContextInterceptor::new(tokens()));

        let ctx = gate.run(&HeaderMap::new()).unwrap();
        assert!(ctx.identity.is_none());
        assert!(ctx.cart_session_issued);
        let session = ctx.cart_session.unwrap();
        assert!(Uuid::parse_str(&session).is_ok());
    }

    #[test]
    fn test_shopping_context_keeps_presented_cart_session() {
        let gate = Gate::public().then(ShoppingContextInterceptor::new(tokens()));
        let mut headers = HeaderMap::new();
        headers.insert(USER_CART_HEADER.clone(), HeaderValue::from_static("cart-abc"));

        let ctx = gate.run(&headers).unwrap();
        assert_eq!(ctx.cart_session.as_deref(), Some("cart-abc"));
        assert!(!ctx.cart_session_issued);
    }

    #[test]
    fn test_shopping_context_with_token() {
        let tokens = tokens();
        let gate = Gate::public().then(ShoppingContextInterceptor::new(tokens.clone()));

        let ctx = gate.run(&bearer_headers(&tokens, Role::Client)).unwrap();
        assert_eq!(ctx.identity, Some(identity(Role::Client)));
        assert!(ctx.cart_session.is_none());

        assert!(matches!(
            gate.run(&auth_header("Bearer forged.token.value")),
            Err(AuthError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn test_authenticated_user_extractor() {
        let ctx = RequestContext {
            identity: Some(identity(Role::Moderator)),
            ..Default::default()
        };
        let mut parts = parts_with(Some(ctx));
        let AuthenticatedUser(found) = AuthenticatedUser::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(found.role, Role::Moderator);

        let mut parts = parts_with(Some(RequestContext::default()));
        assert!(matches!(
            AuthenticatedUser::from_request_parts(&mut parts, &()).await,
            Err(AuthError::Unauthenticated)
        ));

        let mut parts = parts_with(None);
        assert!(matches!(
            AuthenticatedUser::from_request_parts(&mut parts, &()).await,
            Err(AuthError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_shopper_extractor() {
        let guest = RequestContext {
            cart_session: Some("cart-1".to_string()),
            ..Default::default()
        };
        let mut parts = parts_with(Some(guest));
        assert_eq!(
            Shopper::from_request_parts(&mut parts, &()).await.unwrap(),
            Shopper::Guest { cart_session: "cart-1".to_string() }
        );

        let customer = RequestContext {
            identity: Some(identity(Role::Client)),
            ..Default::default()
        };
        let mut parts = parts_with(Some(customer));
        assert_eq!(
            Shopper::from_request_parts(&mut parts, &()).await.unwrap(),
            Shopper::Customer(identity(Role::Client))
        );
    }

    proptest! {
        // For r1 < r2 a gate requiring r2 rejects r1 and accepts r2 and above
        #[test]
        fn prop_role_gate_follows_total_order(actual in role_strategy(), required in role_strategy()) {
            let tokens = tokens();
            let gate = role_gate(tokens.clone(), required);
            let result = gate.run(&bearer_headers(&tokens, actual));

            if actual >= required {
                prop_assert!(result.is_ok());
            } else {
                let is_forbidden = matches!(result, Err(AuthError::Forbidden { .. }));
                prop_assert!(is_forbidden);
            }
        }
    }
}
