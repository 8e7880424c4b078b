// Authentication module
// JWT access tokens, rotating refresh tokens, and the role-tiered authorization gate

pub mod error;
pub mod handlers;
pub mod memory;
pub mod middleware;
pub mod models;
pub mod password;
pub mod repository;
pub mod service;
pub mod token;

// Re-export commonly used types
pub use error::AuthError;
pub use middleware::{
    AuthenticatedUser, Gate, IdentityInterceptor, Interceptor, RequestContext, RoleInterceptor,
    ShoppingContextInterceptor, Shopper,
};
pub use models::{Identity, Role, User, UserResponse};
pub use service::AuthService;
pub use token::TokenService;
