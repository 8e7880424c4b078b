pub mod error;
pub mod handlers;
pub mod memory;
pub mod models;
pub mod price_calculator;
pub mod repository;
pub mod service;
pub mod status_machine;

pub use error::*;
pub use handlers::*;
pub use memory::InMemoryOrderStore;
pub use models::*;
pub use price_calculator::*;
pub use repository::{OrderStore, PgOrderStore};
pub use service::*;
pub use status_machine::*;
