pub mod api;
pub mod clients;
pub mod error;
pub mod models;
pub mod outbox;
pub mod platform;
pub mod saga;
pub mod schema;
pub mod service;
pub mod store;
pub mod timeout;

pub use error::OrderError;
pub use platform::CorePlatform;
pub use saga::{OrderSaga, PlaceOrder, PlacedOrder};
pub use service::OrderService;
