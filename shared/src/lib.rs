pub mod broker;
pub mod clock;
pub mod config;
pub mod consumer;
pub mod deadline;
pub mod error;
pub mod inventory;
pub mod lease;
pub mod retry;
pub mod types;

use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection};

pub use error::{ErrorCode, ServiceError, StoreError};
pub use types::*;

pub type DbPool = Pool<AsyncPgConnection>;
