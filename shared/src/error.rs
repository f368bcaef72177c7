use diesel_async::pooled_connection::PoolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::FailItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidArgument,
    EmptyCart,
    NotFound,
    InsufficientStock,
    UnknownProduct,
    OrderSnConflict,
    TerminalState,
    ConcurrentUpdate,
    CollaboratorUnavailable,
    BrokerUnavailable,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::EmptyCart => "EMPTY_CART",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InsufficientStock => "INSUFFICIENT_STOCK",
            ErrorCode::UnknownProduct => "UNKNOWN_PRODUCT",
            ErrorCode::OrderSnConflict => "ORDER_SN_CONFLICT",
            ErrorCode::TerminalState => "TERMINAL_STATE",
            ErrorCode::ConcurrentUpdate => "CONCURRENT_UPDATE",
            ErrorCode::CollaboratorUnavailable => "COLLABORATOR_UNAVAILABLE",
            ErrorCode::BrokerUnavailable => "BROKER_UNAVAILABLE",
            ErrorCode::Internal => "INTERNAL",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorCode::ConcurrentUpdate
                | ErrorCode::CollaboratorUnavailable
                | ErrorCode::BrokerUnavailable
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, ErrorCode::InvalidArgument | ErrorCode::EmptyCart)
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::InvalidArgument | ErrorCode::EmptyCart => 400,
            ErrorCode::NotFound => 404,
            ErrorCode::InsufficientStock
            | ErrorCode::OrderSnConflict
            | ErrorCode::TerminalState
            | ErrorCode::ConcurrentUpdate => 409,
            ErrorCode::UnknownProduct => 422,
            ErrorCode::CollaboratorUnavailable | ErrorCode::BrokerUnavailable => 503,
            ErrorCode::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error body exchanged between services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct ServiceError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fail_items: Vec<FailItem>,
}

impl ServiceError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), fail_items: Vec::new() }
    }

    pub fn with_fail_items(mut self, fail_items: Vec<FailItem>) -> Self {
        self.fail_items = fail_items;
        self
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CollaboratorUnavailable, message)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Database(_) | StoreError::Pool(_) | StoreError::Unavailable(_)
        )
    }
}

impl From<bb8::RunError<PoolError>> for StoreError {
    fn from(e: bb8::RunError<PoolError>) -> Self {
        StoreError::Pool(e.to_string())
    }
}
