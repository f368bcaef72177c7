use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use shared::{ErrorCode, OrderStatus, ServiceError};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::error::OrderError;
use crate::models::OrderRecord;
use crate::saga::{OrderSaga, PlaceOrder, PlacedOrder};
use crate::service::{OrderDetail, OrderPage, OrderService, DEFAULT_PER_PAGE};
use crate::store::OrderStore;

pub struct AppState<S> {
    pub saga: Arc<OrderSaga<S>>,
    pub orders: Arc<OrderService<S>>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self { saga: self.saga.clone(), orders: self.orders.clone() }
    }
}

pub struct ApiError(ServiceError);

impl From<OrderError> for ApiError {
    fn from(e: OrderError) -> Self {
        ApiError(e.to_service_error())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if self.0.code == ErrorCode::Internal {
            error!("Order request failed: {}", self.0);
        }
        (status, Json(self.0)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "first_page")]
    pub page: i64,
    #[serde(default = "default_per_page")]
    pub per_page: i64,
}

fn first_page() -> i64 {
    1
}

fn default_per_page() -> i64 {
    DEFAULT_PER_PAGE
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

pub fn create_router<S: OrderStore>(state: AppState<S>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/orders", post(create_order::<S>))
        .route("/orders/:order_sn", get(order_detail::<S>))
        .route("/orders/:order_sn/status", put(update_status::<S>))
        .route("/users/:user_id/orders", get(list_orders::<S>))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

async fn create_order<S: OrderStore>(
    State(state): State<AppState<S>>,
    Json(request): Json<PlaceOrder>,
) -> Result<(StatusCode, Json<PlacedOrder>), ApiError> {
    // Runs on its own task so a dropped connection cannot stop the saga
    // between locking stock and compensating.
    let saga = state.saga.clone();
    let placed = tokio::spawn(async move { saga.create_order(request).await })
        .await
        .map_err(|e| ApiError(ServiceError::internal(format!("placement task failed: {}", e))))??;
    Ok((StatusCode::CREATED, Json(placed)))
}

async fn order_detail<S: OrderStore>(
    State(state): State<AppState<S>>,
    Path(order_sn): Path<String>,
    Query(query): Query<UserQuery>,
) -> Result<Json<OrderDetail>, ApiError> {
    Ok(Json(state.orders.order_detail(&order_sn, query.user_id).await?))
}

async fn update_status<S: OrderStore>(
    State(state): State<AppState<S>>,
    Path(order_sn): Path<String>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<OrderRecord>, ApiError> {
    Ok(Json(state.orders.update_order_status(&order_sn, request.status).await?))
}

async fn list_orders<S: OrderStore>(
    State(state): State<AppState<S>>,
    Path(user_id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> Result<Json<OrderPage>, ApiError> {
    Ok(Json(state.orders.list_orders(user_id, query.page, query.per_page).await?))
}

pub async fn health_check() -> &'static str {
    "OK"
}
