use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use shared::inventory::{LockRequest, LockResponse, ReservationView, SetStockRequest, SettleResponse, StockView};
use shared::{ErrorCode, ServiceError, StockKey};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::error::LedgerError;
use crate::ledger::{JournalOutcome, StockLedger};
use crate::store::LedgerStore;

pub struct ApiError(ServiceError);

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        ApiError(e.to_service_error())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if self.0.code == ErrorCode::Internal {
            error!("Inventory request failed: {}", self.0);
        }
        (status, Json(self.0)).into_response()
    }
}

pub fn create_router<S: LedgerStore>(ledger: Arc<StockLedger<S>>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/stocks/:product_id/:warehouse_id",
            get(get_stock::<S>).put(set_stock::<S>),
        )
        .route("/reservations", post(lock::<S>))
        .route("/reservations/:order_sn", get(get_reservation::<S>))
        .route("/reservations/:order_sn/commit", post(commit::<S>))
        .route("/reservations/:order_sn/release", post(release::<S>))
        .with_state(ledger)
        .layer(TraceLayer::new_for_http())
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

async fn get_stock<S: LedgerStore>(
    State(ledger): State<Arc<StockLedger<S>>>,
    Path((product_id, warehouse_id)): Path<(i64, i64)>,
) -> Result<Json<StockView>, ApiError> {
    let record = ledger.get_stock(StockKey::new(product_id, warehouse_id)).await?;
    Ok(Json(record.view()))
}

async fn set_stock<S: LedgerStore>(
    State(ledger): State<Arc<StockLedger<S>>>,
    Path((product_id, warehouse_id)): Path<(i64, i64)>,
    Json(request): Json<SetStockRequest>,
) -> Result<Json<StockView>, ApiError> {
    let record = ledger
        .set_stock(StockKey::new(product_id, warehouse_id), request.quantity)
        .await?;
    Ok(Json(record.view()))
}

async fn lock<S: LedgerStore>(
    State(ledger): State<Arc<StockLedger<S>>>,
    Json(request): Json<LockRequest>,
) -> Result<Json<LockResponse>, ApiError> {
    let outcome = ledger.lock(&request.order_sn, &request.items).await?;
    Ok(Json(LockResponse {
        success: true,
        order_sn: outcome.entry.order_sn,
        replayed: outcome.replayed,
    }))
}

async fn get_reservation<S: LedgerStore>(
    State(ledger): State<Arc<StockLedger<S>>>,
    Path(order_sn): Path<String>,
) -> Result<Json<ReservationView>, ApiError> {
    let entry = ledger.reservation(&order_sn).await?;
    Ok(Json(entry.view()))
}

async fn commit<S: LedgerStore>(
    State(ledger): State<Arc<StockLedger<S>>>,
    Path(order_sn): Path<String>,
) -> Result<Json<SettleResponse>, ApiError> {
    let outcome = ledger.commit(&order_sn).await?;
    Ok(Json(settle_response(outcome)))
}

async fn release<S: LedgerStore>(
    State(ledger): State<Arc<StockLedger<S>>>,
    Path(order_sn): Path<String>,
) -> Result<Json<SettleResponse>, ApiError> {
    let outcome = ledger.release(&order_sn).await?;
    Ok(Json(settle_response(outcome)))
}

fn settle_response(outcome: JournalOutcome) -> SettleResponse {
    SettleResponse {
        order_sn: outcome.entry.order_sn,
        status: outcome.entry.status,
        replayed: outcome.replayed,
    }
}

pub async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLedgerStore;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use shared::clock::SystemClock;
    use shared::config::CoreConfig;
    use shared::lease::MemoryLease;
    use shared::{JournalStatus, StockLine};
    use tower::ServiceExt;

    fn app() -> (Router, Arc<StockLedger<MemoryLedgerStore>>) {
        let ledger = Arc::new(StockLedger::new(
            MemoryLedgerStore::new(),
            Arc::new(MemoryLease::new()),
            Arc::new(SystemClock),
            CoreConfig::default(),
        ));
        (create_router(ledger.clone()), ledger)
    }

    fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn set_then_get_stock() {
        let (app, _) = app();
        let response = app
            .clone()
            .oneshot(json_request(Method::PUT, "/stocks/42/1", serde_json::json!({"quantity": 10})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/stocks/42/1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let view: StockView = serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!((view.on_hand, view.locked, view.available), (10, 0, 10));
    }

    #[tokio::test]
    async fn missing_stock_is_404() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::builder().uri("/stocks/1/1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn insufficient_lock_reports_fail_items() {
        let (app, ledger) = app();
        ledger.store().seed(42, 1, 2).await;

        let request = LockRequest { order_sn: "O1".into(), items: vec![StockLine::new(42, 1, 3)] };
        let response = app
            .oneshot(json_request(Method::POST, "/reservations", serde_json::to_value(&request).unwrap()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let error: ServiceError = serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(error.code, ErrorCode::InsufficientStock);
        assert_eq!(error.fail_items.len(), 1);
        assert_eq!((error.fail_items[0].requested, error.fail_items[0].available), (3, 2));
    }

    #[tokio::test]
    async fn lock_commit_and_read_reservation() {
        let (app, ledger) = app();
        ledger.store().seed(42, 1, 10).await;

        let request = LockRequest { order_sn: "O1".into(), items: vec![StockLine::new(42, 1, 3)] };
        let response = app
            .clone()
            .oneshot(json_request(Method::POST, "/reservations", serde_json::to_value(&request).unwrap()))
            .await
            .unwrap();
        let locked: LockResponse = serde_json::from_value(body_json(response).await).unwrap();
        assert!(locked.success);
        assert!(!locked.replayed);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/reservations/O1/commit")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let settled: SettleResponse = serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(settled.status, JournalStatus::Committed);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/reservations/O1/release")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["code"], "TERMINAL_STATE");

        let response = app
            .oneshot(Request::builder().uri("/reservations/O1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let view: ReservationView = serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(view.status, JournalStatus::Committed);
        assert_eq!(view.lines, vec![StockLine::new(42, 1, 3)]);
        assert!(view.settled_at.is_some());
    }
}
