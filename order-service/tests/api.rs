mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use common::{Harness, USER};
use order_service::api::{create_router, AppState};
use tower::ServiceExt;

fn app(h: &Harness) -> Router {
    create_router(AppState { saga: h.saga.clone(), orders: h.orders.clone() })
}

fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn place_body() -> serde_json::Value {
    serde_json::json!({
        "user_id": USER,
        "address": "1 Harbour Road",
        "recipient_name": "Sam",
        "recipient_phone": "555-0100"
    })
}

#[tokio::test]
async fn health_endpoint() {
    let h = Harness::new();
    let response = app(&h).oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn place_read_and_pay_an_order() {
    let h = Harness::new();
    h.seed(42, 10).await;
    h.catalog.add(42, "Walnut Desk", "10.00");
    h.store.add_cart_line(USER, 42, 3, true).await;
    let app = app(&h);

    let response = app.clone().oneshot(json_request(Method::POST, "/orders", place_body())).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let placed = body_json(response).await;
    let order_sn = placed["order_sn"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(get(&format!("/orders/{}?user_id={}", order_sn, USER)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let detail = body_json(response).await;
    assert_eq!(detail["status"], "PENDING");
    assert_eq!(detail["items"].as_array().unwrap().len(), 1);
    assert_eq!(detail["items"][0]["product_name"], "Walnut Desk");

    let response = app
        .clone()
        .oneshot(json_request(
            Method::PUT,
            &format!("/orders/{}/status", order_sn),
            serde_json::json!({"status": "PAID"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "PAID");
    assert_eq!(h.stock(42).await.on_hand, 7);

    let response = app.oneshot(get(&format!("/users/{}/orders?page=1&per_page=5", USER))).await.unwrap();
    let page = body_json(response).await;
    assert_eq!(page["total"], 1);
    assert_eq!(page["orders"][0]["order_sn"], order_sn.as_str());
}

#[tokio::test]
async fn insufficient_stock_is_a_conflict_with_details() {
    let h = Harness::new();
    h.seed(42, 2).await;
    h.catalog.add(42, "Walnut Desk", "10.00");
    h.store.add_cart_line(USER, 42, 3, true).await;

    let response = app(&h).oneshot(json_request(Method::POST, "/orders", place_body())).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let error = body_json(response).await;
    assert_eq!(error["code"], "INSUFFICIENT_STOCK");
    assert_eq!(error["fail_items"][0]["product_id"], 42);
    assert_eq!(error["fail_items"][0]["available"], 2);
}

#[tokio::test]
async fn empty_cart_is_a_bad_request() {
    let h = Harness::new();
    let response = app(&h).oneshot(json_request(Method::POST, "/orders", place_body())).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "EMPTY_CART");
}

#[tokio::test]
async fn unknown_order_is_404() {
    let h = Harness::new();
    let response = app(&h).oneshot(get("/orders/nope?user_id=7")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}
