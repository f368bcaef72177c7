use async_trait::async_trait;
use bigdecimal::BigDecimal;
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use shared::deadline::Deadline;
use shared::inventory::{LockRequest, LockResponse, SettleResponse};
use shared::retry::RetryPolicy;
use shared::{ServiceError, StockLine};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductInfo {
    pub id: i64,
    pub name: String,
    pub price: BigDecimal,
    #[serde(default)]
    pub front_image: String,
}

/// Read-only view of the product service.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Products for the given ids. Unknown ids are simply missing from the
    /// result.
    async fn batch_get_products(&self, ids: &[i64], deadline: Deadline) -> Result<Vec<ProductInfo>, ServiceError>;
}

#[async_trait]
pub trait InventoryClient: Send + Sync {
    async fn lock(&self, order_sn: &str, items: &[StockLine], deadline: Deadline) -> Result<LockResponse, ServiceError>;

    async fn commit(&self, order_sn: &str, deadline: Deadline) -> Result<SettleResponse, ServiceError>;

    async fn release(&self, order_sn: &str, deadline: Deadline) -> Result<SettleResponse, ServiceError>;
}

#[derive(Serialize)]
struct BatchGetRequest<'a> {
    ids: &'a [i64],
}

async fn decode<T: DeserializeOwned>(response: Response, what: &str) -> Result<T, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| ServiceError::internal(format!("{} returned an unreadable body: {}", what, e)));
    }
    match response.json::<ServiceError>().await {
        Ok(err) => Err(err),
        Err(_) if status.is_server_error() => Err(ServiceError::unavailable(format!("{} answered {}", what, status))),
        Err(_) => Err(ServiceError::internal(format!("{} answered {}", what, status))),
    }
}

fn transport_error(what: &str, e: reqwest::Error) -> ServiceError {
    if e.is_timeout() {
        ServiceError::unavailable(format!("{} timed out", what))
    } else {
        ServiceError::unavailable(format!("{} unreachable: {}", what, e))
    }
}

fn check_deadline(deadline: &Deadline, what: &str) -> Result<(), ServiceError> {
    if deadline.is_expired() {
        return Err(ServiceError::unavailable(format!("no time left to call {}", what)));
    }
    Ok(())
}

pub struct HttpProductCatalog {
    client: Client,
    base_url: String,
}

impl HttpProductCatalog {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self { client, base_url: base_url.into().trim_end_matches('/').to_string() }
    }
}

#[async_trait]
impl ProductCatalog for HttpProductCatalog {
    async fn batch_get_products(&self, ids: &[i64], deadline: Deadline) -> Result<Vec<ProductInfo>, ServiceError> {
        const WHAT: &str = "product service";
        check_deadline(&deadline, WHAT)?;
        debug!(count = ids.len(), "fetching products");
        let response = self
            .client
            .post(format!("{}/products/batch", self.base_url))
            .timeout(deadline.remaining())
            .json(&BatchGetRequest { ids })
            .send()
            .await
            .map_err(|e| transport_error(WHAT, e))?;
        decode(response, WHAT).await
    }
}

pub struct HttpInventoryClient {
    client: Client,
    base_url: String,
}

impl HttpInventoryClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self { client, base_url: base_url.into().trim_end_matches('/').to_string() }
    }

    async fn settle(&self, order_sn: &str, action: &str, deadline: Deadline) -> Result<SettleResponse, ServiceError> {
        const WHAT: &str = "inventory service";
        check_deadline(&deadline, WHAT)?;
        let response = self
            .client
            .post(format!("{}/reservations/{}/{}", self.base_url, order_sn, action))
            .timeout(deadline.remaining())
            .send()
            .await
            .map_err(|e| transport_error(WHAT, e))?;
        decode(response, WHAT).await
    }
}

#[async_trait]
impl InventoryClient for HttpInventoryClient {
    async fn lock(&self, order_sn: &str, items: &[StockLine], deadline: Deadline) -> Result<LockResponse, ServiceError> {
        const WHAT: &str = "inventory service";
        check_deadline(&deadline, WHAT)?;
        let request = LockRequest { order_sn: order_sn.to_string(), items: items.to_vec() };
        let response = self
            .client
            .post(format!("{}/reservations", self.base_url))
            .timeout(deadline.remaining())
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(WHAT, e))?;
        decode(response, WHAT).await
    }

    async fn commit(&self, order_sn: &str, deadline: Deadline) -> Result<SettleResponse, ServiceError> {
        self.settle(order_sn, "commit", deadline).await
    }

    async fn release(&self, order_sn: &str, deadline: Deadline) -> Result<SettleResponse, ServiceError> {
        self.settle(order_sn, "release", deadline).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Commit,
    Release,
}

/// Commits or releases a reservation, retrying transient failures within
/// `policy` and `deadline`.
pub async fn settle(
    inventory: &dyn InventoryClient,
    order_sn: &str,
    settlement: Settlement,
    policy: RetryPolicy,
    deadline: Deadline,
) -> Result<SettleResponse, ServiceError> {
    policy
        .run(
            |e: &ServiceError| e.code.is_transient() && !deadline.is_expired(),
            |_| async move {
                match settlement {
                    Settlement::Commit => inventory.commit(order_sn, deadline).await,
                    Settlement::Release => inventory.release(order_sn, deadline).await,
                }
            },
        )
        .await
}
