use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};
use tracing::{info, instrument, warn};

use crate::{
    config::BackendAdapterConfig,
    error::{PurchaseError, Result},
    models::{
        common::StorePlatform,
        product::{Offer, ProductId},
        receipt::{FinalizeKind, PurchaseReceipt},
    },
    utils::truncate_body,
};

use super::{EventSink, PlatformAdapter};

/// Purchases mediated by the game backend instead of a first-party store
#[derive(Clone)]
pub struct BackendAdapter {
    http_client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
    sink: EventSink,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProductsRequest<'a> {
    product_ids: &'a [ProductId],
}

#[derive(Debug, Deserialize)]
struct ProductsResponse {
    offers: Vec<Offer>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PurchaseRequestBody<'a> {
    product_id: &'a ProductId,
    consumable: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PurchaseResponse {
    transaction_id: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FinalizeRequestBody<'a> {
    product_id: &'a ProductId,
    transaction_id: &'a str,
    finalize_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct RestoreResponse {
    receipts: Vec<PurchaseReceipt>,
}

impl BackendAdapter {
    pub fn new(config: &BackendAdapterConfig, sink: EventSink) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
            sink,
        })
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut request = self
            .http_client
            .post(format!("{}{}", self.base_url, path))
            .json(body);

        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PurchaseError::PurchaseRejectedByStore(format!(
                "{} returned {}: {}",
                path,
                status.as_u16(),
                truncate_body(&body, 500)
            )));
        }

        response
            .json()
            .await
            .map_err(|e| PurchaseError::InvalidPayload(format!("{}: {}", path, e)))
    }

    #[instrument(skip(self))]
    async fn fetch_products(&self, product_ids: Vec<ProductId>) {
        let body = ProductsRequest {
            product_ids: &product_ids,
        };

        match self.post_json::<_, ProductsResponse>("/products", &body).await {
            Ok(response) => {
                info!("Backend returned {} offers", response.offers.len());
                self.sink.products_received(response.offers);
            }
            Err(e) => {
                warn!("Backend product query failed: {}", e);
                self.sink.products_query_failed(e.to_string());
            }
        }
    }

    #[instrument(skip(self))]
    async fn start_purchase(&self, product_id: ProductId, consumable: bool) {
        let body = PurchaseRequestBody {
            product_id: &product_id,
            consumable,
        };

        match self.post_json::<_, PurchaseResponse>("/purchases", &body).await {
            Ok(response) => {
                let mut receipt = PurchaseReceipt::new(product_id, response.transaction_id);
                receipt.metadata = response.metadata;
                self.sink.purchase_succeeded(receipt);
            }
            Err(e) => {
                warn!("Backend purchase failed: {}", e);
                self.sink.purchase_failed(Some(product_id), e.to_string());
            }
        }
    }

    #[instrument(skip(self, receipt), fields(product_id = %receipt.product_id))]
    async fn settle(&self, receipt: PurchaseReceipt, kind: FinalizeKind) {
        let body = FinalizeRequestBody {
            product_id: &receipt.product_id,
            transaction_id: &receipt.transaction_id,
            finalize_type: kind.as_str(),
        };

        match self
            .post_json::<_, serde_json::Value>("/purchases/finalize", &body)
            .await
        {
            Ok(_) => {
                self.sink.finalize_completed(receipt.transaction_id);
            }
            Err(e) => {
                warn!(receipt = %receipt.fingerprint(), "Backend finalize failed: {}", e);
            }
        }
    }

    #[instrument(skip(self))]
    async fn restore(&self, product_ids: Vec<ProductId>) {
        let body = ProductsRequest {
            product_ids: &product_ids,
        };

        match self
            .post_json::<_, RestoreResponse>("/purchases/restore", &body)
            .await
        {
            Ok(response) => {
                info!("Backend restored {} purchases", response.receipts.len());
                for receipt in response.receipts {
                    self.sink.purchase_restored(receipt);
                }
            }
            Err(e) => {
                warn!("Backend restore failed: {}", e);
                self.sink.restore_failed(e.to_string());
            }
        }
    }
}

impl PlatformAdapter for BackendAdapter {
    fn platform(&self) -> StorePlatform {
        StorePlatform::Backend
    }

    fn request_products(&self, product_ids: Vec<ProductId>) {
        let adapter = self.clone();
        tokio::spawn(async move { adapter.fetch_products(product_ids).await });
    }

    fn purchase(&self, product_id: &ProductId, consumable: bool) {
        let adapter = self.clone();
        let product_id = product_id.clone();
        tokio::spawn(async move { adapter.start_purchase(product_id, consumable).await });
    }

    fn finalize(&self, receipt: &PurchaseReceipt, kind: FinalizeKind) {
        let adapter = self.clone();
        let receipt = receipt.clone();
        tokio::spawn(async move { adapter.settle(receipt, kind).await });
    }

    fn restore_purchases(&self, product_ids: Vec<ProductId>) {
        let adapter = self.clone();
        tokio::spawn(async move { adapter.restore(product_ids).await });
    }
}
