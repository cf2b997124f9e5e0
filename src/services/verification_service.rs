use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::{
    config::VerificationConfig,
    error::{PurchaseError, Result},
    utils::truncate_body,
};

/// Backend check that a store transaction is genuine before content is granted
#[async_trait]
pub trait PurchaseVerifier: Send + Sync {
    /// Exactly one attempt; any failure counts as not verified
    async fn verify(&self, item_tag: &str, transaction_id: &str) -> bool;
}

pub struct VerificationClient {
    http_client: reqwest::Client,
    url: String,
    auth_token: String,
    fake_purchases: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VerificationRequest<'a> {
    tag: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    purchase_token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fake_purchase: Option<bool>,
}

impl VerificationClient {
    pub fn new(
        url: impl Into<String>,
        auth_token: impl Into<String>,
        timeout: Duration,
        fake_purchases: bool,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http_client,
            url: url.into(),
            auth_token: auth_token.into(),
            fake_purchases,
        })
    }

    /// `fake_purchases` sends `fakePurchase: true` instead of the store token
    pub fn from_config(config: &VerificationConfig, fake_purchases: bool) -> Result<Self> {
        let url = config.url.clone().ok_or_else(|| {
            PurchaseError::Misconfigured("verification url is not set".to_string())
        })?;
        let auth_token = config.auth_token.clone().ok_or_else(|| {
            PurchaseError::Misconfigured("verification auth_token is not set".to_string())
        })?;

        Self::new(
            url,
            auth_token,
            Duration::from_millis(config.request_timeout_ms),
            fake_purchases,
        )
    }

    fn request_body<'a>(&self, item_tag: &'a str, transaction_id: &'a str) -> VerificationRequest<'a> {
        if self.fake_purchases {
            VerificationRequest {
                tag: item_tag,
                purchase_token: None,
                fake_purchase: Some(true),
            }
        } else {
            VerificationRequest {
                tag: item_tag,
                purchase_token: Some(transaction_id),
                fake_purchase: None,
            }
        }
    }
}

#[async_trait]
impl PurchaseVerifier for VerificationClient {
    #[instrument(skip(self, transaction_id))]
    async fn verify(&self, item_tag: &str, transaction_id: &str) -> bool {
        let body = self.request_body(item_tag, transaction_id);

        let response = match self
            .http_client
            .post(&self.url)
            .bearer_auth(&self.auth_token)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Verification request failed: {}", e);
                return false;
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::OK {
            info!(fake = self.fake_purchases, "Purchase verified by backend");
            return true;
        }

        let body = response.text().await.unwrap_or_default();
        warn!(
            status = status.as_u16(),
            body = %truncate_body(&body, 500),
            "Purchase verification rejected"
        );
        false
    }
}
