//! Bridge to first-party store SDKs living in host code (JNI, StoreKit wrappers).
//!
//! Outgoing store operations become [`NativeRequest`] messages for the host to
//! execute. The host reports back through [`NativeCallbacks`], which may be
//! called from any thread.

use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::models::{
    common::StorePlatform,
    product::{Offer, PriceScale, ProductId},
    receipt::{FinalizeKind, PurchaseReceipt},
};

use super::{
    app_store::{AppStoreProduct, AppStoreState, AppStoreTransaction},
    google_play, EventSink, PlatformAdapter,
};

/// Store operation the host must execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeRequest {
    QueryProducts {
        product_ids: Vec<ProductId>,
    },
    Purchase {
        product_id: ProductId,
        consumable: bool,
    },
    Finalize {
        product_id: ProductId,
        transaction_id: String,
        consume: bool,
        metadata: HashMap<String, String>,
    },
    Restore {
        product_ids: Vec<ProductId>,
    },
}

pub struct NativeBridgeAdapter {
    platform: StorePlatform,
    requests: mpsc::UnboundedSender<NativeRequest>,
}

impl NativeBridgeAdapter {
    /// Returns the adapter and the request stream the host drains
    pub fn new(platform: StorePlatform) -> (Self, mpsc::UnboundedReceiver<NativeRequest>) {
        let (requests, rx) = mpsc::unbounded_channel();
        (Self { platform, requests }, rx)
    }

    fn dispatch(&self, request: NativeRequest) {
        if self.requests.send(request).is_err() {
            error!(platform = %self.platform, "Native store bridge is gone, request dropped");
        }
    }
}

impl PlatformAdapter for NativeBridgeAdapter {
    fn platform(&self) -> StorePlatform {
        self.platform
    }

    fn price_scale(&self) -> PriceScale {
        match self.platform {
            StorePlatform::GooglePlay => PriceScale::Micros,
            _ => PriceScale::Unscaled,
        }
    }

    fn request_products(&self, product_ids: Vec<ProductId>) {
        info!(platform = %self.platform, "{} store products requested", product_ids.len());
        self.dispatch(NativeRequest::QueryProducts { product_ids });
    }

    fn purchase(&self, product_id: &ProductId, consumable: bool) {
        info!(platform = %self.platform, product_id = %product_id, "Native purchase start");
        self.dispatch(NativeRequest::Purchase {
            product_id: product_id.clone(),
            consumable,
        });
    }

    fn finalize(&self, receipt: &PurchaseReceipt, kind: FinalizeKind) {
        let request = match self.platform {
            StorePlatform::GooglePlay => match google_play::finalize_request(receipt, kind) {
                Ok(request) => request,
                Err(e) => {
                    error!(product_id = %receipt.product_id, "Cannot finalize purchase: {}", e);
                    return;
                }
            },
            _ => NativeRequest::Finalize {
                product_id: receipt.product_id.clone(),
                transaction_id: receipt.transaction_id.clone(),
                consume: kind == FinalizeKind::Consume,
                metadata: receipt.metadata.clone(),
            },
        };

        self.dispatch(request);
    }

    fn restore_purchases(&self, product_ids: Vec<ProductId>) {
        self.dispatch(NativeRequest::Restore { product_ids });
    }
}

/// Host-facing callbacks; each call only enqueues an event for the purchase service
#[derive(Debug, Clone)]
pub struct NativeCallbacks {
    sink: EventSink,
}

impl NativeCallbacks {
    pub fn new(sink: EventSink) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &EventSink {
        &self.sink
    }

    /// Google Play: product details query finished
    pub fn on_google_products_query(&self, products_json: &[String]) {
        debug!("Received {} Google Play products", products_json.len());

        let offers: Vec<Offer> = products_json
            .iter()
            .filter_map(|json| match google_play::parse_product(json) {
                Ok(offer) => Some(offer),
                Err(e) => {
                    warn!("Skipping Google Play product: {}", e);
                    None
                }
            })
            .collect();

        self.sink.products_received(offers);
    }

    pub fn on_google_products_query_failed(&self, error: &str) {
        self.sink.products_query_failed(error);
    }

    /// Google Play: purchase flow returned a purchase
    pub fn on_google_purchase_successful(&self, purchase_json: &str, signature: &str) {
        match google_play::parse_purchase(purchase_json, signature) {
            Ok(receipt) => {
                info!(
                    product_id = %receipt.product_id,
                    receipt = %receipt.fingerprint(),
                    "Google Play product purchased"
                );
                self.sink.purchase_succeeded(receipt);
            }
            Err(e) => {
                warn!("Google Play purchase payload rejected: {}", e);
                self.sink.purchase_failed(None, "Purchase JSON deserialization fail");
            }
        }
    }

    /// Google Play reports errors without naming the product
    pub fn on_google_purchase_error(&self, error: &str) {
        self.sink.purchase_failed(None, error);
    }

    pub fn on_app_store_products(&self, products: Vec<AppStoreProduct>) {
        self.sink
            .products_received(products.into_iter().map(Offer::from).collect());
    }

    pub fn on_app_store_products_failed(&self) {
        self.sink.products_query_failed("App Store product query failed");
    }

    pub fn on_app_store_purchase_complete(
        &self,
        product_id: &ProductId,
        state: AppStoreState,
        transaction: Option<AppStoreTransaction>,
    ) {
        match (state.is_success(), transaction) {
            (true, Some(transaction)) => {
                self.sink.purchase_succeeded(transaction.into());
            }
            (true, None) => {
                warn!(product_id = %product_id, "App Store reported success without a transaction");
                self.sink
                    .purchase_failed(Some(product_id.clone()), "missing transaction");
            }
            (false, _) => {
                info!(product_id = %product_id, ?state, "App Store purchase failed");
                self.sink
                    .purchase_failed(Some(product_id.clone()), format!("{:?}", state));
            }
        }
    }

    pub fn on_app_store_restore_complete(
        &self,
        state: AppStoreState,
        transactions: Vec<AppStoreTransaction>,
    ) {
        if !state.is_success() {
            self.sink.restore_failed(format!("{:?}", state));
            return;
        }

        info!("Restore out receipts: {}", transactions.len());
        for transaction in transactions {
            self.sink.purchase_restored(transaction.into());
        }
    }

    pub fn on_finalize_completed(&self, transaction_id: &str) {
        self.sink.finalize_completed(transaction_id);
    }
}
