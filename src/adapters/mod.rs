//! Store adapters.
//!
//! An adapter dispatches store operations and reports every result back as a
//! [`StoreEvent`] through the [`EventSink`] it was built with. Nothing here
//! blocks: the purchase service owns all state and drains the sink on its own
//! task, so callbacks arriving on foreign threads only ever enqueue.

pub mod app_store;
pub mod backend;
pub mod google_play;
pub mod native;

use tokio::sync::mpsc;
use tracing::warn;

use crate::models::{
    common::StorePlatform,
    product::{Offer, PriceScale, ProductId},
    receipt::{FinalizeKind, PurchaseReceipt},
};

pub use backend::BackendAdapter;
pub use native::{NativeBridgeAdapter, NativeCallbacks, NativeRequest};

/// Asynchronous results reported by a store adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    ProductsReceived(Vec<Offer>),
    ProductsQueryFailed(String),
    PurchaseSucceeded(PurchaseReceipt),
    /// `product_id` is `None` when the store does not say which purchase failed
    PurchaseFailed {
        product_id: Option<ProductId>,
        reason: String,
    },
    PurchaseRestored(PurchaseReceipt),
    RestoreFailed(String),
    FinalizeCompleted { transaction_id: String },
}

/// Thread-safe handle adapters use to report store events
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<StoreEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StoreEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns false once the purchase service has shut down
    pub fn send(&self, event: StoreEvent) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(e) => {
                warn!("Store event dropped, purchase service stopped: {:?}", e.0);
                false
            }
        }
    }

    pub fn products_received(&self, offers: Vec<Offer>) -> bool {
        self.send(StoreEvent::ProductsReceived(offers))
    }

    pub fn products_query_failed(&self, reason: impl Into<String>) -> bool {
        self.send(StoreEvent::ProductsQueryFailed(reason.into()))
    }

    pub fn purchase_succeeded(&self, receipt: PurchaseReceipt) -> bool {
        self.send(StoreEvent::PurchaseSucceeded(receipt))
    }

    pub fn purchase_failed(&self, product_id: Option<ProductId>, reason: impl Into<String>) -> bool {
        self.send(StoreEvent::PurchaseFailed {
            product_id,
            reason: reason.into(),
        })
    }

    pub fn purchase_restored(&self, receipt: PurchaseReceipt) -> bool {
        self.send(StoreEvent::PurchaseRestored(receipt))
    }

    pub fn restore_failed(&self, reason: impl Into<String>) -> bool {
        self.send(StoreEvent::RestoreFailed(reason.into()))
    }

    pub fn finalize_completed(&self, transaction_id: impl Into<String>) -> bool {
        self.send(StoreEvent::FinalizeCompleted {
            transaction_id: transaction_id.into(),
        })
    }
}

/// A store the purchase service can buy from.
///
/// Every operation returns immediately; outcomes arrive later as [`StoreEvent`]s.
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> StorePlatform;

    /// Unit of `Offer::numeric_price` for offers this adapter reports
    fn price_scale(&self) -> PriceScale {
        PriceScale::Unscaled
    }

    fn request_products(&self, product_ids: Vec<ProductId>);

    fn purchase(&self, product_id: &ProductId, consumable: bool);

    /// `receipt` already carries the `FinalizeType` metadata entry for `kind`
    fn finalize(&self, receipt: &PurchaseReceipt, kind: FinalizeKind);

    /// `product_ids` lists the non-consumables eligible for restore
    fn restore_purchases(&self, product_ids: Vec<ProductId>);
}
