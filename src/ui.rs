use tracing::info;

use crate::models::product::ProductId;

/// Host hooks for the blocking "purchase in progress" overlay
pub trait PurchaseUi: Send + Sync {
    fn open_purchase_ui(&self, product_id: &ProductId);

    fn close_purchase_ui(&self, product_id: &ProductId);
}

/// For hosts without a purchase overlay
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPurchaseUi;

impl PurchaseUi for NoopPurchaseUi {
    fn open_purchase_ui(&self, _product_id: &ProductId) {}

    fn close_purchase_ui(&self, _product_id: &ProductId) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPurchaseUi;

impl PurchaseUi for TracingPurchaseUi {
    fn open_purchase_ui(&self, product_id: &ProductId) {
        info!(product_id = %product_id, "Purchase UI shown");
    }

    fn close_purchase_ui(&self, product_id: &ProductId) {
        info!(product_id = %product_id, "Purchase UI hidden");
    }
}
