use super::{product::ProductId, receipt::PurchaseReceipt};

/// Broadcast to every subscriber of the purchase service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreNotification {
    /// New offers were merged into the catalog
    CatalogUpdated,

    /// A catalog fetch failed; callers re-request explicitly
    CatalogFetchFailed { reason: String },

    /// A session reached a terminal state
    PurchaseCompleted { product_id: ProductId, success: bool },

    /// The store restored an owned entitlement
    PurchaseRestored {
        receipt: PurchaseReceipt,
        item_tag: Option<String>,
    },

    RestoreFailed { reason: String },

    /// A store purchase arrived that no session was waiting for
    UnmatchedPurchase { receipt: PurchaseReceipt },
}
