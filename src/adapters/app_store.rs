//! App Store (StoreKit) result mapping.

use serde::{Deserialize, Serialize};

use crate::models::{
    product::{Offer, ProductId},
    receipt::{PurchaseReceipt, RECEIPT_DATA_KEY},
};

/// Completion state reported by the StoreKit wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppStoreState {
    Success,
    Failed,
    Cancelled,
    Invalid,
    NotAllowed,
    Restored,
    AlreadyOwned,
    Unknown,
}

impl AppStoreState {
    /// Restored and already-owned transactions still grant the product
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            AppStoreState::Success | AppStoreState::Restored | AppStoreState::AlreadyOwned
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStoreProduct {
    pub identifier: String,
    pub display_name: String,
    pub display_description: String,
    pub display_price: String,
    pub raw_price: f64,
    pub currency_code: String,
}

impl From<AppStoreProduct> for Offer {
    fn from(product: AppStoreProduct) -> Self {
        Offer {
            product_id: ProductId::from(product.identifier),
            // Fractional prices are dropped
            numeric_price: product.raw_price.trunc() as i64,
            price_text: product.display_price,
            currency_code: product.currency_code,
            title: product.display_name,
            description: product.display_description,
            available: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStoreTransaction {
    pub identifier: String,
    pub transaction_identifier: String,
    #[serde(default)]
    pub receipt_data: String,
}

impl From<AppStoreTransaction> for PurchaseReceipt {
    fn from(transaction: AppStoreTransaction) -> Self {
        PurchaseReceipt::new(transaction.identifier, transaction.transaction_identifier)
            .with_metadata(RECEIPT_DATA_KEY, transaction.receipt_data)
    }
}
