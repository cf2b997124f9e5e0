use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use super::product::ProductId;

/// Metadata key the orchestrator injects before finalizing
pub const FINALIZE_TYPE_KEY: &str = "FinalizeType";
pub const SIGNATURE_KEY: &str = "Signature";
pub const ORDER_ID_KEY: &str = "OrderID";
pub const RECEIPT_DATA_KEY: &str = "ReceiptData";
/// Marks synthetic receipts from development builds
pub const FAKE_PURCHASE_KEY: &str = "FakePurchase";

/// How the store should settle a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinalizeKind {
    Consume,
    Acknowledge,
}

impl FinalizeKind {
    /// Unknown consumability finalizes as `Consume`
    pub fn for_consumable(consumable: Option<bool>) -> Self {
        match consumable {
            Some(false) => FinalizeKind::Acknowledge,
            Some(true) | None => FinalizeKind::Consume,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Consume" => Some(Self::Consume),
            "Acknowledge" => Some(Self::Acknowledge),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consume => "Consume",
            Self::Acknowledge => "Acknowledge",
        }
    }
}

/// A completed store transaction awaiting settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseReceipt {
    pub product_id: ProductId,
    pub transaction_id: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl PurchaseReceipt {
    pub fn new(product_id: impl Into<ProductId>, transaction_id: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            transaction_id: transaction_id.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn finalize_kind(&self) -> Option<FinalizeKind> {
        self.metadata
            .get(FINALIZE_TYPE_KEY)
            .and_then(|kind| FinalizeKind::from_str(kind))
    }

    /// Copy of this receipt carrying the `FinalizeType` the store adapter expects
    pub fn prepared_for_finalize(&self, kind: FinalizeKind) -> Self {
        self.clone()
            .with_metadata(FINALIZE_TYPE_KEY, kind.as_str())
    }

    /// Short hash of the transaction id; purchase tokens never reach the logs
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.transaction_id.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..12].to_string()
    }
}
