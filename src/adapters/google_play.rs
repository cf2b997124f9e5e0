//! Google Play Billing payload decoding.
//!
//! The Java billing bridge hands over product details and purchases as JSON
//! strings. Prices arrive in micros.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;

use crate::{
    error::{PurchaseError, Result},
    models::{
        product::{Offer, ProductId},
        receipt::{FinalizeKind, PurchaseReceipt, ORDER_ID_KEY, SIGNATURE_KEY},
    },
};

use super::native::NativeRequest;

/// Product details as serialized by the billing bridge (key typos included)
#[derive(Debug, Deserialize)]
struct ProductDetailsJson {
    #[serde(rename = "ProducID")]
    product_id: String,
    #[serde(rename = "ProducType", default)]
    product_type: Option<String>,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Description", default)]
    description: String,
    /// Only present for one-time products
    #[serde(rename = "Price", default)]
    price_micros: Option<i64>,
    #[serde(rename = "FormattedPrice", default)]
    formatted_price: Option<String>,
    #[serde(rename = "CurrencyCode", default)]
    currency_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PurchaseJson {
    order_id: String,
    product_id: String,
    purchase_token: String,
    #[serde(default)]
    purchase_time: i64,
    #[serde(default)]
    purchase_state: i32,
    #[serde(default = "default_quantity")]
    quantity: i32,
    #[serde(default)]
    acknowledged: bool,
}

fn default_quantity() -> i32 {
    1
}

/// Decode one product-details entry into an offer
pub fn parse_product(json: &str) -> Result<Offer> {
    let details: ProductDetailsJson = serde_json::from_str(json)
        .map_err(|e| PurchaseError::InvalidPayload(format!("product details: {}", e)))?;

    if details.product_id.is_empty() {
        return Err(PurchaseError::InvalidPayload(
            "product details without product id".to_string(),
        ));
    }

    tracing::debug!(
        product_id = %details.product_id,
        product_type = ?details.product_type,
        "Decoded Google Play product"
    );

    // Subscriptions carry no one-time offer; they are listed but not buyable here
    let available = details.price_micros.is_some();

    Ok(Offer {
        product_id: ProductId::from(details.product_id),
        numeric_price: details.price_micros.unwrap_or(0),
        price_text: details.formatted_price.unwrap_or_default(),
        currency_code: details.currency_code.unwrap_or_default(),
        title: details.name,
        description: details.description,
        available,
    })
}

/// Decode a successful purchase and its detached signature into a receipt
pub fn parse_purchase(json: &str, signature: &str) -> Result<PurchaseReceipt> {
    let purchase: PurchaseJson = serde_json::from_str(json)
        .map_err(|e| PurchaseError::InvalidPayload(format!("purchase: {}", e)))?;

    STANDARD
        .decode(signature)
        .map_err(|e| PurchaseError::InvalidPayload(format!("purchase signature: {}", e)))?;

    Ok(
        PurchaseReceipt::new(purchase.product_id, purchase.purchase_token)
            .with_metadata(SIGNATURE_KEY, signature)
            .with_metadata(ORDER_ID_KEY, purchase.order_id)
            .with_metadata("PurchaseTime", purchase.purchase_time.to_string())
            .with_metadata("Quantity", purchase.quantity.to_string())
            .with_metadata("PurchaseState", purchase.purchase_state.to_string())
            .with_metadata(
                "Acknowledged",
                if purchase.acknowledged { "True" } else { "False" },
            ),
    )
}

/// Build the finalize call for the billing bridge; Play needs the signature and order id
pub fn finalize_request(receipt: &PurchaseReceipt, kind: FinalizeKind) -> Result<NativeRequest> {
    for key in [SIGNATURE_KEY, ORDER_ID_KEY] {
        if !receipt.metadata.contains_key(key) {
            return Err(PurchaseError::InvalidPayload(format!(
                "receipt for {} is missing {}",
                receipt.product_id, key
            )));
        }
    }

    Ok(NativeRequest::Finalize {
        product_id: receipt.product_id.clone(),
        transaction_id: receipt.transaction_id.clone(),
        consume: kind == FinalizeKind::Consume,
        metadata: receipt.metadata.clone(),
    })
}
