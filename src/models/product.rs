use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque store SKU key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProductId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ProductId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Unit the store reports `numeric_price` in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceScale {
    /// Millionths of the currency unit (Google Play `priceAmountMicros`)
    Micros,
    /// Already in the unit displayed to players
    Unscaled,
}

const MICROS_PER_UNIT: i64 = 1_000_000;

impl PriceScale {
    /// Convert a raw store price into the displayed integer price.
    ///
    /// Micro prices are truncated, never rounded: 2_990_000 becomes 2.
    pub fn to_display_price(&self, raw: i64) -> i64 {
        match self {
            PriceScale::Micros => raw / MICROS_PER_UNIT,
            PriceScale::Unscaled => raw,
        }
    }
}

/// Store metadata for a purchasable SKU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub product_id: ProductId,
    /// Raw price as reported by the store, see [`PriceScale`]
    pub numeric_price: i64,
    pub price_text: String,
    pub currency_code: String,
    pub title: String,
    pub description: String,
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

impl Offer {
    pub fn display_price(&self, scale: PriceScale) -> i64 {
        scale.to_display_price(self.numeric_price)
    }
}
