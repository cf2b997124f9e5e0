use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::models::product::{Offer, ProductId};

/// Known offers plus the pending / in-flight request batches.
///
/// The catalog never talks to a store itself. Methods that may start a fetch
/// return the batch the caller must dispatch; a product id is never both
/// pending and in flight, and at most one batch is in flight at a time.
#[derive(Debug, Default)]
pub struct ProductCatalog {
    pending: Vec<ProductId>,
    in_flight: HashSet<ProductId>,
    offers: HashMap<ProductId, Offer>,
}

impl ProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a product unless it is already known or requested
    pub fn request_product(&mut self, product_id: ProductId) -> Option<Vec<ProductId>> {
        if !self.offers.contains_key(&product_id) {
            self.enqueue(product_id);
        }

        self.next_batch()
    }

    /// Queue products for a fresh fetch even if offers are already known
    pub fn refresh<I>(&mut self, product_ids: I) -> Option<Vec<ProductId>>
    where
        I: IntoIterator<Item = ProductId>,
    {
        for product_id in product_ids {
            self.enqueue(product_id);
        }

        self.next_batch()
    }

    fn enqueue(&mut self, product_id: ProductId) {
        if self.in_flight.contains(&product_id) || self.pending.contains(&product_id) {
            return;
        }

        debug!(product_id = %product_id, "Add pending product to request");
        self.pending.push(product_id);
    }

    /// Move every pending id in flight, if no fetch is running
    pub fn next_batch(&mut self) -> Option<Vec<ProductId>> {
        if !self.in_flight.is_empty() || self.pending.is_empty() {
            return None;
        }

        let batch = std::mem::take(&mut self.pending);
        self.in_flight.extend(batch.iter().cloned());
        Some(batch)
    }

    /// Merge fetched offers; a later fetch overwrites earlier offers.
    ///
    /// Returns the in-flight ids the response carried no offer for.
    pub fn on_offers_received(&mut self, offers: Vec<Offer>) -> Vec<ProductId> {
        let missing: Vec<ProductId> = self
            .in_flight
            .drain()
            .filter(|id| !offers.iter().any(|offer| offer.product_id == *id))
            .collect();

        for offer in offers {
            info!(
                product_id = %offer.product_id,
                price = %offer.price_text,
                "Product info received"
            );
            self.offers.insert(offer.product_id.clone(), offer);
        }

        if !missing.is_empty() {
            debug!("{} requested products came back without an offer", missing.len());
        }
        missing
    }

    /// Drop the in-flight batch; returns the ids that were being fetched
    pub fn on_fetch_failed(&mut self) -> Vec<ProductId> {
        let dropped: Vec<ProductId> = self.in_flight.drain().collect();
        warn!("Catalog fetch failed, {} products not received", dropped.len());
        dropped
    }

    pub fn get_offer(&self, product_id: &ProductId) -> Option<&Offer> {
        self.offers.get(product_id)
    }

    pub fn is_fetch_in_flight(&self) -> bool {
        !self.in_flight.is_empty()
    }

    pub fn is_pending(&self, product_id: &ProductId) -> bool {
        self.pending.contains(product_id)
    }

    pub fn is_in_flight(&self, product_id: &ProductId) -> bool {
        self.in_flight.contains(product_id)
    }
}
