//! Purchase lifecycle orchestration.
//!
//! `PurchaseOrchestrator` owns every session, the catalog and all dedup
//! state. It runs on a single task spawned by [`PurchaseServiceBuilder::spawn`]
//! and is only ever mutated from there: caller commands, adapter events and
//! the results of its own background work (verification, timers) all arrive
//! as messages on that task, one at a time.

use lru::LruCache;
use std::{collections::HashMap, num::NonZeroUsize, sync::Arc, time::Duration};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    adapters::{EventSink, PlatformAdapter, StoreEvent},
    config::Config,
    error::{PurchaseError, Result},
    models::{
        notification::StoreNotification,
        product::{Offer, PriceScale, ProductId},
        receipt::{PurchaseReceipt, FAKE_PURCHASE_KEY},
        session::{PurchaseOutcome, PurchasePhase, PurchaseRequest, PurchaseSession, PurchaseTicket},
    },
    services::{catalog_service::ProductCatalog, verification_service::PurchaseVerifier},
    ui::{NoopPurchaseUi, PurchaseUi},
};

const COMMAND_BUFFER: usize = 64;
const NOTIFICATION_BUFFER: usize = 64;

/// Work scheduled by the orchestrator itself, reported back onto its task
#[derive(Debug)]
enum InternalEvent {
    VerificationResolved {
        product_id: ProductId,
        session_id: Uuid,
        verified: bool,
    },
    CatalogWaitExpired {
        product_id: ProductId,
        session_id: Uuid,
    },
    FinalizeCooldownElapsed {
        product_id: ProductId,
        transaction_id: String,
    },
}

enum Command {
    Buy {
        request: PurchaseRequest,
        reply: oneshot::Sender<Result<PurchaseTicket>>,
    },
    RequestProduct {
        product_id: ProductId,
    },
    RequestAllProducts,
    RestorePurchases,
    GetOffer {
        product_id: ProductId,
        reply: oneshot::Sender<Option<Offer>>,
    },
    Price {
        product_id: ProductId,
        reply: oneshot::Sender<i64>,
    },
    PriceText {
        product_id: ProductId,
        reply: oneshot::Sender<String>,
    },
    CanBuy {
        product_id: ProductId,
        reply: oneshot::Sender<bool>,
    },
    SessionPhase {
        product_id: ProductId,
        reply: oneshot::Sender<Option<PurchasePhase>>,
    },
}

struct PurchaseOrchestrator {
    config: Arc<Config>,
    adapter: Option<Arc<dyn PlatformAdapter>>,
    verifier: Option<Arc<dyn PurchaseVerifier>>,
    ui: Arc<dyn PurchaseUi>,
    catalog: ProductCatalog,
    sessions: HashMap<ProductId, PurchaseSession>,
    /// Items whose finalize has been dispatched but not confirmed, by transaction
    pending_finalize: HashMap<ProductId, String>,
    /// Recently settled transactions; repeats of these are store echoes
    settled: LruCache<String, ()>,
    notifications: broadcast::Sender<StoreNotification>,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
}

impl PurchaseOrchestrator {
    fn new(
        config: Arc<Config>,
        adapter: Option<Arc<dyn PlatformAdapter>>,
        verifier: Option<Arc<dyn PurchaseVerifier>>,
        ui: Arc<dyn PurchaseUi>,
        notifications: broadcast::Sender<StoreNotification>,
        internal_tx: mpsc::UnboundedSender<InternalEvent>,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.purchase.settled_transaction_capacity)
            .unwrap_or(NonZeroUsize::MIN);

        Self {
            config,
            adapter,
            verifier,
            ui,
            catalog: ProductCatalog::new(),
            sessions: HashMap::new(),
            pending_finalize: HashMap::new(),
            settled: LruCache::new(capacity),
            notifications,
            internal_tx,
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Buy { request, reply } => {
                let _ = reply.send(self.start_buy(request));
            }
            Command::RequestProduct { product_id } => self.request_product(product_id),
            Command::RequestAllProducts => self.request_all_products(),
            Command::RestorePurchases => self.restore_purchases(),
            Command::GetOffer { product_id, reply } => {
                let _ = reply.send(self.catalog.get_offer(&product_id).cloned());
            }
            Command::Price { product_id, reply } => {
                let _ = reply.send(self.price(&product_id));
            }
            Command::PriceText { product_id, reply } => {
                let _ = reply.send(self.price_text(&product_id));
            }
            Command::CanBuy { product_id, reply } => {
                let _ = reply.send(self.can_buy(&product_id));
            }
            Command::SessionPhase { product_id, reply } => {
                let _ = reply.send(self.sessions.get(&product_id).map(|s| s.phase));
            }
        }
    }

    // ---- catalog ----

    fn request_product(&mut self, product_id: ProductId) {
        let batch = self.catalog.request_product(product_id);
        self.dispatch_catalog_batch(batch);
    }

    #[instrument(skip(self))]
    fn request_all_products(&mut self) {
        let ids = self.config.store.prefetch_ids();
        info!("Requesting {} store products", ids.len());
        let batch = self.catalog.refresh(ids);
        self.dispatch_catalog_batch(batch);
    }

    fn dispatch_catalog_batch(&self, batch: Option<Vec<ProductId>>) {
        let Some(batch) = batch else {
            return;
        };

        match &self.adapter {
            Some(adapter) => adapter.request_products(batch),
            None => debug!("No store adapter, {} products not requested", batch.len()),
        }
    }

    fn on_products_received(&mut self, offers: Vec<Offer>) {
        let missing = self.catalog.on_offers_received(offers);
        self.notify(StoreNotification::CatalogUpdated);

        let next = self.catalog.next_batch();
        self.dispatch_catalog_batch(next);

        // The store answered for these ids without an offer; waiting longer cannot help
        let unanswered: Vec<ProductId> = missing
            .into_iter()
            .filter(|id| self.phase_of(id) == Some(PurchasePhase::AwaitingCatalog))
            .collect();
        for product_id in unanswered {
            info!(product_id = %product_id, "Store returned no offer for product");
            self.complete_session(
                &product_id,
                Err(PurchaseError::CatalogUnavailable(product_id.clone())),
            );
        }

        self.reevaluate_awaiting_sessions();
    }

    fn on_products_query_failed(&mut self, reason: String) {
        let dropped = self.catalog.on_fetch_failed();
        warn!("Store products query failed: {}", reason);
        self.notify(StoreNotification::CatalogFetchFailed {
            reason: reason.clone(),
        });

        // Sessions waiting on the failed batch cannot be served without a re-request
        let waiting: Vec<ProductId> = dropped
            .into_iter()
            .filter(|id| self.phase_of(id) == Some(PurchasePhase::AwaitingCatalog))
            .collect();
        for product_id in waiting {
            self.complete_session(
                &product_id,
                Err(PurchaseError::CatalogFetchFailed(reason.clone())),
            );
        }

        let next = self.catalog.next_batch();
        self.dispatch_catalog_batch(next);
    }

    fn reevaluate_awaiting_sessions(&mut self) {
        let max_updates = self.config.purchase.catalog_wait_max_updates;
        let awaiting: Vec<ProductId> = self
            .sessions
            .values()
            .filter(|s| s.phase == PurchasePhase::AwaitingCatalog)
            .map(|s| s.product_id().clone())
            .collect();

        for product_id in awaiting {
            if self.catalog.get_offer(&product_id).is_some() {
                self.begin_store_purchase(&product_id);
                continue;
            }

            let Some(session) = self.sessions.get_mut(&product_id) else {
                continue;
            };
            session.catalog_updates_seen += 1;

            if max_updates > 0 && session.catalog_updates_seen >= max_updates {
                info!(product_id = %product_id, "Gave up waiting for store product");
                self.complete_session(
                    &product_id,
                    Err(PurchaseError::CatalogUnavailable(product_id.clone())),
                );
            }
        }
    }

    // ---- buy lifecycle ----

    #[instrument(skip(self, request), fields(product_id = %request.product_id))]
    fn start_buy(&mut self, request: PurchaseRequest) -> Result<PurchaseTicket> {
        let product_id = request.product_id.clone();

        if self.sessions.contains_key(&product_id) {
            warn!("Rejecting buy, purchase already in flight");
            return Err(PurchaseError::DuplicateInFlight(product_id));
        }

        let fake = self.config.purchase.fake_purchases_enabled();

        if !fake && self.adapter.is_none() {
            return Err(PurchaseError::AdapterMissing(
                self.config.store.active_platform_name(),
            ));
        }

        if self.needs_verification(&request) && self.verifier.is_none() {
            return Err(PurchaseError::Misconfigured(
                "backend verification enabled without a verifier".to_string(),
            ));
        }

        let (mut session, ticket) = PurchaseSession::new(request);
        session.fake = fake;
        info!(session_id = %session.id, fake, "SKU buy");

        self.ui.open_purchase_ui(&product_id);
        self.sessions.insert(product_id.clone(), session);

        if fake {
            self.begin_fake_purchase(&product_id);
        } else if self.catalog.get_offer(&product_id).is_some() {
            self.begin_store_purchase(&product_id);
        } else {
            self.await_catalog(&product_id);
        }

        Ok(ticket)
    }

    fn await_catalog(&mut self, product_id: &ProductId) {
        let Some(session) = self.sessions.get_mut(product_id) else {
            return;
        };
        session.phase = PurchasePhase::AwaitingCatalog;
        let session_id = session.id;

        info!(product_id = %product_id, "Waiting for store product");

        let batch = self.catalog.request_product(product_id.clone());
        self.dispatch_catalog_batch(batch);

        if let Some(timeout) = self.config.purchase.catalog_wait_timeout() {
            self.schedule(
                timeout,
                InternalEvent::CatalogWaitExpired {
                    product_id: product_id.clone(),
                    session_id,
                },
            );
        }
    }

    fn begin_store_purchase(&mut self, product_id: &ProductId) {
        let available = self
            .catalog
            .get_offer(product_id)
            .map(|offer| offer.available)
            .unwrap_or(false);

        if !available {
            warn!(product_id = %product_id, "Store product is not available for purchase");
            self.complete_session(
                product_id,
                Err(PurchaseError::CatalogUnavailable(product_id.clone())),
            );
            return;
        }

        let Some(adapter) = self.adapter.clone() else {
            self.complete_session(
                product_id,
                Err(PurchaseError::AdapterMissing(
                    self.config.store.active_platform_name(),
                )),
            );
            return;
        };

        let Some(session) = self.sessions.get_mut(product_id) else {
            return;
        };
        session.phase = PurchasePhase::PurchaseInFlight;
        let consumable = session.request.consumable.unwrap_or(true);

        info!(product_id = %product_id, session_id = %session.id, "Checkout");
        adapter.purchase(product_id, consumable);
    }

    /// Development builds skip the store and settle a synthetic receipt
    fn begin_fake_purchase(&mut self, product_id: &ProductId) {
        let Some(session) = self.sessions.get_mut(product_id) else {
            return;
        };
        session.phase = PurchasePhase::PurchaseInFlight;

        let receipt = PurchaseReceipt::new(product_id.clone(), format!("fake-{}", Uuid::new_v4()))
            .with_metadata(FAKE_PURCHASE_KEY, "True");

        self.on_receipt(product_id, receipt);
    }

    fn on_purchase_succeeded(&mut self, receipt: PurchaseReceipt) {
        let product_id = receipt.product_id.clone();

        if self.settled.contains(&receipt.transaction_id) {
            debug!(
                product_id = %product_id,
                receipt = %receipt.fingerprint(),
                "Ignoring repeated completion for a settled transaction"
            );
            return;
        }

        match self.phase_of(&product_id) {
            Some(PurchasePhase::PurchaseInFlight) => self.on_receipt(&product_id, receipt),
            Some(phase) if self.is_session_receipt(&product_id, &receipt) => {
                debug!(
                    product_id = %product_id,
                    phase = phase.as_str(),
                    "Ignoring repeated completion for an active session"
                );
            }
            _ => {
                warn!(
                    product_id = %product_id,
                    receipt = %receipt.fingerprint(),
                    "Store purchase matches no session"
                );
                self.notify(StoreNotification::UnmatchedPurchase { receipt });
            }
        }
    }

    fn is_session_receipt(&self, product_id: &ProductId, receipt: &PurchaseReceipt) -> bool {
        self.sessions
            .get(product_id)
            .and_then(|s| s.receipt.as_ref())
            .map(|r| r.transaction_id == receipt.transaction_id)
            .unwrap_or(false)
    }

    fn on_purchase_failed(&mut self, product_id: Option<ProductId>, reason: String) {
        let failed: Vec<ProductId> = match product_id {
            Some(id) => vec![id],
            // The store did not name the product, so every checkout is affected
            None => self
                .sessions
                .values()
                .map(|s| s.product_id().clone())
                .collect(),
        };

        for product_id in failed {
            if self.phase_of(&product_id) != Some(PurchasePhase::PurchaseInFlight) {
                continue;
            }

            info!(product_id = %product_id, "Store purchase failed: {}", reason);
            self.complete_session(
                &product_id,
                Err(PurchaseError::PurchaseRejectedByStore(reason.clone())),
            );
        }
    }

    /// A successful store receipt for an in-flight session
    fn on_receipt(&mut self, product_id: &ProductId, receipt: PurchaseReceipt) {
        let verify = self
            .sessions
            .get(product_id)
            .map(|s| self.needs_verification(&s.request))
            .unwrap_or(false);

        let Some(session) = self.sessions.get_mut(product_id) else {
            return;
        };

        info!(
            product_id = %product_id,
            session_id = %session.id,
            receipt = %receipt.fingerprint(),
            verify,
            "Purchase complete"
        );

        if !verify {
            session.receipt = Some(receipt);
            self.finalize_session(product_id);
            return;
        }

        let Some(verifier) = self.verifier.clone() else {
            // Checked at buy time
            self.complete_session(
                product_id,
                Err(PurchaseError::Misconfigured(
                    "backend verification enabled without a verifier".to_string(),
                )),
            );
            return;
        };

        session.phase = PurchasePhase::VerificationInFlight;
        let session_id = session.id;
        let tag = session.request.tag.clone();
        let transaction_id = receipt.transaction_id.clone();
        session.receipt = Some(receipt);

        let internal_tx = self.internal_tx.clone();
        let product_id = product_id.clone();
        tokio::spawn(async move {
            let verified = verifier.verify(&tag, &transaction_id).await;
            let _ = internal_tx.send(InternalEvent::VerificationResolved {
                product_id,
                session_id,
                verified,
            });
        });
    }

    fn on_verification_resolved(&mut self, product_id: ProductId, session_id: Uuid, verified: bool) {
        let Some(session) = self.sessions.get(&product_id) else {
            return;
        };
        if session.id != session_id || session.phase != PurchasePhase::VerificationInFlight {
            debug!(product_id = %product_id, "Stale verification result ignored");
            return;
        }

        if verified {
            self.finalize_session(&product_id);
            return;
        }

        let fingerprint = session
            .receipt
            .as_ref()
            .map(|r| r.fingerprint())
            .unwrap_or_default();
        warn!(product_id = %product_id, receipt = %fingerprint, "Purchase not verified, not finalizing");
        self.complete_session(&product_id, Err(PurchaseError::VerificationFailed(fingerprint)));
    }

    fn finalize_session(&mut self, product_id: &ProductId) {
        let Some(session) = self.sessions.get_mut(product_id) else {
            return;
        };
        session.phase = PurchasePhase::Finalizing;

        let Some(receipt) = session.receipt.take() else {
            error!(product_id = %product_id, "Finalizing without a receipt");
            self.complete_session(
                product_id,
                Err(PurchaseError::Internal(anyhow::anyhow!(
                    "finalize reached without a receipt"
                ))),
            );
            return;
        };

        if session.fake {
            debug!(product_id = %product_id, "Fake purchase, nothing to finalize");
            self.complete_session(product_id, Ok(receipt));
            return;
        }

        let kind = session.request.finalize_kind();
        let prepared = receipt.prepared_for_finalize(kind);

        let Some(adapter) = self.adapter.clone() else {
            self.complete_session(
                product_id,
                Err(PurchaseError::AdapterMissing(
                    self.config.store.active_platform_name(),
                )),
            );
            return;
        };

        info!(product_id = %product_id, finalize_type = kind.as_str(), "Finalize purchase");
        adapter.finalize(&prepared, kind);

        let transaction_id = prepared.transaction_id.clone();
        self.settled.put(transaction_id.clone(), ());
        self.pending_finalize
            .insert(product_id.clone(), transaction_id.clone());
        self.schedule(
            self.config.purchase.finalize_cooldown(),
            InternalEvent::FinalizeCooldownElapsed {
                product_id: product_id.clone(),
                transaction_id,
            },
        );

        // Finalize confirmation is not awaited
        self.complete_session(product_id, Ok(prepared));
    }

    fn complete_session(&mut self, product_id: &ProductId, outcome: PurchaseOutcome) {
        let Some(mut session) = self.sessions.remove(product_id) else {
            return;
        };

        let success = outcome.is_ok();
        let elapsed_ms = session.elapsed().whole_milliseconds();

        match &outcome {
            Ok(_) => info!(
                product_id = %product_id,
                session_id = %session.id,
                elapsed_ms,
                "Finish SKU"
            ),
            Err(e) => info!(
                product_id = %product_id,
                session_id = %session.id,
                elapsed_ms,
                code = e.code(),
                "Finish SKU with failure: {}",
                e
            ),
        }

        self.ui.close_purchase_ui(product_id);
        self.notify(StoreNotification::PurchaseCompleted {
            product_id: product_id.clone(),
            success,
        });
        session.complete(outcome);
    }

    // ---- restore ----

    #[instrument(skip(self))]
    fn restore_purchases(&mut self) {
        let Some(adapter) = &self.adapter else {
            warn!("No store adapter, cannot restore purchases");
            self.notify(StoreNotification::RestoreFailed {
                reason: format!(
                    "no adapter for platform {}",
                    self.config.store.active_platform_name()
                ),
            });
            return;
        };

        let ids = self.config.store.restorable_ids();
        if ids.is_empty() {
            warn!("No non-consumable shop items configured to restore");
        }
        adapter.restore_purchases(ids);
    }

    fn on_purchase_restored(&mut self, receipt: PurchaseReceipt) {
        let item_tag = self
            .config
            .store
            .find_item(&receipt.product_id)
            .map(|item| item.tag.clone());

        info!(product_id = %receipt.product_id, ?item_tag, "Purchase restored");
        self.notify(StoreNotification::PurchaseRestored { receipt, item_tag });
    }

    // ---- events ----

    fn handle_store_event(&mut self, event: StoreEvent) {
        match event {
            StoreEvent::ProductsReceived(offers) => self.on_products_received(offers),
            StoreEvent::ProductsQueryFailed(reason) => self.on_products_query_failed(reason),
            StoreEvent::PurchaseSucceeded(receipt) => self.on_purchase_succeeded(receipt),
            StoreEvent::PurchaseFailed { product_id, reason } => {
                self.on_purchase_failed(product_id, reason)
            }
            StoreEvent::PurchaseRestored(receipt) => self.on_purchase_restored(receipt),
            StoreEvent::RestoreFailed(reason) => {
                warn!("Restore failed: {}", reason);
                self.notify(StoreNotification::RestoreFailed { reason });
            }
            StoreEvent::FinalizeCompleted { transaction_id } => {
                self.pending_finalize.retain(|_, tx| *tx != transaction_id);
            }
        }
    }

    fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::VerificationResolved {
                product_id,
                session_id,
                verified,
            } => self.on_verification_resolved(product_id, session_id, verified),
            InternalEvent::CatalogWaitExpired {
                product_id,
                session_id,
            } => {
                let expired = self
                    .sessions
                    .get(&product_id)
                    .map(|s| s.id == session_id && s.phase == PurchasePhase::AwaitingCatalog)
                    .unwrap_or(false);

                if expired {
                    info!(product_id = %product_id, "Timed out waiting for store product");
                    self.complete_session(
                        &product_id,
                        Err(PurchaseError::CatalogUnavailable(product_id.clone())),
                    );
                }
            }
            InternalEvent::FinalizeCooldownElapsed {
                product_id,
                transaction_id,
            } => {
                if self.pending_finalize.get(&product_id) == Some(&transaction_id) {
                    self.pending_finalize.remove(&product_id);
                }
            }
        }
    }

    // ---- derived values ----

    fn price_scale(&self) -> PriceScale {
        self.adapter
            .as_ref()
            .map(|adapter| adapter.price_scale())
            .unwrap_or(PriceScale::Unscaled)
    }

    /// Displayed price; 0 until the offer is known
    fn price(&self, product_id: &ProductId) -> i64 {
        self.catalog
            .get_offer(product_id)
            .map(|offer| offer.display_price(self.price_scale()))
            .unwrap_or(0)
    }

    fn price_text(&self, product_id: &ProductId) -> String {
        self.catalog
            .get_offer(product_id)
            .map(|offer| offer.price_text.clone())
            .unwrap_or_default()
    }

    fn can_buy(&self, product_id: &ProductId) -> bool {
        if self.sessions.contains_key(product_id) || self.pending_finalize.contains_key(product_id)
        {
            return false;
        }

        if self.config.purchase.fake_purchases_enabled() {
            return true;
        }

        self.adapter.is_some()
            && self
                .catalog
                .get_offer(product_id)
                .map(|offer| offer.available)
                .unwrap_or(false)
    }

    // ---- helpers ----

    fn needs_verification(&self, request: &PurchaseRequest) -> bool {
        self.config.verification.enabled && !request.skip_verification
    }

    fn phase_of(&self, product_id: &ProductId) -> Option<PurchasePhase> {
        self.sessions.get(product_id).map(|s| s.phase)
    }

    fn notify(&self, notification: StoreNotification) {
        // No subscribers is fine
        let _ = self.notifications.send(notification);
    }

    fn schedule(&self, delay: Duration, event: InternalEvent) {
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = internal_tx.send(event);
        });
    }
}

async fn run(
    mut orchestrator: PurchaseOrchestrator,
    mut commands: mpsc::Receiver<Command>,
    mut store_events: mpsc::UnboundedReceiver<StoreEvent>,
    mut internal: mpsc::UnboundedReceiver<InternalEvent>,
) {
    info!("Purchase service started");

    loop {
        tokio::select! {
            Some(event) = internal.recv() => orchestrator.handle_internal(event),
            Some(event) = store_events.recv() => orchestrator.handle_store_event(event),
            command = commands.recv() => match command {
                Some(command) => orchestrator.handle_command(command),
                None => break,
            },
        }
    }

    info!(
        "Purchase service stopped with {} sessions in flight",
        orchestrator.sessions.len()
    );
}

pub struct PurchaseServiceBuilder {
    config: Arc<Config>,
    sink: EventSink,
    store_events: mpsc::UnboundedReceiver<StoreEvent>,
    adapter: Option<Arc<dyn PlatformAdapter>>,
    verifier: Option<Arc<dyn PurchaseVerifier>>,
    ui: Arc<dyn PurchaseUi>,
}

impl PurchaseServiceBuilder {
    /// Sink adapters must report into; clone it into the adapter before `spawn`
    pub fn event_sink(&self) -> EventSink {
        self.sink.clone()
    }

    pub fn adapter(mut self, adapter: Arc<dyn PlatformAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn verifier(mut self, verifier: Arc<dyn PurchaseVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn ui(mut self, ui: Arc<dyn PurchaseUi>) -> Self {
        self.ui = ui;
        self
    }

    /// Start the orchestrator task. Must be called inside a tokio runtime.
    pub fn spawn(self) -> PurchaseService {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);

        if let Some(adapter) = &self.adapter {
            info!(platform = %adapter.platform(), "Platform purchase adapter initialized");
        }

        let orchestrator = PurchaseOrchestrator::new(
            self.config.clone(),
            self.adapter,
            self.verifier,
            self.ui,
            notifications.clone(),
            internal_tx,
        );

        tokio::spawn(run(orchestrator, command_rx, self.store_events, internal_rx));

        PurchaseService {
            config: self.config,
            commands: command_tx,
            notifications,
        }
    }
}

/// Cloneable handle to the running purchase orchestrator
#[derive(Clone)]
pub struct PurchaseService {
    config: Arc<Config>,
    commands: mpsc::Sender<Command>,
    notifications: broadcast::Sender<StoreNotification>,
}

impl PurchaseService {
    pub fn builder(config: impl Into<Arc<Config>>) -> PurchaseServiceBuilder {
        let (sink, store_events) = EventSink::channel();

        PurchaseServiceBuilder {
            config: config.into(),
            sink,
            store_events,
            adapter: None,
            verifier: None,
            ui: Arc::new(NoopPurchaseUi),
        }
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| PurchaseError::ServiceStopped)
    }

    async fn query<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply)).await?;
        rx.await.map_err(|_| PurchaseError::ServiceStopped)
    }

    /// Buy a product using its shop item configuration.
    ///
    /// Fails immediately on a duplicate in-flight buy or missing adapter;
    /// every later failure arrives through the returned ticket.
    pub async fn buy(&self, product_id: impl Into<ProductId>) -> Result<PurchaseTicket> {
        let request = self.config.store.purchase_request(&product_id.into());
        self.buy_with(request).await
    }

    pub async fn buy_with(&self, request: PurchaseRequest) -> Result<PurchaseTicket> {
        self.query(|reply| Command::Buy { request, reply }).await?
    }

    pub async fn request_product(&self, product_id: impl Into<ProductId>) -> Result<()> {
        self.send(Command::RequestProduct {
            product_id: product_id.into(),
        })
        .await
    }

    /// Fetch every configured product, replacing known offers
    pub async fn request_all_products(&self) -> Result<()> {
        self.send(Command::RequestAllProducts).await
    }

    pub async fn restore_purchases(&self) -> Result<()> {
        self.send(Command::RestorePurchases).await
    }

    pub async fn offer(&self, product_id: impl Into<ProductId>) -> Result<Option<Offer>> {
        let product_id = product_id.into();
        self.query(|reply| Command::GetOffer { product_id, reply })
            .await
    }

    pub async fn price(&self, product_id: impl Into<ProductId>) -> Result<i64> {
        let product_id = product_id.into();
        self.query(|reply| Command::Price { product_id, reply }).await
    }

    pub async fn price_text(&self, product_id: impl Into<ProductId>) -> Result<String> {
        let product_id = product_id.into();
        self.query(|reply| Command::PriceText { product_id, reply })
            .await
    }

    pub async fn can_buy(&self, product_id: impl Into<ProductId>) -> Result<bool> {
        let product_id = product_id.into();
        self.query(|reply| Command::CanBuy { product_id, reply }).await
    }

    pub async fn session_phase(
        &self,
        product_id: impl Into<ProductId>,
    ) -> Result<Option<PurchasePhase>> {
        let product_id = product_id.into();
        self.query(|reply| Command::SessionPhase { product_id, reply })
            .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreNotification> {
        self.notifications.subscribe()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
