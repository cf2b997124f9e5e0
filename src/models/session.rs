use tokio::sync::oneshot;
use uuid::Uuid;

use super::{
    product::ProductId,
    receipt::{FinalizeKind, PurchaseReceipt},
};
use crate::error::{PurchaseError, Result};

/// Lifecycle phase of a single buy attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchasePhase {
    Idle,
    AwaitingCatalog,
    PurchaseInFlight,
    VerificationInFlight,
    Finalizing,
    Complete { success: bool },
}

impl PurchasePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchasePhase::Idle => "idle",
            PurchasePhase::AwaitingCatalog => "awaiting_catalog",
            PurchasePhase::PurchaseInFlight => "purchase_in_flight",
            PurchasePhase::VerificationInFlight => "verification_in_flight",
            PurchasePhase::Finalizing => "finalizing",
            PurchasePhase::Complete { success: true } => "complete_success",
            PurchasePhase::Complete { success: false } => "complete_failure",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PurchasePhase::Complete { .. })
    }
}

/// What the caller asked to buy, resolved against the configured shop items
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseRequest {
    pub product_id: ProductId,
    /// Item tag sent to the verification backend
    pub tag: String,
    /// `None` when the item is not configured; finalizes as `Consume`
    pub consumable: Option<bool>,
    pub skip_verification: bool,
}

impl PurchaseRequest {
    /// Request for a product with no shop item configuration
    pub fn unconfigured(product_id: impl Into<ProductId>) -> Self {
        let product_id = product_id.into();
        Self {
            tag: product_id.to_string(),
            product_id,
            consumable: None,
            skip_verification: false,
        }
    }

    pub fn finalize_kind(&self) -> FinalizeKind {
        FinalizeKind::for_consumable(self.consumable)
    }
}

/// Final result of a session: the settled receipt or the reason it failed
pub type PurchaseOutcome = Result<PurchaseReceipt>;

/// Per-attempt state owned by the orchestrator
#[derive(Debug)]
pub struct PurchaseSession {
    pub id: Uuid,
    pub request: PurchaseRequest,
    pub phase: PurchasePhase,
    pub started_at: time::OffsetDateTime,
    /// Catalog updates observed while awaiting the offer
    pub catalog_updates_seen: u32,
    pub fake: bool,
    /// Store receipt held while verification and finalize run
    pub receipt: Option<PurchaseReceipt>,
    outcome_tx: Option<oneshot::Sender<PurchaseOutcome>>,
}

impl PurchaseSession {
    pub fn new(request: PurchaseRequest) -> (Self, PurchaseTicket) {
        let (tx, rx) = oneshot::channel();
        let id = Uuid::now_v7();

        let ticket = PurchaseTicket {
            session_id: id,
            product_id: request.product_id.clone(),
            outcome_rx: rx,
        };

        let session = Self {
            id,
            request,
            phase: PurchasePhase::Idle,
            started_at: time::OffsetDateTime::now_utc(),
            catalog_updates_seen: 0,
            fake: false,
            receipt: None,
            outcome_tx: Some(tx),
        };

        (session, ticket)
    }

    pub fn product_id(&self) -> &ProductId {
        &self.request.product_id
    }

    /// Deliver the terminal outcome. Returns false if it was already delivered.
    pub fn complete(&mut self, outcome: PurchaseOutcome) -> bool {
        self.phase = PurchasePhase::Complete {
            success: outcome.is_ok(),
        };

        match self.outcome_tx.take() {
            // The caller may have dropped its ticket; the session still completes
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    pub fn elapsed(&self) -> time::Duration {
        time::OffsetDateTime::now_utc() - self.started_at
    }
}

/// Caller's end of a session's outcome channel
#[derive(Debug)]
pub struct PurchaseTicket {
    pub session_id: Uuid,
    pub product_id: ProductId,
    outcome_rx: oneshot::Receiver<PurchaseOutcome>,
}

impl PurchaseTicket {
    /// Wait for the session to reach a terminal state
    pub async fn outcome(self) -> PurchaseOutcome {
        self.outcome_rx
            .await
            .unwrap_or(Err(PurchaseError::ServiceStopped))
    }
}
