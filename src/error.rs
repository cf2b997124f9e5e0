use crate::models::product::ProductId;

#[derive(Debug, thiserror::Error)]
pub enum PurchaseError {
    #[error("Catalog fetch failed: {0}")]
    CatalogFetchFailed(String),

    #[error("Store offer unavailable for {0}")]
    CatalogUnavailable(ProductId),

    #[error("Purchase rejected by store: {0}")]
    PurchaseRejectedByStore(String),

    #[error("Purchase verification failed for transaction {0}")]
    VerificationFailed(String),

    #[error("No purchase adapter configured for platform {0}")]
    AdapterMissing(String),

    #[error("Misconfigured: {0}")]
    Misconfigured(String),

    #[error("Purchase already in flight for {0}")]
    DuplicateInFlight(ProductId),

    #[error("Invalid store payload: {0}")]
    InvalidPayload(String),

    #[error("Purchase service stopped")]
    ServiceStopped,

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}

impl PurchaseError {
    /// Stable machine-readable code, suitable for analytics and host-side branching
    pub fn code(&self) -> &'static str {
        match self {
            PurchaseError::CatalogFetchFailed(_) => "CATALOG_FETCH_FAILED",
            PurchaseError::CatalogUnavailable(_) => "CATALOG_UNAVAILABLE",
            PurchaseError::PurchaseRejectedByStore(_) => "PURCHASE_REJECTED",
            PurchaseError::VerificationFailed(_) => "VERIFICATION_FAILED",
            PurchaseError::AdapterMissing(_) => "ADAPTER_MISSING",
            PurchaseError::Misconfigured(_) => "MISCONFIGURED",
            PurchaseError::DuplicateInFlight(_) => "DUPLICATE_IN_FLIGHT",
            PurchaseError::InvalidPayload(_) => "INVALID_PAYLOAD",
            PurchaseError::ServiceStopped => "SERVICE_STOPPED",
            PurchaseError::Config(_) => "CONFIG_ERROR",
            PurchaseError::Http(_) => "HTTP_ERROR",
            PurchaseError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Errors raised before a session exists; nothing was dispatched to the store
    pub fn is_start_rejection(&self) -> bool {
        matches!(
            self,
            PurchaseError::AdapterMissing(_)
                | PurchaseError::Misconfigured(_)
                | PurchaseError::DuplicateInFlight(_)
                | PurchaseError::ServiceStopped
        )
    }
}

// Helper type for results
pub type Result<T> = std::result::Result<T, PurchaseError>;
