// Library exports for hosts and tests
pub mod adapters;
pub mod app_state;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod ui;
pub mod utils;

// Re-export commonly used types
pub use adapters::{EventSink, PlatformAdapter, StoreEvent};
pub use app_state::AppState;
pub use config::Config;
pub use error::{PurchaseError, Result};
pub use models::{
    notification::StoreNotification,
    product::{Offer, ProductId},
    receipt::{FinalizeKind, PurchaseReceipt},
    session::{PurchaseOutcome, PurchasePhase, PurchaseRequest, PurchaseTicket},
};
pub use services::{PurchaseService, PurchaseVerifier, VerificationClient};
