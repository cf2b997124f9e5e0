// Service modules
pub mod catalog_service;
pub mod purchase_service;
pub mod verification_service;

pub use catalog_service::ProductCatalog;
pub use purchase_service::{PurchaseService, PurchaseServiceBuilder};
pub use verification_service::{PurchaseVerifier, VerificationClient};
