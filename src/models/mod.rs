// Domain models shared by the catalog, orchestrator and adapters
pub mod common;
pub mod notification;
pub mod product;
pub mod receipt;
pub mod session;
