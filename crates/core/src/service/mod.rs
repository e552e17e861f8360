//! Orchestration between the backend client and the stores.

pub mod chat;
pub mod evidence;
pub mod fallback;
pub mod pricing;

#[cfg(test)]
pub(crate) mod testing;

pub use chat::ChatSession;
pub use evidence::EvidenceService;
pub use pricing::{PricingMode, PricingService};
