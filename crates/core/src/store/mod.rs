//! Domain stores.
//!
//! Each store owns its state inside a [`tokio::sync::watch`] channel. Only the
//! store's own action methods mutate it, every action is a single atomic
//! transition, and readers either take a cloned snapshot or subscribe to
//! changes.

pub mod chat;
pub mod context;
pub mod layout;
pub mod pricing;
pub mod status;

pub use chat::{ChatBusy, ChatState, ChatStore};
pub use context::{ContextState, ContextStore, SavedScenario};
pub use layout::{LayoutState, LayoutStore, Panel, Tab};
pub use pricing::{PricingState, PricingStore};
pub use status::{BackendHealth, StatusState, StatusStore};
