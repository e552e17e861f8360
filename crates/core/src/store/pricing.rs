use crate::contract::pricing::PriceExplanation;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

/// Last pricing result. Never persisted: a reload must not resurrect stale prices.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PricingState {
    pub explanation: Option<PriceExplanation>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct PricingStore {
    state: watch::Sender<PricingState>,
}

impl Default for PricingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PricingStore {
    pub fn new() -> Self {
        let (state, _) = watch::channel(PricingState::default());
        Self { state }
    }

    pub fn snapshot(&self) -> PricingState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PricingState> {
        self.state.subscribe()
    }

    pub fn set_loading(&self) {
        self.state.send_modify(|s| {
            s.is_loading = true;
            s.error = None;
        });
    }

    pub fn set_explanation(&self, explanation: PriceExplanation) {
        self.state.send_modify(|s| {
            s.explanation = Some(explanation);
            s.is_loading = false;
            s.error = None;
            s.updated_at = Some(Utc::now());
        });
    }

    pub fn set_error(&self, error: impl Into<String>) {
        let error = error.into();
        self.state.send_modify(|s| {
            s.error = Some(error);
            s.is_loading = false;
        });
    }

    pub fn clear(&self) {
        self.state.send_replace(PricingState::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn explanation(price: f64) -> PriceExplanation {
        PriceExplanation {
            recommended_price: price,
            ..Default::default()
        }
    }

    #[test]
    fn loading_error_and_success_are_exclusive() {
        let store = PricingStore::new();

        store.set_error("backend down");
        store.set_loading();
        let s = store.snapshot();
        assert!(s.is_loading);
        assert_eq!(s.error, None);

        store.set_error("timeout");
        let s = store.snapshot();
        assert!(!s.is_loading);
        assert_eq!(s.error.as_deref(), Some("timeout"));

        store.set_loading();
        store.set_explanation(explanation(12.0));
        let s = store.snapshot();
        assert!(!s.is_loading);
        assert_eq!(s.error, None);
        assert_eq!(s.explanation.unwrap().recommended_price, 12.0);
        assert!(s.updated_at.is_some());
    }

    #[test]
    fn set_explanation_always_clears_loading_and_error() {
        let store = PricingStore::new();
        for prior in 0..3 {
            match prior {
                0 => store.set_loading(),
                1 => store.set_error("x"),
                _ => store.clear(),
            }
            store.set_explanation(explanation(prior as f64));
            let s = store.snapshot();
            assert!(!s.is_loading && s.error.is_none());
        }
    }

    #[tokio::test]
    async fn subscribers_observe_transitions() {
        let store = PricingStore::new();
        let mut rx = store.subscribe();
        store.set_loading();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_loading);
        store.set_explanation(explanation(9.5));
        rx.changed().await.unwrap();
        assert_eq!(
            rx.borrow().explanation.as_ref().map(|e| e.recommended_price),
            Some(9.5)
        );
    }
}
