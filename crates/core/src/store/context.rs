use crate::contract::context::MarketContext;
use crate::storage::{load_json, save_json, KeyValueStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

pub const CONTEXT_KEY: &str = "farecast.context";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedScenario {
    pub id: Uuid,
    pub name: String,
    pub context: MarketContext,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContextState {
    pub context: MarketContext,
    #[serde(default)]
    pub saved_scenarios: Vec<SavedScenario>,
}

impl ContextState {
    pub fn scenario(&self, id: Uuid) -> Option<&SavedScenario> {
        self.saved_scenarios.iter().find(|s| s.id == id)
    }
}

/// Current market scenario plus the analyst's saved scenarios, persisted
/// entirely in local storage after every change.
pub struct ContextStore {
    state: watch::Sender<ContextState>,
    storage: Arc<dyn KeyValueStore>,
}

impl ContextStore {
    pub fn load(storage: Arc<dyn KeyValueStore>) -> Self {
        let initial = load_json::<ContextState>(storage.as_ref(), CONTEXT_KEY).unwrap_or_default();
        let (state, _) = watch::channel(initial);
        Self { state, storage }
    }

    pub fn snapshot(&self) -> ContextState {
        self.state.borrow().clone()
    }

    pub fn context(&self) -> MarketContext {
        self.state.borrow().context.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ContextState> {
        self.state.subscribe()
    }

    fn mutate(&self, f: impl FnOnce(&mut ContextState) -> bool) -> bool {
        let storage = self.storage.as_ref();
        self.state.send_if_modified(|state| {
            let changed = f(state);
            if changed {
                save_json(storage, CONTEXT_KEY, state);
            }
            changed
        })
    }

    pub fn set_context(&self, context: MarketContext) {
        self.mutate(|s| {
            if s.context == context {
                return false;
            }
            s.context = context;
            true
        });
    }

    pub fn update(&self, f: impl FnOnce(&mut MarketContext)) {
        self.mutate(|s| {
            let before = s.context.clone();
            f(&mut s.context);
            s.context != before
        });
    }

    pub fn reset_context(&self) {
        self.set_context(MarketContext::default());
    }

    /// Snapshots the current context under `name` and returns the new id.
    pub fn save_scenario(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        let name = match name.trim() {
            "" => format!("Scenario {}", Utc::now().format("%Y-%m-%d %H:%M")),
            trimmed => trimmed.to_string(),
        };
        self.mutate(|s| {
            s.saved_scenarios.push(SavedScenario {
                id,
                name,
                context: s.context.clone(),
                saved_at: Utc::now(),
            });
            true
        });
        tracing::debug!(%id, "saved scenario");
        id
    }

    /// Makes the saved scenario the current context. Returns false for an unknown id.
    pub fn load_scenario(&self, id: Uuid) -> bool {
        let mut found = false;
        self.mutate(|s| {
            let Some(scenario) = s.scenario(id) else {
                return false;
            };
            found = true;
            let context = scenario.context.clone();
            if s.context == context {
                return false;
            }
            s.context = context;
            true
        });
        found
    }

    pub fn delete_scenario(&self, id: Uuid) -> bool {
        self.mutate(|s| {
            let before = s.saved_scenarios.len();
            s.saved_scenarios.retain(|sc| sc.id != id);
            s.saved_scenarios.len() != before
        })
    }

    pub fn rename_scenario(&self, id: Uuid, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        self.mutate(|s| {
            match s.saved_scenarios.iter_mut().find(|sc| sc.id == id) {
                Some(scenario) if scenario.name != name => {
                    scenario.name = name.to_string();
                    true
                }
                _ => false,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::context::VehicleType;
    use crate::storage::{FileStore, MemoryStore};

    #[test]
    fn scenario_crud_round_trip() {
        let store = ContextStore::load(Arc::new(MemoryStore::new()));
        store.update(|c| c.number_of_riders = 90);
        let busy = store.save_scenario("Friday rush");

        store.update(|c| {
            c.number_of_riders = 10;
            c.vehicle_type = VehicleType::Premium;
        });
        let quiet = store.save_scenario("  ");

        let s = store.snapshot();
        assert_eq!(s.saved_scenarios.len(), 2);
        assert_eq!(s.scenario(busy).unwrap().name, "Friday rush");
        assert!(s.scenario(quiet).unwrap().name.starts_with("Scenario "));

        assert!(store.load_scenario(busy));
        assert_eq!(store.context().number_of_riders, 90);
        assert_eq!(store.context().vehicle_type, VehicleType::Economy);

        assert!(store.rename_scenario(quiet, "Quiet premium"));
        assert!(store.delete_scenario(busy));
        assert!(!store.delete_scenario(busy));
        assert!(!store.load_scenario(busy));
        assert_eq!(store.snapshot().saved_scenarios.len(), 1);
    }

    #[test]
    fn loading_current_scenario_reports_found() {
        let store = ContextStore::load(Arc::new(MemoryStore::new()));
        let id = store.save_scenario("same");
        assert!(store.load_scenario(id));
    }

    #[test]
    fn state_survives_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(dir.path()).unwrap());

        let id = {
            let store = ContextStore::load(storage.clone());
            store.update(|c| c.historical_cost_of_ride = 512.0);
            store.save_scenario("persisted")
        };

        let reloaded = ContextStore::load(storage);
        let s = reloaded.snapshot();
        assert_eq!(s.context.historical_cost_of_ride, 512.0);
        assert_eq!(s.scenario(id).unwrap().name, "persisted");
    }

    #[test]
    fn corrupt_entry_falls_back_to_default() {
        let storage = Arc::new(MemoryStore::new());
        storage.set(CONTEXT_KEY, "[]").unwrap();
        let store = ContextStore::load(storage);
        assert_eq!(store.snapshot(), ContextState::default());
    }
}
