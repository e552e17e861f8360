use crate::storage::{load_json, save_json, KeyValueStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;

pub const LAYOUT_KEY: &str = "farecast.layout";

pub const MIN_CHAT_WIDTH: u32 = 240;
pub const MAX_CHAT_WIDTH: u32 = 720;
const DEFAULT_CHAT_WIDTH: u32 = 380;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tab {
    #[default]
    Workspace,
    Executive,
    Evidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Panel {
    Context,
    Charts,
    Trace,
    Chat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutState {
    #[serde(default)]
    pub active_tab: Tab,
    #[serde(default)]
    pub collapsed_panels: BTreeSet<Panel>,
    #[serde(default = "default_chat_width")]
    pub chat_width: u32,
}

fn default_chat_width() -> u32 {
    DEFAULT_CHAT_WIDTH
}

impl Default for LayoutState {
    fn default() -> Self {
        Self {
            active_tab: Tab::default(),
            collapsed_panels: BTreeSet::new(),
            chat_width: DEFAULT_CHAT_WIDTH,
        }
    }
}

pub struct LayoutStore {
    state: watch::Sender<LayoutState>,
    storage: Arc<dyn KeyValueStore>,
}

impl LayoutStore {
    pub fn load(storage: Arc<dyn KeyValueStore>) -> Self {
        let mut initial = load_json::<LayoutState>(storage.as_ref(), LAYOUT_KEY).unwrap_or_default();
        initial.chat_width = initial.chat_width.clamp(MIN_CHAT_WIDTH, MAX_CHAT_WIDTH);
        let (state, _) = watch::channel(initial);
        Self { state, storage }
    }

    pub fn snapshot(&self) -> LayoutState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LayoutState> {
        self.state.subscribe()
    }

    fn mutate(&self, f: impl FnOnce(&mut LayoutState) -> bool) -> bool {
        let storage = self.storage.as_ref();
        self.state.send_if_modified(|state| {
            let changed = f(state);
            if changed {
                save_json(storage, LAYOUT_KEY, state);
            }
            changed
        })
    }

    pub fn set_active_tab(&self, tab: Tab) {
        self.mutate(|s| std::mem::replace(&mut s.active_tab, tab) != tab);
    }

    /// Returns whether the panel is collapsed afterwards.
    pub fn toggle_panel(&self, panel: Panel) -> bool {
        self.mutate(|s| {
            if !s.collapsed_panels.remove(&panel) {
                s.collapsed_panels.insert(panel);
            }
            true
        });
        self.state.borrow().collapsed_panels.contains(&panel)
    }

    pub fn set_chat_width(&self, width: u32) -> u32 {
        let width = width.clamp(MIN_CHAT_WIDTH, MAX_CHAT_WIDTH);
        self.mutate(|s| std::mem::replace(&mut s.chat_width, width) != width);
        width
    }

    pub fn reset(&self) {
        self.mutate(|s| {
            let changed = *s != LayoutState::default();
            *s = LayoutState::default();
            changed
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn preferences_persist_and_width_is_clamped() {
        let storage = Arc::new(MemoryStore::new());
        let layout = LayoutStore::load(storage.clone());
        layout.set_active_tab(Tab::Evidence);
        assert!(layout.toggle_panel(Panel::Trace));
        assert_eq!(layout.set_chat_width(5000), MAX_CHAT_WIDTH);

        let reloaded = LayoutStore::load(storage);
        let s = reloaded.snapshot();
        assert_eq!(s.active_tab, Tab::Evidence);
        assert!(s.collapsed_panels.contains(&Panel::Trace));
        assert_eq!(s.chat_width, MAX_CHAT_WIDTH);

        assert!(!reloaded.toggle_panel(Panel::Trace));
        reloaded.reset();
        assert_eq!(reloaded.snapshot(), LayoutState::default());
    }

    #[test]
    fn out_of_range_persisted_width_is_clamped_on_load() {
        let storage = Arc::new(MemoryStore::new());
        storage
            .set(LAYOUT_KEY, r#"{"active_tab":"executive","chat_width":10}"#)
            .unwrap();
        let s = LayoutStore::load(storage).snapshot();
        assert_eq!(s.active_tab, Tab::Executive);
        assert_eq!(s.chat_width, MIN_CHAT_WIDTH);
    }
}
