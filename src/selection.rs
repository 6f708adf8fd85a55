//! Active-selection store for tabs and slider containers.
//!
//! Maps a container id to the 0-based index of its active child. An entry is
//! created lazily on first read from the container's `activeTab` /
//! `activeSlide` property and afterwards changes only through [`select`].
//! Entries are never removed during a session.
//!
//! [`select`]: ActiveSelectionStore::select

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use tracing::debug;

use crate::dom::ElementTree;
use crate::value::parse_numeric;

/// Handle returned by [`ActiveSelectionStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(usize);

type Callback = Box<dyn FnMut(&str, usize)>;

struct Subscriber {
    id: SubscriptionId,
    /// Taken out while the callback runs.
    callback: Option<Callback>,
}

/// Session-scoped selection state.
#[derive(Default)]
pub struct ActiveSelectionStore {
    selections: RefCell<HashMap<String, usize>>,
    subscribers: RefCell<Vec<Subscriber>>,
    next_id: Cell<usize>,
}

impl ActiveSelectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active index of `container_id`, initialising it from `tree` on first
    /// read.
    pub fn get(&self, container_id: &str, tree: &ElementTree) -> usize {
        if let Some(index) = self.peek(container_id) {
            return index;
        }
        let Some(index) = default_index(tree, container_id) else {
            return 0;
        };
        self.selections
            .borrow_mut()
            .insert(container_id.to_owned(), index);
        index
    }

    /// Active index without lazy initialisation.
    pub fn peek(&self, container_id: &str) -> Option<usize> {
        self.selections.borrow().get(container_id).copied()
    }

    /// Overwrite the active index and notify subscribers.
    pub fn select(&self, container_id: &str, index: usize) {
        self.selections
            .borrow_mut()
            .insert(container_id.to_owned(), index);
        debug!(container = container_id, index, "active child selected");
        self.notify(container_id, index);
    }

    /// Register a callback run after every [`select`](Self::select).
    pub fn subscribe(&self, callback: impl FnMut(&str, usize) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.subscribers.borrow_mut().push(Subscriber {
            id,
            callback: Some(Box::new(callback)),
        });
        id
    }

    /// Remove a subscriber. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.borrow_mut();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    /// Number of containers with a stored selection.
    pub fn len(&self) -> usize {
        self.selections.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.selections.borrow().is_empty()
    }

    fn notify(&self, container_id: &str, index: usize) {
        let ids: Vec<SubscriptionId> = self.subscribers.borrow().iter().map(|s| s.id).collect();
        for id in ids {
            // Take the callback out so it can call back into the store.
            let callback = self
                .subscribers
                .borrow_mut()
                .iter_mut()
                .find(|s| s.id == id)
                .and_then(|s| s.callback.take());
            let Some(mut callback) = callback else {
                continue;
            };
            callback(container_id, index);
            if let Some(slot) = self.subscribers.borrow_mut().iter_mut().find(|s| s.id == id) {
                slot.callback = Some(callback);
            }
        }
    }
}

impl std::fmt::Debug for ActiveSelectionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSelectionStore")
            .field("selections", &self.selections.borrow())
            .field("subscribers", &self.subscribers.borrow().len())
            .finish()
    }
}

/// Initial index from the container's static configuration.
///
/// A numeric value is a 1-based position; anything else is matched against
/// the marker text of each child. Out-of-range numbers, no match, and
/// several matches all fall back to index 0. Returns `None` when the
/// container is not in the tree.
fn default_index(tree: &ElementTree, container_id: &str) -> Option<usize> {
    let (key, data) = tree.query_by_id(container_id)?;
    let (Some(active_key), Some(marker)) = (
        data.container_type.active_key(),
        data.container_type.marker_key(),
    ) else {
        return Some(0);
    };
    let Some(raw) = data.properties.get_text(active_key) else {
        return Some(0);
    };
    let children = tree.children(key);

    if let Some(n) = parse_numeric(&raw) {
        let in_range = n.fract() == 0.0 && n >= 1.0 && (n as usize) <= children.len();
        return Some(if in_range { n as usize - 1 } else { 0 });
    }

    let wanted = raw.trim();
    let matches: Vec<usize> = children
        .iter()
        .enumerate()
        .filter(|(_, child)| {
            tree.first_marked(**child, marker)
                .and_then(|id| tree.get(id))
                .and_then(|d| d.text())
                .is_some_and(|text| text.trim() == wanted)
        })
        .map(|(i, _)| i)
        .collect();
    match matches.as_slice() {
        [only] => Some(*only),
        other => {
            debug!(
                container = container_id,
                matches = other.len(),
                "ambiguous default selection, using first child"
            );
            Some(0)
        }
    }
}
