use std::sync::Arc;

use liveclip_core::{ClipboardItem, InboundMessage, ItemId};

/// Ordered view of the backend's collection.
///
/// Only [`ReconciliationStore::apply`] mutates it: `sync` replaces everything,
/// `add` appends one item. Nothing is ever removed locally.
#[derive(Debug, Default, Clone)]
pub struct ReconciliationStore {
    items: Vec<ClipboardItem>,
    generation: u64,
}

/// Immutable copy handed to readers.
#[derive(Debug, Default, Clone)]
pub struct StoreSnapshot {
    pub generation: u64,
    pub items: Arc<[ClipboardItem]>,
}

impl ReconciliationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::Sync { items } => self.items = items,
            InboundMessage::Add { item } => self.items.push(item),
        }
        self.generation = self.generation.wrapping_add(1);
    }

    pub fn items(&self) -> &[ClipboardItem] {
        &self.items
    }

    pub fn get(&self, id: &ItemId) -> Option<&ClipboardItem> {
        self.items.iter().find(|item| &item.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of messages applied so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            generation: self.generation,
            items: self.items.iter().cloned().collect(),
        }
    }
}
