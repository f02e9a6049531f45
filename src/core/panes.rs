use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::core::conversation::ConversationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PaneId(u64);

/// Chat panes currently visible on screen and the conversation each shows.
#[derive(Default)]
pub struct PaneRegistry {
    next_id: AtomicU64,
    panes: Mutex<HashMap<PaneId, ConversationId>>,
}

impl PaneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PaneId, ConversationId>> {
        self.panes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn open_pane(&self, conversation_id: ConversationId) -> PaneId {
        let id = PaneId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(id, conversation_id);
        id
    }

    pub fn close_pane(&self, pane: PaneId) -> bool {
        self.lock().remove(&pane).is_some()
    }

    pub fn visible_count(&self) -> usize {
        self.lock().len()
    }
}
