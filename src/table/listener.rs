//! Structural change listeners
//!
//! Tables keep listeners by explicit id and hold them weakly, so an observer
//! (normally a scanner) can go away without the table knowing. Callbacks run
//! synchronously under the table lock and must stay O(1).

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use bytes::Bytes;

use crate::cell::RowRange;

/// Handle returned on registration, used for removal
pub type ListenerId = u64;

/// Observer of fragment replacement (compaction install, memory flush)
pub trait FragmentListener: Send + Sync {
    fn fragments_replaced(&self, rows: &RowRange);
}

/// Observer of tablet topology changes
pub trait TabletListener: Send + Sync {
    fn tablet_changed(&self, event: &TabletEvent);
}

/// A change to the set of loaded tablets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabletEvent {
    /// The tablet covering `rows` was split in two at row `at`
    Split { rows: RowRange, at: Bytes },

    /// Two adjacent tablets were joined into one covering `rows`
    Merged { rows: RowRange },

    /// The tablet covering `rows` is no longer loaded
    Dropped { rows: RowRange },
}

impl TabletEvent {
    /// Rows affected by the change
    pub fn rows(&self) -> &RowRange {
        match self {
            TabletEvent::Split { rows, .. }
            | TabletEvent::Merged { rows }
            | TabletEvent::Dropped { rows } => rows,
        }
    }
}

/// Id-keyed registry of weakly held listeners
pub struct ListenerRegistry<L: ?Sized> {
    next_id: ListenerId,
    listeners: BTreeMap<ListenerId, Weak<L>>,
}

impl<L: ?Sized> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self {
            next_id: 1,
            listeners: BTreeMap::new(),
        }
    }
}

impl<L: ?Sized> ListenerRegistry<L> {
    pub fn add(&mut self, listener: &Arc<L>) -> ListenerId {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.insert(id, Arc::downgrade(listener));
        id
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    /// Call `f` on every live listener, forgetting dead ones
    pub fn notify(&mut self, f: impl Fn(&L)) {
        self.listeners.retain(|_, weak| match weak.upgrade() {
            Some(listener) => {
                f(&*listener);
                true
            }
            None => false,
        });
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}
