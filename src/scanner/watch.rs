//! Invalidation signal between a table and one scanner's open merge

use crossbeam::atomic::AtomicCell;
use parking_lot::Mutex;

use crate::cell::RowRange;
use crate::table::{FragmentListener, TabletEvent, TabletListener};

/// What a structural change did to the open merge
///
/// Ordered by severity; the signal only ever moves up until taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Invalidation {
    Clean,
    /// Reopen the merge from the last key
    Rebuild,
    /// The tablet under the merge is gone
    Dropped,
}

#[derive(Debug)]
enum Watched {
    /// No merge open; changes are irrelevant
    Idle,
    /// A chain snapshot is being turned into a merge; any change counts
    Opening,
    /// Merge open over this tablet range
    Range(RowRange),
}

/// Registered with the table as both fragment and tablet listener
///
/// Callbacks run under the table lock, so they only touch this struct's own
/// small mutex and atomic and never the scanner itself.
#[derive(Debug)]
pub(crate) struct MergeWatch {
    watched: Mutex<Watched>,
    signal: AtomicCell<Invalidation>,
}

impl MergeWatch {
    pub(crate) fn new() -> Self {
        Self {
            watched: Mutex::new(Watched::Idle),
            signal: AtomicCell::new(Invalidation::Clean),
        }
    }

    /// Start opening a merge: clear the signal and watch everything
    pub(crate) fn begin_open(&self) {
        let mut watched = self.watched.lock();
        *watched = Watched::Opening;
        self.signal.store(Invalidation::Clean);
    }

    /// Narrow the watch to the opened merge's range
    ///
    /// Returns false if anything changed since `begin_open`, in which case
    /// the merge is stale and must be rebuilt.
    pub(crate) fn watch(&self, rows: RowRange) -> bool {
        let mut watched = self.watched.lock();
        if self.signal.load() != Invalidation::Clean {
            return false;
        }
        *watched = Watched::Range(rows);
        true
    }

    /// Stop watching (no merge open)
    pub(crate) fn idle(&self) {
        *self.watched.lock() = Watched::Idle;
    }

    /// Read and clear the signal
    pub(crate) fn take(&self) -> Invalidation {
        self.signal.swap(Invalidation::Clean)
    }

    fn on_change(&self, rows: &RowRange, level: Invalidation) {
        let watched = self.watched.lock();
        let level = match &*watched {
            Watched::Idle => return,
            // The snapshot may predate the change; retrying will surface a drop
            Watched::Opening => Invalidation::Rebuild,
            Watched::Range(open) if open.overlaps(rows) => level,
            Watched::Range(_) => return,
        };
        self.raise(level);
    }

    fn raise(&self, level: Invalidation) {
        let mut current = self.signal.load();
        while current < level {
            match self.signal.compare_exchange(current, level) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

impl FragmentListener for MergeWatch {
    fn fragments_replaced(&self, rows: &RowRange) {
        self.on_change(rows, Invalidation::Rebuild);
    }
}

impl TabletListener for MergeWatch {
    fn tablet_changed(&self, event: &TabletEvent) {
        let level = match event {
            TabletEvent::Dropped { .. } => Invalidation::Dropped,
            TabletEvent::Split { .. } | TabletEvent::Merged { .. } => Invalidation::Rebuild,
        };
        self.on_change(event.rows(), level);
    }
}

