//! MarkerStore: capacity-bounded FIFO of markers attached to a surface.
//!
//! Invariant: after every `on_message` returns, `len() <= capacity()` and
//! the retained markers are the most recent ones in insertion order.
//! Markers leave the surface only through eviction or teardown.

use std::collections::VecDeque;

use wxmap_core::{Marker, MarkerId, Message};

use crate::surface::DisplaySurface;

/// Default number of markers retained on the surface.
pub const MAX_MARKERS: usize = 100;

struct Entry<H> {
    marker: Marker,
    handle: H,
}

/// Outcome of one [`MarkerStore::on_message`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct Insertion {
    pub added: MarkerId,
    /// Oldest marker, already detached, if the insert crossed the capacity.
    pub evicted: Option<Marker>,
}

/// Owns every marker it creates together with its surface handle.
///
/// Not internally synchronised: when shared between tasks, hold it behind a
/// single lock so insert and evict stay one critical section.
pub struct MarkerStore<S: DisplaySurface> {
    surface: S,
    entries: VecDeque<Entry<S::Handle>>,
    capacity: usize,
    next_seq: u64,
    evicted_total: u64,
}

impl<S: DisplaySurface> MarkerStore<S> {
    /// Store with the default capacity of [`MAX_MARKERS`].
    pub fn new(surface: S) -> Self {
        Self::with_capacity(surface, MAX_MARKERS)
    }

    /// Store evicting beyond `capacity`. Only up to [`MAX_MARKERS`] slots
    /// are reserved up front; larger stores grow on demand.
    pub fn with_capacity(surface: S, capacity: usize) -> Self {
        Self {
            surface,
            entries: VecDeque::with_capacity(capacity.min(MAX_MARKERS) + 1),
            capacity,
            next_seq: 1,
            evicted_total: 0,
        }
    }

    /// Derive a marker from `msg`, attach and append it, then evict the
    /// single oldest marker if the store is over capacity.
    ///
    /// Values are not validated; any `f64` is rendered as received.
    pub fn on_message(&mut self, msg: &Message) -> Insertion {
        let id = MarkerId::new(self.next_seq);
        self.next_seq += 1;

        let marker = Marker::from_message(id, msg);
        let handle = self.surface.attach(&marker);
        self.entries.push_back(Entry { marker, handle });

        let evicted = if self.entries.len() > self.capacity {
            self.evict_oldest()
        } else {
            None
        };

        tracing::trace!(marker = %id, markers = self.entries.len(), "marker added");
        Insertion { added: id, evicted }
    }

    fn evict_oldest(&mut self) -> Option<Marker> {
        let Entry { marker, handle } = self.entries.pop_front()?;
        self.surface.detach(handle);
        self.evicted_total += 1;
        tracing::debug!(marker = %marker.id, "evicted oldest marker");
        Some(marker)
    }

    /// Detach every marker and clear the store. Returns how many were
    /// detached; calling it again is a no-op returning 0.
    pub fn teardown(&mut self) -> usize {
        let count = self.entries.len();
        for Entry { handle, .. } in self.entries.drain(..) {
            self.surface.detach(handle);
        }
        if count > 0 {
            tracing::debug!(detached = count, "marker store torn down");
        }
        count
    }

    /// Current markers, oldest first.
    pub fn markers(&self) -> impl ExactSizeIterator<Item = &Marker> + '_ {
        self.entries.iter().map(|e| &e.marker)
    }

    pub fn latest(&self) -> Option<&Marker> {
        self.entries.back().map(|e| &e.marker)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Markers evicted by the capacity bound since construction.
    pub fn evicted_total(&self) -> u64 {
        self.evicted_total
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }
}

impl<S: DisplaySurface> Drop for MarkerStore<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
