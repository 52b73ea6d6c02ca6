//! The bounded display window: what the presentation layer reads.

use crate::event::LogEvent;

/// default capacity of the display window
pub const MAX_EVENTS: usize = 1000;

/// capacity-bounded, insertion-ordered sequence of events
///
/// Mutated only by the batch flusher, at flush-tick boundaries; everyone
/// else reads. When an append would exceed capacity the oldest entries
/// are evicted, never the newest, and order is never changed.
#[derive(Debug)]
pub struct DisplayWindow {
    events: Vec<LogEvent>,
    capacity: usize,
    /// bumped whenever existing entries are removed, so cached indices
    /// into the window can detect that they went stale
    generation: u64,
}

impl DisplayWindow {
    pub fn new() -> Self {
        Self::with_capacity(MAX_EVENTS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::new(),
            capacity,
            generation: 0,
        }
    }

    /// Merge one flushed batch, enforcing the capacity bound.
    ///
    /// Three cases, picked to avoid large copies when growth still fits:
    /// 1. window + batch fits: plain append
    /// 2. the batch alone fills the window: keep exactly its tail
    /// 3. otherwise: evict just enough old entries, then append the batch
    ///
    /// Returns how many existing entries were evicted.
    pub fn merge_batch(&mut self, mut batch: Vec<LogEvent>) -> usize {
        if batch.is_empty() {
            return 0;
        }

        let evicted;
        if self.events.len() + batch.len() <= self.capacity {
            evicted = 0;
            self.events.append(&mut batch);
        } else if batch.len() >= self.capacity {
            evicted = self.events.len();
            let skip = batch.len() - self.capacity;
            batch.drain(..skip);
            self.events = batch;
        } else {
            let keep = self.capacity - batch.len();
            evicted = self.events.len() - keep;
            self.events.drain(..evicted);
            self.events.append(&mut batch);
        }

        if self.events.len() > self.capacity {
            // the bounded-memory guarantee is broken; reset rather than grow
            log::error!(
                "display window exceeded capacity after merge ({} > {}), resetting",
                self.events.len(),
                self.capacity
            );
            self.events.clear();
            self.generation += 1;
        } else if evicted > 0 {
            self.generation += 1;
        }

        evicted
    }

    /// irreversible: forgets all retained history
    pub fn clear(&mut self) {
        self.events.clear();
        self.generation += 1;
    }

    /// Changes whenever entries are evicted or cleared. Pure appends keep
    /// the generation, so indices computed against an earlier, shorter
    /// window are still valid within the same generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn events(&self) -> &[LogEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for DisplayWindow {
    fn default() -> Self {
        Self::new()
    }
}
