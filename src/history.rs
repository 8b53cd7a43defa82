use std::collections::VecDeque;

use crate::analysis::Snapshot;

/// Bounded FIFO of snapshots with a live-append mode and a bulk-hydration
/// mode for replaying a persisted sample log.
///
/// Suppression is keyed by update sequence rather than a plain boolean:
/// hydration arms the buffer with the sequence number of the very next
/// pipeline pass, and only that exact pass is skipped. A token left behind
/// by a pass that never happened is discarded as soon as it is overtaken,
/// so a stray late update cannot suppress an unrelated live tick.
pub struct HistoryBuffer {
    snapshots: VecDeque<Snapshot>,
    capacity: usize,
    suppress_seq: Option<u64>,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        HistoryBuffer {
            snapshots: VecDeque::with_capacity(capacity),
            capacity,
            suppress_seq: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.snapshots.iter()
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.back()
    }

    /// Append a snapshot from the live pipeline pass identified by `seq`.
    /// Returns whether the snapshot was stored; the single pass armed via
    /// `suppress_next` updates display state only and is not stored.
    pub fn push_live(&mut self, snapshot: Snapshot, seq: u64) -> bool {
        match self.suppress_seq {
            Some(armed) if armed == seq => {
                self.suppress_seq = None;
                return false;
            }
            Some(armed) if armed < seq => {
                // Stale token from a pass that never ran; drop it.
                self.suppress_seq = None;
            }
            _ => {}
        }

        self.snapshots.push_back(snapshot);
        while self.snapshots.len() > self.capacity {
            self.snapshots.pop_front();
        }
        true
    }

    /// Replace the contents wholesale with the most recent `capacity`
    /// snapshots of a persisted log.
    pub fn hydrate(&mut self, snapshots: Vec<Snapshot>) {
        let skip = snapshots.len().saturating_sub(self.capacity);
        self.snapshots = snapshots.into_iter().skip(skip).collect();
    }

    /// Arm suppression for the pipeline pass identified by `seq`.
    pub fn suppress_next(&mut self, seq: u64) {
        self.suppress_seq = Some(seq);
    }
}

/// Monotonically non-decreasing running maximum, independent of history
/// retention: eviction and hydration never lower it. Raised with a strict
/// comparison, matching the contact-threshold convention.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PressureWatermark {
    max_kpa: f64,
}

impl PressureWatermark {
    pub fn new() -> Self {
        PressureWatermark::default()
    }

    pub fn observe(&mut self, kpa: f64) {
        if kpa > self.max_kpa {
            self.max_kpa = kpa;
        }
    }

    pub fn kpa(&self) -> f64 {
        self.max_kpa
    }
}
