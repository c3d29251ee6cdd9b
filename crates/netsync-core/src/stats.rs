//! Diagnostic counters for the sync pipeline.
//!
//! Every "dropped with a diagnostic" path in the engine logs a warning and
//! bumps one of these counters, so tests and operators can see what was
//! discarded without scraping logs. Counters are lock-free atomics shared
//! between the pipeline, drain, and transport tasks.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Shared diagnostic counters.
#[derive(Debug, Default)]
pub struct SyncStats {
    frames_received: AtomicU64,
    malformed_frames: AtomicU64,
    unknown_updates: AtomicU64,
    stale_states: AtomicU64,
    ignored_items: AtomicU64,
    stale_envelopes: AtomicU64,
    handler_failures: AtomicU64,
    consensus_delivered: AtomicU64,
    fallback_ticks: AtomicU64,
}

/// Point-in-time copy of [`SyncStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Frames accepted from the live transport.
    pub frames_received: u64,
    /// Frames dropped because they could not be decoded.
    pub malformed_frames: u64,
    /// `network:update` envelopes dropped for an unknown type tag.
    pub unknown_updates: u64,
    /// Full states discarded for a version regression.
    pub stale_states: u64,
    /// Delta items or snapshot channels ignored for integrity reasons.
    pub ignored_items: u64,
    /// Envelopes dropped because they predate the latest connect/disconnect.
    pub stale_envelopes: u64,
    /// Observer invocations that returned an error or panicked.
    pub handler_failures: u64,
    /// Consensus events handed to observers.
    pub consensus_delivered: u64,
    /// Synthetic updates produced by the fallback feed.
    pub fallback_ticks: u64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl SyncStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn frame_received(&self) {
        bump(&self.frames_received, 1);
    }

    pub(crate) fn malformed_frame(&self) {
        bump(&self.malformed_frames, 1);
    }

    pub(crate) fn unknown_update(&self) {
        bump(&self.unknown_updates, 1);
    }

    pub(crate) fn stale_state(&self) {
        bump(&self.stale_states, 1);
    }

    pub(crate) fn ignored_items(&self, count: usize) {
        bump(&self.ignored_items, u64::try_from(count).unwrap_or(u64::MAX));
    }

    pub(crate) fn stale_envelope(&self) {
        bump(&self.stale_envelopes, 1);
    }

    pub(crate) fn handler_failures(&self, count: usize) {
        bump(&self.handler_failures, u64::try_from(count).unwrap_or(u64::MAX));
    }

    pub(crate) fn consensus_delivered(&self) {
        bump(&self.consensus_delivered, 1);
    }

    pub(crate) fn fallback_tick(&self) {
        bump(&self.fallback_ticks, 1);
    }

    /// Copy the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            unknown_updates: self.unknown_updates.load(Ordering::Relaxed),
            stale_states: self.stale_states.load(Ordering::Relaxed),
            ignored_items: self.ignored_items.load(Ordering::Relaxed),
            stale_envelopes: self.stale_envelopes.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            consensus_delivered: self.consensus_delivered.load(Ordering::Relaxed),
            fallback_ticks: self.fallback_ticks.load(Ordering::Relaxed),
        }
    }
}
