// Copyright 2026 Lookout Contributors
// SPDX-License-Identifier: Apache-2.0

//! Lookout event bus — typed events from every component.
//!
//! The bus is a `tokio::sync::broadcast` channel carrying [`LookoutEvent`]
//! values. Any consumer — CLI progress display, audit sink, log files —
//! can subscribe independently. When no subscribers exist, events are
//! silently dropped (zero overhead).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Every event the runtime emits. Serialized to JSON for sinks and logs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LookoutEvent {
    // ── Scheduling Events ─────────────────
    /// A scheduling cycle computed its slot map.
    CycleScheduled {
        total_slots: usize,
        targets: usize,
        uniform_fallback: bool,
    },
    /// An iteration began processing its slot.
    IterationStarted {
        slot: usize,
        pages: usize,
        runs_per_page: u32,
    },
    /// An iteration finished; its results are on the way to the sink.
    IterationComplete {
        slot: usize,
        pages: usize,
        elapsed_ms: u64,
    },

    // ── Capture Events ────────────────────
    /// A capture session opened its rendering context.
    SessionStarted {
        session_id: String,
        target: String,
        url: String,
        variant: String,
        run_index: u32,
    },
    /// Navigation hit its deadline; the session continues degraded.
    NavigationTimedOut { session_id: String, url: String },
    /// The hard ceiling was exceeded and teardown was forced.
    WatchdogFired {
        session_id: String,
        url: String,
        elapsed_ms: u64,
    },
    /// A capture session produced its run summary.
    SessionComplete {
        session_id: String,
        outcome: String,
        elapsed_ms: u64,
        total_events: usize,
        matched_events: usize,
    },
    /// All runs for one page finished and were folded together.
    PageComplete {
        target: String,
        page: String,
        variant: String,
        runs: u32,
        bidding: bool,
        ad_serving: bool,
    },

    // ── System Events ─────────────────────
    /// A non-fatal condition worth surfacing.
    Warning { message: String },
}

/// The central event bus for the runtime.
///
/// All components emit events through this bus. Consumers subscribe
/// to receive a stream of all events.
pub struct EventBus {
    sender: broadcast::Sender<LookoutEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers. Silently ignores if no subscribers.
    pub fn emit(&self, event: LookoutEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<LookoutEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
