// Copyright The FlowBus Authors
// SPDX-License-Identifier: Apache-2.0

//! Flow controller -- occupancy accounting, hysteresis, drain notification.
//!
//! This is the coordination core of the crate. It binds a producer's write
//! rate to its consumers' drain rate without ever blocking either side.
//!
//! # ProducerFlow and DeliveryPath
//!
//! Each producer endpoint owns one [`ProducerFlow`] (capacity, full-path
//! count, drain-handler slot) and one [`DeliveryPath`] per destination
//! consumer. A path is a bare occupancy counter: incremented when a send
//! enqueues toward that consumer, decremented the instant the consumer task
//! dispatches the message to the handler. The producer reports "write queue
//! full" while *any* of its paths is full, so a single slow or paused
//! consumer is enough to assert backpressure.
//!
//! # Glitch-free crossing detection
//!
//! At most one producer-side increment path and one consumer-side decrement
//! path mutate a given counter concurrently, so each direction of a threshold
//! crossing is detected on exactly one side. The `full` flag transitions via
//! `AtomicBool::swap`, which guarantees a crossing is acted on exactly once
//! even if the counter oscillates around the boundary between the check and
//! the flag update.
//!
//! # Hysteresis
//!
//! A full path does not un-full at `max_queue_size - 1`. It stays full until
//! occupancy drops strictly below `max_queue_size / DRAIN_DIVISOR` (minimum
//! one). The gap between the full threshold and the drain threshold prevents
//! rapid full/drain oscillation when a producer hovers near capacity.
//!
//! # Drain handler
//!
//! A single-slot, replace-on-register, taken-on-fire callback. Registering a
//! new handler silently drops an unfired predecessor; registering while the
//! queue is already below threshold leaves the handler armed for the *next*
//! full-to-drained transition -- it never fires immediately. The callback runs
//! on the consumer delivery task that performed the draining decrement.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace};

/// Divisor applied to `max_queue_size` to derive the drain threshold.
///
/// A full queue is considered drained once occupancy drops strictly below
/// `max_queue_size / DRAIN_DIVISOR` (never below a threshold of one).
pub(crate) const DRAIN_DIVISOR: usize = 2;

pub(crate) type DrainHandler = Box<dyn FnOnce() + Send>;

/// Producer-level flow-control state, shared by all of the producer's paths.
pub(crate) struct ProducerFlow {
    max_queue_size: AtomicUsize,
    /// Number of paths currently at or above capacity. The producer reports
    /// `write_queue_full()` while this is non-zero.
    full_paths: AtomicUsize,
    drain: Mutex<Option<DrainHandler>>,
}

impl ProducerFlow {
    pub(crate) fn new(max_queue_size: usize) -> Arc<Self> {
        Arc::new(Self {
            max_queue_size: AtomicUsize::new(max_queue_size),
            full_paths: AtomicUsize::new(0),
            drain: Mutex::new(None),
        })
    }

    pub(crate) fn max_queue_size(&self) -> usize {
        self.max_queue_size.load(Ordering::Acquire)
    }

    /// Updates the capacity. Existing fullness state is not re-evaluated;
    /// the new value takes effect on the next occupancy change.
    pub(crate) fn set_max_queue_size(&self, size: usize) {
        self.max_queue_size.store(size, Ordering::Release);
    }

    /// Occupancy level below which a full path is considered drained.
    pub(crate) fn drain_threshold(&self) -> usize {
        (self.max_queue_size() / DRAIN_DIVISOR).max(1)
    }

    pub(crate) fn is_full(&self) -> bool {
        self.full_paths.load(Ordering::Acquire) > 0
    }

    /// Arms the drain slot, replacing any unfired handler.
    pub(crate) fn set_drain_handler(&self, handler: DrainHandler) {
        let previous = self.drain.lock().replace(handler);
        if previous.is_some() {
            trace!("unfired drain handler replaced");
        }
    }

    fn on_path_full(&self) {
        let was = self.full_paths.fetch_add(1, Ordering::AcqRel);
        if was == 0 {
            debug!("write queue full");
        }
    }

    fn on_path_drained(&self) {
        if self.full_paths.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Last full path drained: the producer is writable again.
            let handler = self.drain.lock().take();
            debug!(notified = handler.is_some(), "write queue drained");
            if let Some(handler) = handler {
                handler();
            }
        }
    }
}

/// Occupancy counter for one producer->consumer path.
///
/// Also used for a producer's *unrouted* path: sends that resolve to zero
/// consumers increment it and nothing ever decrements it, so the producer
/// correctly reports full forever and never sees a drain notification.
pub(crate) struct DeliveryPath {
    flow: Arc<ProducerFlow>,
    occupancy: AtomicUsize,
    full: AtomicBool,
}

impl DeliveryPath {
    pub(crate) fn new(flow: Arc<ProducerFlow>) -> Arc<Self> {
        Arc::new(Self {
            flow,
            occupancy: AtomicUsize::new(0),
            full: AtomicBool::new(false),
        })
    }

    /// Accounts for one message entering the path. Called on the send path
    /// before the delivery event is enqueued.
    pub(crate) fn enqueue(&self) {
        let occupancy = self.occupancy.fetch_add(1, Ordering::AcqRel) + 1;
        if occupancy >= self.flow.max_queue_size() && !self.full.swap(true, Ordering::AcqRel) {
            self.flow.on_path_full();
        }
    }

    /// Accounts for one message leaving the path. Called by the consumer
    /// delivery task the instant the handler invocation is dispatched,
    /// whether or not the handler completes normally.
    pub(crate) fn dispatched(&self) {
        let occupancy = self.occupancy.fetch_sub(1, Ordering::AcqRel) - 1;
        if occupancy < self.flow.drain_threshold()
            && self.full.load(Ordering::Acquire)
            && self.full.swap(false, Ordering::AcqRel)
        {
            self.flow.on_path_drained();
        }
    }

    #[cfg(test)]
    pub(crate) fn occupancy(&self) -> usize {
        self.occupancy.load(Ordering::Acquire)
    }
}
