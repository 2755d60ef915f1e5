// Copyright The FlowBus Authors
// SPDX-License-Identifier: Apache-2.0

//! Producer endpoint -- non-blocking sends with write-queue backpressure.
//!
//! # Per-destination paths
//!
//! The producer resolves its address on every send and tracks one
//! [`DeliveryPath`] per resolved consumer (fan-out is independent
//! per-consumer occupancy). A dedicated *unrouted* path accounts for sends
//! that resolve to zero consumers: the logical counter grows, the producer
//! reports full once it reaches capacity, and nothing ever drains it. The
//! payload of an unrouted send is dropped immediately -- callers observing
//! `write_queue_full()` are expected to stop sending, and the counter-only
//! policy keeps memory bounded no matter how long they don't.
//!
//! # What the producer cannot see
//!
//! A paused consumer and a slow consumer are indistinguishable here: both
//! manifest as occupancy that stops decrementing. Likewise a consumer that
//! unregisters with messages in flight simply stops producing decrements.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::Error;
use crate::flow::{DeliveryPath, ProducerFlow};
use crate::registry::BusInner;
use crate::types::{Address, Delivery};

/// A sender endpoint bound to one bus address.
///
/// Created by [`Bus::sender`](crate::Bus::sender). No operation on this type
/// blocks; delivery happens asynchronously on each destination consumer's
/// delivery task.
pub struct Producer<T: Send + Sync + 'static> {
    address: Address,
    registry: Arc<BusInner<T>>,
    flow: Arc<ProducerFlow>,
    /// Occupancy per destination consumer, keyed by consumer id. Entries are
    /// created on first send toward that consumer and kept for the lifetime
    /// of the producer (a stuck path after unregistration is deliberate).
    paths: Mutex<HashMap<u64, Arc<DeliveryPath>>>,
    unrouted: Arc<DeliveryPath>,
}

impl<T: Send + Sync + 'static> Producer<T> {
    pub(crate) fn new(address: Address, registry: Arc<BusInner<T>>, max_queue_size: usize) -> Self {
        let flow = ProducerFlow::new(max_queue_size);
        let unrouted = DeliveryPath::new(Arc::clone(&flow));
        Self {
            address,
            registry,
            flow,
            paths: Mutex::new(HashMap::new()),
            unrouted,
        }
    }

    /// The address this endpoint sends to.
    #[must_use]
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Enqueues a message toward the currently registered consumer(s).
    ///
    /// Never blocks. Occupancy on every destination path is incremented
    /// before this method returns; actual handler invocation happens later on
    /// each consumer's delivery task. With zero registered consumers the
    /// payload is dropped but the unrouted occupancy still grows (see module
    /// docs).
    pub fn send(&self, msg: impl Into<Arc<T>>) {
        let entries = self.registry.resolve(&self.address);
        if entries.is_empty() {
            self.unrouted.enqueue();
            trace!(address = %self.address, "send with no registered consumer; payload dropped");
            return;
        }

        let payload: Arc<T> = msg.into();
        let mut paths = self.paths.lock();
        for entry in &entries {
            let path = Arc::clone(
                paths
                    .entry(entry.id)
                    .or_insert_with(|| DeliveryPath::new(Arc::clone(&self.flow))),
            );
            path.enqueue();
            let delivery = Delivery {
                payload: Arc::clone(&payload),
                path,
            };
            if entry.deliver(delivery).is_err() {
                // Consumer unregistered between resolve and enqueue. The
                // increment stands: unregistration discards without notice.
                trace!(
                    address = %self.address,
                    consumer = entry.id,
                    "consumer gone before delivery; occupancy retained"
                );
            }
        }
    }

    /// Sets the write-queue capacity, in messages.
    ///
    /// Fails fast on a zero capacity. The new value does not retroactively
    /// re-evaluate the current full state; it takes effect on the next
    /// occupancy change.
    pub fn set_write_queue_max_size(&self, size: usize) -> Result<(), Error> {
        if size == 0 {
            return Err(Error::InvalidMaxQueueSize { size });
        }
        self.flow.set_max_queue_size(size);
        Ok(())
    }

    /// Snapshot of the queue-full signal.
    ///
    /// True while any destination path (including the unrouted path) is at or
    /// above capacity and has not yet drained below the drain threshold.
    /// Eventually consistent: consumers decrement occupancy concurrently.
    #[must_use]
    pub fn write_queue_full(&self) -> bool {
        self.flow.is_full()
    }

    /// Arms `handler` to be invoked exactly once, the next time the queue
    /// transitions from full to drained (occupancy strictly below the drain
    /// threshold).
    ///
    /// Replaces any unfired previous handler. Never fires immediately, even
    /// if the queue is currently below threshold -- poll
    /// [`write_queue_full`](Self::write_queue_full) for current state.
    pub fn drain_handler(&self, handler: impl FnOnce() + Send + 'static) {
        self.flow.set_drain_handler(Box::new(handler));
    }
}
