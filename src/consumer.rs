// Copyright The FlowBus Authors
// SPDX-License-Identifier: Apache-2.0

//! Consumer endpoint -- handler registration, pause/resume, delivery task.
//!
//! # One task per subscription
//!
//! Each consumer endpoint owns a dedicated tokio task spawned at subscription
//! time. That task is the *only* code that ever invokes the handler, which is
//! the execution-context-affinity guarantee: handler state needs no
//! synchronization of its own, and buffered flushes after `resume()` run on
//! exactly the same context as immediate deliveries. The context is
//! observable from inside a handler via [`current_delivery_context`].
//!
//! # Ordering through one channel
//!
//! Deliveries and control operations (`handler`, `pause`, `resume`,
//! `unregister`) all travel through the endpoint's single FIFO event channel,
//! which yields the required interleaving semantics for free:
//!
//! - a message enqueued before `pause()` is dispatched; one enqueued after is
//!   buffered (the in-flight-at-pause rule);
//! - messages buffered while paused sit *before* the `Resume` event's flush
//!   point, and anything sent after `resume()` sits after it, so the flush
//!   delivers the backlog in arrival order before any newer message;
//! - double pause / double resume degenerate to no-ops on the task.
//!
//! The `paused` flag and the pending buffer live on the task itself --
//! single-writer by construction, no locking.
//!
//! # Pending buffer bound
//!
//! The pending buffer has no second hard limit of its own. The producer-side
//! write-queue accounting is the bound: a producer that keeps sending into a
//! paused consumer observes `write_queue_full()` once the path occupancy
//! reaches its capacity and is expected to stop. See the crate docs.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::registry::BusInner;
use crate::types::{Address, Delivery, DeliveryContextId};

tokio::task_local! {
    static DELIVERY_CONTEXT: DeliveryContextId;
}

/// Returns the identity of the delivery context the caller runs on, or `None`
/// outside of a consumer delivery task.
///
/// For a given subscription this id is identical for every handler
/// invocation, across pause/resume cycles, for the lifetime of the
/// subscription.
#[must_use]
pub fn current_delivery_context() -> Option<DeliveryContextId> {
    DELIVERY_CONTEXT.try_with(|id| *id).ok()
}

pub(crate) type Handler<T> = Box<dyn FnMut(Arc<T>) + Send>;

/// Events multiplexed onto a consumer endpoint's delivery task.
pub(crate) enum Event<T> {
    Deliver(Delivery<T>),
    SetHandler(Handler<T>),
    Pause,
    Resume,
    Close,
}

/// A registered handler endpoint on one bus address.
///
/// Created by [`Bus::consumer`](crate::Bus::consumer). All methods are
/// non-blocking: they enqueue onto the endpoint's delivery task and return.
/// The endpoint stays registered until [`unregister`](Self::unregister) is
/// called, even if this handle is dropped.
pub struct Consumer<T: Send + Sync + 'static> {
    address: Address,
    id: u64,
    tx: mpsc::UnboundedSender<Event<T>>,
    registry: Arc<BusInner<T>>,
}

impl<T: Send + Sync + 'static> Consumer<T> {
    pub(crate) fn new(
        address: Address,
        id: u64,
        tx: mpsc::UnboundedSender<Event<T>>,
        registry: Arc<BusInner<T>>,
    ) -> Self {
        Self {
            address,
            id,
            tx,
            registry,
        }
    }

    /// The address this endpoint is registered on.
    #[must_use]
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Installs the per-message delivery callback, replacing any prior one.
    ///
    /// Messages that arrived before a handler was installed were buffered and
    /// are flushed to the new handler in arrival order (unless paused).
    pub fn handler(&self, handler: impl FnMut(Arc<T>) + Send + 'static) {
        let _ = self.tx.send(Event::SetHandler(Box::new(handler)));
    }

    /// Stops handler invocation. Idempotent.
    ///
    /// Messages arriving after the pause takes effect accumulate in the
    /// endpoint's pending buffer in arrival order. A message already in
    /// flight to the handler is still delivered.
    pub fn pause(&self) {
        let _ = self.tx.send(Event::Pause);
    }

    /// Resumes handler invocation. Idempotent.
    ///
    /// The pending buffer is flushed in arrival order on the delivery task
    /// before any message sent after this call is dispatched.
    pub fn resume(&self) {
        let _ = self.tx.send(Event::Resume);
    }

    /// Removes the endpoint from the registry and stops its delivery task.
    ///
    /// Buffered-but-undelivered messages are discarded silently. Producers
    /// are not notified: occupancy they attributed to this endpoint is never
    /// decremented, so their queues may remain full with an unfired drain
    /// handler.
    pub fn unregister(self) {
        self.registry.unregister(&self.address, self.id);
        let _ = self.tx.send(Event::Close);
    }
}

/// Spawns the delivery task for one subscription.
///
/// The task runs inside a `DELIVERY_CONTEXT` scope carrying the context id
/// assigned at subscription time, and processes events until the endpoint is
/// closed.
pub(crate) fn spawn_delivery_task<T: Send + Sync + 'static>(
    context: DeliveryContextId,
    address: Address,
    rx: mpsc::UnboundedReceiver<Event<T>>,
) {
    let _ = tokio::spawn(DELIVERY_CONTEXT.scope(context, delivery_loop(address, rx)));
}

async fn delivery_loop<T: Send + Sync + 'static>(
    address: Address,
    mut rx: mpsc::UnboundedReceiver<Event<T>>,
) {
    let mut handler: Option<Handler<T>> = None;
    let mut paused = false;
    let mut pending: VecDeque<Delivery<T>> = VecDeque::new();

    while let Some(event) = rx.recv().await {
        match event {
            Event::Deliver(delivery) => match handler.as_mut() {
                Some(handler) if !paused => dispatch(handler, delivery, &address),
                _ => pending.push_back(delivery),
            },
            Event::SetHandler(new_handler) => {
                let installed = handler.insert(new_handler);
                if !paused {
                    flush(installed, &mut pending, &address);
                }
            }
            Event::Pause => {
                if !paused {
                    paused = true;
                    trace!(address = %address, "consumer paused");
                }
            }
            Event::Resume => {
                if paused {
                    paused = false;
                    trace!(address = %address, buffered = pending.len(), "consumer resumed");
                    if let Some(handler) = handler.as_mut() {
                        flush(handler, &mut pending, &address);
                    }
                }
            }
            Event::Close => break,
        }
    }

    if !pending.is_empty() {
        debug!(
            address = %address,
            discarded = pending.len(),
            "consumer closed with undelivered messages"
        );
    }
}

/// Flushes the pending buffer in arrival order. Runs to completion before the
/// task picks up the next event, so no newer arrival can interleave.
fn flush<T>(handler: &mut Handler<T>, pending: &mut VecDeque<Delivery<T>>, address: &Address) {
    while let Some(delivery) = pending.pop_front() {
        dispatch(handler, delivery, address);
    }
}

/// Invokes the handler with one message. The path occupancy is decremented
/// *before* the invocation -- the decrement marks dispatch, not completion,
/// and must happen even if the handler panics.
fn dispatch<T>(handler: &mut Handler<T>, delivery: Delivery<T>, address: &Address) {
    delivery.path.dispatched();
    if catch_unwind(AssertUnwindSafe(|| handler(delivery.payload))).is_err() {
        error!(address = %address, "message handler panicked; message skipped");
    }
}
