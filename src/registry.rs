// Copyright The FlowBus Authors
// SPDX-License-Identifier: Apache-2.0

//! The bus registry -- explicit address-to-consumer binding.
//!
//! [`Bus`] is the single object handed to producers and consumers at creation
//! time; there is no process-global lookup. It owns the address table and
//! mints endpoint handles:
//!
//! - [`Bus::sender`] binds a [`Producer`] to an address,
//! - [`Bus::consumer`] registers a [`Consumer`] and spawns its delivery task.
//!
//! Resolution is a snapshot: every send reads the entry list for its address
//! under a short read lock. Per-(producer, consumer) submission order is
//! preserved by each consumer's FIFO event channel.
//!
//! Thread-safe and cheaply cloneable. Must be used from within a tokio
//! runtime, since consumer registration spawns the delivery task.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

use crate::consumer::{Consumer, Event, spawn_delivery_task};
use crate::error::Error;
use crate::producer::Producer;
use crate::types::{Address, Delivery, DeliveryContextId, DEFAULT_MAX_QUEUE_SIZE};

/// An addressable publish/subscribe bus with producer-side flow control.
///
/// Cloning shares the underlying registry.
pub struct Bus<T: Send + Sync + 'static> {
    inner: Arc<BusInner<T>>,
}

impl<T: Send + Sync + 'static> Clone for Bus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> Bus<T> {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                consumers: RwLock::new(HashMap::new()),
                next_consumer_id: AtomicU64::new(1),
                next_context_id: AtomicU64::new(1),
            }),
        }
    }

    /// Binds a new producer endpoint to `address`.
    ///
    /// The endpoint starts with the default write-queue capacity
    /// ([`DEFAULT_MAX_QUEUE_SIZE`]); adjust it with
    /// [`Producer::set_write_queue_max_size`] before sending.
    pub fn sender(&self, address: impl AsRef<str>) -> Result<Producer<T>, Error> {
        let address = Address::parse(address.as_ref())?;
        Ok(Producer::new(
            address,
            Arc::clone(&self.inner),
            DEFAULT_MAX_QUEUE_SIZE,
        ))
    }

    /// Registers a new consumer endpoint on `address` and spawns its delivery
    /// task.
    ///
    /// The endpoint receives messages as soon as it is registered; arrivals
    /// before a handler is installed are buffered in order. Multiple
    /// consumers may register on one address (fan-out), each with its own
    /// delivery task and independent occupancy accounting.
    pub fn consumer(&self, address: impl AsRef<str>) -> Result<Consumer<T>, Error> {
        let address = Address::parse(address.as_ref())?;
        let id = self.inner.next_consumer_id.fetch_add(1, Ordering::Relaxed);
        let context = DeliveryContextId(self.inner.next_context_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();

        spawn_delivery_task(context, address.clone(), rx);
        {
            let mut consumers = self.inner.consumers.write();
            consumers
                .entry(address.clone())
                .or_default()
                .push(ConsumerEntry {
                    id,
                    tx: tx.clone(),
                });
        }
        debug!(address = %address, consumer = id, %context, "consumer registered");

        Ok(Consumer::new(address, id, tx, Arc::clone(&self.inner)))
    }
}

impl<T: Send + Sync + 'static> Default for Bus<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared registry state behind every `Bus`, `Producer` and `Consumer`.
pub(crate) struct BusInner<T: Send + Sync + 'static> {
    consumers: RwLock<HashMap<Address, Vec<ConsumerEntry<T>>>>,
    next_consumer_id: AtomicU64,
    next_context_id: AtomicU64,
}

impl<T: Send + Sync + 'static> BusInner<T> {
    /// Snapshot of the consumer entries currently registered on `address`.
    pub(crate) fn resolve(&self, address: &Address) -> Vec<ConsumerEntry<T>> {
        let consumers = self.consumers.read();
        consumers.get(address).cloned().unwrap_or_default()
    }

    /// Removes one consumer registration. Subsequent resolves no longer see
    /// the endpoint; in-flight deliveries toward it are discarded by the
    /// closing task.
    pub(crate) fn unregister(&self, address: &Address, id: u64) {
        let mut consumers = self.consumers.write();
        if let Some(entries) = consumers.get_mut(address) {
            entries.retain(|entry| entry.id != id);
            if entries.is_empty() {
                let _ = consumers.remove(address);
            }
            debug!(address = %address, consumer = id, "consumer unregistered");
        }
    }
}

/// One registered consumer: its id and the sender side of its delivery task's
/// event channel.
pub(crate) struct ConsumerEntry<T> {
    pub(crate) id: u64,
    tx: mpsc::UnboundedSender<Event<T>>,
}

impl<T> ConsumerEntry<T> {
    /// Enqueues a delivery toward this consumer's task. Fails only if the
    /// task has already shut down.
    pub(crate) fn deliver(&self, delivery: Delivery<T>) -> Result<(), ()> {
        self.tx.send(Event::Deliver(delivery)).map_err(|_| ())
    }
}

impl<T> Clone for ConsumerEntry<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            tx: self.tx.clone(),
        }
    }
}
