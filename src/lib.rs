// Copyright The FlowBus Authors
// SPDX-License-Identifier: Apache-2.0

//! Flow-controlled addressable publish/subscribe bus.
//!
//! This crate implements the flow-control protocol between message producers
//! and consumers on an addressable bus: how a producer's outbound queue is
//! bounded, how backpressure is signaled and released, how a paused consumer
//! buffers delivery, and the ordering guarantees that hold across those state
//! transitions. Routing policy, message encoding and transport are out of
//! scope -- the [`Bus`] registry here is the minimal resolution collaborator
//! the protocol needs.
//!
//! # Model
//!
//! - A [`Producer`] sends to an address without blocking. It tracks occupancy
//!   (messages sent but not yet dispatched to a handler) per destination
//!   consumer; when occupancy reaches the configured `max_queue_size` the
//!   producer reports [`write_queue_full`](Producer::write_queue_full), and a
//!   single-slot [`drain_handler`](Producer::drain_handler) fires exactly
//!   once when occupancy later drops strictly below half of capacity
//!   (hysteresis, so full/drain cannot oscillate at the boundary).
//! - A [`Consumer`] owns a dedicated delivery task -- the same execution
//!   context for every handler invocation over the subscription's lifetime.
//!   [`pause`](Consumer::pause) buffers arrivals in order;
//!   [`resume`](Consumer::resume) flushes the backlog in arrival order before
//!   anything newer.
//! - For a single producer and a single consumer, delivery order equals send
//!   order across pause/resume cycles. No order is defined between distinct
//!   producers.
//!
//! # Backpressure without consumers
//!
//! A producer whose address has no registered consumer still fills up: the
//! full signal stays accurate and the drain handler never fires, because
//! nothing drains. Payloads of such sends are dropped immediately (the
//! logical counter is what grows), so memory stays bounded -- callers are
//! responsible for ceasing sends once `write_queue_full()` is observed.
//!
//! # Example
//!
//! ```no_run
//! use flowbus::Bus;
//!
//! # async fn example() -> Result<(), flowbus::Error> {
//! let bus: Bus<String> = Bus::new();
//!
//! let consumer = bus.consumer("orders")?;
//! consumer.handler(|msg| println!("got {msg}"));
//!
//! let producer = bus.sender("orders")?;
//! producer.set_write_queue_max_size(100)?;
//! producer.send("hello".to_owned());
//! if producer.write_queue_full() {
//!     producer.drain_handler(|| println!("writable again"));
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

mod consumer;
mod error;
mod flow;
mod producer;
mod registry;
mod types;


pub use consumer::{Consumer, current_delivery_context};
pub use error::Error;
pub use producer::Producer;
pub use registry::Bus;
pub use types::{Address, DEFAULT_MAX_QUEUE_SIZE, DeliveryContextId};
