// Copyright The FlowBus Authors
// SPDX-License-Identifier: Apache-2.0

//! Core value types shared across the crate.
//!
//! This module defines the data that flows through the public API. No
//! behavior lives here -- only data definitions and conversions.
//!
//! # Address
//!
//! An [`Address`] is the logical destination name that binds producers to
//! consumers. It is `Arc<str>`-backed so that registry keys, producer handles
//! and log fields share one allocation. Validation happens once, at parse
//! time: an address must contain at least one non-whitespace character.
//!
//! # Delivery
//!
//! [`Delivery`] is the internal envelope handed to a consumer's delivery
//! task. The payload is `Arc<T>` so fan-out to several consumers never clones
//! user data; the attached [`DeliveryPath`](crate::flow::DeliveryPath) is the
//! occupancy accounting hook decremented the instant the envelope is
//! dispatched to the handler.

use std::sync::Arc;

use crate::error::Error;
use crate::flow::DeliveryPath;

/// Default write-queue capacity for a new producer endpoint, in messages.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;

/// A logical destination name binding producers to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(Arc<str>);

impl Address {
    /// Parses and validates an address.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        if raw.trim().is_empty() {
            return Err(Error::EmptyAddress);
        }
        Ok(Self(Arc::from(raw)))
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::borrow::Borrow<str> for Address {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&'static str> for Address {
    fn from(value: &'static str) -> Self {
        Self::parse(value).expect("invalid static address literal")
    }
}

/// Identity of the execution context a consumer's handler runs on.
///
/// Every invocation of one subscription's handler -- immediate deliveries and
/// buffered flushes after `resume()` alike -- observes the same id. See
/// [`current_delivery_context`](crate::consumer::current_delivery_context).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryContextId(pub(crate) u64);

impl std::fmt::Display for DeliveryContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// A pending message envelope en route to one consumer endpoint.
pub(crate) struct Delivery<T> {
    /// Shared payload reference handed to the handler.
    pub(crate) payload: Arc<T>,
    /// Occupancy accounting for the producer->consumer path this message
    /// travels on. Decremented at dispatch, not at handler return.
    pub(crate) path: Arc<DeliveryPath>,
}
