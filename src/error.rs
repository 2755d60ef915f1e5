// Copyright The FlowBus Authors
// SPDX-License-Identifier: Apache-2.0

/// Errors produced by bus endpoint operations.
///
/// Flow-control conditions (queue full, paused consumer, sends that resolve
/// to zero consumers) are deliberately *not* errors — they are observable
/// states of the protocol. Only misconfiguration fails fast.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Endpoint creation was attempted with an empty or blank address.
    #[error("bus address must be non-empty")]
    EmptyAddress,
    /// Write-queue capacity must admit at least one message.
    #[error("invalid write queue max size: {size} (must be >= 1)")]
    InvalidMaxQueueSize {
        /// The rejected capacity value.
        size: usize,
    },
}
