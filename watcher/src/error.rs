// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::types::Byte32;

/// Errors surfaced by the watcher pipeline.
///
/// Variants fall into four classes: transient RPC conditions that only abort
/// the current cycle, untrusted on-chain input that is dropped, protocol
/// mismatches between contract and codec, and storage failures. Only the last
/// two are fatal to the owning task (see [`WatcherError::is_fatal`]).
///
/// A message payload is chosen by whoever called the governance contract, so
/// [`WatcherError::MalformedPayload`] counts as untrusted input. A malformed
/// event envelope is a protocol mismatch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatcherError {
    // Transient node/transport failure, retried on the next tick
    #[error("RPC error: {0}")]
    Rpc(String),
    // Node answered with something we could not parse
    #[error("invalid RPC response: {0}")]
    InvalidResponse(String),
    // Registry record or checkpoint does not exist
    #[error("not found: {0}")]
    NotFound(String),

    #[error("untrusted emitter: expected contract {expected}, got {actual}")]
    UntrustedEmitter { expected: Byte32, actual: Byte32 },
    #[error("untrusted sender: expected {expected}, have {actual}")]
    UntrustedSender { expected: Byte32, actual: Byte32 },
    #[error("block {0} is not in the main chain")]
    OrphanBlock(String),
    #[error("invalid contract address: {0}")]
    InvalidAddress(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("malformed event: {0}")]
    MalformedEvent(String),
    #[error("unsupported consistency level {0}")]
    UnsupportedConsistencyLevel(u8),

    #[error("registry transaction failed: {0}")]
    TransactionFailed(String),
    #[error("storage error: {0}")]
    Storage(String),

    #[error("channel closed: {0}")]
    ChannelClosed(String),
    #[error("invalid config: {0}")]
    Config(String),
}

impl WatcherError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            WatcherError::Rpc(_) => "rpc",
            WatcherError::InvalidResponse(_) => "invalid_response",
            WatcherError::NotFound(_) => "not_found",
            WatcherError::UntrustedEmitter { .. } => "untrusted_emitter",
            WatcherError::UntrustedSender { .. } => "untrusted_sender",
            WatcherError::OrphanBlock(_) => "orphan_block",
            WatcherError::InvalidAddress(_) => "invalid_address",
            WatcherError::MalformedEvent(_) => "malformed_event",
            WatcherError::MalformedPayload(_) => "malformed_payload",
            WatcherError::UnsupportedConsistencyLevel(_) => "unsupported_consistency_level",
            WatcherError::TransactionFailed(_) => "transaction_failed",
            WatcherError::Storage(_) => "storage",
            WatcherError::ChannelClosed(_) => "channel_closed",
            WatcherError::Config(_) => "config",
        }
    }

    /// Returns `true` if the owning task must stop and report upward.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WatcherError::MalformedEvent(_)
                | WatcherError::UnsupportedConsistencyLevel(_)
                | WatcherError::TransactionFailed(_)
                | WatcherError::Storage(_)
                | WatcherError::ChannelClosed(_)
                | WatcherError::Config(_)
        )
    }

    /// Returns `true` for input that is dropped with a log entry.
    pub fn is_untrusted_input(&self) -> bool {
        matches!(
            self,
            WatcherError::UntrustedEmitter { .. }
                | WatcherError::UntrustedSender { .. }
                | WatcherError::OrphanBlock(_)
                | WatcherError::InvalidAddress(_)
                | WatcherError::MalformedPayload(_)
        )
    }
}

impl From<rocksdb::Error> for WatcherError {
    fn from(e: rocksdb::Error) -> Self {
        WatcherError::Storage(e.to_string())
    }
}

pub type WatcherResult<T> = Result<T, WatcherError>;
