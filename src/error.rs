use crate::transport::OpKind;
use thiserror::Error;
use uuid::Uuid;

/// Failures reported by a transport link. None of these are retried
/// automatically; the owning session falls back to its disconnected state.
#[derive(Debug, Clone, Error)]
pub enum TransportFailure {
    #[error("service discovery failed: {0}")]
    Discovery(String),

    #[error("{kind:?} on {characteristic} failed: {reason}")]
    Operation {
        kind: OpKind,
        characteristic: Uuid,
        reason: String,
    },
}

/// Registration errors surfaced synchronously by the sliding-window feeder.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeederError {
    #[error("duplicate subscription `{0}`")]
    DuplicateSubscription(String),

    #[error("subscription `{name}` violates window >= slide >= 1 (window {window}, slide {slide})")]
    InvalidSubscription {
        name: String,
        window: usize,
        slide: usize,
    },
}

/// A notification payload whose size does not match the device profile.
/// The offending payload is discarded; the session keeps streaming.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("unexpected payload size: got {actual} bytes, expected {expected}")]
pub struct PayloadSizeError {
    pub expected: usize,
    pub actual: usize,
}
