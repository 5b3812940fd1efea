//! Error types for the admission review pipeline.
//!
//! Request-side failures are embedded in the outgoing review; delivery
//! failures only ever reach the diagnostic sink.

use std::fmt;
use std::io;
use thiserror::Error;

/// Failure while validating or decoding an inbound review.
#[derive(Error, Debug)]
pub enum ReviewError {
    /// The request carried no body at all
    #[error("request body is nil")]
    MissingBody,

    /// The body could not be read to completion
    #[error("failed to read request body: {0}")]
    ReadBody(#[source] io::Error),

    /// Content-Type header missing or not exactly `application/json`
    #[error("expect application/json, got {}", .found.as_deref().unwrap_or("no content type"))]
    ContentType { found: Option<String> },

    /// Body is not a well-formed AdmissionReview
    #[error("failed to decode admission review: {0}")]
    Decode(#[from] serde_json::Error),

    /// Review decoded but has no request to answer
    #[error("admission review contains no request")]
    MissingRequest,
}

/// Coarse classification of a [`ReviewError`], used as a log field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReviewErrorKind {
    Transport,
    ContentType,
    Decode,
}

impl fmt::Display for ReviewErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewErrorKind::Transport => write!(f, "Transport"),
            ReviewErrorKind::ContentType => write!(f, "ContentType"),
            ReviewErrorKind::Decode => write!(f, "Decode"),
        }
    }
}

impl ReviewError {
    pub fn kind(&self) -> ReviewErrorKind {
        match self {
            ReviewError::MissingBody | ReviewError::ReadBody(_) => ReviewErrorKind::Transport,
            ReviewError::ContentType { .. } => ReviewErrorKind::ContentType,
            ReviewError::Decode(_) | ReviewError::MissingRequest => ReviewErrorKind::Decode,
        }
    }
}

/// Failure while putting the outgoing review on the wire.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// The review could not be marshalled to JSON
    #[error("failed to serialize admission review: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The serialized review could not be written
    #[error("failed to write admission review: {0}")]
    Write(#[source] io::Error),
}
