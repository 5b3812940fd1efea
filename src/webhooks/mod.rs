//! Admission webhook plumbing.
//!
//! Turns an HTTP request carrying an `AdmissionReview` into a verdict from a
//! pluggable [`Admit`] function, always answering with a well-formed review:
//! - [`review`]: the synchronous pipeline ([`ReviewHandler`])
//! - [`server`]: an axum handler wrapping the same pipeline
//! - [`admit`]: the decision-function seam

pub mod admit;
pub mod error;
pub mod review;
pub mod server;

pub use admit::{Admit, to_admission_response};
pub use error::{DeliveryError, ReviewError, ReviewErrorKind};
pub use review::{
    ADMISSION_API_VERSION, ADMISSION_REVIEW_KIND, DiagnosticSink, JSON_CONTENT_TYPE,
    ReviewHandler, TracingSink, check_content_type, encode_review, read_body,
};
pub use server::{DEFAULT_MAX_BODY_BYTES, ReviewConfig, WebhookState, serve_review};

// Re-export kube-rs admission types so admit functions need no direct kube dependency
pub use kube::core::DynamicObject;
pub use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
