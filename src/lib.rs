//! admission-review library crate
//!
//! Adapts Kubernetes admission webhook HTTP requests to plain decision
//! functions. See [`webhooks`] for the pipeline and its failure policy.

pub mod webhooks;

pub use webhooks::{
    Admit, DiagnosticSink, ReviewConfig, ReviewError, ReviewHandler, TracingSink, WebhookState,
    serve_review, to_admission_response,
};
