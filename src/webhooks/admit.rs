//! Decision functions plugged into the review pipeline.

use kube::core::DynamicObject;
use kube::core::admission::{AdmissionResponse, AdmissionReview};

/// A policy that turns a decoded review into a verdict.
///
/// Implemented for any `Fn(&AdmissionReview<DynamicObject>) -> AdmissionResponse`,
/// so plain functions and closures can be handed to
/// [`ReviewHandler`](super::ReviewHandler) directly. The request inside the
/// review is always present when `admit` is called.
///
/// The UID set on the returned response is ignored; the handler copies the
/// request UID over it.
pub trait Admit: Send + Sync {
    fn admit(&self, review: &AdmissionReview<DynamicObject>) -> AdmissionResponse;
}

impl<F> Admit for F
where
    F: Fn(&AdmissionReview<DynamicObject>) -> AdmissionResponse + Send + Sync,
{
    fn admit(&self, review: &AdmissionReview<DynamicObject>) -> AdmissionResponse {
        self(review)
    }
}

/// Build a response with `err` embedded in its status message.
///
/// The response carries no UID: it is used for requests that never decoded.
pub fn to_admission_response<E: std::fmt::Display>(err: E) -> AdmissionResponse {
    AdmissionResponse::invalid(err.to_string())
}
