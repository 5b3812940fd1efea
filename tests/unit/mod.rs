// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Unit tests for admission-review.
//!
//! These tests drive the public pipeline end to end with in-memory bodies
//! and writers; no cluster or listener is needed.

#[path = "../common/mod.rs"]
mod common;

mod correlation_tests {
    use crate::common::fixtures::*;
    use admission_review::webhooks::{
        AdmissionResponse, AdmissionReview, DynamicObject, Operation, ReviewHandler,
    };

    #[test]
    fn test_allowed_review_is_correlated() {
        let handler = ReviewHandler::with_sink(allow_all, RecordingSink::default());
        let review = respond(&handler, post_review(AdmissionReviewBuilder::new("abc-123")));

        assert_eq!(response_uid(&review), "abc-123");
        assert_eq!(review["response"]["allowed"], true);
    }

    #[test]
    fn test_admit_uid_is_overridden() {
        let handler = ReviewHandler::with_sink(
            |review: &AdmissionReview<DynamicObject>| {
                let mut response = allow_all(review);
                response.uid = "wrong".to_string();
                response
            },
            RecordingSink::default(),
        );
        let review = respond(&handler, post_review(AdmissionReviewBuilder::new("abc-123")));

        assert_eq!(response_uid(&review), "abc-123");
    }

    #[test]
    fn test_uid_correlated_even_when_admit_returns_invalid() {
        // A verdict built without the request still gets the request UID.
        let handler = ReviewHandler::with_sink(
            |_: &AdmissionReview<DynamicObject>| AdmissionResponse::invalid("policy crashed"),
            RecordingSink::default(),
        );
        let review = respond(&handler, post_review(AdmissionReviewBuilder::new("u-1")));

        assert_eq!(response_uid(&review), "u-1");
        assert_eq!(response_message(&review), "policy crashed");
    }

    #[test]
    fn test_denied_review_keeps_message() {
        let handler = ReviewHandler::with_sink(deny_all, RecordingSink::default());
        let review = respond(&handler, post_review(AdmissionReviewBuilder::new("d-1")));

        assert_eq!(response_uid(&review), "d-1");
        assert_eq!(review["response"]["allowed"], false);
        assert_eq!(response_message(&review), "denied by test policy");
    }

    #[test]
    fn test_admit_sees_decoded_request() {
        let handler = ReviewHandler::with_sink(
            |review: &AdmissionReview<DynamicObject>| {
                let request = review.request.as_ref().unwrap();
                assert_eq!(request.operation, Operation::Update);
                assert_eq!(request.namespace.as_deref(), Some("prod"));
                assert_eq!(request.name, "api-7f9c");
                assert!(request.dry_run);
                let object = request.object.as_ref().unwrap();
                assert_eq!(object.metadata.name.as_deref(), Some("api-7f9c"));
                allow_all(review)
            },
            RecordingSink::default(),
        );
        let review = respond(
            &handler,
            post_review(
                AdmissionReviewBuilder::new("u-2")
                    .operation("UPDATE")
                    .namespace("prod")
                    .name("api-7f9c")
                    .dry_run(true),
            ),
        );

        assert_eq!(review["response"]["allowed"], true);
    }

    #[test]
    fn test_review_api_version_is_echoed() {
        let handler = ReviewHandler::with_sink(allow_all, RecordingSink::default());
        let review = respond(
            &handler,
            post_review(AdmissionReviewBuilder::new("b-1").api_version("admission.k8s.io/v1beta1")),
        );

        assert_eq!(review["apiVersion"], "admission.k8s.io/v1beta1");
        assert_eq!(review["kind"], "AdmissionReview");
        assert_eq!(response_uid(&review), "b-1");
    }
}

mod rejection_tests {
    use crate::common::fixtures::*;
    use admission_review::webhooks::{JSON_CONTENT_TYPE, ReviewHandler};

    #[test]
    fn test_nil_body() {
        let handler = ReviewHandler::with_sink(allow_all, RecordingSink::default());
        let review = respond(&handler, post(Some(JSON_CONTENT_TYPE), None));

        assert_eq!(response_uid(&review), "");
        assert!(!response_message(&review).is_empty());
        assert_eq!(review["response"]["allowed"], false);
    }

    #[test]
    fn test_text_plain_content_type() {
        let handler = ReviewHandler::with_sink(allow_all, RecordingSink::default());
        let body = AdmissionReviewBuilder::new("abc-123").into_bytes();
        let review = respond(&handler, post(Some("text/plain"), Some(body)));

        assert_eq!(response_uid(&review), "");
        assert!(response_message(&review).contains("application/json"));
    }

    #[test]
    fn test_empty_content_type() {
        let handler = ReviewHandler::with_sink(allow_all, RecordingSink::default());
        let body = AdmissionReviewBuilder::new("abc-123").into_bytes();
        let review = respond(&handler, post(Some(""), Some(body)));

        assert_eq!(response_uid(&review), "");
        assert!(response_message(&review).contains("application/json"));
    }

    #[test]
    fn test_missing_content_type() {
        let handler = ReviewHandler::with_sink(allow_all, RecordingSink::default());
        let body = AdmissionReviewBuilder::new("abc-123").into_bytes();
        let review = respond(&handler, post(None, Some(body)));

        assert_eq!(response_uid(&review), "");
        assert!(response_message(&review).contains("application/json"));
    }

    #[test]
    fn test_nil_body_checked_before_content_type() {
        let handler = ReviewHandler::with_sink(allow_all, RecordingSink::default());
        let review = respond(&handler, post(Some("text/plain"), None));

        assert_eq!(response_message(&review), "request body is nil");
    }

    #[test]
    fn test_malformed_json() {
        let handler = ReviewHandler::with_sink(allow_all, RecordingSink::default());
        let review = respond(
            &handler,
            post(Some(JSON_CONTENT_TYPE), Some(b"{\"apiVersion\": ".to_vec())),
        );

        assert_eq!(response_uid(&review), "");
        assert!(response_message(&review).starts_with("failed to decode admission review"));
    }

    #[test]
    fn test_schema_mismatch() {
        let handler = ReviewHandler::with_sink(allow_all, RecordingSink::default());
        let body = br#"{"apiVersion":"admission.k8s.io/v1","kind":"AdmissionReview","request":{"uid":42}}"#;
        let review = respond(&handler, post(Some(JSON_CONTENT_TYPE), Some(body.to_vec())));

        assert_eq!(response_uid(&review), "");
        assert!(response_message(&review).starts_with("failed to decode admission review"));
    }

    #[test]
    fn test_rejections_are_well_formed_reviews() {
        let handler = ReviewHandler::with_sink(allow_all, RecordingSink::default());
        let review = respond(&handler, post(None, None));

        assert_eq!(review["apiVersion"], "admission.k8s.io/v1");
        assert_eq!(review["kind"], "AdmissionReview");
        assert!(review.get("request").is_none());
        assert!(handler.sink().reports().is_empty());
    }
}

mod delivery_tests {
    use crate::common::fixtures::*;
    use admission_review::webhooks::ReviewHandler;

    #[test]
    fn test_write_failure_reported_once() {
        let handler = ReviewHandler::with_sink(allow_all, RecordingSink::default());
        handler.handle(
            post_review(AdmissionReviewBuilder::new("w-1")),
            &mut ClosedConnection,
        );

        let reports = handler.sink().reports();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].starts_with("failed to write admission review"));
    }

    #[test]
    fn test_handler_is_shareable_across_threads() {
        let handler = std::sync::Arc::new(ReviewHandler::with_sink(
            allow_all,
            RecordingSink::default(),
        ));

        let workers: Vec<_> = (0..4)
            .map(|i| {
                let handler = handler.clone();
                std::thread::spawn(move || {
                    let uid = format!("thread-{i}");
                    let review = respond(
                        handler.as_ref(),
                        post_review(AdmissionReviewBuilder::new(&uid)),
                    );
                    assert_eq!(response_uid(&review), uid);
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
    }
}
