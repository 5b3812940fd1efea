//! Admission review pipeline.
//!
//! A [`ReviewHandler`] answers one HTTP request at a time:
//! read body, check content type, decode review, call the admit function,
//! copy the request UID onto the response, serialize, write.
//!
//! Every request-side failure is embedded in the response's `status.message`
//! instead of surfacing as an HTTP error, since the API server expects a
//! verdict either way. Those early responses carry no UID. Serialization and
//! write failures are handed to the [`DiagnosticSink`] and otherwise ignored.

use std::io::{Read, Write};

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Request};
use kube::core::admission::{AdmissionResponse, AdmissionReview};
use kube::core::{DynamicObject, TypeMeta};
use serde::Serialize;
use tracing::{debug, error};

use crate::webhooks::admit::{Admit, to_admission_response};
use crate::webhooks::error::{DeliveryError, ReviewError};

/// The only content type accepted on inbound reviews
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// API version stamped on reviews answered before the request decoded
pub const ADMISSION_API_VERSION: &str = "admission.k8s.io/v1";
/// Kind stamped on every outgoing review
pub const ADMISSION_REVIEW_KIND: &str = "AdmissionReview";

/// Receiver for failures that happen after the verdict is decided.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, err: &DeliveryError);
}

/// Sink that emits delivery failures as `tracing` error events.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, err: &DeliveryError) {
        error!(error = %err, "Failed to deliver admission review");
    }
}

/// Runs the review pipeline for a single admit function.
///
/// Holds no per-request state, so one handler can be shared by every
/// request the surrounding server dispatches to it.
pub struct ReviewHandler<A, S = TracingSink> {
    admit: A,
    sink: S,
}

impl<A: Admit> ReviewHandler<A> {
    /// Create a handler that logs delivery failures through `tracing`
    pub fn new(admit: A) -> Self {
        Self::with_sink(admit, TracingSink)
    }
}

impl<A: Admit, S: DiagnosticSink> ReviewHandler<A, S> {
    pub fn with_sink(admit: A, sink: S) -> Self {
        Self { admit, sink }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Answer `request`, writing the serialized review to `out` exactly once.
    ///
    /// A `None` body is treated as an absent request body.
    pub fn handle<B: Read, W: Write>(&self, request: Request<Option<B>>, out: &mut W) {
        let (parts, body) = request.into_parts();
        let review = self.review(parts.headers.get(CONTENT_TYPE), read_body(body));
        let bytes = self.encode(&review);

        if let Err(e) = out.write_all(&bytes).and_then(|()| out.flush()) {
            self.sink.report(&DeliveryError::Write(e));
        }
    }

    /// Produce the outgoing review for an already-buffered body.
    ///
    /// `body` is the outcome of reading the request; a read error is
    /// embedded like any other request-side failure.
    pub fn review(
        &self,
        content_type: Option<&HeaderValue>,
        body: Result<Vec<u8>, ReviewError>,
    ) -> AdmissionReview<DynamicObject> {
        let (types, response) = match self.decide(content_type, body) {
            Ok(decided) => decided,
            Err(e) => {
                debug!(kind = %e.kind(), error = %e, "Rejecting malformed admission request");
                (default_review_types(), to_admission_response(e))
            }
        };

        let mut review = response.into_review();
        review.types = types;
        review
    }

    /// Serialize `review`, reporting a marshal failure and yielding an empty body.
    pub fn encode<T: Serialize + ?Sized>(&self, review: &T) -> Vec<u8> {
        match encode_review(review) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.sink.report(&e);
                Vec::new()
            }
        }
    }

    fn decide(
        &self,
        content_type: Option<&HeaderValue>,
        body: Result<Vec<u8>, ReviewError>,
    ) -> Result<(TypeMeta, AdmissionResponse), ReviewError> {
        let body = body?;
        check_content_type(content_type)?;

        let review: AdmissionReview<DynamicObject> = serde_json::from_slice(&body)?;
        let request = review.request.as_ref().ok_or(ReviewError::MissingRequest)?;
        let uid = request.uid.clone();

        debug!(
            uid = %uid,
            operation = ?request.operation,
            namespace = ?request.namespace,
            name = %request.name,
            "Dispatching admission review"
        );

        let mut response = self.admit.admit(&review);
        if !response.uid.is_empty() && response.uid != uid {
            debug!(uid = %uid, returned = %response.uid, "Replacing UID set by admit function");
        }
        response.uid = uid;

        Ok((review.types, response))
    }
}

/// Read an optional request body to the end.
pub fn read_body<B: Read>(body: Option<B>) -> Result<Vec<u8>, ReviewError> {
    let mut body = body.ok_or(ReviewError::MissingBody)?;
    let mut buf = Vec::new();
    body.read_to_end(&mut buf).map_err(ReviewError::ReadBody)?;
    Ok(buf)
}

/// Require the header to be exactly `application/json`.
pub fn check_content_type(value: Option<&HeaderValue>) -> Result<(), ReviewError> {
    match value {
        Some(v) if v.as_bytes() == JSON_CONTENT_TYPE.as_bytes() => Ok(()),
        other => Err(ReviewError::ContentType {
            found: other.map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned()),
        }),
    }
}

pub fn encode_review<T: Serialize + ?Sized>(review: &T) -> Result<Vec<u8>, DeliveryError> {
    serde_json::to_vec(review).map_err(DeliveryError::Serialize)
}

fn default_review_types() -> TypeMeta {
    TypeMeta {
        api_version: ADMISSION_API_VERSION.to_string(),
        kind: ADMISSION_REVIEW_KIND.to_string(),
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::io::{self, Cursor};
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing::span::{Attributes, Id, Record};
    use tracing::{Event, Level, Metadata, Subscriber};

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<String>>);

    impl DiagnosticSink for RecordingSink {
        fn report(&self, err: &DeliveryError) {
            self.0.lock().unwrap().push(err.to_string());
        }
    }

    struct BrokenPipe;

    impl Read for BrokenPipe {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer went away"))
        }
    }

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "client hung up"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Counts events at WARN or ERROR.
    #[derive(Clone, Default)]
    struct SevereEvents(Arc<AtomicUsize>);

    impl SevereEvents {
        fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    impl Subscriber for SevereEvents {
        fn enabled(&self, _: &Metadata<'_>) -> bool {
            true
        }

        fn new_span(&self, _: &Attributes<'_>) -> Id {
            Id::from_u64(1)
        }

        fn record(&self, _: &Id, _: &Record<'_>) {}

        fn record_follows_from(&self, _: &Id, _: &Id) {}

        fn event(&self, event: &Event<'_>) {
            if matches!(*event.metadata().level(), Level::WARN | Level::ERROR) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn enter(&self, _: &Id) {}

        fn exit(&self, _: &Id) {}
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("non-string map key"))
        }
    }

    fn review_body(uid: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": uid,
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "name": "web-0",
                "namespace": "default",
                "operation": "CREATE",
                "userInfo": {"username": "system:serviceaccount:kube-system:replicaset-controller"},
                "object": {
                    "apiVersion": "v1",
                    "kind": "Pod",
                    "metadata": {"name": "web-0", "namespace": "default"},
                    "spec": {"containers": [{"name": "web", "image": "nginx"}]}
                },
                "dryRun": false
            }
        }))
        .unwrap()
    }

    fn allow(review: &AdmissionReview<DynamicObject>) -> AdmissionResponse {
        AdmissionResponse::from(review.request.as_ref().unwrap())
    }

    type Body = Option<Cursor<Vec<u8>>>;

    fn json_request(body: Option<Vec<u8>>) -> Request<Body> {
        Request::post("/validate")
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(body.map(Cursor::new))
            .unwrap()
    }

    fn run<A: Admit>(handler: &ReviewHandler<A, RecordingSink>, req: Request<Body>) -> Value {
        let mut out = Vec::new();
        handler.handle(req, &mut out);
        serde_json::from_slice(&out).unwrap()
    }

    fn uid_of(json: &Value) -> &str {
        json["response"]["uid"].as_str().unwrap_or_default()
    }

    #[test]
    fn test_allowed_review_echoes_uid() {
        let handler = ReviewHandler::with_sink(allow, RecordingSink::default());
        let json = run(&handler, json_request(Some(review_body("abc-123"))));

        assert_eq!(uid_of(&json), "abc-123");
        assert_eq!(json["response"]["allowed"], true);
        assert_eq!(json["apiVersion"], "admission.k8s.io/v1");
        assert_eq!(json["kind"], "AdmissionReview");
        assert!(json.get("request").is_none());
        assert!(handler.sink().0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_admit_uid_is_overridden() {
        let handler = ReviewHandler::with_sink(
            |review: &AdmissionReview<DynamicObject>| {
                let mut response = allow(review);
                response.uid = "wrong".to_string();
                response
            },
            RecordingSink::default(),
        );
        let json = run(&handler, json_request(Some(review_body("abc-123"))));
        assert_eq!(uid_of(&json), "abc-123");
    }

    #[test]
    fn test_denial_is_passed_through() {
        let handler = ReviewHandler::with_sink(
            |review: &AdmissionReview<DynamicObject>| {
                allow(review).deny("runAsUser 0 is forbidden")
            },
            RecordingSink::default(),
        );
        let json = run(&handler, json_request(Some(review_body("deny-1"))));

        assert_eq!(uid_of(&json), "deny-1");
        assert_eq!(json["response"]["allowed"], false);
        assert_eq!(json["response"]["status"]["message"], "runAsUser 0 is forbidden");
    }

    #[test]
    fn test_missing_body() {
        let handler = ReviewHandler::with_sink(allow, RecordingSink::default());
        let json = run(&handler, json_request(None));

        assert_eq!(uid_of(&json), "");
        assert_eq!(json["response"]["allowed"], false);
        assert_eq!(json["response"]["status"]["message"], "request body is nil");
        assert_eq!(json["apiVersion"], "admission.k8s.io/v1");
    }

    #[test]
    fn test_unreadable_body() {
        let handler = ReviewHandler::with_sink(allow, RecordingSink::default());
        let req = Request::post("/validate")
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(Some(BrokenPipe))
            .unwrap();

        let mut out = Vec::new();
        handler.handle(req, &mut out);
        let json: Value = serde_json::from_slice(&out).unwrap();

        assert_eq!(uid_of(&json), "");
        let message = json["response"]["status"]["message"].as_str().unwrap();
        assert!(message.contains("peer went away"));
    }

    #[test]
    fn test_content_type_must_match_exactly() {
        let handler = ReviewHandler::with_sink(allow, RecordingSink::default());

        for content_type in [
            "text/plain",
            "application/json; charset=utf-8",
            "APPLICATION/JSON",
            "",
        ] {
            let req = Request::post("/validate")
                .header(CONTENT_TYPE, content_type)
                .body(Some(Cursor::new(review_body("ct"))))
                .unwrap();
            let json = run(&handler, req);

            assert_eq!(uid_of(&json), "", "content type {content_type:?}");
            let message = json["response"]["status"]["message"].as_str().unwrap();
            assert!(message.contains("application/json"), "message {message:?}");
        }
    }

    #[test]
    fn test_missing_content_type() {
        let handler = ReviewHandler::with_sink(allow, RecordingSink::default());
        let req = Request::post("/validate")
            .body(Some(Cursor::new(review_body("ct"))))
            .unwrap();
        let json = run(&handler, req);

        assert_eq!(uid_of(&json), "");
        let message = json["response"]["status"]["message"].as_str().unwrap();
        assert!(message.contains("application/json"));
    }

    #[test]
    fn test_malformed_json() {
        let handler = ReviewHandler::with_sink(allow, RecordingSink::default());
        let json = run(&handler, json_request(Some(b"{\"request\": ".to_vec())));

        assert_eq!(uid_of(&json), "");
        let message = json["response"]["status"]["message"].as_str().unwrap();
        assert!(message.starts_with("failed to decode admission review"));
    }

    #[test]
    fn test_review_without_request() {
        let handler = ReviewHandler::with_sink(allow, RecordingSink::default());
        let body = serde_json::to_vec(&json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
        }))
        .unwrap();
        let json = run(&handler, json_request(Some(body)));

        assert_eq!(uid_of(&json), "");
        assert_eq!(
            json["response"]["status"]["message"],
            "admission review contains no request"
        );
    }

    #[test]
    fn test_admit_not_called_on_rejected_request() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let handler = ReviewHandler::with_sink(
            move |review: &AdmissionReview<DynamicObject>| {
                counted.fetch_add(1, Ordering::SeqCst);
                allow(review)
            },
            RecordingSink::default(),
        );

        run(&handler, json_request(None));
        run(&handler, json_request(Some(b"not json".to_vec())));
        let untyped = Request::post("/validate")
            .body(Some(Cursor::new(review_body("x"))))
            .unwrap();
        run(&handler, untyped);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        run(&handler, json_request(Some(review_body("x"))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_write_failure_is_reported_once() {
        let handler = ReviewHandler::with_sink(allow, RecordingSink::default());
        handler.handle(json_request(Some(review_body("w"))), &mut BrokenPipe);

        let reports = handler.sink().0.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].contains("client hung up"));
    }

    #[test]
    fn test_review_from_buffered_body() {
        let handler = ReviewHandler::with_sink(allow, RecordingSink::default());
        let content_type = HeaderValue::from_static(JSON_CONTENT_TYPE);

        let review = handler.review(Some(&content_type), Ok(review_body("buffered")));
        let response = review.response.unwrap();
        assert_eq!(response.uid, "buffered");
        assert!(response.allowed);

        let review = handler.review(Some(&content_type), Err(ReviewError::MissingBody));
        let response = review.response.unwrap();
        assert!(response.uid.is_empty());
        assert!(!response.allowed);
    }

    #[test]
    fn test_read_body() {
        assert!(matches!(read_body::<&[u8]>(None), Err(ReviewError::MissingBody)));
        assert_eq!(read_body(Some(&b"{}"[..])).unwrap(), b"{}");
        assert!(matches!(
            read_body(Some(BrokenPipe)),
            Err(ReviewError::ReadBody(_))
        ));
    }

    #[test]
    fn test_rejection_emits_no_severe_events() {
        let events = SevereEvents::default();
        let handler = ReviewHandler::new(allow);

        let mut out = Vec::new();
        tracing::subscriber::with_default(events.clone(), || {
            let req = Request::post("/validate")
                .header(CONTENT_TYPE, "text/plain")
                .body(Some(Cursor::new(review_body("quiet"))))
                .unwrap();
            handler.handle(req, &mut out);
            handler.handle(json_request(None), &mut Vec::new());
            handler.handle(json_request(Some(b"{".to_vec())), &mut Vec::new());
        });

        assert_eq!(events.count(), 0);
        let json: Value = serde_json::from_slice(&out).unwrap();
        assert!(json["response"]["status"]["message"]
            .as_str()
            .unwrap()
            .contains("application/json"));
    }

    #[test]
    fn test_write_failure_is_logged_by_tracing_sink() {
        let events = SevereEvents::default();
        let handler = ReviewHandler::new(allow);

        tracing::subscriber::with_default(events.clone(), || {
            handler.handle(json_request(Some(review_body("loud"))), &mut BrokenPipe);
        });

        assert_eq!(events.count(), 1);
    }

    #[test]
    fn test_serialize_failure_reports_and_yields_empty_body() {
        let handler = ReviewHandler::with_sink(allow, RecordingSink::default());

        let bytes = handler.encode(&Unserializable);

        assert!(bytes.is_empty());
        let reports = handler.sink().0.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].starts_with("failed to serialize admission review"));
        assert!(reports[0].contains("non-string map key"));
    }
}
