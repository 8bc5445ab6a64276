//! The aggregated-API surface: a create-only `RoleGraphReview` endpoint.
//!
//! A request flows: parse → defaults + selector validation → (optionally)
//! caller-scope resolution and snapshot filtering → query engine → response.
//! Invalid input maps to 400, an indexer that has not published a snapshot
//! yet maps to 503.

use bytes::Buf;
use futures::future;
use http_body_util::BodyExt;
use hyper::header::HeaderMap;
use hyper::{http, Request, Response};
use rbacgraph_controller_api::{self as api, RoleGraphReview};
use rbacgraph_controller_core::{engine, filter, scope, Caller};
use rbacgraph_controller_k8s_index::Handle;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

#[derive(Clone)]
pub struct ReviewServer {
    index: Handle,
    enforce_caller_scope: bool,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

enum Reject {
    NotReady,
    Invalid(String),
}

type Body = http_body_util::Full<bytes::Bytes>;

// === impl ReviewServer ===

impl tower::Service<Request<hyper::body::Incoming>> for ReviewServer {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        if req.method() != http::Method::POST || !is_review_path(req.uri().path()) {
            return Box::pin(future::ok(
                Response::builder()
                    .status(http::StatusCode::NOT_FOUND)
                    .body(Body::default())
                    .expect("not found response must be valid"),
            ));
        }

        let server = self.clone();
        Box::pin(async move {
            let caller = caller_from_headers(req.headers());
            let bytes = req.into_body().collect().await?.to_bytes();
            let review: RoleGraphReview = match serde_json::from_reader(bytes.reader()) {
                Ok(review) => review,
                Err(error) => {
                    warn!(%error, "Failed to parse RoleGraphReview");
                    return text_response(
                        http::StatusCode::BAD_REQUEST,
                        format!("invalid RoleGraphReview: {}", error),
                    );
                }
            };

            match server.review(review, caller) {
                Ok(review) => {
                    debug!(
                        matched_roles = review.status.as_ref().map(|s| s.matched_roles),
                        "Answered review"
                    );
                    json_response(http::StatusCode::CREATED, &review)
                }
                Err(Reject::NotReady) => text_response(
                    http::StatusCode::SERVICE_UNAVAILABLE,
                    "indexer has not synced yet; retry shortly".to_string(),
                ),
                Err(Reject::Invalid(reason)) => {
                    info!(%reason, "Rejected review");
                    text_response(http::StatusCode::BAD_REQUEST, reason)
                }
            }
        })
    }
}

impl ReviewServer {
    pub fn new(index: Handle, enforce_caller_scope: bool) -> Self {
        Self {
            index,
            enforce_caller_scope,
        }
    }

    fn review(
        &self,
        mut review: RoleGraphReview,
        caller: Option<Caller>,
    ) -> Result<RoleGraphReview, Reject> {
        review.ensure_defaults();

        let snapshot = self.index.snapshot().ok_or(Reject::NotReady)?;

        self.index
            .validate_selector(&review.spec.selector)
            .map_err(|error| Reject::Invalid(error.to_string()))?;

        let snapshot = if self.enforce_caller_scope {
            let caller = caller.ok_or_else(|| {
                Reject::Invalid("caller identity missing; cannot enforce caller scope".to_string())
            })?;
            let namespaces = scope::namespaces_to_check(&snapshot, &review.spec.namespace_scope);
            let access = scope::resolve_access_scope(&snapshot, &caller, &namespaces);
            filter::scoped(&snapshot, &access)
        } else {
            snapshot
        };

        let discovery = self.index.discovery();
        review.status = Some(engine::query(
            &snapshot,
            review.spec.clone(),
            discovery.as_deref(),
        ));
        Ok(review)
    }
}

fn is_review_path(path: &str) -> bool {
    path == "/" || path.trim_end_matches('/').ends_with(api::PLURAL)
}

/// The aggregated-API front proxy forwards the authenticated identity in
/// these headers.
fn caller_from_headers(headers: &HeaderMap) -> Option<Caller> {
    let name = headers
        .get("x-remote-user")
        .and_then(|value| value.to_str().ok())?
        .to_string();
    let groups = headers
        .get_all("x-remote-group")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .collect();
    Some(Caller { name, groups })
}

fn json_response(
    status: http::StatusCode,
    review: &RoleGraphReview,
) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(review)?;
    Ok(Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("review response must be valid"))
}

fn text_response(status: http::StatusCode, message: String) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "text/plain")
        .body(Body::from(message.into_bytes()))
        .expect("text response must be valid"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn review_paths() {
        assert!(is_review_path("/"));
        assert!(is_review_path("/apis/rbacgraph.io/v1alpha1/rolegraphreviews"));
        assert!(is_review_path("/apis/rbacgraph.io/v1alpha1/rolegraphreviews/"));
        assert!(!is_review_path("/apis/rbacgraph.io/v1alpha1/other"));
        assert!(!is_review_path("/healthz"));
    }

    #[test]
    fn caller_requires_user_header() {
        let mut headers = HeaderMap::new();
        assert!(caller_from_headers(&headers).is_none());

        headers.insert("x-remote-user", "alice".parse().unwrap());
        headers.append("x-remote-group", "devs".parse().unwrap());
        headers.append("x-remote-group", "auditors".parse().unwrap());
        let caller = caller_from_headers(&headers).unwrap();
        assert_eq!(caller.name, "alice");
        assert_eq!(caller.groups, vec!["devs".to_string(), "auditors".to_string()]);
    }
}
