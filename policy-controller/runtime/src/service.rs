use crate::{
    core::{EndpointQuerier, EndpointQueryResponse, QueryError},
    QueryMetrics,
};
use futures::future;
use hyper::{http, Request, Response};
use serde::Deserialize;
use thiserror::Error;
use tokio::time;
use tracing::{debug, trace, warn};

const ENDPOINT_PATH: &str = "/endpoint";

/// Serves endpoint queries over HTTP.
///
/// `GET /endpoint?namespace=<ns>&pod=<name>` responds with the JSON-encoded
/// `EndpointQueryResponse` for the pod, or with a table when the client accepts `text/plain`.
#[derive(Clone)]
pub struct EndpointQueryService {
    querier: EndpointQuerier,
    metrics: QueryMetrics,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

type Body = http_body_util::Full<bytes::Bytes>;

#[derive(Debug, Default, Deserialize)]
struct EndpointParams {
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    pod: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Format {
    Json,
    Text,
}

// === impl EndpointQueryService ===

impl<B> tower::Service<Request<B>> for EndpointQueryService {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::Ready<Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let start = time::Instant::now();
        trace!(method = %req.method(), uri = %req.uri());
        let rsp = self.handle(&req);
        if let Ok(rsp) = &rsp {
            self.metrics.observe(rsp.status(), start);
        }
        future::ready(rsp)
    }
}

impl EndpointQueryService {
    pub fn new(querier: EndpointQuerier, metrics: QueryMetrics) -> Self {
        Self { querier, metrics }
    }

    fn handle<B>(&self, req: &Request<B>) -> Result<Response<Body>, Error> {
        if req.uri().path() != ENDPOINT_PATH {
            return Ok(empty_response(http::StatusCode::NOT_FOUND));
        }

        if req.method() != http::Method::GET && req.method() != http::Method::HEAD {
            let mut rsp = empty_response(http::StatusCode::METHOD_NOT_ALLOWED);
            rsp.headers_mut().insert(
                http::header::ALLOW,
                http::HeaderValue::from_static("GET, HEAD"),
            );
            return Ok(rsp);
        }

        let format = Format::accepted(req.headers());
        let params = match serde_urlencoded::from_str::<EndpointParams>(
            req.uri().query().unwrap_or_default(),
        ) {
            Ok(params) => params,
            Err(error) => {
                debug!(%error, "Invalid query string");
                return error_response(
                    http::StatusCode::BAD_REQUEST,
                    format!("invalid query string: {error}"),
                    format,
                );
            }
        };
        if params.namespace.is_empty() {
            return error_response(
                http::StatusCode::BAD_REQUEST,
                "missing required parameter: namespace".to_string(),
                format,
            );
        }
        if params.pod.is_empty() {
            return error_response(
                http::StatusCode::BAD_REQUEST,
                "missing required parameter: pod".to_string(),
                format,
            );
        }

        match self
            .querier
            .query_network_policies(&params.namespace, &params.pod)
        {
            Ok(rsp) => encode_response(http::StatusCode::OK, &rsp, format),
            Err(error) => {
                let status = status_for(&error);
                let EndpointParams { namespace, pod } = &params;
                if status.is_server_error() {
                    warn!(%error, %namespace, %pod, "Query failed");
                } else {
                    debug!(%error, %namespace, %pod, "Query failed");
                }
                encode_response(status, &EndpointQueryResponse::failed(&error), format)
            }
        }
    }
}

fn status_for(error: &QueryError) -> http::StatusCode {
    if error.is_not_found() {
        http::StatusCode::NOT_FOUND
    } else {
        http::StatusCode::INTERNAL_SERVER_ERROR
    }
}

// === impl Format ===

impl Format {
    fn accepted(headers: &http::HeaderMap) -> Self {
        let text = headers
            .get_all(http::header::ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|v| v.trim().starts_with("text/plain"));
        if text {
            Self::Text
        } else {
            Self::Json
        }
    }
}

fn error_response(
    status: http::StatusCode,
    error: String,
    format: Format,
) -> Result<Response<Body>, Error> {
    let rsp = EndpointQueryResponse {
        endpoints: None,
        error: Some(error),
    };
    encode_response(status, &rsp, format)
}

fn encode_response(
    status: http::StatusCode,
    rsp: &EndpointQueryResponse,
    format: Format,
) -> Result<Response<Body>, Error> {
    let (content_type, bytes) = match format {
        Format::Json => ("application/json", serde_json::to_vec(rsp)?),
        Format::Text => ("text/plain; charset=utf-8", rsp.to_string().into_bytes()),
    };
    Ok(Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, content_type)
        .body(Body::from(bytes))
        .expect("endpoint query response must be valid"))
}

fn empty_response(status: http::StatusCode) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::default())
        .expect("empty response must be valid")
}
