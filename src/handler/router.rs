//! Request routing dispatch module
//!
//! Entry point for HTTP request processing: access logging, route matching
//! on `/{key}`, method validation and action dispatch. Requests outside
//! `/{key}` and methods other than PUT, POST, GET and DELETE get 405.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use hyper::body::{Body, Incoming};
use hyper::header::{HeaderValue, REFERER, SERVER, USER_AGENT};
use hyper::{Request, Response};
use percent_encoding::percent_decode_str;

use super::actions::Action;
use super::error::GatewayError;
use super::objects;
use crate::config::AppState;
use crate::http::body::{self, RequestBody};
use crate::http::{QueryParams, ResponseBody};
use crate::logger::{self, AccessLogEntry};
use crate::storage::ObjectStore;

/// Dispatches requests to the storage backend it was built with
pub struct Router {
    store: Arc<dyn ObjectStore>,
    max_json_body_size: u64,
}

impl Router {
    pub fn new(store: Arc<dyn ObjectStore>, max_json_body_size: u64) -> Self {
        Self {
            store,
            max_json_body_size,
        }
    }

    /// Map one request to one response. Never fails: every error is
    /// rendered through [`GatewayError::into_response`].
    pub async fn dispatch(&self, req: Request<RequestBody>) -> Response<ResponseBody> {
        self.try_dispatch(req)
            .await
            .unwrap_or_else(GatewayError::into_response)
    }

    async fn try_dispatch(
        &self,
        req: Request<RequestBody>,
    ) -> Result<Response<ResponseBody>, GatewayError> {
        let segment = key_segment(req.uri().path()).ok_or(GatewayError::MethodNotAllowed)?;
        if Action::allowed_for(req.method()).is_empty() {
            return Err(GatewayError::MethodNotAllowed);
        }
        let key = decode_key(segment)?;

        let query = QueryParams::parse(req.uri().query());
        let action = Action::parse(req.method(), query.get("action"))?;
        let store = self.store.as_ref();

        match action {
            Action::MpuCreate => objects::create_upload(store, &key, req.headers()).await,
            Action::MpuComplete => {
                let (parts, request_body) = req.into_parts();
                objects::complete_upload(
                    store,
                    &key,
                    &query,
                    &parts.headers,
                    request_body,
                    self.max_json_body_size,
                )
                .await
            }
            Action::Get => objects::get_object(store, &key).await,
            Action::MpuUploadPart => {
                objects::upload_part(store, &key, &query, req.into_body()).await
            }
            Action::MpuAbort => objects::abort_upload(store, &key, &query).await,
            Action::Delete => objects::delete_object(store, &key).await,
        }
    }
}

/// The single non-empty path segment naming the resource
fn key_segment(path: &str) -> Option<&str> {
    path.strip_prefix('/')
        .filter(|segment| !segment.is_empty() && !segment.contains('/'))
}

/// Percent-decode a key. Bytes that do not form UTF-8 are rejected rather
/// than replaced, so distinct paths never name the same object.
fn decode_key(segment: &str) -> Result<String, GatewayError> {
    percent_decode_str(segment)
        .decode_utf8()
        .map(std::borrow::Cow::into_owned)
        .map_err(|_| GatewayError::InvalidKey(segment.to_string()))
}

/// Main entry point for HTTP request handling
pub async fn handle_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    remote_addr: SocketAddr,
) -> Result<Response<ResponseBody>, Infallible> {
    let started = Instant::now();
    let logging = &state.config.logging;

    let mut entry = logging.access_log.then(|| {
        let mut entry = AccessLogEntry::new(
            remote_addr.ip().to_string(),
            req.method().to_string(),
            req.uri().path().to_string(),
        );
        entry.query = req.uri().query().map(ToString::to_string);
        entry.http_version = version_label(req.version()).to_string();
        entry.referer = header_string(&req, REFERER.as_str());
        entry.user_agent = header_string(&req, USER_AGENT.as_str());
        entry
    });
    logger::log_headers_count(req.headers().len(), logging.show_headers);

    let mut response = state.router.dispatch(req.map(body::from_incoming)).await;
    if let Ok(server_name) = HeaderValue::from_str(&state.config.http.server_name) {
        response.headers_mut().insert(SERVER, server_name);
    }

    if let Some(entry) = entry.as_mut() {
        entry.status = response.status().as_u16();
        entry.body_bytes = response
            .body()
            .size_hint()
            .exact()
            .and_then(|n| usize::try_from(n).ok())
            .or_else(|| content_length(&response))
            .unwrap_or(0);
        entry.request_time_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        logger::log_access(entry, &logging.access_log_format);
    }

    Ok(response)
}

fn header_string<B>(req: &Request<B>, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}

fn content_length(response: &Response<ResponseBody>) -> Option<usize> {
    response
        .headers()
        .get(hyper::header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

const fn version_label(version: hyper::Version) -> &'static str {
    match version {
        hyper::Version::HTTP_10 => "1.0",
        hyper::Version::HTTP_2 => "2",
        _ => "1.1",
    }
}
