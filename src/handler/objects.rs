//! Object and multipart upload actions
//!
//! One function per action. Each validates its own query parameters and
//! body before touching the backend, then forwards the call and shapes the
//! response.

use hyper::header::{
    HeaderName, CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_ENCODING, CONTENT_LANGUAGE,
    CONTENT_LENGTH, CONTENT_TYPE, ETAG, EXPIRES,
};
use hyper::{HeaderMap, Response, StatusCode};
use serde::Deserialize;

use super::error::{ErrorFormat, GatewayError};
use crate::http::body::{self, BodyReadError, RequestBody};
use crate::http::{self as http_util, QueryParams, ResponseBody};
use crate::logger;
use crate::storage::{HttpMetadata, ObjectStore, UploadedPart};

type ActionResult = Result<Response<ResponseBody>, GatewayError>;

/// Body of an `mpu-complete` request
#[derive(Debug, Deserialize)]
struct CompleteBody {
    parts: Vec<UploadedPart>,
}

type MetadataSlot = fn(&mut HttpMetadata) -> &mut Option<String>;

/// Headers captured at upload creation and replayed on reads
const METADATA_HEADERS: [(HeaderName, MetadataSlot); 6] = [
    (CONTENT_TYPE, |m| &mut m.content_type),
    (CONTENT_LANGUAGE, |m| &mut m.content_language),
    (CONTENT_DISPOSITION, |m| &mut m.content_disposition),
    (CONTENT_ENCODING, |m| &mut m.content_encoding),
    (CACHE_CONTROL, |m| &mut m.cache_control),
    (EXPIRES, |m| &mut m.expires),
];

/// Collect HTTP metadata from request headers
pub fn metadata_from_headers(headers: &HeaderMap) -> HttpMetadata {
    let mut metadata = HttpMetadata::default();
    for (header, slot) in &METADATA_HEADERS {
        *slot(&mut metadata) = headers
            .get(header)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
    }
    metadata
}

/// Write stored HTTP metadata as response headers
pub fn write_metadata_headers(metadata: &HttpMetadata, headers: &mut HeaderMap) {
    let mut metadata = metadata.clone();
    for (header, slot) in METADATA_HEADERS {
        if let Some(value) = slot(&mut metadata).take().and_then(|v| v.parse().ok()) {
            headers.insert(header, value);
        }
    }
}

/// POST `action=mpu-create`
pub async fn create_upload(store: &dyn ObjectStore, key: &str, headers: &HeaderMap) -> ActionResult {
    let metadata = metadata_from_headers(headers);
    let created = store.create_multipart_upload(key, metadata).await?;
    logger::log_debug(&format!(
        "[Upload] Created {} for key {}",
        created.upload_id, created.key
    ));
    Ok(http_util::json_response(StatusCode::OK, &created))
}

/// POST `action=mpu-complete`
pub async fn complete_upload(
    store: &dyn ObjectStore,
    key: &str,
    query: &QueryParams,
    headers: &HeaderMap,
    request_body: RequestBody,
    max_body_size: u64,
) -> ActionResult {
    let upload_id = query
        .get("uploadId")
        .ok_or(GatewayError::MissingParameter("Missing uploadId"))?;
    let upload = store.resume_multipart_upload(key, upload_id);

    if body::exceeds_declared_length(headers, max_body_size) {
        return Err(GatewayError::PayloadTooLarge);
    }
    let raw = body::read_limited(request_body, max_body_size)
        .await
        .map_err(|e| match e {
            BodyReadError::TooLarge { .. } => GatewayError::PayloadTooLarge,
            BodyReadError::Io(e) => {
                logger::log_warning(&format!("Failed to read completion body: {e}"));
                GatewayError::IncompleteBody
            }
        })?;
    let complete: CompleteBody =
        serde_json::from_slice(&raw).map_err(|_| GatewayError::IncompleteBody)?;

    let object = upload
        .complete(&complete.parts)
        .await
        .map_err(|e| GatewayError::from_store(e, ErrorFormat::Json))?;
    logger::log_debug(&format!(
        "[Upload] Completed {} for key {} ({} parts, {} bytes)",
        upload.upload_id(),
        upload.key(),
        complete.parts.len(),
        object.size
    ));

    let mut response = http_util::empty_response(StatusCode::OK);
    if let Ok(etag) = object.http_etag().parse() {
        response.headers_mut().insert(ETAG, etag);
    }
    Ok(response)
}

/// GET `action=get`
pub async fn get_object(store: &dyn ObjectStore, key: &str) -> ActionResult {
    let object = store.get(key).await?.ok_or(GatewayError::ObjectNotFound)?;

    let mut response = Response::new(body::from_stream(object.body));
    let headers = response.headers_mut();
    write_metadata_headers(&object.info.http_metadata, headers);
    headers.insert(CONTENT_LENGTH, object.info.size.into());
    if let Ok(etag) = object.info.http_etag().parse() {
        headers.insert(ETAG, etag);
    }
    Ok(response)
}

/// PUT `action=mpu-uploadpart`
pub async fn upload_part(
    store: &dyn ObjectStore,
    key: &str,
    query: &QueryParams,
    request_body: RequestBody,
) -> ActionResult {
    let (Some(upload_id), Some(part_number)) = (query.get("uploadId"), query.get("partNumber"))
    else {
        return Err(GatewayError::MissingParameter("Missing partNumber or uploadId"));
    };
    if body::is_missing(&request_body) {
        return Err(GatewayError::MissingBody);
    }
    let part_number: u32 = part_number
        .parse()
        .map_err(|_| GatewayError::InvalidPartNumber(part_number.to_string()))?;

    let upload = store.resume_multipart_upload(key, upload_id);
    let part = upload
        .upload_part(part_number, body::into_stream(request_body))
        .await
        .map_err(|e| GatewayError::from_store(e, ErrorFormat::Text))?;
    Ok(http_util::json_response(StatusCode::OK, &part))
}

/// DELETE `action=mpu-abort`
pub async fn abort_upload(store: &dyn ObjectStore, key: &str, query: &QueryParams) -> ActionResult {
    let upload_id = query
        .get("uploadId")
        .ok_or(GatewayError::MissingParameter("Missing uploadId"))?;
    let upload = store.resume_multipart_upload(key, upload_id);
    upload
        .abort()
        .await
        .map_err(|e| GatewayError::from_store(e, ErrorFormat::Text))?;
    logger::log_debug(&format!(
        "[Upload] Aborted {} for key {}",
        upload.upload_id(),
        upload.key()
    ));
    Ok(http_util::text_response(StatusCode::NO_CONTENT, upload_id))
}

/// DELETE `action=delete`
pub async fn delete_object(store: &dyn ObjectStore, key: &str) -> ActionResult {
    store.delete(key).await?;
    Ok(http_util::text_response(StatusCode::NO_CONTENT, key))
}
