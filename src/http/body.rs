//! Body adapters
//!
//! Requests and responses both use a boxed body with `io::Error` as the
//! error type, so object and part bodies can be streamed between hyper and
//! the storage backend without buffering.

use std::io;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, LengthLimitError, Limited, StreamBody};
use hyper::body::{Body, Frame, Incoming};
use hyper::HeaderMap;
use thiserror::Error;

use crate::logger;
use crate::storage::ByteStream;

/// Request body as seen by the router
pub type RequestBody = UnsyncBoxBody<Bytes, io::Error>;

/// Response body produced by the router
pub type ResponseBody = UnsyncBoxBody<Bytes, io::Error>;

/// Errors while reading a bounded body into memory
#[derive(Debug, Error)]
pub enum BodyReadError {
    #[error("body exceeds {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("failed to read request body: {0}")]
    Io(#[from] io::Error),
}

/// Adapt hyper's incoming body
pub fn from_incoming(body: Incoming) -> RequestBody {
    body.map_err(io::Error::other).boxed_unsync()
}

/// Whether the request carries no body at all
pub fn is_missing(body: &RequestBody) -> bool {
    body.is_end_stream()
}

/// Turn a request body into a byte stream for the storage backend
pub fn into_stream(body: RequestBody) -> ByteStream {
    body.into_data_stream().boxed()
}

/// Buffered response body
pub fn full(data: impl Into<Bytes>) -> ResponseBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

pub fn empty() -> ResponseBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Streaming response body
pub fn from_stream(stream: ByteStream) -> ResponseBody {
    StreamBody::new(stream.map_ok(Frame::data)).boxed_unsync()
}

/// Check a declared Content-Length against a limit
pub fn exceeds_declared_length(headers: &HeaderMap, limit: u64) -> bool {
    let Some(content_length) = headers.get(hyper::header::CONTENT_LENGTH) else {
        return false;
    };
    content_length.to_str().map_or_else(
        |_| {
            logger::log_warning("Content-Length header contains non-ASCII characters");
            false
        },
        |size_str| match size_str.parse::<u64>() {
            Ok(size) => size > limit,
            Err(_) => {
                logger::log_warning(&format!(
                    "Invalid Content-Length value: '{size_str}', skipping size check"
                ));
                false
            }
        },
    )
}

/// Read a whole body into memory, failing once it grows past `limit` bytes
pub async fn read_limited(body: RequestBody, limit: u64) -> Result<Bytes, BodyReadError> {
    let max = usize::try_from(limit).unwrap_or(usize::MAX);
    match Limited::new(body, max).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => Err(BodyReadError::TooLarge { limit }),
        Err(e) => Err(BodyReadError::Io(io::Error::other(e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn request_body(data: &'static str) -> RequestBody {
        Full::new(Bytes::from_static(data.as_bytes()))
            .map_err(|never| match never {})
            .boxed_unsync()
    }

    #[tokio::test]
    async fn test_read_within_limit() {
        let bytes = read_limited(request_body("{\"parts\":[]}"), 64).await.unwrap();
        assert_eq!(&bytes[..], b"{\"parts\":[]}");
    }

    #[tokio::test]
    async fn test_read_over_limit() {
        let err = read_limited(request_body("0123456789"), 4).await.unwrap_err();
        assert!(matches!(err, BodyReadError::TooLarge { limit: 4 }));
    }

    #[test]
    fn test_missing_body_detection() {
        assert!(is_missing(&empty()));
        assert!(!is_missing(&request_body("x")));
    }

    #[tokio::test]
    async fn test_stream_passthrough() {
        let chunks: Vec<io::Result<Bytes>> =
            vec![Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"cd"))];
        let body = from_stream(stream::iter(chunks).boxed());
        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(&collected[..], b"abcd");

        let mut parts = into_stream(request_body("xyz"));
        let first = parts.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"xyz");
    }

    #[test]
    fn test_declared_length_check() {
        let mut headers = HeaderMap::new();
        assert!(!exceeds_declared_length(&headers, 10));
        headers.insert(hyper::header::CONTENT_LENGTH, "11".parse().unwrap());
        assert!(exceeds_declared_length(&headers, 10));
        headers.insert(hyper::header::CONTENT_LENGTH, "abc".parse().unwrap());
        assert!(!exceeds_declared_length(&headers, 10));
    }
}
