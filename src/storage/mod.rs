//! Object storage backend module
//!
//! Defines the narrow contract the gateway needs from an object store:
//! multipart sessions (create, resume, upload part, complete, abort) plus
//! plain get and delete. All durability, part assembly and validation is
//! the backend's job; the request router only forwards calls.
//!
//! Two bindings ship with the crate:
//! - [`MemoryStore`]: process-local, used by default and in tests
//! - [`DiskStore`]: directory-backed, streams bodies to and from files

mod disk;
mod error;
pub mod etag;
mod memory;

use std::io;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::config::{StorageBackend, StorageConfig};

pub use disk::DiskStore;
pub use error::StoreError;
pub use memory::MemoryStore;

/// Lowest and highest part numbers a multipart upload accepts
pub const MIN_PART_NUMBER: u32 = 1;
pub const MAX_PART_NUMBER: u32 = 10_000;

/// Streaming object or part body
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// HTTP metadata stored alongside an object and replayed on reads
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
}

/// Handle returned when a multipart upload is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartUploadInfo {
    pub key: String,
    pub upload_id: String,
}

/// Descriptor of an uploaded part, as returned by `upload_part` and as
/// listed by clients when completing an upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Stored object description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    /// Unquoted content hash
    pub etag: String,
    pub uploaded: DateTime<Utc>,
    #[serde(default)]
    pub http_metadata: HttpMetadata,
}

impl ObjectInfo {
    /// Quoted etag suitable for an `ETag` response header
    pub fn http_etag(&self) -> String {
        etag::quote(&self.etag)
    }
}

/// Object description plus its body stream
pub struct ObjectBody {
    pub info: ObjectInfo,
    pub body: ByteStream,
}

impl std::fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBody")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Object storage contract used by the request router
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Start a new multipart upload for `key`
    async fn create_multipart_upload(
        &self,
        key: &str,
        http_metadata: HttpMetadata,
    ) -> Result<MultipartUploadInfo, StoreError>;

    /// Build a handle for an existing upload session.
    ///
    /// Never fails: whether the session exists is only known once an
    /// operation is attempted through the handle.
    fn resume_multipart_upload(&self, key: &str, upload_id: &str) -> Box<dyn MultipartUpload>;

    /// Fetch an object, `None` if it does not exist
    async fn get(&self, key: &str) -> Result<Option<ObjectBody>, StoreError>;

    /// Delete an object; deleting a missing key is not an error
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Operations on a resumed multipart upload session
#[async_trait]
pub trait MultipartUpload: Send + Sync {
    fn key(&self) -> &str;

    fn upload_id(&self) -> &str;

    /// Store one part. Re-uploading a part number replaces the earlier part.
    async fn upload_part(&self, part_number: u32, body: ByteStream)
        -> Result<UploadedPart, StoreError>;

    /// Assemble the listed parts into the final object
    async fn complete(&self, parts: &[UploadedPart]) -> Result<ObjectInfo, StoreError>;

    /// Discard the session and every part uploaded to it
    async fn abort(&self) -> Result<(), StoreError>;
}

/// Open the configured storage backend
pub async fn open(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>, StoreError> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageBackend::Disk => Ok(Arc::new(DiskStore::open(&config.root).await?)),
    }
}

/// Validate a part number against the accepted range
pub(crate) const fn check_part_number(part_number: u32) -> Result<(), StoreError> {
    if part_number < MIN_PART_NUMBER || part_number > MAX_PART_NUMBER {
        return Err(StoreError::InvalidPartNumber(part_number));
    }
    Ok(())
}

/// Validate a completion list: non-empty and strictly ascending part numbers
pub(crate) fn check_completion_list(parts: &[UploadedPart]) -> Result<(), StoreError> {
    if parts.is_empty() {
        return Err(StoreError::NoParts);
    }
    if parts
        .windows(2)
        .any(|pair| pair[0].part_number >= pair[1].part_number)
    {
        return Err(StoreError::InvalidPartOrder);
    }
    Ok(())
}
