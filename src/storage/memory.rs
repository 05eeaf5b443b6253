// In-memory object store
// Keeps objects and pending multipart uploads in process-local maps

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::{stream, StreamExt, TryStreamExt};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::etag::{self, MultipartEtag};
use super::{
    check_completion_list, check_part_number, ByteStream, HttpMetadata, MultipartUpload,
    MultipartUploadInfo, ObjectBody, ObjectInfo, ObjectStore, StoreError, UploadedPart,
};

struct StoredObject {
    info: ObjectInfo,
    data: Bytes,
}

struct StoredPart {
    data: Bytes,
    digest: [u8; 16],
}

struct PendingUpload {
    key: String,
    http_metadata: HttpMetadata,
    parts: BTreeMap<u32, StoredPart>,
}

#[derive(Default)]
struct Inner {
    objects: RwLock<HashMap<String, StoredObject>>,
    uploads: RwLock<HashMap<String, PendingUpload>>,
}

/// Process-local object store
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a whole object directly, bypassing the multipart flow
    #[cfg(test)]
    pub async fn insert(&self, key: &str, data: impl Into<Bytes>, http_metadata: HttpMetadata) {
        let data = data.into();
        let info = ObjectInfo {
            key: key.to_string(),
            size: data.len() as u64,
            etag: etag::content_etag(&data),
            uploaded: Utc::now(),
            http_metadata,
        };
        self.inner
            .objects
            .write()
            .await
            .insert(key.to_string(), StoredObject { info, data });
    }

    /// Number of multipart uploads still pending
    #[cfg(test)]
    pub async fn pending_uploads(&self) -> usize {
        self.inner.uploads.read().await.len()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn create_multipart_upload(
        &self,
        key: &str,
        http_metadata: HttpMetadata,
    ) -> Result<MultipartUploadInfo, StoreError> {
        let upload_id = Uuid::new_v4().to_string();
        self.inner.uploads.write().await.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                http_metadata,
                parts: BTreeMap::new(),
            },
        );
        Ok(MultipartUploadInfo {
            key: key.to_string(),
            upload_id,
        })
    }

    fn resume_multipart_upload(&self, key: &str, upload_id: &str) -> Box<dyn MultipartUpload> {
        Box::new(MemoryUpload {
            inner: Arc::clone(&self.inner),
            key: key.to_string(),
            upload_id: upload_id.to_string(),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<ObjectBody>, StoreError> {
        let objects = self.inner.objects.read().await;
        Ok(objects.get(key).map(|object| {
            let data = object.data.clone();
            ObjectBody {
                info: object.info.clone(),
                body: stream::once(async move { Ok::<_, std::io::Error>(data) }).boxed(),
            }
        }))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.objects.write().await.remove(key);
        Ok(())
    }
}

struct MemoryUpload {
    inner: Arc<Inner>,
    key: String,
    upload_id: String,
}

impl MemoryUpload {
    fn belongs(&self, upload: &PendingUpload) -> bool {
        upload.key == self.key
    }

    async fn ensure_exists(&self) -> Result<(), StoreError> {
        let uploads = self.inner.uploads.read().await;
        match uploads.get(&self.upload_id) {
            Some(upload) if self.belongs(upload) => Ok(()),
            _ => Err(StoreError::no_such_upload(&self.upload_id)),
        }
    }
}

#[async_trait]
impl MultipartUpload for MemoryUpload {
    fn key(&self) -> &str {
        &self.key
    }

    fn upload_id(&self) -> &str {
        &self.upload_id
    }

    async fn upload_part(
        &self,
        part_number: u32,
        mut body: ByteStream,
    ) -> Result<UploadedPart, StoreError> {
        check_part_number(part_number)?;
        self.ensure_exists().await?;

        let mut buf = BytesMut::new();
        while let Some(chunk) = body.try_next().await? {
            buf.extend_from_slice(&chunk);
        }
        let data = buf.freeze();
        let digest = md5::compute(&data).0;

        // The session may have been completed or aborted while the body streamed in
        let mut uploads = self.inner.uploads.write().await;
        let upload = uploads
            .get_mut(&self.upload_id)
            .filter(|upload| upload.key == self.key)
            .ok_or_else(|| StoreError::no_such_upload(&self.upload_id))?;
        upload.parts.insert(part_number, StoredPart { data, digest });

        Ok(UploadedPart {
            part_number,
            etag: hex::encode(digest),
        })
    }

    async fn complete(&self, parts: &[UploadedPart]) -> Result<ObjectInfo, StoreError> {
        check_completion_list(parts)?;

        let mut uploads = self.inner.uploads.write().await;
        let upload = uploads
            .get(&self.upload_id)
            .filter(|upload| self.belongs(upload))
            .ok_or_else(|| StoreError::no_such_upload(&self.upload_id))?;

        let mut combined = MultipartEtag::new();
        let mut buf = BytesMut::new();
        for listed in parts {
            let stored = upload
                .parts
                .get(&listed.part_number)
                .filter(|stored| hex::encode(stored.digest) == etag::normalize(&listed.etag))
                .ok_or(StoreError::InvalidPart {
                    part_number: listed.part_number,
                })?;
            combined.push(&stored.digest);
            buf.extend_from_slice(&stored.data);
        }

        let data = buf.freeze();
        let info = ObjectInfo {
            key: self.key.clone(),
            size: data.len() as u64,
            etag: combined.finish(),
            uploaded: Utc::now(),
            http_metadata: upload.http_metadata.clone(),
        };
        uploads.remove(&self.upload_id);
        drop(uploads);

        self.inner.objects.write().await.insert(
            self.key.clone(),
            StoredObject {
                info: info.clone(),
                data,
            },
        );
        Ok(info)
    }

    async fn abort(&self) -> Result<(), StoreError> {
        let mut uploads = self.inner.uploads.write().await;
        match uploads.get(&self.upload_id) {
            Some(upload) if self.belongs(upload) => {
                uploads.remove(&self.upload_id);
                Ok(())
            }
            _ => Err(StoreError::no_such_upload(&self.upload_id)),
        }
    }
}
