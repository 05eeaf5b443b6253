// Directory-backed object store
//
// Layout under the configured root:
//   objects/<md5 of key>.json        object manifest (ObjectInfo + data file)
//   objects/data/<uuid>              object body
//   uploads/<upload id>/upload.json  pending upload (key + http metadata)
//   uploads/<upload id>/<n>.json     part record (etag + data file)
//   uploads/<upload id>/<uuid>.part  part body
//   tmp/                             staging area for atomic renames
//
// Every record is committed by a single rename of its manifest. Bodies are
// written under fresh names first, so a manifest never points at data it
// does not describe. Superseded bodies are removed after the commit.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use super::etag::{self, MultipartEtag, StreamingEtag};
use super::{
    check_completion_list, check_part_number, ByteStream, HttpMetadata, MultipartUpload,
    MultipartUploadInfo, ObjectBody, ObjectInfo, ObjectStore, StoreError, UploadedPart,
};
use crate::logger;

const UPLOAD_MANIFEST: &str = "upload.json";

/// Attempts at opening an object body that a concurrent overwrite removed
const OPEN_ATTEMPTS: usize = 3;

#[derive(Debug, Serialize, Deserialize)]
struct UploadManifest {
    key: String,
    #[serde(default)]
    http_metadata: HttpMetadata,
}

/// Committed object: its description and the body file it owns
#[derive(Debug, Serialize, Deserialize)]
struct ObjectManifest {
    info: ObjectInfo,
    data: String,
}

/// Committed part: its etag and the body file it owns
#[derive(Debug, Serialize, Deserialize)]
struct PartRecord {
    etag: String,
    data: String,
}

#[derive(Debug)]
struct Layout {
    objects: PathBuf,
    object_bodies: PathBuf,
    uploads: PathBuf,
    tmp: PathBuf,
}

impl Layout {
    /// Manifest path. Keys are hashed so file names have a fixed length
    /// whatever the key looks like.
    fn object_manifest(&self, key: &str) -> PathBuf {
        self.objects.join(format!("{}.json", etag::content_etag(key.as_bytes())))
    }

    fn object_body(&self, data: &str) -> PathBuf {
        self.object_bodies.join(data)
    }

    /// Directory of an upload session. Upload ids that are not UUIDs were
    /// never issued by this store and must not reach the filesystem.
    fn upload_dir(&self, upload_id: &str) -> Option<PathBuf> {
        Uuid::parse_str(upload_id)
            .ok()
            .map(|id| self.uploads.join(id.to_string()))
    }

    fn staging_file(&self) -> PathBuf {
        self.tmp.join(Uuid::new_v4().to_string())
    }

    /// Manifest of `key`, `None` if absent or owned by a colliding key
    async fn read_object(&self, key: &str) -> Result<Option<ObjectManifest>, StoreError> {
        Ok(read_json::<ObjectManifest>(&self.object_manifest(key))
            .await?
            .filter(|manifest| manifest.info.key == key))
    }

    /// Move a staged body into place and commit `info` as the object's
    /// current version
    async fn commit_object(&self, info: ObjectInfo, staged: &Path) -> Result<(), StoreError> {
        let data = Uuid::new_v4().to_string();
        let body = self.object_body(&data);
        fs::rename(staged, &body).await?;

        let previous = self.read_object(&info.key).await.ok().flatten();
        let manifest_path = self.object_manifest(&info.key);
        let manifest = ObjectManifest { info, data };
        if let Err(e) = write_json(self, &manifest_path, &manifest).await {
            let _ = fs::remove_file(&body).await;
            return Err(e);
        }

        if let Some(previous) = previous {
            discard(&self.object_body(&previous.data)).await;
        }
        Ok(())
    }
}

/// Object store persisting objects and pending uploads under a directory
#[derive(Debug, Clone)]
pub struct DiskStore {
    layout: Arc<Layout>,
}

impl DiskStore {
    /// Open (and create if needed) a store rooted at `root`
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref();
        let objects = root.join("objects");
        let layout = Layout {
            object_bodies: objects.join("data"),
            objects,
            uploads: root.join("uploads"),
            tmp: root.join("tmp"),
        };
        fs::create_dir_all(&layout.object_bodies).await?;
        fs::create_dir_all(&layout.uploads).await?;
        fs::create_dir_all(&layout.tmp).await?;
        Ok(Self {
            layout: Arc::new(layout),
        })
    }
}

#[async_trait]
impl ObjectStore for DiskStore {
    async fn create_multipart_upload(
        &self,
        key: &str,
        http_metadata: HttpMetadata,
    ) -> Result<MultipartUploadInfo, StoreError> {
        let upload_id = Uuid::new_v4().to_string();
        let dir = self.layout.uploads.join(&upload_id);
        fs::create_dir_all(&dir).await?;

        let manifest = UploadManifest {
            key: key.to_string(),
            http_metadata,
        };
        write_json(&self.layout, &dir.join(UPLOAD_MANIFEST), &manifest).await?;

        Ok(MultipartUploadInfo {
            key: key.to_string(),
            upload_id,
        })
    }

    fn resume_multipart_upload(&self, key: &str, upload_id: &str) -> Box<dyn MultipartUpload> {
        Box::new(DiskUpload {
            layout: Arc::clone(&self.layout),
            key: key.to_string(),
            upload_id: upload_id.to_string(),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<ObjectBody>, StoreError> {
        // An overwrite between reading the manifest and opening the body
        // removes the old body; the new manifest is picked up on retry
        for _ in 0..OPEN_ATTEMPTS {
            let Some(manifest) = self.layout.read_object(key).await? else {
                return Ok(None);
            };
            match File::open(self.layout.object_body(&manifest.data)).await {
                Ok(file) => {
                    return Ok(Some(ObjectBody {
                        info: manifest.info,
                        body: ReaderStream::new(file).boxed(),
                    }))
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let Some(manifest) = self.layout.read_object(key).await? else {
            return Ok(());
        };
        remove_if_exists(&self.layout.object_manifest(key)).await?;
        discard(&self.layout.object_body(&manifest.data)).await;
        Ok(())
    }
}

struct DiskUpload {
    layout: Arc<Layout>,
    key: String,
    upload_id: String,
}

impl DiskUpload {
    /// Load the manifest of this session, failing with `NoSuchUpload` if it
    /// is gone or was created for another key
    async fn manifest(&self) -> Result<(PathBuf, UploadManifest), StoreError> {
        let no_such_upload = || StoreError::no_such_upload(&self.upload_id);
        let dir = self.layout.upload_dir(&self.upload_id).ok_or_else(no_such_upload)?;
        let manifest = read_json::<UploadManifest>(&dir.join(UPLOAD_MANIFEST))
            .await?
            .filter(|manifest| manifest.key == self.key)
            .ok_or_else(no_such_upload)?;
        Ok((dir, manifest))
    }

    /// Stream `body` into the staging area, returning the staged path and
    /// the body's digest
    async fn stage(&self, mut body: ByteStream) -> Result<(PathBuf, [u8; 16]), StoreError> {
        let staging = self.layout.staging_file();
        let mut file = File::create(&staging).await?;
        let mut hasher = StreamingEtag::new();
        let written: Result<(), StoreError> = async {
            while let Some(chunk) = body.try_next().await? {
                hasher.update(&chunk);
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;
        drop(file);
        if let Err(e) = written {
            let _ = fs::remove_file(&staging).await;
            return Err(e);
        }
        Ok((staging, hasher.finish()))
    }

    /// Map a missing upload directory to `NoSuchUpload`; the session was
    /// completed or aborted while this request was running
    fn gone(&self, e: io::Error) -> StoreError {
        if e.kind() == io::ErrorKind::NotFound {
            StoreError::no_such_upload(&self.upload_id)
        } else {
            e.into()
        }
    }
}

fn part_record(dir: &Path, part_number: u32) -> PathBuf {
    dir.join(format!("{part_number}.json"))
}

#[async_trait]
impl MultipartUpload for DiskUpload {
    fn key(&self) -> &str {
        &self.key
    }

    fn upload_id(&self) -> &str {
        &self.upload_id
    }

    async fn upload_part(
        &self,
        part_number: u32,
        body: ByteStream,
    ) -> Result<UploadedPart, StoreError> {
        check_part_number(part_number)?;
        let (dir, _) = self.manifest().await?;

        let (staging, digest) = self.stage(body).await?;
        let data = format!("{}.part", Uuid::new_v4());
        let part_body = dir.join(&data);
        if let Err(e) = fs::rename(&staging, &part_body).await {
            let _ = fs::remove_file(&staging).await;
            return Err(self.gone(e));
        }

        let record_path = part_record(&dir, part_number);
        let previous = read_json::<PartRecord>(&record_path).await.ok().flatten();
        let record = PartRecord {
            etag: hex::encode(digest),
            data,
        };
        let committed = match serde_json::to_vec(&record) {
            Ok(raw) => write_atomic(&self.layout, &record_path, &raw)
                .await
                .map_err(|e| self.gone(e)),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = committed {
            let _ = fs::remove_file(&part_body).await;
            return Err(e);
        }

        if let Some(previous) = previous {
            discard(&dir.join(previous.data)).await;
        }
        Ok(UploadedPart {
            part_number,
            etag: record.etag,
        })
    }

    async fn complete(&self, parts: &[UploadedPart]) -> Result<ObjectInfo, StoreError> {
        check_completion_list(parts)?;
        let (dir, manifest) = self.manifest().await?;

        let mut combined = MultipartEtag::new();
        let mut bodies = Vec::with_capacity(parts.len());
        for listed in parts {
            let invalid = || StoreError::InvalidPart {
                part_number: listed.part_number,
            };
            let record = read_json::<PartRecord>(&part_record(&dir, listed.part_number))
                .await?
                .filter(|record| record.etag == etag::normalize(&listed.etag))
                .ok_or_else(invalid)?;
            let digest = hex::decode(&record.etag).map_err(|_| invalid())?;
            combined.push(&digest);
            bodies.push((listed.part_number, dir.join(record.data)));
        }

        let staging = self.layout.staging_file();
        let size = match concat_parts(&staging, &bodies).await {
            Ok(size) => size,
            Err(e) => {
                let _ = fs::remove_file(&staging).await;
                return Err(e);
            }
        };

        let info = ObjectInfo {
            key: self.key.clone(),
            size,
            etag: combined.finish(),
            uploaded: Utc::now(),
            http_metadata: manifest.http_metadata,
        };
        if let Err(e) = self.layout.commit_object(info.clone(), &staging).await {
            let _ = fs::remove_file(&staging).await;
            return Err(e);
        }
        fs::remove_dir_all(&dir).await?;

        Ok(info)
    }

    async fn abort(&self) -> Result<(), StoreError> {
        let (dir, _) = self.manifest().await?;
        fs::remove_dir_all(&dir).await.map_err(|e| self.gone(e))
    }
}

/// Concatenate part bodies into `target`, returning the total size
async fn concat_parts(target: &Path, bodies: &[(u32, PathBuf)]) -> Result<u64, StoreError> {
    let mut out = File::create(target).await?;
    let mut size = 0u64;
    for (part_number, path) in bodies {
        let mut part = match File::open(path).await {
            Ok(file) => file,
            // Replaced by a concurrent re-upload of the same part
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::InvalidPart {
                    part_number: *part_number,
                })
            }
            Err(e) => return Err(e.into()),
        };
        size += tokio::io::copy(&mut part, &mut out).await?;
    }
    out.flush().await?;
    out.sync_all().await?;
    Ok(size)
}

/// Read and parse a JSON file, `None` if it does not exist
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match fs::read(path).await {
        Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: Serialize>(
    layout: &Layout,
    path: &Path,
    value: &T,
) -> Result<(), StoreError> {
    write_atomic(layout, path, &serde_json::to_vec(value)?).await?;
    Ok(())
}

async fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Remove a body no manifest points at any more. Failure only leaks space.
async fn discard(path: &Path) {
    if let Err(e) = remove_if_exists(path).await {
        logger::log_warning(&format!(
            "Failed to remove superseded file {}: {e}",
            path.display()
        ));
    }
}

/// Write a small file through the staging area so readers never see a
/// partially written file
async fn write_atomic(layout: &Layout, path: &Path, data: &[u8]) -> io::Result<()> {
    let staging = layout.staging_file();
    fs::write(&staging, data).await?;
    if let Err(e) = fs::rename(&staging, path).await {
        let _ = fs::remove_file(&staging).await;
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;

    fn body(data: &'static [u8]) -> ByteStream {
        // Split into small chunks to exercise streaming writes
        let chunks: Vec<io::Result<Bytes>> = data
            .chunks(3)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        stream::iter(chunks).boxed()
    }

    async fn read_all(mut body: ByteStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = body.try_next().await.unwrap() {
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[tokio::test]
    async fn test_multipart_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();
        let metadata = HttpMetadata {
            content_type: Some("video/mp4".to_string()),
            cache_control: Some("no-cache".to_string()),
            ..HttpMetadata::default()
        };

        let created = store
            .create_multipart_upload("videos/clip 1.mp4", metadata.clone())
            .await
            .unwrap();
        let upload = store.resume_multipart_upload("videos/clip 1.mp4", &created.upload_id);
        let p1 = upload.upload_part(1, body(b"first part, ")).await.unwrap();
        let p2 = upload.upload_part(2, body(b"second part")).await.unwrap();
        assert_eq!(p1.etag, etag::content_etag(b"first part, "));

        let info = upload.complete(&[p1, p2]).await.unwrap();
        assert_eq!(info.size, 23);
        assert!(info.etag.ends_with("-2"));

        let object = store.get("videos/clip 1.mp4").await.unwrap().unwrap();
        assert_eq!(object.info, info);
        assert_eq!(object.info.http_metadata, metadata);
        assert_eq!(read_all(object.body).await, b"first part, second part");

        // Upload directory is gone once completed
        let mut entries = fs::read_dir(dir.path().join("uploads")).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reupload_replaces_part() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();
        let created = store
            .create_multipart_upload("k", HttpMetadata::default())
            .await
            .unwrap();
        let upload = store.resume_multipart_upload("k", &created.upload_id);
        upload.upload_part(1, body(b"old")).await.unwrap();
        let fresh = upload.upload_part(1, body(b"new")).await.unwrap();
        upload.complete(&[fresh]).await.unwrap();

        let object = store.get("k").await.unwrap().unwrap();
        assert_eq!(read_all(object.body).await, b"new");
    }

    #[tokio::test]
    async fn test_non_uuid_upload_id_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();
        let upload = store.resume_multipart_upload("k", "../../etc");
        assert!(matches!(
            upload.abort().await,
            Err(StoreError::NoSuchUpload { .. })
        ));
    }

    #[tokio::test]
    async fn test_abort_then_abort_again() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();
        let created = store
            .create_multipart_upload("k", HttpMetadata::default())
            .await
            .unwrap();
        let upload = store.resume_multipart_upload("k", &created.upload_id);
        upload.upload_part(1, body(b"data")).await.unwrap();
        upload.abort().await.unwrap();
        assert!(matches!(
            upload.abort().await,
            Err(StoreError::NoSuchUpload { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_part_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();
        let created = store
            .create_multipart_upload("k", HttpMetadata::default())
            .await
            .unwrap();
        let upload = store.resume_multipart_upload("k", &created.upload_id);
        let part = upload.upload_part(1, body(b"data")).await.unwrap();
        let err = upload
            .complete(&[
                part,
                UploadedPart {
                    part_number: 2,
                    etag: "00".to_string(),
                },
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPart { part_number: 2 }));
    }

    #[tokio::test]
    async fn test_get_and_delete_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();
        assert!(store.get("nothing").await.unwrap().is_none());
        store.delete("nothing").await.unwrap();
    }

    async fn put_object(store: &DiskStore, key: &str, data: &'static [u8]) -> ObjectInfo {
        let created = store
            .create_multipart_upload(key, HttpMetadata::default())
            .await
            .unwrap();
        let upload = store.resume_multipart_upload(key, &created.upload_id);
        let part = upload.upload_part(1, body(data)).await.unwrap();
        upload.complete(&[part]).await.unwrap()
    }

    async fn count_entries(dir: &Path) -> usize {
        let mut entries = fs::read_dir(dir).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        count
    }

    #[tokio::test]
    async fn test_long_keys_fit_file_name_limits() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();

        for key in ["a".repeat(300), ".".repeat(90), "%/ ?#".repeat(60)] {
            let info = put_object(&store, &key, b"payload").await;
            assert_eq!(info.key, key);

            let object = store.get(&key).await.unwrap().unwrap();
            assert_eq!(object.info.key, key);
            assert_eq!(read_all(object.body).await, b"payload");

            store.delete(&key).await.unwrap();
            assert!(store.get(&key).await.unwrap().is_none());
        }

        assert_eq!(count_entries(&dir.path().join("uploads")).await, 0);
        assert_eq!(count_entries(&dir.path().join("objects/data")).await, 0);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_body_and_manifest_together() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();

        put_object(&store, "report.csv", b"version one, longer body").await;
        let second = put_object(&store, "report.csv", b"v2").await;

        let object = store.get("report.csv").await.unwrap().unwrap();
        assert_eq!(object.info, second);
        assert_eq!(object.info.size, 2);
        assert_eq!(read_all(object.body).await, b"v2");

        // The superseded body is gone, only the current one remains
        assert_eq!(count_entries(&dir.path().join("objects/data")).await, 1);
    }

    #[tokio::test]
    async fn test_reupload_leaves_single_part_body() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();
        let created = store
            .create_multipart_upload("k", HttpMetadata::default())
            .await
            .unwrap();
        let upload = store.resume_multipart_upload("k", &created.upload_id);
        let stale = upload.upload_part(1, body(b"first try")).await.unwrap();
        upload.upload_part(1, body(b"second try")).await.unwrap();

        // upload.json, 1.json and one part body
        let session = dir.path().join("uploads").join(&created.upload_id);
        assert_eq!(count_entries(&session).await, 3);

        // The record now describes the second body only
        let err = upload.complete(&[stale]).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidPart { part_number: 1 }));
    }
}
