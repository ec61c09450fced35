//! In-process backend.
//!
//! Keeps objects and pending multipart uploads in memory behind a mutex and
//! speaks the same request/response contract as a remote provider, error
//! codes included. Listings are paged in lexicographic key order with
//! base64-encoded continuation tokens.

use crate::{
    backends::{
        BackendClient, ByteRange, ByteStream, Feature, RemoteMetadata, RemotePage, WriteOptions,
        encode_base64,
    },
    errors::{ErrorKind, RemoteError, RemoteResult},
    models::CompletedPart,
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::{
    collections::{BTreeMap, HashMap},
    io::Cursor,
    sync::{Arc, Mutex, MutexGuard},
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

pub const TYPE: &str = "memory";

pub const FEATURES: &[Feature] = &[Feature::Segment, Feature::ContentMd5, Feature::RangeRead];

pub const WRITE_SIZE_MAXIMUM: u64 = 64 * 1024 * 1024;

pub const ERROR_CODES: &[(&str, ErrorKind)] = &[
    ("NoSuchKey", ErrorKind::NotExist),
    ("NoSuchUpload", ErrorKind::NotExist),
    ("AccessDenied", ErrorKind::PermissionDenied),
];

const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Clone, Debug)]
struct StoredObject {
    data: Bytes,
    content_type: Option<String>,
    content_md5: [u8; 16],
    etag: String,
    last_modified: DateTime<Utc>,
    storage_class: Option<String>,
}

#[derive(Debug)]
struct PendingUpload {
    key: String,
    opts: WriteOptions,
    parts: BTreeMap<u32, Bytes>,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<String, StoredObject>,
    uploads: HashMap<String, PendingUpload>,
}

/// In-memory [`BackendClient`]. Clones share the same store.
#[derive(Clone, Debug)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    page_size: usize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Limit listing pages to `page_size` entries (clamped to 1..=1000).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, DEFAULT_PAGE_SIZE);
        self
    }

    /// Stored payload for a provider-absolute key.
    pub fn contents(&self, key: &str) -> Option<Bytes> {
        self.state().objects.get(key).map(|o| o.data.clone())
    }

    pub fn object_count(&self) -> usize {
        self.state().objects.len()
    }

    /// Number of multipart uploads initiated but neither completed nor aborted.
    pub fn pending_uploads(&self) -> usize {
        self.state().uploads.len()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn store(&self, key: &str, data: Bytes, opts: &WriteOptions) -> RemoteResult<()> {
        let digest = md5::compute(&data);
        if let Some(expected) = &opts.content_md5 {
            if *expected != encode_base64(&digest.0) {
                return Err(RemoteError::new(
                    400,
                    "BadDigest",
                    "the Content-MD5 you specified did not match what we received",
                ));
            }
        }
        let object = StoredObject {
            data,
            content_type: opts.content_type.clone(),
            content_md5: digest.0,
            etag: format!("{:x}", digest),
            last_modified: Utc::now(),
            storage_class: opts.storage_class.clone(),
        };
        self.state().objects.insert(key.to_string(), object);
        Ok(())
    }
}

fn no_such_key(key: &str) -> RemoteError {
    RemoteError::new(404, "NoSuchKey", format!("key `{}` does not exist", key))
}

fn no_such_upload(upload_id: &str) -> RemoteError {
    RemoteError::new(
        404,
        "NoSuchUpload",
        format!("upload `{}` does not exist", upload_id),
    )
}

fn metadata(key: &str, o: &StoredObject) -> RemoteMetadata {
    RemoteMetadata {
        key: key.to_string(),
        content_length: Some(o.data.len() as u64),
        content_type: o.content_type.clone(),
        content_md5: Some(o.content_md5.to_vec()),
        etag: Some(o.etag.clone()),
        last_modified: Some(o.last_modified),
        storage_class: o.storage_class.clone(),
        ..Default::default()
    }
}

/// Drain `body`, insisting on exactly `expected` bytes.
async fn collect(mut body: ByteStream, expected: u64) -> RemoteResult<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|err| RemoteError::transport(err.to_string()))?;
        buf.extend_from_slice(&chunk);
    }
    if buf.len() as u64 != expected {
        return Err(RemoteError::new(
            400,
            "IncompleteBody",
            format!("expected {} bytes, received {}", expected, buf.len()),
        ));
    }
    Ok(buf.freeze())
}

fn encode_continuation_token(key: &str) -> String {
    general_purpose::STANDARD.encode(key)
}

fn decode_continuation_token(token: &str) -> String {
    general_purpose::STANDARD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| token.to_string())
}

#[async_trait]
impl BackendClient for MemoryBackend {
    async fn stat(&self, key: &str) -> RemoteResult<RemoteMetadata> {
        let state = self.state();
        let object = state.objects.get(key).ok_or_else(|| no_such_key(key))?;
        Ok(metadata(key, object))
    }

    async fn read(&self, key: &str, range: Option<ByteRange>) -> RemoteResult<ByteStream> {
        let data = {
            let state = self.state();
            state
                .objects
                .get(key)
                .ok_or_else(|| no_such_key(key))?
                .data
                .clone()
        };
        let data = match range {
            None => data,
            Some(range) => {
                let len = data.len() as u64;
                if range.offset > len {
                    return Err(RemoteError::new(
                        416,
                        "InvalidRange",
                        format!("offset {} beyond object length {}", range.offset, len),
                    ));
                }
                let end = match range.size {
                    Some(size) => range.offset.saturating_add(size).min(len),
                    None => len,
                };
                data.slice(range.offset as usize..end as usize)
            }
        };
        Ok(ReaderStream::new(Cursor::new(data)).boxed())
    }

    async fn write(
        &self,
        key: &str,
        size: u64,
        body: ByteStream,
        opts: &WriteOptions,
    ) -> RemoteResult<()> {
        let data = collect(body, size).await?;
        self.store(key, data, opts)
    }

    async fn delete(&self, key: &str) -> RemoteResult<()> {
        match self.state().objects.remove(key) {
            Some(_) => Ok(()),
            None => Err(no_such_key(key)),
        }
    }

    async fn list(&self, prefix: &str, cursor: Option<&str>) -> RemoteResult<RemotePage> {
        let start_after = cursor.map(decode_continuation_token);
        let state = self.state();
        let mut entries: Vec<RemoteMetadata> = state
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| start_after.as_deref().is_none_or(|after| key.as_str() > after))
            .take(self.page_size + 1)
            .map(|(key, o)| metadata(key, o))
            .collect();

        let mut next_cursor = None;
        if entries.len() > self.page_size {
            entries.truncate(self.page_size);
            next_cursor = entries.last().map(|e| encode_continuation_token(&e.key));
        }
        Ok(RemotePage {
            entries,
            next_cursor,
        })
    }

    async fn initiate_upload(&self, key: &str, opts: &WriteOptions) -> RemoteResult<String> {
        let upload_id = Uuid::new_v4().to_string();
        self.state().uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                opts: opts.clone(),
                parts: BTreeMap::new(),
            },
        );
        debug!("initiated memory upload {} for {}", upload_id, key);
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        _offset: u64,
        size: u64,
        body: ByteStream,
    ) -> RemoteResult<()> {
        let data = collect(body, size).await?;
        let mut state = self.state();
        let upload = state
            .uploads
            .get_mut(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| no_such_upload(upload_id))?;
        upload.parts.insert(part_number, data);
        Ok(())
    }

    async fn complete_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> RemoteResult<()> {
        let (data, opts) = {
            let state = self.state();
            let upload = state
                .uploads
                .get(upload_id)
                .filter(|u| u.key == key)
                .ok_or_else(|| no_such_upload(upload_id))?;
            let mut buf = BytesMut::new();
            for part in parts {
                let data = upload
                    .parts
                    .get(&part.number)
                    .filter(|d| d.len() as u64 == part.size)
                    .ok_or_else(|| {
                        RemoteError::new(
                            400,
                            "InvalidPart",
                            format!("part {} is missing or has a different size", part.number),
                        )
                    })?;
                buf.extend_from_slice(data);
            }
            (buf.freeze(), upload.opts.clone())
        };
        // Whole-object digests do not apply to assembled uploads.
        let opts = WriteOptions {
            content_md5: None,
            ..opts
        };
        self.store(key, data, &opts)?;
        self.state().uploads.remove(upload_id);
        Ok(())
    }

    async fn abort_upload(&self, key: &str, upload_id: &str) -> RemoteResult<()> {
        let mut state = self.state();
        match state.uploads.get(upload_id) {
            Some(upload) if upload.key == key => {
                state.uploads.remove(upload_id);
                Ok(())
            }
            _ => Err(no_such_upload(upload_id)),
        }
    }
}
