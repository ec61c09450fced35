//! src/services/storage_service.rs
//!
//! Storage: the provider-neutral object surface. Every call is negotiated
//! against the instance's features and defaults, resolved under the work
//! dir, and handed to the injected backend client. Remote failures come back
//! normalized; segmented uploads go through the segment coordinator.

use crate::{
    backends::{
        BackendClient, ByteRange, ByteStream, CustomerKey, Features, RemoteMetadata, ServiceType,
        WriteOptions, encode_base64,
    },
    errors::{ErrorKind, Result, StorageError},
    models::{Object, ObjectPage, Pair, PairKey, PairScope, Pairs, Segment},
    services::{
        negotiator::{self, GLOBAL_REQUIRED_PAIRS, Operation, Restriction},
        normalizer::ErrorNormalizer,
        path_resolver::PathResolver,
        segment_coordinator::SegmentCoordinator,
    },
};
use futures::{
    StreamExt,
    stream::{self, BoxStream},
};
use sha2::{Digest, Sha256};
use std::{collections::VecDeque, fmt, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Length in bytes of a customer-provided AES-256 key.
const CUSTOMER_KEY_LEN: usize = 32;
const CUSTOMER_KEY_ALGORITHM: &str = "AES256";

/// One configured storage instance over one provider.
///
/// Cheap to clone; clones share the backend client and the open segments.
#[derive(Clone)]
pub struct Storage {
    service: ServiceType,
    name: String,
    resolver: PathResolver,
    features: Features,
    /// Call pairs applied when a call does not supply its own.
    defaults: Pairs,
    client: Arc<dyn BackendClient>,
    normalizer: ErrorNormalizer,
    segments: SegmentCoordinator,
}

impl Storage {
    /// Negotiate construction pairs and build an instance around `client`.
    ///
    /// `Name` is always required, plus whatever the provider requires.
    /// Call-scope pairs given here become instance defaults, layered over the
    /// provider's own defaults. The work dir defaults to `/`.
    pub fn new(
        service: ServiceType,
        client: Arc<dyn BackendClient>,
        pairs: impl IntoIterator<Item = Pair>,
    ) -> Result<Self> {
        let op = Operation::New.as_str();
        let supplied: Vec<Pair> = pairs.into_iter().collect();
        let features = service.features();
        let required: Vec<PairKey> = GLOBAL_REQUIRED_PAIRS
            .iter()
            .chain(service.required_pairs())
            .copied()
            .collect();
        let merged = negotiator::negotiate(
            &supplied,
            Restriction {
                op: Operation::New,
                required: &required,
                features: &features,
            },
            &Pairs::new(),
            "",
        )?;
        service.check_pairs(&merged).map_err(|rejection| {
            StorageError::new(
                op,
                "",
                ErrorKind::UnsupportedOption,
                format!("pair `{}`: {}", rejection.key, rejection.reason),
            )
        })?;

        let mut defaults = service.default_pairs();
        for pair in merged.iter().filter(|p| p.key().scope() == PairScope::Call) {
            defaults.insert(pair.clone());
        }
        let name = merged.name().unwrap_or_default().to_string();
        let resolver = PathResolver::new(merged.work_dir().unwrap_or("/"));
        let normalizer = ErrorNormalizer::new(service);

        debug!(
            service = %service,
            name = %name,
            work_dir = resolver.work_dir(),
            "storage configured"
        );
        Ok(Self {
            service,
            name,
            resolver,
            features,
            defaults,
            segments: SegmentCoordinator::new(client.clone(), normalizer),
            client,
            normalizer,
        })
    }

    pub fn service(&self) -> ServiceType {
        self.service
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn work_dir(&self) -> &str {
        self.resolver.work_dir()
    }

    pub fn features(&self) -> &Features {
        &self.features
    }

    pub fn defaults(&self) -> &Pairs {
        &self.defaults
    }

    fn negotiate(&self, op: Operation, path: &str, pairs: &[Pair]) -> Result<Pairs> {
        negotiator::negotiate(
            pairs,
            Restriction {
                op,
                required: &[],
                features: &self.features,
            },
            &self.defaults,
            path,
        )
    }

    fn format_object(&self, meta: &RemoteMetadata, done: bool) -> Object {
        let path = self.resolver.to_relative(&meta.key);
        self.service.format_object(meta, path, done)
    }

    /// Translate negotiated write pairs into provider terms.
    fn write_options(&self, op: Operation, path: &str, opts: &Pairs) -> Result<WriteOptions> {
        let unsupported =
            |detail: String| StorageError::new(op.as_str(), path, ErrorKind::UnsupportedOption, detail);

        let storage_class = match opts.storage_class() {
            Some(class) => Some(
                self.service
                    .native_storage_class(class)
                    .ok_or_else(|| {
                        unsupported(format!(
                            "storage class {:?} has no {} equivalent",
                            class, self.service
                        ))
                    })?
                    .to_string(),
            ),
            None => None,
        };
        let customer_key = match opts.encryption_key() {
            Some(key) if key.len() != CUSTOMER_KEY_LEN => {
                return Err(unsupported(format!(
                    "encryption key must be {} bytes, got {}",
                    CUSTOMER_KEY_LEN,
                    key.len()
                )));
            }
            Some(key) => Some(CustomerKey {
                key_base64: encode_base64(key),
                key_sha256_base64: encode_base64(&Sha256::digest(key)),
                algorithm: CUSTOMER_KEY_ALGORITHM,
            }),
            None => None,
        };

        Ok(WriteOptions {
            content_type: opts.content_type().map(str::to_string),
            content_md5: opts.content_md5().map(str::to_string),
            storage_class,
            customer_key,
            encryption_scope: opts.encryption_scope().map(str::to_string),
        })
    }

    /// Metadata of the object at `path`.
    pub async fn stat(
        &self,
        path: &str,
        pairs: &[Pair],
        cancel: &CancellationToken,
    ) -> Result<Object> {
        let op = Operation::Stat;
        let opts = self.negotiate(op, path, pairs)?;
        let key = self.resolver.to_absolute(path);
        debug!(path, key = %key, "stat");
        let mut meta = self
            .normalizer
            .call(op.as_str(), path, cancel, opts.timeout(), self.client.stat(&key))
            .await?;
        if meta.key.is_empty() {
            meta.key = key;
        }
        Ok(self.format_object(&meta, true))
    }

    /// Stream the object at `path`, or the slice selected by `Offset`/`Size`.
    pub async fn read(
        &self,
        path: &str,
        pairs: &[Pair],
        cancel: &CancellationToken,
    ) -> Result<ByteStream> {
        let op = Operation::Read;
        let opts = self.negotiate(op, path, pairs)?;
        let range = match (opts.offset(), opts.size()) {
            (None, None) => None,
            (offset, size) => Some(ByteRange {
                offset: offset.unwrap_or(0),
                size,
            }),
        };
        let key = self.resolver.to_absolute(path);
        debug!(path, key = %key, ?range, "read");
        self.normalizer
            .call(
                op.as_str(),
                path,
                cancel,
                opts.timeout(),
                self.client.read(&key, range),
            )
            .await
    }

    /// Single-shot upload of exactly `size` bytes.
    pub async fn write(
        &self,
        path: &str,
        size: u64,
        body: ByteStream,
        pairs: &[Pair],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let op = Operation::Write;
        let opts = self.negotiate(op, path, pairs)?;
        let maximum = self.service.write_size_maximum();
        if size > maximum {
            return Err(StorageError::new(
                op.as_str(),
                path,
                ErrorKind::RestrictionNotSatisfied,
                format!("size {} exceeds the write maximum {}", size, maximum),
            ));
        }
        let write_opts = self.write_options(op, path, &opts)?;
        let key = self.resolver.to_absolute(path);
        self.normalizer
            .call(
                op.as_str(),
                path,
                cancel,
                opts.timeout(),
                self.client.write(&key, size, body, &write_opts),
            )
            .await?;
        debug!(path, key = %key, size, "object written");
        Ok(())
    }

    /// Remove the object at `path`. Removing an absent object succeeds.
    pub async fn delete(
        &self,
        path: &str,
        pairs: &[Pair],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let op = Operation::Delete;
        let opts = self.negotiate(op, path, pairs)?;
        let key = self.resolver.to_absolute(path);
        match self
            .normalizer
            .call(op.as_str(), path, cancel, opts.timeout(), self.client.delete(&key))
            .await
        {
            Err(err) if err.is(ErrorKind::NotExist) => {
                debug!(path, key = %key, "delete of absent object");
                Ok(())
            }
            other => other,
        }
    }

    async fn fetch_page(
        &self,
        path: &str,
        cursor: Option<&str>,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ObjectPage> {
        let prefix = self.resolver.to_absolute(path);
        let page = self
            .normalizer
            .call(
                Operation::List.as_str(),
                path,
                cancel,
                timeout,
                self.client.list(&prefix, cursor),
            )
            .await?;
        debug!(path, entries = page.entries.len(), more = page.next_cursor.is_some(), "listed page");
        Ok(ObjectPage {
            objects: page
                .entries
                .iter()
                .map(|meta| self.format_object(meta, false))
                .collect(),
            next_cursor: page.next_cursor,
        })
    }

    /// One page of the listing under `path`, starting at the
    /// `ContinuationToken` pair when given.
    pub async fn list_page(
        &self,
        path: &str,
        pairs: &[Pair],
        cancel: &CancellationToken,
    ) -> Result<ObjectPage> {
        let opts = self.negotiate(Operation::List, path, pairs)?;
        self.fetch_page(path, opts.continuation_token(), opts.timeout(), cancel)
            .await
    }

    /// Lazily list every object under `path`.
    ///
    /// Pages are fetched on demand. Entries of a page are all yielded before
    /// the fetch of the next page can fail; after an error the stream ends.
    /// Pass a page's cursor as `ContinuationToken` to restart from it.
    pub fn list(
        &self,
        path: &str,
        pairs: &[Pair],
        cancel: &CancellationToken,
    ) -> BoxStream<'static, Result<Object>> {
        let opts = match self.negotiate(Operation::List, path, pairs) {
            Ok(opts) => opts,
            Err(err) => return stream::once(async move { Err(err) }).boxed(),
        };
        let state = ListState {
            storage: self.clone(),
            path: path.to_string(),
            cursor: opts.continuation_token().map(str::to_string),
            timeout: opts.timeout(),
            cancel: cancel.clone(),
            buffered: VecDeque::new(),
            exhausted: false,
        };
        stream::unfold(state, |mut st| async move {
            loop {
                if let Some(object) = st.buffered.pop_front() {
                    return Some((Ok(object), st));
                }
                if st.exhausted {
                    return None;
                }
                let fetched = st
                    .storage
                    .fetch_page(&st.path, st.cursor.as_deref(), st.timeout, &st.cancel)
                    .await;
                match fetched {
                    Ok(page) => {
                        st.buffered.extend(page.objects);
                        st.exhausted = page.next_cursor.is_none();
                        st.cursor = page.next_cursor;
                    }
                    Err(err) => {
                        st.exhausted = true;
                        return Some((Err(err), st));
                    }
                }
            }
        })
        .boxed()
    }

    /// Open a segmented upload of `size` bytes for `path`.
    pub async fn init_segment(
        &self,
        path: &str,
        size: u64,
        pairs: &[Pair],
        cancel: &CancellationToken,
    ) -> Result<Segment> {
        let op = Operation::InitSegment;
        let opts = self.negotiate(op, path, pairs)?;
        let write_opts = self.write_options(op, path, &opts)?;
        let key = self.resolver.to_absolute(path);
        self.segments
            .init(path, &key, size, &write_opts, cancel, opts.timeout())
            .await
    }

    /// Upload `[offset, offset + size)` of the open segment; returns the
    /// part number it was given.
    pub async fn write_segment(
        &self,
        path: &str,
        offset: u64,
        size: u64,
        body: ByteStream,
        pairs: &[Pair],
        cancel: &CancellationToken,
    ) -> Result<u32> {
        let opts = self.negotiate(Operation::WriteSegment, path, pairs)?;
        self.segments
            .write_part(path, offset, size, body, cancel, opts.timeout())
            .await
    }

    /// Commit the open segment and describe the object it produced.
    pub async fn complete_segment(
        &self,
        path: &str,
        pairs: &[Pair],
        cancel: &CancellationToken,
    ) -> Result<Object> {
        let opts = self.negotiate(Operation::CompleteSegment, path, pairs)?;
        let segment = self.segments.complete(path, cancel, opts.timeout()).await?;
        let mut object = Object::new(self.resolver.to_absolute(path), path, false);
        object.set_content_length(segment.total_size);
        Ok(object)
    }

    pub async fn abort_segment(
        &self,
        path: &str,
        pairs: &[Pair],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let opts = self.negotiate(Operation::AbortSegment, path, pairs)?;
        self.segments.abort(path, cancel, opts.timeout()).await
    }

    /// Snapshot of the segment open on `path`, if any.
    pub async fn segment(&self, path: &str) -> Option<Segment> {
        self.segments.segment(path).await
    }

    /// Paths that currently have an open segment.
    pub fn open_segments(&self) -> Vec<String> {
        self.segments.open_paths()
    }
}

impl fmt::Display for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Storager {} {{Name: {}, WorkDir: {}}}",
            self.service,
            self.name,
            self.resolver.work_dir()
        )
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("service", &self.service)
            .field("name", &self.name)
            .field("work_dir", &self.resolver.work_dir())
            .finish_non_exhaustive()
    }
}

struct ListState {
    storage: Storage,
    path: String,
    cursor: Option<String>,
    timeout: Option<Duration>,
    cancel: CancellationToken,
    buffered: VecDeque<Object>,
    exhausted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backends::memory::MemoryBackend,
        models::{Credential, Endpoint, StorageClass},
    };
    use bytes::Bytes;

    fn body(data: &'static [u8]) -> ByteStream {
        stream::once(async move { Ok(Bytes::from_static(data)) }).boxed()
    }

    fn memory(work_dir: &str) -> (MemoryBackend, Storage) {
        let backend = MemoryBackend::new();
        let storage = Storage::new(
            ServiceType::Memory,
            Arc::new(backend.clone()),
            [Pair::name("test"), Pair::work_dir(work_dir)],
        )
        .unwrap();
        (backend, storage)
    }

    #[test]
    fn displays_type_name_and_work_dir() {
        let (_, storage) = memory("/root/");
        assert_eq!(
            storage.to_string(),
            "Storager memory {Name: test, WorkDir: /root/}"
        );
    }

    #[test]
    fn name_is_always_required() {
        let err = Storage::new(
            ServiceType::Memory,
            Arc::new(MemoryBackend::new()),
            [Pair::work_dir("/")],
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RestrictionNotSatisfied);
    }

    #[test]
    fn provider_checks_reject_bad_names() {
        let err = Storage::new(
            ServiceType::Qingstor,
            Arc::new(MemoryBackend::new()),
            [
                Pair::name("UPPER"),
                Pair::Credential(Credential::hmac("ak", "sk")),
                Pair::Endpoint(Endpoint::https("qingstor.com")),
                Pair::location("pek3b"),
            ],
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOption);
    }

    #[test]
    fn construction_call_pairs_become_defaults() {
        let storage = Storage::new(
            ServiceType::Qingstor,
            Arc::new(MemoryBackend::new()),
            [
                Pair::name("bucket-name"),
                Pair::Credential(Credential::hmac("ak", "sk")),
                Pair::Endpoint(Endpoint::https("qingstor.com")),
                Pair::location("pek3b"),
                Pair::StorageClass(StorageClass::Warm),
            ],
        )
        .unwrap();
        assert_eq!(storage.defaults().storage_class(), Some(StorageClass::Warm));
        assert_eq!(
            storage.defaults().content_type(),
            Some(crate::backends::DEFAULT_CONTENT_TYPE)
        );
        assert_eq!(storage.work_dir(), "/");
    }

    #[test]
    fn customer_keys_are_encoded() {
        let storage = Storage::new(
            ServiceType::Azblob,
            Arc::new(MemoryBackend::new()),
            [
                Pair::name("container"),
                Pair::Credential(Credential::hmac("account", "key")),
                Pair::Endpoint(Endpoint::https("account.blob.core.windows.net")),
            ],
        )
        .unwrap();
        let opts: Pairs = [
            Pair::EncryptionKey(vec![0u8; 32]),
            Pair::StorageClass(StorageClass::Cold),
        ]
        .into_iter()
        .collect();
        let write = storage.write_options(Operation::Write, "a", &opts).unwrap();
        let key = write.customer_key.unwrap();
        assert_eq!(key.key_base64, encode_base64(&[0u8; 32]));
        assert_eq!(key.key_sha256_base64, encode_base64(&Sha256::digest([0u8; 32])));
        assert_eq!(key.algorithm, "AES256");
        assert_eq!(write.storage_class.as_deref(), Some("Archive"));

        let short: Pairs = [Pair::EncryptionKey(vec![1u8; 16])].into_iter().collect();
        let err = storage.write_options(Operation::Write, "a", &short).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOption);
    }

    #[test]
    fn unmappable_storage_class_is_unsupported() {
        let storage = Storage::new(
            ServiceType::Qingstor,
            Arc::new(MemoryBackend::new()),
            [
                Pair::name("bucket-name"),
                Pair::Credential(Credential::hmac("ak", "sk")),
                Pair::Endpoint(Endpoint::https("qingstor.com")),
                Pair::location("pek3b"),
            ],
        )
        .unwrap();
        let opts: Pairs = [Pair::StorageClass(StorageClass::Cold)].into_iter().collect();
        let err = storage.write_options(Operation::Write, "a", &opts).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOption);
    }

    #[tokio::test]
    async fn oversized_writes_never_reach_the_backend() {
        let (backend, storage) = memory("/");
        let err = storage
            .write(
                "big",
                ServiceType::Memory.write_size_maximum() + 1,
                body(b""),
                &[],
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RestrictionNotSatisfied);
        assert_eq!(backend.object_count(), 0);
    }

    #[tokio::test]
    async fn keys_live_under_the_work_dir() {
        let (backend, storage) = memory("/root/");
        let cancel = CancellationToken::new();
        storage
            .write("a.txt", 3, body(b"abc"), &[], &cancel)
            .await
            .unwrap();
        assert_eq!(backend.contents("root/a.txt").as_deref(), Some(&b"abc"[..]));

        let object = storage.stat("a.txt", &[], &cancel).await.unwrap();
        assert_eq!(object.id, "root/a.txt");
        assert_eq!(object.path, "a.txt");
        assert!(object.is_done());
        assert_eq!(object.content_type(), Some("application/octet-stream"));
    }

    #[tokio::test]
    async fn deleting_twice_succeeds() {
        let (_, storage) = memory("/");
        let cancel = CancellationToken::new();
        storage.write("a", 1, body(b"x"), &[], &cancel).await.unwrap();
        storage.delete("a", &[], &cancel).await.unwrap();
        storage.delete("a", &[], &cancel).await.unwrap();
        let err = storage.stat("a", &[], &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotExist);
    }
}
