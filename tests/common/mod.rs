#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use storager::{
    BackendClient, ByteStream, Pair, RemoteError, ServiceType, Storage,
    backends::{ByteRange, RemoteMetadata, RemotePage, WriteOptions, memory::MemoryBackend},
    errors::RemoteResult,
    models::CompletedPart,
};
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn body(data: impl Into<Bytes>) -> ByteStream {
    let data = data.into();
    stream::once(async move { Ok(data) }).boxed()
}

pub async fn collect(mut stream: ByteStream) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}

/// Pauses one remote call until the test lets it go.
#[derive(Clone, Default)]
pub struct Gate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl Gate {
    /// Wait until the held call has started.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

/// A memory backend that counts calls, fails or holds chosen ones, and
/// remembers the part list of the last completed upload.
#[derive(Default)]
pub struct FaultyBackend {
    pub inner: MemoryBackend,
    calls: Mutex<HashMap<&'static str, usize>>,
    failures: Mutex<HashMap<&'static str, RemoteError>>,
    gates: Mutex<HashMap<&'static str, Gate>>,
    completions: Mutex<Vec<Vec<CompletedPart>>>,
}

impl FaultyBackend {
    pub fn new(inner: MemoryBackend) -> Arc<Self> {
        Arc::new(Self {
            inner,
            ..Default::default()
        })
    }

    pub fn calls(&self, op: &'static str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// The next `op` call fails with `err`.
    pub fn fail_next(&self, op: &'static str, err: RemoteError) {
        self.failures.lock().unwrap().insert(op, err);
    }

    /// The next `op` call blocks until the returned gate is released.
    pub fn hold_next(&self, op: &'static str) -> Gate {
        let gate = Gate::default();
        self.gates.lock().unwrap().insert(op, gate.clone());
        gate
    }

    pub fn last_completion(&self) -> Option<Vec<CompletedPart>> {
        self.completions.lock().unwrap().last().cloned()
    }

    async fn enter(&self, op: &'static str) -> RemoteResult<()> {
        *self.calls.lock().unwrap().entry(op).or_default() += 1;
        let gate = self.gates.lock().unwrap().remove(op);
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        let failure = self.failures.lock().unwrap().remove(op);
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BackendClient for FaultyBackend {
    async fn stat(&self, key: &str) -> RemoteResult<RemoteMetadata> {
        self.enter("stat").await?;
        self.inner.stat(key).await
    }

    async fn read(&self, key: &str, range: Option<ByteRange>) -> RemoteResult<ByteStream> {
        self.enter("read").await?;
        self.inner.read(key, range).await
    }

    async fn write(
        &self,
        key: &str,
        size: u64,
        body: ByteStream,
        opts: &WriteOptions,
    ) -> RemoteResult<()> {
        self.enter("write").await?;
        self.inner.write(key, size, body, opts).await
    }

    async fn delete(&self, key: &str) -> RemoteResult<()> {
        self.enter("delete").await?;
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str, cursor: Option<&str>) -> RemoteResult<RemotePage> {
        self.enter("list").await?;
        self.inner.list(prefix, cursor).await
    }

    async fn initiate_upload(&self, key: &str, opts: &WriteOptions) -> RemoteResult<String> {
        self.enter("initiate_upload").await?;
        self.inner.initiate_upload(key, opts).await
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        offset: u64,
        size: u64,
        body: ByteStream,
    ) -> RemoteResult<()> {
        self.enter("upload_part").await?;
        self.inner
            .upload_part(key, upload_id, part_number, offset, size, body)
            .await
    }

    async fn complete_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> RemoteResult<()> {
        self.enter("complete_upload").await?;
        self.inner.complete_upload(key, upload_id, parts).await?;
        self.completions.lock().unwrap().push(parts.to_vec());
        Ok(())
    }

    async fn abort_upload(&self, key: &str, upload_id: &str) -> RemoteResult<()> {
        self.enter("abort_upload").await?;
        self.inner.abort_upload(key, upload_id).await
    }
}

/// A memory-typed storage over a fresh faulty backend.
pub fn memory_storage(work_dir: &str) -> (Arc<FaultyBackend>, Storage) {
    memory_storage_with(MemoryBackend::new(), work_dir)
}

pub fn memory_storage_with(inner: MemoryBackend, work_dir: &str) -> (Arc<FaultyBackend>, Storage) {
    init_tracing();
    let backend = FaultyBackend::new(inner);
    let storage = Storage::new(
        ServiceType::Memory,
        backend.clone(),
        [Pair::name("test"), Pair::work_dir(work_dir)],
    )
    .unwrap();
    (backend, storage)
}
