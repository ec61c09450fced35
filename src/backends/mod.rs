//! Provider declarations and the injected remote-operations contract.
//!
//! A provider is a named [`ServiceType`] variant that declares, up front, the
//! features it supports, the pairs it requires, how its native error codes
//! and storage classes map onto the neutral vocabulary, and how its listing
//! entries become [`Object`]s. The actual wire calls live behind
//! [`BackendClient`], which is handed to the storage facade at construction.

pub mod azblob;
pub mod memory;
pub mod qingstor;

use crate::{
    errors::{ErrorKind, RemoteResult},
    models::{CompletedPart, Object, Pair, PairKey, Pairs, StorageClass, SystemMetadata},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt, io};

/// Streamed object payload.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Named optional behavior a provider may declare.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Multipart uploads through init/write/complete/abort segment.
    Segment,
    StorageClass,
    /// Customer-provided encryption keys.
    ServerSideEncryption,
    EncryptionScope,
    ContentMd5,
    RangeRead,
}

/// The feature set of one provider instance.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Features(BTreeSet<Feature>);

impl Features {
    pub fn contains(&self, feature: Feature) -> bool {
        self.0.contains(&feature)
    }
}

impl FromIterator<Feature> for Features {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        Features(iter.into_iter().collect())
    }
}

/// Inclusive start and length of a ranged read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    /// `None` reads to the end of the object.
    pub size: Option<u64>,
}

/// Customer-provided key material, already encoded for the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CustomerKey {
    pub key_base64: String,
    pub key_sha256_base64: String,
    pub algorithm: &'static str,
}

/// Options forwarded to writes and upload initiation, in provider terms.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteOptions {
    pub content_type: Option<String>,
    pub content_md5: Option<String>,
    /// Native storage class name.
    pub storage_class: Option<String>,
    pub customer_key: Option<CustomerKey>,
    pub encryption_scope: Option<String>,
}

/// Object metadata as reported by a provider.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemoteMetadata {
    pub key: String,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    /// Raw MD5 digest bytes.
    pub content_md5: Option<Vec<u8>>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    /// Native storage class or access tier.
    pub storage_class: Option<String>,
    pub server_encrypted: Option<bool>,
    pub encryption_key_sha256: Option<String>,
    pub encryption_scope: Option<String>,
    pub encryption_algorithm: Option<String>,
}

/// One page of a remote listing.
#[derive(Clone, Debug, Default)]
pub struct RemotePage {
    pub entries: Vec<RemoteMetadata>,
    /// Absent once the listing is exhausted.
    pub next_cursor: Option<String>,
}

/// Remote operations a provider client performs. Keys are provider-absolute.
#[async_trait]
pub trait BackendClient: Send + Sync + 'static {
    async fn stat(&self, key: &str) -> RemoteResult<RemoteMetadata>;

    async fn read(&self, key: &str, range: Option<ByteRange>) -> RemoteResult<ByteStream>;

    async fn write(
        &self,
        key: &str,
        size: u64,
        body: ByteStream,
        opts: &WriteOptions,
    ) -> RemoteResult<()>;

    async fn delete(&self, key: &str) -> RemoteResult<()>;

    async fn list(&self, prefix: &str, cursor: Option<&str>) -> RemoteResult<RemotePage>;

    async fn initiate_upload(&self, key: &str, opts: &WriteOptions) -> RemoteResult<String>;

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        offset: u64,
        size: u64,
        body: ByteStream,
    ) -> RemoteResult<()>;

    async fn complete_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> RemoteResult<()>;

    async fn abort_upload(&self, key: &str, upload_id: &str) -> RemoteResult<()>;
}

/// Reason a construction pair was refused by a provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairRejection {
    pub key: PairKey,
    pub reason: String,
}

impl PairRejection {
    pub(crate) fn new(key: PairKey, reason: impl Into<String>) -> Self {
        Self {
            key,
            reason: reason.into(),
        }
    }
}

/// Supported providers.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Azblob,
    Qingstor,
    Memory,
}

impl ServiceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceType::Azblob => azblob::TYPE,
            ServiceType::Qingstor => qingstor::TYPE,
            ServiceType::Memory => memory::TYPE,
        }
    }

    pub fn features(self) -> Features {
        let declared: &[Feature] = match self {
            ServiceType::Azblob => azblob::FEATURES,
            ServiceType::Qingstor => qingstor::FEATURES,
            ServiceType::Memory => memory::FEATURES,
        };
        declared.iter().copied().collect()
    }

    /// Construction pairs this provider cannot work without, beyond the
    /// globally required ones.
    pub fn required_pairs(self) -> &'static [PairKey] {
        match self {
            ServiceType::Azblob => azblob::REQUIRED_PAIRS,
            ServiceType::Qingstor => qingstor::REQUIRED_PAIRS,
            ServiceType::Memory => &[],
        }
    }

    /// Provider-level defaults for call pairs.
    pub fn default_pairs(self) -> Pairs {
        let mut pairs = Pairs::new();
        pairs.insert(Pair::content_type(DEFAULT_CONTENT_TYPE));
        if self == ServiceType::Qingstor {
            pairs.insert(Pair::StorageClass(StorageClass::Hot));
        }
        pairs
    }

    /// Largest single-shot write the provider accepts.
    pub fn write_size_maximum(self) -> u64 {
        match self {
            ServiceType::Azblob => azblob::WRITE_SIZE_MAXIMUM,
            ServiceType::Qingstor => qingstor::WRITE_SIZE_MAXIMUM,
            ServiceType::Memory => memory::WRITE_SIZE_MAXIMUM,
        }
    }

    /// Canonical kind for a provider error code, if the code is known.
    pub fn error_kind(self, code: &str) -> Option<ErrorKind> {
        let table: &[(&str, ErrorKind)] = match self {
            ServiceType::Azblob => azblob::ERROR_CODES,
            ServiceType::Qingstor => qingstor::ERROR_CODES,
            ServiceType::Memory => memory::ERROR_CODES,
        };
        table
            .iter()
            .find(|(candidate, _)| *candidate == code)
            .map(|(_, kind)| *kind)
    }

    /// Native name for a neutral storage class; `None` when the provider
    /// has no equivalent.
    pub fn native_storage_class(self, class: StorageClass) -> Option<&'static str> {
        match self {
            ServiceType::Azblob => azblob::parse_storage_class(class),
            ServiceType::Qingstor => qingstor::parse_storage_class(class),
            ServiceType::Memory => None,
        }
    }

    /// Neutral storage class for a native name, when it is a known one.
    pub fn neutral_storage_class(self, native: &str) -> Option<StorageClass> {
        match self {
            ServiceType::Azblob => azblob::format_storage_class(native),
            ServiceType::Qingstor => qingstor::format_storage_class(native),
            ServiceType::Memory => None,
        }
    }

    /// Provider-specific checks on construction pairs (name rules,
    /// credential and endpoint protocols).
    pub fn check_pairs(self, pairs: &Pairs) -> Result<(), PairRejection> {
        match self {
            ServiceType::Azblob => azblob::check_pairs(pairs),
            ServiceType::Qingstor => qingstor::check_pairs(pairs),
            ServiceType::Memory => Ok(()),
        }
    }

    /// Build the caller-facing object from a provider listing entry.
    pub fn format_object(self, meta: &RemoteMetadata, path: String, done: bool) -> Object {
        let mut o = Object::new(meta.key.clone(), path, done);
        if let Some(v) = meta.content_length {
            o.set_content_length(v);
        }
        if let Some(v) = &meta.content_type {
            o.set_content_type(v.clone());
        }
        if let Some(v) = meta.content_md5.as_deref().filter(|d| !d.is_empty()) {
            o.set_content_md5(encode_base64(v));
        }
        if let Some(v) = &meta.etag {
            o.set_etag(v.clone());
        }
        if let Some(v) = meta.last_modified {
            o.set_last_modified(v);
        }
        if let Some(class) = meta
            .storage_class
            .as_deref()
            .and_then(|native| self.neutral_storage_class(native))
        {
            o.set_storage_class(class);
        }
        o.set_system_metadata(match self {
            ServiceType::Azblob => azblob::system_metadata(meta),
            ServiceType::Qingstor => qingstor::system_metadata(meta),
            ServiceType::Memory => SystemMetadata::Memory {
                storage_class: meta.storage_class.clone(),
            },
        });
        o
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ServiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            azblob::TYPE => Ok(ServiceType::Azblob),
            qingstor::TYPE => Ok(ServiceType::Qingstor),
            memory::TYPE => Ok(ServiceType::Memory),
            other => Err(format!("unknown service type `{}`", other)),
        }
    }
}

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub(crate) fn encode_base64(data: &[u8]) -> String {
    use base64::{Engine as _, engine::general_purpose};
    general_purpose::STANDARD.encode(data)
}
