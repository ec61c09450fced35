//! Named, typed configuration values attached to a storage instance or to a
//! single call.

use crate::backends::Feature;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr, time::Duration};

/// Identity of a pair, independent of its value.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PairKey {
    Credential,
    Endpoint,
    Name,
    Location,
    WorkDir,
    StorageClass,
    ContentType,
    ContentMd5,
    EncryptionKey,
    EncryptionScope,
    Offset,
    Size,
    ContinuationToken,
    Timeout,
}

/// Where a pair may be supplied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairScope {
    /// Only when constructing a storage instance.
    Construction,
    /// On calls; when given at construction it becomes an instance default.
    Call,
}

impl PairKey {
    pub fn scope(self) -> PairScope {
        match self {
            PairKey::Credential
            | PairKey::Endpoint
            | PairKey::Name
            | PairKey::Location
            | PairKey::WorkDir => PairScope::Construction,
            _ => PairScope::Call,
        }
    }

    /// Backend feature that must be declared for this pair to be accepted.
    pub fn required_feature(self) -> Option<Feature> {
        match self {
            PairKey::StorageClass => Some(Feature::StorageClass),
            PairKey::ContentMd5 => Some(Feature::ContentMd5),
            PairKey::EncryptionKey => Some(Feature::ServerSideEncryption),
            PairKey::EncryptionScope => Some(Feature::EncryptionScope),
            PairKey::Offset | PairKey::Size => Some(Feature::RangeRead),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PairKey::Credential => "credential",
            PairKey::Endpoint => "endpoint",
            PairKey::Name => "name",
            PairKey::Location => "location",
            PairKey::WorkDir => "work_dir",
            PairKey::StorageClass => "storage_class",
            PairKey::ContentType => "content_type",
            PairKey::ContentMd5 => "content_md5",
            PairKey::EncryptionKey => "encryption_key",
            PairKey::EncryptionScope => "encryption_scope",
            PairKey::Offset => "offset",
            PairKey::Size => "size",
            PairKey::ContinuationToken => "continuation_token",
            PairKey::Timeout => "timeout",
        }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access credential for a provider.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Hmac {
        access_key: String,
        secret_key: String,
    },
    ApiKey(String),
}

impl Credential {
    pub fn hmac(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Credential::Hmac {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    pub fn protocol(&self) -> &'static str {
        match self {
            Credential::Hmac { .. } => "hmac",
            Credential::ApiKey(_) => "apikey",
        }
    }
}

// Secrets never reach logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Hmac { access_key, .. } => f
                .debug_struct("Hmac")
                .field("access_key", access_key)
                .field("secret_key", &"<redacted>")
                .finish(),
            Credential::ApiKey(_) => f.debug_tuple("ApiKey").field(&"<redacted>").finish(),
        }
    }
}

/// Error produced while parsing a credential or endpoint string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {what} `{value}`: {reason}")]
pub struct ParsePairError {
    pub what: &'static str,
    pub value: String,
    pub reason: &'static str,
}

impl FromStr for Credential {
    type Err = ParsePairError;

    /// Parses `hmac:<access_key>:<secret_key>` or `apikey:<key>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| ParsePairError {
            what: "credential",
            // Only the protocol is echoed back.
            value: s.split(':').next().unwrap_or_default().to_string(),
            reason,
        };
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("hmac"), Some(ak), Some(sk)) if !ak.is_empty() && !sk.is_empty() => {
                Ok(Credential::hmac(ak, sk))
            }
            (Some("hmac"), _, _) => Err(invalid("hmac needs access and secret key")),
            (Some("apikey"), Some(key), None) if !key.is_empty() => {
                Ok(Credential::ApiKey(key.to_string()))
            }
            (Some("apikey"), _, _) => Err(invalid("apikey needs exactly one key")),
            _ => Err(invalid("unknown protocol")),
        }
    }
}

/// Network location of a provider.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Http { host: String, port: u16 },
    Https { host: String, port: u16 },
}

impl Endpoint {
    pub fn https(host: impl Into<String>) -> Self {
        Endpoint::Https {
            host: host.into(),
            port: 443,
        }
    }

    pub fn http(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Http {
            host: host.into(),
            port,
        }
    }
}

impl FromStr for Endpoint {
    type Err = ParsePairError;

    /// Parses `http:<host>[:<port>]` or `https:<host>[:<port>]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| ParsePairError {
            what: "endpoint",
            value: s.to_string(),
            reason,
        };
        let mut parts = s.splitn(3, ':');
        let protocol = parts.next().unwrap_or_default();
        let host = parts
            .next()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host"))?
            .to_string();
        let port = match parts.next() {
            Some(raw) => Some(raw.parse::<u16>().map_err(|_| invalid("invalid port"))?),
            None => None,
        };
        match protocol {
            "http" => Ok(Endpoint::Http {
                host,
                port: port.unwrap_or(80),
            }),
            "https" => Ok(Endpoint::Https {
                host,
                port: port.unwrap_or(443),
            }),
            _ => Err(invalid("unknown protocol")),
        }
    }
}

/// Provider-neutral storage tier.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StorageClass {
    Hot,
    Warm,
    Cold,
}

/// One configuration value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Pair {
    Credential(Credential),
    Endpoint(Endpoint),
    /// Bucket or container name.
    Name(String),
    /// Region or zone.
    Location(String),
    WorkDir(String),
    StorageClass(StorageClass),
    ContentType(String),
    /// Base64-encoded MD5 digest of the payload.
    ContentMd5(String),
    /// Customer-provided 32-byte key for server-side encryption.
    EncryptionKey(Vec<u8>),
    EncryptionScope(String),
    Offset(u64),
    Size(u64),
    ContinuationToken(String),
    Timeout(Duration),
}

impl Pair {
    pub fn key(&self) -> PairKey {
        match self {
            Pair::Credential(_) => PairKey::Credential,
            Pair::Endpoint(_) => PairKey::Endpoint,
            Pair::Name(_) => PairKey::Name,
            Pair::Location(_) => PairKey::Location,
            Pair::WorkDir(_) => PairKey::WorkDir,
            Pair::StorageClass(_) => PairKey::StorageClass,
            Pair::ContentType(_) => PairKey::ContentType,
            Pair::ContentMd5(_) => PairKey::ContentMd5,
            Pair::EncryptionKey(_) => PairKey::EncryptionKey,
            Pair::EncryptionScope(_) => PairKey::EncryptionScope,
            Pair::Offset(_) => PairKey::Offset,
            Pair::Size(_) => PairKey::Size,
            Pair::ContinuationToken(_) => PairKey::ContinuationToken,
            Pair::Timeout(_) => PairKey::Timeout,
        }
    }

    pub fn name(value: impl Into<String>) -> Self {
        Pair::Name(value.into())
    }

    pub fn work_dir(value: impl Into<String>) -> Self {
        Pair::WorkDir(value.into())
    }

    pub fn location(value: impl Into<String>) -> Self {
        Pair::Location(value.into())
    }

    pub fn content_type(value: impl Into<String>) -> Self {
        Pair::ContentType(value.into())
    }
}

/// A validated set of pairs, at most one per key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pairs {
    entries: BTreeMap<PairKey, Pair>,
}

impl Pairs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `pair`, replacing any earlier value for the same key.
    pub fn insert(&mut self, pair: Pair) -> Option<Pair> {
        self.entries.insert(pair.key(), pair)
    }

    pub fn get(&self, key: PairKey) -> Option<&Pair> {
        self.entries.get(&key)
    }

    pub fn contains(&self, key: PairKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pair> {
        self.entries.values()
    }

    pub fn credential(&self) -> Option<&Credential> {
        match self.get(PairKey::Credential) {
            Some(Pair::Credential(v)) => Some(v),
            _ => None,
        }
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        match self.get(PairKey::Endpoint) {
            Some(Pair::Endpoint(v)) => Some(v),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self.get(PairKey::Name) {
            Some(Pair::Name(v)) => Some(v),
            _ => None,
        }
    }

    pub fn location(&self) -> Option<&str> {
        match self.get(PairKey::Location) {
            Some(Pair::Location(v)) => Some(v),
            _ => None,
        }
    }

    pub fn work_dir(&self) -> Option<&str> {
        match self.get(PairKey::WorkDir) {
            Some(Pair::WorkDir(v)) => Some(v),
            _ => None,
        }
    }

    pub fn storage_class(&self) -> Option<StorageClass> {
        match self.get(PairKey::StorageClass) {
            Some(Pair::StorageClass(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        match self.get(PairKey::ContentType) {
            Some(Pair::ContentType(v)) => Some(v),
            _ => None,
        }
    }

    pub fn content_md5(&self) -> Option<&str> {
        match self.get(PairKey::ContentMd5) {
            Some(Pair::ContentMd5(v)) => Some(v),
            _ => None,
        }
    }

    pub fn encryption_key(&self) -> Option<&[u8]> {
        match self.get(PairKey::EncryptionKey) {
            Some(Pair::EncryptionKey(v)) => Some(v),
            _ => None,
        }
    }

    pub fn encryption_scope(&self) -> Option<&str> {
        match self.get(PairKey::EncryptionScope) {
            Some(Pair::EncryptionScope(v)) => Some(v),
            _ => None,
        }
    }

    pub fn offset(&self) -> Option<u64> {
        match self.get(PairKey::Offset) {
            Some(Pair::Offset(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn size(&self) -> Option<u64> {
        match self.get(PairKey::Size) {
            Some(Pair::Size(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn continuation_token(&self) -> Option<&str> {
        match self.get(PairKey::ContinuationToken) {
            Some(Pair::ContinuationToken(v)) => Some(v),
            _ => None,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        match self.get(PairKey::Timeout) {
            Some(Pair::Timeout(v)) => Some(*v),
            _ => None,
        }
    }
}

impl FromIterator<Pair> for Pairs {
    fn from_iter<I: IntoIterator<Item = Pair>>(iter: I) -> Self {
        let mut pairs = Pairs::new();
        for pair in iter {
            pairs.insert(pair);
        }
        pairs
    }
}
