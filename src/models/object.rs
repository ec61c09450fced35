//! Represents the metadata snapshot of a stored object.

use crate::models::pair::StorageClass;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provider-specific system metadata.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "service", rename_all = "snake_case")]
pub enum SystemMetadata {
    Azblob {
        access_tier: Option<String>,
        encryption_key_sha256: Option<String>,
        encryption_scope: Option<String>,
        server_encrypted: bool,
    },
    Qingstor {
        storage_class: Option<String>,
        encryption_customer_algorithm: Option<String>,
    },
    Memory {
        storage_class: Option<String>,
    },
}

/// Metadata of one stored item at read time.
///
/// `id` is the provider-absolute key, `path` the caller-relative one.
/// Optional fields stay `None` until the producer fills them; `done` flips to
/// true when every field the producer can know about is populated.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Object {
    pub id: String,
    pub path: String,
    done: bool,

    content_length: Option<u64>,
    content_type: Option<String>,
    /// Base64-encoded MD5 digest.
    content_md5: Option<String>,
    etag: Option<String>,
    last_modified: Option<DateTime<Utc>>,
    storage_class: Option<StorageClass>,
    system_metadata: Option<SystemMetadata>,
}

impl Object {
    pub fn new(id: impl Into<String>, path: impl Into<String>, done: bool) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            done,
            content_length: None,
            content_type: None,
            content_md5: None,
            etag: None,
            last_modified: None,
            storage_class: None,
            system_metadata: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn set_content_length(&mut self, v: u64) -> &mut Self {
        self.content_length = Some(v);
        self
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn set_content_type(&mut self, v: impl Into<String>) -> &mut Self {
        self.content_type = Some(v.into());
        self
    }

    pub fn content_md5(&self) -> Option<&str> {
        self.content_md5.as_deref()
    }

    pub fn set_content_md5(&mut self, v: impl Into<String>) -> &mut Self {
        self.content_md5 = Some(v.into());
        self
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn set_etag(&mut self, v: impl Into<String>) -> &mut Self {
        self.etag = Some(v.into());
        self
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.last_modified
    }

    pub fn set_last_modified(&mut self, v: DateTime<Utc>) -> &mut Self {
        self.last_modified = Some(v);
        self
    }

    pub fn storage_class(&self) -> Option<StorageClass> {
        self.storage_class
    }

    pub fn set_storage_class(&mut self, v: StorageClass) -> &mut Self {
        self.storage_class = Some(v);
        self
    }

    pub fn system_metadata(&self) -> Option<&SystemMetadata> {
        self.system_metadata.as_ref()
    }

    pub fn set_system_metadata(&mut self, v: SystemMetadata) -> &mut Self {
        self.system_metadata = Some(v);
        self
    }
}

/// One page of a listing plus the cursor to resume after it.
#[derive(Clone, Debug, Default)]
pub struct ObjectPage {
    pub objects: Vec<Object>,
    /// `None` once the listing is exhausted.
    pub next_cursor: Option<String>,
}
