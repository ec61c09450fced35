//! Azure Blob Storage declarations.
//!
//! ref: https://docs.microsoft.com/en-us/rest/api/storageservices/status-and-error-codes2

use crate::{
    backends::{Feature, PairRejection, RemoteMetadata},
    errors::ErrorKind,
    models::{Credential, PairKey, Pairs, StorageClass, SystemMetadata},
};

pub const TYPE: &str = "azblob";

pub const FEATURES: &[Feature] = &[
    Feature::StorageClass,
    Feature::ServerSideEncryption,
    Feature::EncryptionScope,
    Feature::ContentMd5,
    Feature::RangeRead,
];

pub const REQUIRED_PAIRS: &[PairKey] = &[PairKey::Credential, PairKey::Endpoint];

/// Maximum size for a put-blob call.
/// ref: https://docs.microsoft.com/en-us/rest/api/storageservices/put-blob
pub const WRITE_SIZE_MAXIMUM: u64 = 5000 * 1024 * 1024;

pub const ERROR_CODES: &[(&str, ErrorKind)] = &[
    ("BlobNotFound", ErrorKind::NotExist),
    ("ContainerNotFound", ErrorKind::NotExist),
    ("InsufficientAccountPermissions", ErrorKind::PermissionDenied),
    ("AuthorizationPermissionMismatch", ErrorKind::PermissionDenied),
    ("AuthorizationFailure", ErrorKind::PermissionDenied),
];

const ACCESS_TIER_HOT: &str = "Hot";
const ACCESS_TIER_COOL: &str = "Cool";
const ACCESS_TIER_ARCHIVE: &str = "Archive";

const CONTAINER_NAME_MIN_LEN: usize = 3;
const CONTAINER_NAME_MAX_LEN: usize = 63;

pub fn parse_storage_class(class: StorageClass) -> Option<&'static str> {
    Some(match class {
        StorageClass::Hot => ACCESS_TIER_HOT,
        StorageClass::Warm => ACCESS_TIER_COOL,
        StorageClass::Cold => ACCESS_TIER_ARCHIVE,
    })
}

pub fn format_storage_class(native: &str) -> Option<StorageClass> {
    match native {
        ACCESS_TIER_HOT => Some(StorageClass::Hot),
        ACCESS_TIER_COOL => Some(StorageClass::Warm),
        ACCESS_TIER_ARCHIVE => Some(StorageClass::Cold),
        _ => None,
    }
}

/// Container naming rules:
/// - 3–63 characters
/// - lowercase letters, digits and hyphens only
/// - starts with a letter or digit, no trailing hyphen
/// - no consecutive hyphens
fn check_container_name(name: &str) -> Result<(), &'static str> {
    let len = name.len();
    if !(CONTAINER_NAME_MIN_LEN..=CONTAINER_NAME_MAX_LEN).contains(&len) {
        return Err("must be between 3 and 63 characters");
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '-'))
    {
        return Err("allowed characters are lowercase letters, digits, and hyphens");
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err("must start and end with a lowercase letter or digit");
    }
    if name.contains("--") {
        return Err("cannot contain consecutive hyphens");
    }
    Ok(())
}

pub fn check_pairs(pairs: &Pairs) -> Result<(), PairRejection> {
    if let Some(name) = pairs.name() {
        check_container_name(name).map_err(|reason| PairRejection::new(PairKey::Name, reason))?;
    }
    if let Some(cred) = pairs.credential() {
        if !matches!(cred, Credential::Hmac { .. }) {
            return Err(PairRejection::new(
                PairKey::Credential,
                format!("credential protocol `{}` is not hmac", cred.protocol()),
            ));
        }
    }
    Ok(())
}

pub fn system_metadata(meta: &RemoteMetadata) -> SystemMetadata {
    SystemMetadata::Azblob {
        access_tier: meta.storage_class.clone().filter(|v| !v.is_empty()),
        encryption_key_sha256: meta.encryption_key_sha256.clone(),
        encryption_scope: meta.encryption_scope.clone(),
        server_encrypted: meta.server_encrypted.unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Pair;

    #[test]
    fn container_names() {
        let cases = [
            ("abc", true),
            ("my-container-01", true),
            ("ab", false),
            ("-abc", false),
            ("abc-", false),
            ("a--b", false),
            ("Upper", false),
            ("under_score", false),
        ];
        for (name, ok) in cases {
            assert_eq!(check_container_name(name).is_ok(), ok, "{}", name);
        }
    }

    #[test]
    fn rejects_non_hmac_credentials() {
        let pairs: Pairs = vec![
            Pair::name("container"),
            Pair::Credential(Credential::ApiKey("k".into())),
        ]
        .into_iter()
        .collect();
        let rejection = check_pairs(&pairs).unwrap_err();
        assert_eq!(rejection.key, PairKey::Credential);
    }

    #[test]
    fn access_tiers_round_trip() {
        for class in [StorageClass::Hot, StorageClass::Warm, StorageClass::Cold] {
            let native = parse_storage_class(class).unwrap();
            assert_eq!(format_storage_class(native), Some(class));
        }
        assert_eq!(format_storage_class("Premium"), None);
    }
}
