//! QingStor object storage declarations.

use crate::{
    backends::{Feature, PairRejection, RemoteMetadata},
    errors::ErrorKind,
    models::{Credential, PairKey, Pairs, StorageClass, SystemMetadata},
};

pub const TYPE: &str = "qingstor";

pub const FEATURES: &[Feature] = &[
    Feature::Segment,
    Feature::StorageClass,
    Feature::ServerSideEncryption,
    Feature::ContentMd5,
    Feature::RangeRead,
];

pub const REQUIRED_PAIRS: &[PairKey] = &[PairKey::Credential, PairKey::Endpoint, PairKey::Location];

/// Maximum size for a put-object call (5 GiB).
pub const WRITE_SIZE_MAXIMUM: u64 = 5 * 1024 * 1024 * 1024;

pub const ERROR_CODES: &[(&str, ErrorKind)] = &[
    ("object_not_exists", ErrorKind::NotExist),
    ("bucket_not_exists", ErrorKind::NotExist),
    ("permission_denied", ErrorKind::PermissionDenied),
    ("invalid_access_key_id", ErrorKind::PermissionDenied),
];

const STORAGE_CLASS_STANDARD: &str = "STANDARD";
const STORAGE_CLASS_STANDARD_IA: &str = "STANDARD_IA";

const BUCKET_NAME_MIN_LEN: usize = 6;
const BUCKET_NAME_MAX_LEN: usize = 63;

/// QingStor has no archive tier; cold data is unsupported.
pub fn parse_storage_class(class: StorageClass) -> Option<&'static str> {
    match class {
        StorageClass::Hot => Some(STORAGE_CLASS_STANDARD),
        StorageClass::Warm => Some(STORAGE_CLASS_STANDARD_IA),
        StorageClass::Cold => None,
    }
}

pub fn format_storage_class(native: &str) -> Option<StorageClass> {
    match native {
        STORAGE_CLASS_STANDARD => Some(StorageClass::Hot),
        STORAGE_CLASS_STANDARD_IA => Some(StorageClass::Warm),
        _ => None,
    }
}

/// Bucket naming rules:
/// - 6–63 characters
/// - lowercase letters, digits and hyphens only
/// - starts with a letter or digit, does not end with a hyphen
pub fn is_bucket_name_valid(name: &str) -> bool {
    let len = name.len();
    (BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len)
        && name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '-'))
        && !name.starts_with('-')
        && !name.ends_with('-')
}

pub fn check_pairs(pairs: &Pairs) -> Result<(), PairRejection> {
    if let Some(name) = pairs.name() {
        if !is_bucket_name_valid(name) {
            return Err(PairRejection::new(
                PairKey::Name,
                format!("bucket name `{}` is invalid", name),
            ));
        }
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
    SystemMetadata::Qingstor {
        storage_class: meta.storage_class.clone(),
        encryption_customer_algorithm: meta.encryption_algorithm.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_names() {
        let cases = [
            ("start with letter", "a-bucket-test", true),
            ("start with digit", "0-bucket-test", true),
            ("start with hyphen", "-bucket-test", false),
            ("end with hyphen", "bucket-test-", false),
            ("too short", "abcd", false),
            (
                "too long (64)",
                "abcdefghijklmnopqrstuvwxyz123456abcdefghijklmnopqrstuvwxyz123456",
                false,
            ),
            ("contains illegal char", "abcdefg_1234", false),
        ];
        for (name, input, want) in cases {
            assert_eq!(is_bucket_name_valid(input), want, "{}", name);
        }
    }

    #[test]
    fn storage_classes() {
        assert_eq!(parse_storage_class(StorageClass::Hot), Some("STANDARD"));
        assert_eq!(parse_storage_class(StorageClass::Warm), Some("STANDARD_IA"));
        assert_eq!(parse_storage_class(StorageClass::Cold), None);

        assert_eq!(format_storage_class("STANDARD"), Some(StorageClass::Hot));
        assert_eq!(format_storage_class("STANDARD_IA"), Some(StorageClass::Warm));
        assert_eq!(format_storage_class("xxxxx"), None);
    }
}
