//! Validates supplied pairs against what an operation requires and what a
//! provider instance supports, then merges them over instance defaults.
//!
//! Negotiation never touches the network; every public operation runs it
//! before its first remote call.

use crate::{
    backends::{Feature, Features, ServiceType},
    errors::{ErrorKind, Result, StorageError},
    models::{Pair, PairKey, PairScope, Pairs},
};

/// Operations that accept pairs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    New,
    Stat,
    Read,
    Write,
    Delete,
    List,
    InitSegment,
    WriteSegment,
    CompleteSegment,
    AbortSegment,
}

/// Pairs every storage instance needs, whatever the provider.
pub const GLOBAL_REQUIRED_PAIRS: &[PairKey] = &[PairKey::Name];

const CALL_TIMEOUT: &[PairKey] = &[PairKey::Timeout];

impl Operation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Operation::New => "new_storager",
            Operation::Stat => "stat",
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Delete => "delete",
            Operation::List => "list",
            Operation::InitSegment => "init_segment",
            Operation::WriteSegment => "write_segment",
            Operation::CompleteSegment => "complete_segment",
            Operation::AbortSegment => "abort_segment",
        }
    }

    /// Call pairs the operation understands.
    fn accepted(self) -> &'static [PairKey] {
        match self {
            Operation::New => &[],
            Operation::Stat | Operation::Delete => CALL_TIMEOUT,
            Operation::Read => &[PairKey::Offset, PairKey::Size, PairKey::Timeout],
            Operation::Write | Operation::InitSegment => &[
                PairKey::ContentType,
                PairKey::ContentMd5,
                PairKey::StorageClass,
                PairKey::EncryptionKey,
                PairKey::EncryptionScope,
                PairKey::Timeout,
            ],
            Operation::List => &[PairKey::ContinuationToken, PairKey::Timeout],
            Operation::WriteSegment | Operation::CompleteSegment | Operation::AbortSegment => {
                CALL_TIMEOUT
            }
        }
    }

    /// Feature a provider must declare for the operation to exist at all.
    pub fn required_feature(self) -> Option<Feature> {
        match self {
            Operation::InitSegment
            | Operation::WriteSegment
            | Operation::CompleteSegment
            | Operation::AbortSegment => Some(Feature::Segment),
            _ => None,
        }
    }
}

/// How a pair relates to one provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairClass {
    RequiredAlways,
    RequiredForBackend,
    OptionalWithDefault,
    Optional,
    Unsupported,
}

/// Classify `key` for `service`.
pub fn classify(key: PairKey, service: ServiceType) -> PairClass {
    let features = service.features();
    if GLOBAL_REQUIRED_PAIRS.contains(&key) {
        PairClass::RequiredAlways
    } else if service.required_pairs().contains(&key) {
        PairClass::RequiredForBackend
    } else if key.required_feature().is_some_and(|f| !features.contains(f)) {
        PairClass::Unsupported
    } else if service.default_pairs().contains(key) {
        PairClass::OptionalWithDefault
    } else {
        PairClass::Optional
    }
}

/// What one negotiation checks against.
#[derive(Clone, Copy, Debug)]
pub struct Restriction<'a> {
    pub op: Operation,
    pub required: &'a [PairKey],
    pub features: &'a Features,
}

/// Validate `supplied` for `restriction` and merge it over `defaults`.
///
/// Supplied values win. Defaults only fill keys the operation accepts.
pub fn negotiate(
    supplied: &[Pair],
    restriction: Restriction<'_>,
    defaults: &Pairs,
    path: &str,
) -> Result<Pairs> {
    let op = restriction.op;
    let unsupported =
        |detail: String| StorageError::new(op.as_str(), path, ErrorKind::UnsupportedOption, detail);

    if let Some(feature) = op.required_feature() {
        if !restriction.features.contains(feature) {
            return Err(unsupported(format!(
                "operation requires feature {:?}",
                feature
            )));
        }
    }

    let construction = op == Operation::New;
    let mut merged = Pairs::new();
    for pair in supplied {
        let key = pair.key();
        let accepted = if construction {
            true
        } else {
            key.scope() == PairScope::Call && op.accepted().contains(&key)
        };
        if !accepted {
            return Err(unsupported(format!("pair `{}` is not accepted here", key)));
        }
        if let Some(feature) = key.required_feature() {
            if !restriction.features.contains(feature) {
                return Err(unsupported(format!(
                    "pair `{}` requires feature {:?}",
                    key, feature
                )));
            }
        }
        merged.insert(pair.clone());
    }

    if let Some(missing) = restriction
        .required
        .iter()
        .find(|key| !merged.contains(**key))
    {
        return Err(StorageError::new(
            op.as_str(),
            path,
            ErrorKind::RestrictionNotSatisfied,
            format!("required pair `{}` is missing", missing),
        ));
    }

    for default in defaults.iter() {
        let key = default.key();
        if merged.contains(key) || !op.accepted().contains(&key) {
            continue;
        }
        if key
            .required_feature()
            .is_some_and(|f| !restriction.features.contains(f))
        {
            continue;
        }
        merged.insert(default.clone());
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StorageClass;

    fn features(list: &[Feature]) -> Features {
        list.iter().copied().collect()
    }

    #[test]
    fn unsupported_feature_is_rejected() {
        let features = features(&[Feature::ContentMd5]);
        let restriction = Restriction {
            op: Operation::Write,
            required: &[],
            features: &features,
        };
        let err = negotiate(
            &[Pair::StorageClass(StorageClass::Warm)],
            restriction,
            &Pairs::new(),
            "a",
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOption);
    }

    #[test]
    fn missing_required_pair_is_rejected() {
        let features = Features::default();
        let restriction = Restriction {
            op: Operation::New,
            required: &[PairKey::Name, PairKey::Credential],
            features: &features,
        };
        let err = negotiate(&[Pair::name("bucket")], restriction, &Pairs::new(), "")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RestrictionNotSatisfied);
        assert!(err.to_string().contains("credential"));
    }

    #[test]
    fn defaults_fill_unspecified_pairs() {
        let features = features(&[Feature::StorageClass]);
        let defaults: Pairs = vec![
            Pair::content_type("application/octet-stream"),
            Pair::StorageClass(StorageClass::Hot),
            Pair::Offset(7),
        ]
        .into_iter()
        .collect();
        let restriction = Restriction {
            op: Operation::Write,
            required: &[],
            features: &features,
        };
        let merged = negotiate(
            &[Pair::content_type("text/plain")],
            restriction,
            &defaults,
            "a",
        )
        .unwrap();
        assert_eq!(merged.content_type(), Some("text/plain"));
        assert_eq!(merged.storage_class(), Some(StorageClass::Hot));
        // Offset is not a write pair.
        assert_eq!(merged.offset(), None);
    }

    #[test]
    fn construction_pairs_are_refused_on_calls() {
        let features = Features::default();
        let restriction = Restriction {
            op: Operation::Stat,
            required: &[],
            features: &features,
        };
        let err = negotiate(&[Pair::work_dir("/x/")], restriction, &Pairs::new(), "a")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOption);
    }

    #[test]
    fn segment_operations_need_the_segment_feature() {
        let features = features(&[Feature::StorageClass]);
        let restriction = Restriction {
            op: Operation::InitSegment,
            required: &[],
            features: &features,
        };
        let err = negotiate(&[], restriction, &Pairs::new(), "a").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOption);
    }

    #[test]
    fn classifies_pairs_per_provider() {
        assert_eq!(
            classify(PairKey::Name, ServiceType::Memory),
            PairClass::RequiredAlways
        );
        assert_eq!(
            classify(PairKey::Location, ServiceType::Qingstor),
            PairClass::RequiredForBackend
        );
        assert_eq!(
            classify(PairKey::StorageClass, ServiceType::Qingstor),
            PairClass::OptionalWithDefault
        );
        assert_eq!(
            classify(PairKey::StorageClass, ServiceType::Memory),
            PairClass::Unsupported
        );
        assert_eq!(
            classify(PairKey::EncryptionScope, ServiceType::Qingstor),
            PairClass::Unsupported
        );
        assert_eq!(
            classify(PairKey::Timeout, ServiceType::Azblob),
            PairClass::Optional
        );
    }
}
