//! Core data models shared by the storage layer.
//!
//! These describe what callers see (objects, segments) and what they pass in
//! (pairs). They serialize naturally via `serde` and own no external resource.

pub mod object;
pub mod pair;
pub mod segment;

pub use object::{Object, ObjectPage, SystemMetadata};
pub use pair::{Credential, Endpoint, Pair, PairKey, PairScope, Pairs, ParsePairError, StorageClass};
pub use segment::{CompletedPart, Part, Segment};
