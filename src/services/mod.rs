//! Provider-neutral services layered over a backend client.

pub mod negotiator;
pub mod normalizer;
pub mod path_resolver;
pub mod segment_coordinator;
pub mod storage_service;

pub use negotiator::{GLOBAL_REQUIRED_PAIRS, Operation, PairClass, Restriction, classify, negotiate};
pub use normalizer::ErrorNormalizer;
pub use path_resolver::PathResolver;
pub use segment_coordinator::SegmentCoordinator;
pub use storage_service::Storage;
