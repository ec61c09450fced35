//! One storage interface over several object-storage providers.
//!
//! A [`Storage`] is built from a [`ServiceType`], an injected
//! [`BackendClient`] doing the wire calls, and a list of [`Pair`]s. Calls are
//! checked against what the provider declares before anything goes remote,
//! and every failure comes back as a [`StorageError`] with one canonical
//! [`ErrorKind`].

pub mod backends;
pub mod config;
pub mod errors;
pub mod models;
pub mod services;

pub use backends::{BackendClient, ByteStream, Feature, Features, ServiceType};
pub use config::ServiceConfig;
pub use errors::{ErrorKind, RemoteError, Result, StorageError};
pub use models::{Object, Pair, PairKey, Segment};
pub use services::Storage;
pub use tokio_util::sync::CancellationToken;
