//! Multipart upload coordinator.
//!
//! Tracks at most one open segment per caller path. Each path owns a slot
//! guarded by an async reader/writer lock:
//!
//! - `write_part` holds the read side for its whole run, so parts of one
//!   segment upload in parallel. Byte ranges and part numbers are reserved in
//!   a small synchronous ledger before the upload starts and either recorded
//!   or released once it ends.
//! - `init`, `complete` and `abort` hold the write side, so they wait for
//!   in-flight parts and exclude each other.
//!
//! Slots of different paths never contend. A slot is dropped from the table
//! once its segment is gone and nobody else holds it.

use crate::{
    backends::{BackendClient, ByteStream, WriteOptions},
    errors::{ErrorKind, Result, StorageError},
    models::{CompletedPart, Part, Segment},
    services::{negotiator::Operation, normalizer::ErrorNormalizer},
};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const OP_INIT: &str = Operation::InitSegment.as_str();
const OP_WRITE: &str = Operation::WriteSegment.as_str();
const OP_COMPLETE: &str = Operation::CompleteSegment.as_str();
const OP_ABORT: &str = Operation::AbortSegment.as_str();

type Slot = RwLock<Option<OpenSegment>>;

/// Recorded and reserved parts of one segment.
#[derive(Debug)]
struct PartLedger {
    parts: BTreeMap<u64, Part>,
    in_flight: BTreeMap<u64, Part>,
    /// Numbers given back by released reservations, reused lowest first.
    released: BTreeSet<u32>,
    next_number: u32,
}

impl Default for PartLedger {
    fn default() -> Self {
        Self {
            parts: BTreeMap::new(),
            in_flight: BTreeMap::new(),
            released: BTreeSet::new(),
            next_number: 1,
        }
    }
}

impl PartLedger {
    /// Reserve `[offset, offset + size)` and hand out the lowest free part
    /// number. Returns `None` if the range meets a recorded or in-flight part.
    fn reserve(&mut self, offset: u64, size: u64) -> Option<u32> {
        let taken = self
            .parts
            .values()
            .chain(self.in_flight.values())
            .any(|p| p.overlaps(offset, size));
        if taken {
            return None;
        }
        let number = match self.released.pop_first() {
            Some(number) => number,
            None => {
                self.next_number += 1;
                self.next_number - 1
            }
        };
        self.in_flight.insert(
            offset,
            Part {
                offset,
                size,
                number,
            },
        );
        Some(number)
    }

    fn record(&mut self, offset: u64) -> Option<Part> {
        let part = self.in_flight.remove(&offset)?;
        self.parts.insert(offset, part);
        Some(part)
    }

    /// Drop a reservation and give its number back.
    fn release(&mut self, offset: u64) {
        if let Some(part) = self.in_flight.remove(&offset) {
            self.released.insert(part.number);
            while self.released.remove(&(self.next_number - 1)) {
                self.next_number -= 1;
            }
        }
    }

    /// Offset-ordered parts, provided they tile `[0, total_size)` exactly.
    fn validate(&self, total_size: u64) -> std::result::Result<Vec<CompletedPart>, String> {
        let mut covered = 0;
        for part in self.parts.values() {
            if part.offset != covered {
                return Err(format!(
                    "expected a part at offset {}, found one at {}",
                    covered, part.offset
                ));
            }
            covered = part.end();
        }
        if covered != total_size {
            return Err(format!(
                "parts cover {} of {} bytes",
                covered, total_size
            ));
        }
        Ok(self.parts.values().map(CompletedPart::from).collect())
    }
}

#[derive(Debug)]
struct OpenSegment {
    id: String,
    path: String,
    key: String,
    total_size: u64,
    ledger: Mutex<PartLedger>,
}

impl OpenSegment {
    fn ledger(&self) -> MutexGuard<'_, PartLedger> {
        self.ledger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn snapshot(&self) -> Segment {
        Segment {
            id: self.id.clone(),
            path: self.path.clone(),
            total_size: self.total_size,
            parts: self.ledger().parts.values().copied().collect(),
        }
    }
}

/// Releases a part reservation unless the part got recorded. Runs on every
/// exit path, including a dropped future.
struct Reservation<'a> {
    segment: &'a OpenSegment,
    offset: u64,
    recorded: bool,
}

impl Reservation<'_> {
    fn record(mut self) {
        self.segment.ledger().record(self.offset);
        self.recorded = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.recorded {
            self.segment.ledger().release(self.offset);
        }
    }
}

/// Owns the open segments of one storage instance.
#[derive(Clone)]
pub struct SegmentCoordinator {
    slots: Arc<Mutex<HashMap<String, Arc<Slot>>>>,
    client: Arc<dyn BackendClient>,
    normalizer: ErrorNormalizer,
}

impl SegmentCoordinator {
    pub fn new(client: Arc<dyn BackendClient>, normalizer: ErrorNormalizer) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            client,
            normalizer,
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Arc<Slot>>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn slot(&self, path: &str) -> Arc<Slot> {
        self.table()
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(None)))
            .clone()
    }

    fn existing_slot(&self, op: &'static str, path: &str) -> Result<Arc<Slot>> {
        self.table()
            .get(path)
            .cloned()
            .ok_or_else(|| not_initiated(op, path))
    }

    /// Forget `slot` if it is empty and only the table and the caller hold it.
    fn reap(&self, path: &str, slot: Arc<Slot>) {
        let mut table = self.table();
        let idle = table.get(path).is_some_and(|current| {
            Arc::ptr_eq(current, &slot)
                && Arc::strong_count(&slot) == 2
                && slot.try_read().is_ok_and(|segment| segment.is_none())
        });
        if idle {
            table.remove(path);
        }
    }

    async fn read_slot<'a>(
        op: &'static str,
        path: &str,
        slot: &'a Slot,
        cancel: &CancellationToken,
    ) -> Result<RwLockReadGuard<'a, Option<OpenSegment>>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StorageError::cancelled(op, path)),
            guard = slot.read() => Ok(guard),
        }
    }

    async fn write_slot<'a>(
        op: &'static str,
        path: &str,
        slot: &'a Slot,
        cancel: &CancellationToken,
    ) -> Result<RwLockWriteGuard<'a, Option<OpenSegment>>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StorageError::cancelled(op, path)),
            guard = slot.write() => Ok(guard),
        }
    }

    /// Open a segment for `path`, backed by a new remote upload on `key`.
    pub async fn init(
        &self,
        path: &str,
        key: &str,
        total_size: u64,
        opts: &WriteOptions,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<Segment> {
        let slot = self.slot(path);
        let result: Result<Segment> = async {
            let mut guard = Self::write_slot(OP_INIT, path, &slot, cancel).await?;
            if guard.is_some() {
                return Err(StorageError::new(
                    OP_INIT,
                    path,
                    ErrorKind::DuplicateSegment,
                    "",
                ));
            }
            let id = self
                .normalizer
                .call(
                    OP_INIT,
                    path,
                    cancel,
                    timeout,
                    self.client.initiate_upload(key, opts),
                )
                .await?;
            info!(path, upload_id = %id, total_size, "segment initiated");
            let segment = OpenSegment {
                id,
                path: path.to_string(),
                key: key.to_string(),
                total_size,
                ledger: Mutex::new(PartLedger::default()),
            };
            let snapshot = segment.snapshot();
            *guard = Some(segment);
            Ok(snapshot)
        }
        .await;
        self.reap(path, slot);
        result
    }

    /// Upload one part and record it; returns its part number.
    pub async fn write_part(
        &self,
        path: &str,
        offset: u64,
        size: u64,
        body: ByteStream,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<u32> {
        if size == 0 {
            return Err(StorageError::new(
                OP_WRITE,
                path,
                ErrorKind::RestrictionNotSatisfied,
                "part size must be positive",
            ));
        }
        let slot = self.existing_slot(OP_WRITE, path)?;
        let result: Result<u32> = async {
            let guard = Self::read_slot(OP_WRITE, path, &slot, cancel).await?;
            let segment = guard.as_ref().ok_or_else(|| not_initiated(OP_WRITE, path))?;
            let end = offset
                .checked_add(size)
                .filter(|end| *end <= segment.total_size)
                .ok_or_else(|| {
                    StorageError::new(
                        OP_WRITE,
                        path,
                        ErrorKind::RestrictionNotSatisfied,
                        format!(
                            "part at offset {} of {} bytes exceeds the segment size {}",
                            offset, size, segment.total_size
                        ),
                    )
                })?;

            let number = segment.ledger().reserve(offset, size).ok_or_else(|| {
                StorageError::new(
                    OP_WRITE,
                    path,
                    ErrorKind::OverlappingPart,
                    format!("range [{}, {}) is already taken", offset, end),
                )
            })?;
            let reservation = Reservation {
                segment,
                offset,
                recorded: false,
            };

            self.normalizer
                .call(
                    OP_WRITE,
                    path,
                    cancel,
                    timeout,
                    self.client
                        .upload_part(&segment.key, &segment.id, number, offset, size, body),
                )
                .await?;
            reservation.record();
            debug!(path, part_number = number, offset, size, "part recorded");
            Ok(number)
        }
        .await;
        self.reap(path, slot);
        result
    }

    /// Commit the segment once its parts tile the declared size.
    ///
    /// The record survives a failed or cancelled commit so the caller can
    /// retry or abort.
    pub async fn complete(
        &self,
        path: &str,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<Segment> {
        let slot = self.existing_slot(OP_COMPLETE, path)?;
        let result: Result<Segment> = async {
            let mut guard = Self::write_slot(OP_COMPLETE, path, &slot, cancel).await?;
            let segment = guard
                .as_ref()
                .ok_or_else(|| not_initiated(OP_COMPLETE, path))?;
            let parts = segment.ledger().validate(segment.total_size).map_err(|detail| {
                StorageError::new(OP_COMPLETE, path, ErrorKind::IncompleteSegment, detail)
            })?;

            self.normalizer
                .call(
                    OP_COMPLETE,
                    path,
                    cancel,
                    timeout,
                    self.client.complete_upload(&segment.key, &segment.id, &parts),
                )
                .await?;
            let snapshot = segment.snapshot();
            *guard = None;
            info!(path, upload_id = %snapshot.id, parts = parts.len(), "segment completed");
            Ok(snapshot)
        }
        .await;
        self.reap(path, slot);
        result
    }

    /// Tear down the remote upload and forget the segment.
    pub async fn abort(
        &self,
        path: &str,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let slot = self.existing_slot(OP_ABORT, path)?;
        let result: Result<()> = async {
            let mut guard = Self::write_slot(OP_ABORT, path, &slot, cancel).await?;
            let segment = guard
                .as_ref()
                .ok_or_else(|| not_initiated(OP_ABORT, path))?;
            let outcome = self
                .normalizer
                .call(
                    OP_ABORT,
                    path,
                    cancel,
                    timeout,
                    self.client.abort_upload(&segment.key, &segment.id),
                )
                .await;
            if let Err(err) = outcome {
                warn!(path, upload_id = %segment.id, error = %err, "segment abort failed");
                return Err(err);
            }
            info!(path, upload_id = %segment.id, "segment aborted");
            *guard = None;
            Ok(())
        }
        .await;
        self.reap(path, slot);
        result
    }

    /// Current state of the segment open on `path`, if any.
    pub async fn segment(&self, path: &str) -> Option<Segment> {
        let slot = self.table().get(path).cloned()?;
        let snapshot = slot.read().await.as_ref().map(OpenSegment::snapshot);
        self.reap(path, slot);
        snapshot
    }

    /// Paths with an open segment.
    pub fn open_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .table()
            .iter()
            .filter(|(_, slot)| slot.try_read().map_or(true, |s| s.is_some()))
            .map(|(path, _)| path.clone())
            .collect();
        paths.sort();
        paths
    }
}

fn not_initiated(op: &'static str, path: &str) -> StorageError {
    StorageError::new(op, path, ErrorKind::SegmentNotInitiated, "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_numbers_by_admission() {
        let mut ledger = PartLedger::default();
        assert_eq!(ledger.reserve(100, 50), Some(1));
        assert_eq!(ledger.reserve(0, 100), Some(2));
        assert_eq!(ledger.reserve(50, 10), None);
        ledger.record(0);
        ledger.record(100);
        let numbers: Vec<_> = ledger.validate(150).unwrap().iter().map(|p| p.number).collect();
        // Offset order, not number order.
        assert_eq!(numbers, [2, 1]);
    }

    #[test]
    fn ledger_reuses_released_trailing_numbers() {
        let mut ledger = PartLedger::default();
        assert_eq!(ledger.reserve(0, 10), Some(1));
        assert_eq!(ledger.reserve(10, 10), Some(2));
        ledger.release(10);
        assert_eq!(ledger.reserve(10, 10), Some(2));
        ledger.record(0);
        ledger.record(10);
        assert_eq!(ledger.reserve(20, 10), Some(3));
    }

    #[test]
    fn ledger_fills_gaps_from_released_numbers() {
        let mut ledger = PartLedger::default();
        assert_eq!(ledger.reserve(0, 10), Some(1));
        assert_eq!(ledger.reserve(10, 10), Some(2));
        ledger.record(10);
        ledger.release(0);
        assert_eq!(ledger.reserve(0, 10), Some(1));
        ledger.record(0);
        assert_eq!(ledger.reserve(20, 10), Some(3));
    }

    #[test]
    fn ledger_validation_finds_gaps() {
        let mut ledger = PartLedger::default();
        ledger.reserve(0, 10);
        ledger.reserve(20, 10);
        ledger.record(0);
        ledger.record(20);
        assert!(ledger.validate(30).unwrap_err().contains("offset 10"));

        let mut ledger = PartLedger::default();
        ledger.reserve(0, 10);
        ledger.record(0);
        assert!(ledger.validate(20).unwrap_err().contains("10 of 20"));
        assert_eq!(ledger.validate(10).unwrap().len(), 1);
    }

    #[test]
    fn empty_segment_validates_only_for_zero_size() {
        let ledger = PartLedger::default();
        assert!(ledger.validate(0).unwrap().is_empty());
        assert!(ledger.validate(1).is_err());
    }
}
