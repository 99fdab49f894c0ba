use anyhow::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::aircraft::{AddressType, AircraftKey};
use crate::fixes::{Fix, ReportHash};
use crate::geometry::BoundingBox;

/// How many fixes we keep per aircraft for serving recent-track queries.
/// Long-term archival is a storage-layer concern behind this same interface.
const RECENT_FIXES_PER_AIRCRAFT: usize = 120;

/// Natural key a physical report resolves to. A redelivered report maps to
/// the same key and therefore to the same stored fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct DedupKey {
    address: u32,
    address_type: AddressType,
    timestamp: DateTime<Utc>,
    hash: ReportHash,
}

impl DedupKey {
    fn for_fix(fix: &Fix) -> Option<Self> {
        Some(Self {
            address: fix.address,
            address_type: fix.address_type,
            timestamp: fix.timestamp,
            hash: fix.raw_hash?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(Uuid),
    /// The natural key already existed; the payload was discarded and the
    /// pre-existing fix id is returned instead
    Duplicate(Uuid),
}

impl InsertOutcome {
    pub fn fix_id(&self) -> Uuid {
        match self {
            InsertOutcome::Inserted(id) | InsertOutcome::Duplicate(id) => *id,
        }
    }
}

struct Inner {
    fixes: DashMap<Uuid, Fix>,
    dedup_index: DashMap<DedupKey, Uuid>,
    recent: DashMap<AircraftKey, VecDeque<Uuid>>,
    latest: DashMap<AircraftKey, Uuid>,
    by_flight: DashMap<Uuid, Vec<Uuid>>,
    /// Uniqueness is only guaranteed from this instant forward; older rows
    /// may lack a hash and are exempt from the index
    cutover: Option<DateTime<Utc>>,
}

/// In-memory fix store.
///
/// The dedup index entry API is the one transactional guarantee the rest of
/// the pipeline relies on: concurrent inserts of the same natural key
/// resolve to a single stored fix.
#[derive(Clone)]
pub struct FixesRepository {
    inner: Arc<Inner>,
}

impl FixesRepository {
    pub fn new(cutover: Option<DateTime<Utc>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                fixes: DashMap::new(),
                dedup_index: DashMap::new(),
                recent: DashMap::new(),
                latest: DashMap::new(),
                by_flight: DashMap::new(),
                cutover,
            }),
        }
    }

    fn dedup_key(&self, fix: &Fix) -> Option<DedupKey> {
        // Pre-cutover rows are fast-forward adoptions and never conflict
        if let Some(cutover) = self.inner.cutover
            && fix.timestamp < cutover
        {
            return None;
        }
        DedupKey::for_fix(fix)
    }

    /// Check for an already-stored fix with the same natural key without
    /// inserting. Used under the per-aircraft lock to short-circuit
    /// redeliveries before they reach the flight tracker.
    pub fn find_duplicate(&self, fix: &Fix) -> Option<Uuid> {
        let key = self.dedup_key(fix)?;
        self.inner.dedup_index.get(&key).map(|entry| *entry.value())
    }

    /// Insert a fix, resolving natural-key conflicts to the existing row.
    /// Redelivery of the same physical report is expected after a consumer
    /// crash and restart and is not an error.
    pub fn insert(&self, fix: &Fix) -> Result<InsertOutcome> {
        if let Some(key) = self.dedup_key(fix) {
            match self.inner.dedup_index.entry(key) {
                Entry::Occupied(existing) => {
                    debug!(
                        "Duplicate fix detected on redelivery for {} at {}",
                        fix.key(),
                        fix.timestamp
                    );
                    metrics::counter!("ingest.fixes.duplicate_on_redelivery").increment(1);
                    return Ok(InsertOutcome::Duplicate(*existing.get()));
                }
                Entry::Vacant(slot) => {
                    slot.insert(fix.id);
                }
            }
        }

        self.store(fix.clone());
        metrics::counter!("ingest.fixes.inserted").increment(1);
        Ok(InsertOutcome::Inserted(fix.id))
    }

    fn store(&self, fix: Fix) {
        let key = fix.key();
        let fix_id = fix.id;
        let timestamp = fix.timestamp;

        if let Some(flight_id) = fix.flight_id {
            self.inner.by_flight.entry(flight_id).or_default().push(fix_id);
        }

        self.inner.fixes.insert(fix_id, fix);

        {
            let mut recent = self.inner.recent.entry(key).or_default();
            if recent.len() >= RECENT_FIXES_PER_AIRCRAFT {
                if let Some(evicted) = recent.pop_front() {
                    self.inner.fixes.remove(&evicted);
                }
            }
            recent.push_back(fix_id);
        }

        // Out-of-order fixes must not displace a newer latest position
        match self.inner.latest.entry(key) {
            Entry::Occupied(mut entry) => {
                let is_newer = self
                    .inner
                    .fixes
                    .get(entry.get())
                    .map(|current| timestamp >= current.timestamp)
                    .unwrap_or(true);
                if is_newer {
                    entry.insert(fix_id);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(fix_id);
            }
        }
    }

    pub fn get_fix(&self, id: Uuid) -> Option<Fix> {
        self.inner.fixes.get(&id).map(|entry| entry.value().clone())
    }

    /// Most recent fix (by position timestamp) for an aircraft
    pub fn latest_fix(&self, key: &AircraftKey) -> Option<Fix> {
        let id = *self.inner.latest.get(key)?.value();
        self.get_fix(id)
    }

    /// Up to `limit` most recent fixes for an aircraft, newest first
    pub fn recent_fixes(&self, key: &AircraftKey, limit: usize) -> Vec<Fix> {
        let Some(recent) = self.inner.recent.get(key) else {
            return Vec::new();
        };
        recent
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| self.get_fix(*id))
            .collect()
    }

    /// All retained fixes for a flight in insertion order
    pub fn fixes_for_flight(&self, flight_id: Uuid) -> Vec<Fix> {
        let Some(ids) = self.inner.by_flight.get(&flight_id) else {
            return Vec::new();
        };
        ids.iter().filter_map(|id| self.get_fix(*id)).collect()
    }

    /// Latest fix of every aircraft currently inside the rectangle, filtered
    /// to fixes newer than `after`
    pub fn aircraft_in_bounding_box(
        &self,
        bounds: &BoundingBox,
        after: DateTime<Utc>,
    ) -> Vec<Fix> {
        self.inner
            .latest
            .iter()
            .filter_map(|entry| self.get_fix(*entry.value()))
            .filter(|fix| fix.timestamp >= after && bounds.contains(fix.latitude, fix.longitude))
            .collect()
    }

    pub fn count_aircraft_in_bounding_box(
        &self,
        bounds: &BoundingBox,
        after: DateTime<Utc>,
    ) -> usize {
        self.inner
            .latest
            .iter()
            .filter_map(|entry| self.get_fix(*entry.value()))
            .filter(|fix| fix.timestamp >= after && bounds.contains(fix.latitude, fix.longitude))
            .count()
    }

    pub fn total_fixes(&self) -> usize {
        self.inner.fixes.len()
    }
}
