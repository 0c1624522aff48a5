//! Violation processing engine
//!
//! Takes one candidate at a time through the full pipeline: detection
//! and shape gates, in-process deduplication, evidence resolution, fine
//! computation, registry lookup, persistence, and owner notification.
//! The persistence step re-checks for duplicates inside the store, so a
//! candidate that slips past the cache (fresh reconnect, racing batch)
//! is still caught.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::channel::ViolationCandidate;
use crate::db::{AppendOutcome, ViolationRecord, ViolationRepo};
use crate::dedup::DedupCache;
use crate::events::UiState;
use crate::fines::FineSchedule;
use crate::notify::Notify;
use crate::registry;
use crate::upload::EvidenceFrame;

/// What became of a single candidate
#[derive(Debug)]
pub enum Outcome {
    /// The service reported no violation
    NotDetected,
    /// Detected but with no crime types; discarded
    Malformed,
    /// The in-process cache recognized a recent sighting
    DuplicateCached,
    /// The store found an overlapping recent record
    DuplicateStored,
    /// A new record was written
    Persisted(Box<ViolationRecord>),
    /// Persistence failed; the candidate is dropped
    Failed(crate::Error),
}

/// Per-session violation pipeline
pub struct ViolationEngine {
    cache: Mutex<DedupCache>,
    fines: FineSchedule,
    store: ViolationRepo,
    notifier: Arc<dyn Notify>,
    ui: Arc<UiState>,
}

impl ViolationEngine {
    #[must_use]
    pub fn new(
        cache: DedupCache,
        fines: FineSchedule,
        store: ViolationRepo,
        notifier: Arc<dyn Notify>,
        ui: Arc<UiState>,
    ) -> Self {
        Self {
            cache: Mutex::new(cache),
            fines,
            store,
            notifier,
            ui,
        }
    }

    /// Run one candidate through the pipeline
    ///
    /// `evidence` is shared by the whole batch; its upload happens here,
    /// lazily, only once a candidate survives the cache check.
    pub async fn process(
        &self,
        candidate: &ViolationCandidate,
        evidence: &EvidenceFrame,
    ) -> Outcome {
        if !candidate.detected {
            return Outcome::NotDetected;
        }
        if candidate.crime_types.is_empty() {
            tracing::warn!(
                plate = %candidate.plate,
                "candidate flagged as detected but carries no crime types, discarding"
            );
            return Outcome::Malformed;
        }

        let verdict =
            self.cache
                .lock()
                .await
                .classify(&candidate.plate, &candidate.crime_types, Utc::now());
        if !verdict.is_novel() {
            tracing::info!(
                plate = %candidate.plate,
                crimes = ?candidate.crime_types,
                "recently seen, skipping"
            );
            return Outcome::DuplicateCached;
        }

        self.ui.set_analyzing(true);

        let evidence_url = evidence.url().await;
        let (fine_breakdown, total_fine) = self.fines.breakdown(&candidate.crime_types);
        let owner = registry::lookup(&candidate.plate);

        let record = ViolationRecord {
            plate: candidate.plate.clone(),
            vehicle_class: candidate.vehicle_class.clone(),
            crime_types: candidate.crime_types.clone(),
            occurred_at: Utc::now(),
            evidence_url,
            owner_name: None,
            owner_address: None,
            owner_phone: None,
            owner_email: None,
            vehicle_model: None,
            fine_breakdown,
            total_fine,
        }
        .with_owner(owner);

        match self.store.append(&record) {
            Ok(AppendOutcome::Saved(id)) => {
                tracing::info!(id = %id, plate = %record.plate, "violation recorded");
                self.ui.publish(record.clone());
                self.spawn_notify(record.clone());
                Outcome::Persisted(Box::new(record))
            }
            Ok(AppendOutcome::Duplicate) => Outcome::DuplicateStored,
            Err(e) => {
                tracing::error!(plate = %record.plate, error = %e, "failed to persist violation");
                Outcome::Failed(e)
            }
        }
    }

    /// Crime types currently cached for a plate, if any
    pub async fn cached_types(&self, plate: &str) -> Option<Vec<String>> {
        self.cache.lock().await.cached_types(plate)
    }

    /// Drop all cached sightings
    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    // Notification is fire-and-forget; a failure must not undo the write
    fn spawn_notify(&self, record: ViolationRecord) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&record).await {
                tracing::warn!(plate = %record.plate, error = %e, "owner notification failed");
            }
        });
    }
}
