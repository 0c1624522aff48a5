//! Violation record repository
//!
//! The repository is the authority of record for deduplication: `append`
//! re-checks all stored history for the plate before writing, because
//! the in-process cache does not survive reconnects or cover other
//! concurrent viewers.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DbPool;
use crate::dedup;
use crate::registry::OwnerDetails;
use crate::{Error, Result};

/// A persisted traffic violation; immutable after creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub plate: String,
    pub vehicle_class: String,
    pub crime_types: Vec<String>,
    pub occurred_at: DateTime<Utc>,
    pub evidence_url: String,
    pub owner_name: Option<String>,
    pub owner_address: Option<String>,
    pub owner_phone: Option<String>,
    pub owner_email: Option<String>,
    pub vehicle_model: Option<String>,
    pub fine_breakdown: HashMap<String, u64>,
    pub total_fine: u64,
}

impl ViolationRecord {
    /// Attach resolved owner details
    #[must_use]
    pub fn with_owner(mut self, owner: OwnerDetails) -> Self {
        self.owner_name = owner.owner_name;
        self.owner_address = owner.owner_address;
        self.owner_phone = owner.owner_phone;
        self.owner_email = owner.owner_email;
        self.vehicle_model = owner.vehicle_model;
        self
    }
}

/// Result of an append attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Record written; contains its id
    Saved(String),
    /// The store found a recent same-plate, overlapping-crime record and
    /// declined to write
    Duplicate,
}

/// Violation repository
#[derive(Clone)]
pub struct ViolationRepo {
    pool: DbPool,
    window: Duration,
}

impl ViolationRepo {
    /// Create a repository with the given duplicate window
    #[must_use]
    pub fn new(pool: DbPool, window: Duration) -> Self {
        Self { pool, window }
    }

    /// Append a record unless the store holds a duplicate
    ///
    /// The duplicate check matches on the record's exact plate (skipped
    /// entirely for unidentifiable plates), restricted to rows created
    /// within the window, and trips on any crime-type overlap. The row's
    /// `created_at` is set here, at write time.
    ///
    /// # Errors
    ///
    /// Returns error if a database operation fails
    pub fn append(&self, record: &ViolationRecord) -> Result<AppendOutcome> {
        if dedup::is_identifiable(&record.plate) && self.has_recent_overlap(record)? {
            tracing::info!(plate = %record.plate, "store-level duplicate, not writing");
            return Ok(AppendOutcome::Duplicate);
        }

        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let crime_types = serde_json::to_string(&record.crime_types)?;
        let fine_breakdown = serde_json::to_string(&record.fine_breakdown)?;
        #[allow(clippy::cast_possible_wrap)]
        let total_fine = record.total_fine as i64;

        conn.execute(
            "INSERT INTO violations (
                id, plate, vehicle_class, crime_types, occurred_at, evidence_url,
                owner_name, owner_address, owner_phone, owner_email, vehicle_model,
                fine_breakdown, total_fine, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            rusqlite::params![
                &id,
                &record.plate,
                &record.vehicle_class,
                &crime_types,
                &record.occurred_at.to_rfc3339(),
                &record.evidence_url,
                &record.owner_name,
                &record.owner_address,
                &record.owner_phone,
                &record.owner_email,
                &record.vehicle_model,
                &fine_breakdown,
                &total_fine,
                &now,
            ],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        tracing::info!(id = %id, plate = %record.plate, total_fine = record.total_fine, "violation saved");
        Ok(AppendOutcome::Saved(id))
    }

    fn has_recent_overlap(&self, record: &ViolationRecord) -> Result<bool> {
        let recent = self.query_recent(&record.plate)?;
        Ok(recent.iter().any(|existing| {
            record
                .crime_types
                .iter()
                .any(|t| existing.crime_types.contains(t))
        }))
    }

    /// Records for a plate created within the duplicate window
    ///
    /// # Errors
    ///
    /// Returns error if a database operation fails
    pub fn query_recent(&self, plate: &str) -> Result<Vec<ViolationRecord>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let cutoff = (Utc::now()
            - chrono::TimeDelta::from_std(self.window).unwrap_or(chrono::TimeDelta::zero()))
        .to_rfc3339();

        let mut stmt = conn
            .prepare(
                "SELECT plate, vehicle_class, crime_types, occurred_at, evidence_url,
                        owner_name, owner_address, owner_phone, owner_email, vehicle_model,
                        fine_breakdown, total_fine
                 FROM violations WHERE plate = ?1 AND created_at >= ?2",
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        let records = stmt
            .query_map([plate, cutoff.as_str()], row_to_record)
            .map_err(|e| Error::Database(e.to_string()))?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(records)
    }

    /// All records, newest first
    ///
    /// # Errors
    ///
    /// Returns error if a database operation fails
    pub fn list_all(&self) -> Result<Vec<ViolationRecord>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn
            .prepare(
                "SELECT plate, vehicle_class, crime_types, occurred_at, evidence_url,
                        owner_name, owner_address, owner_phone, owner_email, vehicle_model,
                        fine_breakdown, total_fine
                 FROM violations ORDER BY created_at DESC",
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        let records = stmt
            .query_map([], row_to_record)
            .map_err(|e| Error::Database(e.to_string()))?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(records)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ViolationRecord> {
    let crime_types: Vec<String> =
        serde_json::from_str(&row.get::<_, String>(2)?).unwrap_or_default();
    let fine_breakdown: HashMap<String, u64> =
        serde_json::from_str(&row.get::<_, String>(10)?).unwrap_or_default();

    Ok(ViolationRecord {
        plate: row.get(0)?,
        vehicle_class: row.get(1)?,
        crime_types,
        occurred_at: parse_datetime(&row.get::<_, String>(3)?),
        evidence_url: row.get(4)?,
        owner_name: row.get(5)?,
        owner_address: row.get(6)?,
        owner_phone: row.get(7)?,
        owner_email: row.get(8)?,
        vehicle_model: row.get(9)?,
        fine_breakdown,
        total_fine: u64::try_from(row.get::<_, i64>(11)?).unwrap_or(0),
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;

    const WINDOW: Duration = Duration::from_secs(2 * 60 * 60);

    fn record(plate: &str, types: &[&str]) -> ViolationRecord {
        ViolationRecord {
            plate: plate.to_string(),
            vehicle_class: "bike".to_string(),
            crime_types: types.iter().map(|s| (*s).to_string()).collect(),
            occurred_at: Utc::now(),
            evidence_url: "https://example.com/evidence.jpg".to_string(),
            owner_name: None,
            owner_address: None,
            owner_phone: None,
            owner_email: None,
            vehicle_model: None,
            fine_breakdown: HashMap::new(),
            total_fine: 1000,
        }
    }

    fn setup() -> ViolationRepo {
        ViolationRepo::new(init_memory().unwrap(), WINDOW)
    }

    #[test]
    fn test_append_and_list() {
        let repo = setup();

        let outcome = repo.append(&record("MH12KN4567", &["triple_riding"])).unwrap();
        assert!(matches!(outcome, AppendOutcome::Saved(_)));

        let all = repo.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].plate, "MH12KN4567");
        assert_eq!(all[0].crime_types, vec!["triple_riding".to_string()]);
    }

    #[test]
    fn test_append_detects_overlapping_duplicate() {
        let repo = setup();

        repo.append(&record("MH12KN4567", &["triple_riding"])).unwrap();
        let outcome = repo
            .append(&record("MH12KN4567", &["triple_riding", "wrong_side"]))
            .unwrap();
        assert_eq!(outcome, AppendOutcome::Duplicate);
        assert_eq!(repo.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_append_allows_disjoint_crimes() {
        let repo = setup();

        repo.append(&record("MH12KN4567", &["triple_riding"])).unwrap();
        let outcome = repo.append(&record("MH12KN4567", &["wrong_side"])).unwrap();
        assert!(matches!(outcome, AppendOutcome::Saved(_)));
        assert_eq!(repo.list_all().unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_plate_never_deduplicated() {
        let repo = setup();

        repo.append(&record("UNKNOWN", &["triple_riding"])).unwrap();
        let outcome = repo.append(&record("UNKNOWN", &["triple_riding"])).unwrap();
        assert!(matches!(outcome, AppendOutcome::Saved(_)));
        assert_eq!(repo.list_all().unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_check_respects_window() {
        // Zero window: everything outside it, nothing is a duplicate
        let repo = ViolationRepo::new(init_memory().unwrap(), Duration::ZERO);

        repo.append(&record("MH12KN4567", &["triple_riding"])).unwrap();
        let outcome = repo.append(&record("MH12KN4567", &["triple_riding"])).unwrap();
        assert!(matches!(outcome, AppendOutcome::Saved(_)));
    }

    #[test]
    fn test_query_recent_filters_plate() {
        let repo = setup();

        repo.append(&record("MH12KN4567", &["triple_riding"])).unwrap();
        repo.append(&record("KA65JK5678", &["wrong_side"])).unwrap();

        let recent = repo.query_recent("MH12KN4567").unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].plate, "MH12KN4567");
    }

    #[test]
    fn test_total_fine_survives_storage_as_integer() {
        let repo = setup();

        let mut rec = record("MH12KN4567", &["triple_riding"]);
        // Wider than 32 bits, exercises the i64 column conversion
        rec.total_fine = 5_000_000_000;
        repo.append(&rec).unwrap();

        assert_eq!(repo.list_all().unwrap()[0].total_fine, 5_000_000_000);
    }

    #[test]
    fn test_owner_fields_round_trip() {
        let repo = setup();

        let mut rec = record("MH12KN4567", &["triple_riding"]);
        rec.owner_name = Some("Sandeep Balabantaray".to_string());
        rec.owner_email = Some("sandeepcool2036@gmail.com".to_string());
        rec.fine_breakdown.insert("triple_riding".to_string(), 2000);
        rec.total_fine = 2000;
        repo.append(&rec).unwrap();

        let all = repo.list_all().unwrap();
        assert_eq!(all[0].owner_name.as_deref(), Some("Sandeep Balabantaray"));
        assert_eq!(all[0].fine_breakdown.get("triple_riding"), Some(&2000));
        assert_eq!(all[0].total_fine, 2000);
    }
}
