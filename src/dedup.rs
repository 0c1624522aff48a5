//! Violation deduplication cache
//!
//! Per-session, in-memory suppression of repeat reports for the same
//! vehicle and crime. The record store performs its own authoritative
//! duplicate check (`db::ViolationRepo::append`); this cache is a
//! fast path that also covers candidates racing within one process.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Plate text the perception service reports when it cannot read a plate
pub const UNKNOWN_PLATE: &str = "UNKNOWN";

/// Strip non-alphanumerics and uppercase, so "MH 12 KN 4567" and
/// "mh12kn4567" key the same entry
#[must_use]
pub fn normalize_plate(plate: &str) -> String {
    plate
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Whether a plate can participate in deduplication at all
#[must_use]
pub fn is_identifiable(plate: &str) -> bool {
    !plate.is_empty() && plate != UNKNOWN_PLATE
}

/// Outcome of classifying a candidate against the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// First sighting (or prior entry expired); entry inserted/replaced
    Novel,
    /// Same plate within the window with disjoint crime types; types
    /// merged into the entry, candidate still recorded
    NovelMerged,
    /// Same plate, overlapping crime type, within the window
    Duplicate,
}

impl Verdict {
    /// Whether the candidate should proceed to persistence
    #[must_use]
    pub const fn is_novel(self) -> bool {
        matches!(self, Self::Novel | Self::NovelMerged)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    last_seen: DateTime<Utc>,
    crime_types: HashSet<String>,
}

/// Dedup cache keyed by normalized plate
///
/// Entries are superseded by time only, never evicted by size; the cache
/// lives for one session and is cleared on disconnect. `classify` is the
/// single check-and-update step; callers serialize access (the engine
/// holds it behind a mutex) so two candidates for the same plate can
/// never interleave their check and insert.
#[derive(Debug, Default)]
pub struct DedupCache {
    entries: HashMap<String, Entry>,
    window: Duration,
}

impl DedupCache {
    /// Create a cache with the given dedup window
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            window,
        }
    }

    /// Classify a candidate and update the cache in one atomic step
    ///
    /// The plate is normalized here, so formatting differences between
    /// sightings cannot defeat the check. Unreadable plates are never
    /// cached and always classify as novel.
    pub fn classify(&mut self, plate: &str, crime_types: &[String], now: DateTime<Utc>) -> Verdict {
        let plate = normalize_plate(plate);
        if !is_identifiable(&plate) {
            return Verdict::Novel;
        }

        if let Some(entry) = self.entries.get_mut(&plate) {
            let age = now.signed_duration_since(entry.last_seen);
            let within_window =
                age >= chrono::TimeDelta::zero() && age.to_std().is_ok_and(|d| d < self.window);

            if within_window {
                if crime_types.iter().any(|t| entry.crime_types.contains(t)) {
                    return Verdict::Duplicate;
                }
                // Disjoint crimes: union into the entry. last_seen is
                // deliberately not refreshed; the entry expires relative
                // to the first sighting.
                entry.crime_types.extend(crime_types.iter().cloned());
                return Verdict::NovelMerged;
            }
        }

        self.entries.insert(
            plate,
            Entry {
                last_seen: now,
                crime_types: crime_types.iter().cloned().collect(),
            },
        );
        Verdict::Novel
    }

    /// Crime types currently cached for a plate (test/introspection)
    #[must_use]
    pub fn cached_types(&self, plate: &str) -> Option<Vec<String>> {
        self.entries.get(&normalize_plate(plate)).map(|e| {
            let mut types: Vec<String> = e.crime_types.iter().cloned().collect();
            types.sort();
            types
        })
    }

    /// Drop all entries (session teardown)
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of cached plates
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
