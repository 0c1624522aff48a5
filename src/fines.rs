//! Fine schedule: crime type to rupee amount

use std::collections::HashMap;

/// Default fine rates, in rupees
const DEFAULT_RATES: &[(&str, u64)] = &[
    ("helmet_missing_driver", 1000),
    ("helmet_missing_pillion", 1000),
    ("triple_riding", 2000),
    ("wrong_side", 1500),
    ("signal_jump", 1000),
    ("mobile_usage_driver", 2000),
    ("no_seatbelt_driver", 1000),
    ("no_seatbelt_passenger", 500),
    ("red_light_signal_break", 800),
];

/// Mapping from crime-type identifier to fine amount
///
/// Unlisted types implicitly rate 0 and are excluded from fine breakdowns.
#[derive(Debug, Clone)]
pub struct FineSchedule {
    rates: HashMap<String, u64>,
}

impl Default for FineSchedule {
    fn default() -> Self {
        Self {
            rates: DEFAULT_RATES
                .iter()
                .map(|&(k, v)| (k.to_string(), v))
                .collect(),
        }
    }
}

impl FineSchedule {
    /// Build a schedule from explicit rates (config override)
    #[must_use]
    pub fn from_rates(rates: HashMap<String, u64>) -> Self {
        Self { rates }
    }

    /// Fine amount for a crime type; unknown types rate 0
    #[must_use]
    pub fn rate(&self, crime_type: &str) -> u64 {
        self.rates.get(crime_type).copied().unwrap_or(0)
    }

    /// Compute the per-type breakdown and total for a set of crime types
    ///
    /// Types with a zero rate are excluded from the breakdown but callers
    /// keep them in the record's crime-type list.
    #[must_use]
    pub fn breakdown(&self, crime_types: &[String]) -> (HashMap<String, u64>, u64) {
        let mut breakdown = HashMap::new();
        let mut total = 0;
        for t in crime_types {
            let fine = self.rate(t);
            if fine > 0 {
                breakdown.insert(t.clone(), fine);
                total += fine;
            }
        }
        (breakdown, total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rates() {
        let schedule = FineSchedule::default();
        assert_eq!(schedule.rate("triple_riding"), 2000);
        assert_eq!(schedule.rate("number_plate_missing"), 0);
    }

    #[test]
    fn test_breakdown_and_total() {
        let schedule = FineSchedule::default();
        let types = vec![
            "helmet_missing_driver".to_string(),
            "triple_riding".to_string(),
        ];
        let (breakdown, total) = schedule.breakdown(&types);
        assert_eq!(breakdown.get("helmet_missing_driver"), Some(&1000));
        assert_eq!(breakdown.get("triple_riding"), Some(&2000));
        assert_eq!(total, 3000);
    }

    #[test]
    fn test_breakdown_excludes_unknown_types() {
        let schedule = FineSchedule::default();
        let types = vec![
            "number_plate_missing".to_string(),
            "wrong_side".to_string(),
        ];
        let (breakdown, total) = schedule.breakdown(&types);
        assert!(!breakdown.contains_key("number_plate_missing"));
        assert_eq!(total, 1500);
    }
}
