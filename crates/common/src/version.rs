//! The Agent's sole change-detection signal.
//!
//! `config_version` is derived from the maximum `updated_at` across the
//! records visible to one agent, combined with counts of those same record
//! sets so that deletions (which do not advance any remaining timestamp)
//! still produce a new version. See spec §4.1 and §9's collision caveat.

use chrono::{DateTime, Utc};

/// Inputs to the version formula, scoped to exactly what one agent can see:
/// its visible services (via assignments), its visible firewall rules, and
/// the whole blocklist.
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionInputs {
    pub max_updated_at: Option<DateTime<Utc>>,
    pub firewall_count: i64,
    pub assignment_count: i64,
    pub blocklist_count: i64,
}

impl VersionInputs {
    fn total_count(&self) -> i64 {
        self.firewall_count + self.assignment_count + self.blocklist_count
    }
}

/// Compute `config_version` from the visible record set.
///
/// `version = floor(max_timestamp_seconds) * 10_000 + (count_term mod 10_000)`.
/// The count term is `firewall_count*100 + assignment_count*10 +
/// blocklist_count`; it exists only to perturb the version on pure deletions,
/// and the scaling keeps the timestamp term dominant for every real mutation
/// (see spec §9 on the compensating-churn collision this can't rule out).
/// When no visible record exists at all, the version falls back to
/// `1 + total_count`.
pub fn config_version(inputs: &VersionInputs) -> i64 {
    match inputs.max_updated_at {
        Some(ts) => {
            let seconds = ts.timestamp();
            let count_term = inputs.firewall_count * 100 + inputs.assignment_count * 10 + inputs.blocklist_count;
            seconds * 10_000 + count_term.rem_euclid(10_000)
        }
        None => 1 + inputs.total_count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    #[test]
    fn falls_back_when_nothing_visible() {
        let inputs = VersionInputs::default();
        assert_eq!(config_version(&inputs), 1);
    }

    #[test]
    fn fallback_accounts_for_counts_with_no_timestamp() {
        let inputs = VersionInputs {
            max_updated_at: None,
            firewall_count: 2,
            assignment_count: 1,
            blocklist_count: 3,
        };
        assert_eq!(config_version(&inputs), 1 + 6);
    }

    #[test]
    fn timestamp_dominates_ordering() {
        let earlier = VersionInputs {
            max_updated_at: Some(ts(1_000)),
            firewall_count: 9,
            assignment_count: 9,
            blocklist_count: 9,
        };
        let later = VersionInputs {
            max_updated_at: Some(ts(1_001)),
            firewall_count: 0,
            assignment_count: 0,
            blocklist_count: 0,
        };
        assert!(config_version(&later) > config_version(&earlier));
    }

    proptest::proptest! {
        /// Strictly increasing timestamps always produce a strictly
        /// increasing version, whatever the count churn does in between —
        /// the timestamp term dominates the count term by construction
        /// (spec §9's collision caveat is about *equal* timestamps, not
        /// this case).
        #[test]
        fn strictly_increasing_timestamps_are_monotone(
            steps in proptest::collection::vec(
                (1i64..10_000, 0i64..50, 0i64..50, 0i64..50),
                2..20,
            ),
        ) {
            let mut seconds = 0i64;
            let mut previous: Option<i64> = None;
            for (delta, firewall_count, assignment_count, blocklist_count) in steps {
                seconds += delta;
                let inputs = VersionInputs {
                    max_updated_at: Some(ts(seconds)),
                    firewall_count,
                    assignment_count,
                    blocklist_count,
                };
                let version = config_version(&inputs);
                if let Some(prev) = previous {
                    proptest::prop_assert!(version > prev);
                }
                previous = Some(version);
            }
        }
    }

    #[test]
    fn pure_deletion_still_advances_version_via_count_term() {
        let before = VersionInputs {
            max_updated_at: Some(ts(5_000)),
            firewall_count: 2,
            assignment_count: 4,
            blocklist_count: 1,
        };
        // A deletion with no remaining record to bump updated_at: the
        // timestamp does not move, but a count changes.
        let after = VersionInputs {
            max_updated_at: Some(ts(5_000)),
            firewall_count: 2,
            assignment_count: 3,
            blocklist_count: 1,
        };
        assert_ne!(config_version(&before), config_version(&after));
    }
}
