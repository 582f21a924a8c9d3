//! Retention compaction.

use chrono::{DateTime, Duration, Utc};

use crate::config::RetentionMode;

use super::types::{RetentionPolicy, VersionRecord};

/// Returns the entries that survive the retention policy, oldest first.
///
/// The latest version always survives, whatever the limits.
#[must_use]
pub fn compact(entries: &[VersionRecord], policy: &RetentionPolicy, now: DateTime<Utc>) -> Vec<VersionRecord> {
    let mut sorted: Vec<&VersionRecord> = entries.iter().collect();
    sorted.sort_by_key(|entry| entry.version);

    let Some(latest) = sorted.last().map(|entry| entry.version) else {
        return Vec::new();
    };

    let count_floor = sorted.len().saturating_sub(policy.max_versions);
    // A window reaching past the representable range keeps everything.
    let cutoff = now.checked_sub_signed(Duration::days(i64::from(policy.retention_days)));

    sorted
        .iter()
        .enumerate()
        .filter(|(position, entry)| {
            let by_count = *position >= count_floor;
            let by_age = cutoff.is_none_or(|cutoff| entry.timestamp > cutoff);
            let retained = match policy.mode {
                RetentionMode::Count => by_count,
                RetentionMode::Days => by_age,
                RetentionMode::Both => by_count || by_age,
            };
            retained || entry.version == latest
        })
        .map(|(_, entry)| (*entry).clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::{Operation, Source};
    use crate::model::Scope;
    use crate::versions::types::checksum;

    fn entry(version: u64, age_days: i64, now: DateTime<Utc>) -> VersionRecord {
        let value = format!("v{version}");
        VersionRecord {
            key: String::from("API_KEY"),
            scope: Scope::Shared,
            environment: String::from("prd"),
            version,
            checksum: checksum(&value),
            value,
            sensitive: true,
            operation: Operation::Set,
            actor: String::from("tester"),
            source: Source::Cli,
            timestamp: now - Duration::days(age_days),
            key_fingerprint: None,
        }
    }

    fn versions(kept: &[VersionRecord]) -> Vec<u64> {
        kept.iter().map(|e| e.version).collect()
    }

    fn policy(mode: RetentionMode, max_versions: usize, retention_days: u32) -> RetentionPolicy {
        RetentionPolicy {
            mode,
            max_versions,
            retention_days,
        }
    }

    #[test]
    fn test_count_mode_keeps_last_n() {
        let now = Utc::now();
        let entries: Vec<_> = (1..=5).map(|v| entry(v, 0, now)).collect();
        let kept = compact(&entries, &policy(RetentionMode::Count, 2, 30), now);
        assert_eq!(versions(&kept), vec![4, 5]);
    }

    #[test]
    fn test_days_mode_keeps_recent() {
        let now = Utc::now();
        let entries = vec![entry(1, 40, now), entry(2, 20, now), entry(3, 1, now)];
        let kept = compact(&entries, &policy(RetentionMode::Days, 1, 30), now);
        assert_eq!(versions(&kept), vec![2, 3]);
    }

    #[test]
    fn test_both_mode_is_union() {
        let now = Utc::now();
        let entries = vec![entry(1, 40, now), entry(2, 35, now), entry(3, 5, now), entry(4, 50, now)];
        let kept = compact(&entries, &policy(RetentionMode::Both, 1, 30), now);
        // 3 by age, 4 by count.
        assert_eq!(versions(&kept), vec![3, 4]);
    }

    #[test]
    fn test_latest_always_survives() {
        let now = Utc::now();
        let entries = vec![entry(1, 100, now), entry(2, 90, now)];

        let by_count = compact(&entries, &policy(RetentionMode::Count, 0, 30), now);
        assert_eq!(versions(&by_count), vec![2]);

        let by_age = compact(&entries, &policy(RetentionMode::Days, 10, 0), now);
        assert_eq!(versions(&by_age), vec![2]);
    }

    #[test]
    fn test_unsorted_input() {
        let now = Utc::now();
        let entries = vec![entry(3, 0, now), entry(1, 0, now), entry(2, 0, now)];
        let kept = compact(&entries, &policy(RetentionMode::Count, 2, 30), now);
        assert_eq!(versions(&kept), vec![2, 3]);
    }

    #[test]
    fn test_huge_retention_window_keeps_everything() {
        let now = Utc::now();
        let entries = vec![entry(1, 4000, now), entry(2, 10, now), entry(3, 0, now)];

        let by_age = compact(&entries, &policy(RetentionMode::Days, 1, u32::MAX), now);
        assert_eq!(versions(&by_age), vec![1, 2, 3]);

        let by_count = compact(&entries, &policy(RetentionMode::Count, 1, u32::MAX), now);
        assert_eq!(versions(&by_count), vec![3]);

        let both = compact(&entries, &policy(RetentionMode::Both, 1, 200_000_000), now);
        assert_eq!(versions(&both), vec![1, 2, 3]);
    }

    #[test]
    fn test_empty() {
        assert!(compact(&[], &RetentionPolicy::default(), Utc::now()).is_empty());
    }
}
