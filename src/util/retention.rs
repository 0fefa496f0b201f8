use std::collections::HashSet;

use chrono::{DateTime, Datelike, Days, Months, Utc};

/// Retention policy of one backup configuration.
///
/// `Forever` keeps everything and is a no-op for the cleanup engine. A `Gfs`
/// policy with every tier unset (or zero) is also a no-op: it must be skipped,
/// never read as "keep nothing".
#[derive(Copy, Clone, Debug, serde::Deserialize, serde::Serialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Keep completed snapshots for a fixed number of days.
    Days { days: u32 },

    /// Grandfather-Father-Son tiered retention.
    Gfs {
        /// How many most-recent snapshots to keep unconditionally.
        daily: Option<u32>,
        /// For each of the last `weekly` calendar weeks, keep the oldest
        /// snapshot of that week.
        weekly: Option<u32>,
        /// For each of the last `monthly` calendar months, keep the oldest
        /// snapshot of that month.
        monthly: Option<u32>,
    },

    /// Never delete anything.
    Forever,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::Forever
    }
}

impl RetentionPolicy {
    /// A GFS policy with no configured tier has nothing to select and must be
    /// skipped by the cleanup engine.
    pub fn is_empty_gfs(&self) -> bool {
        matches!(
            self,
            Self::Gfs { daily, weekly, monthly }
                if daily.unwrap_or(0) == 0
                    && weekly.unwrap_or(0) == 0
                    && monthly.unwrap_or(0) == 0
        )
    }
}

/// Calendar bucket used for weekly/monthly representative selection.
///
/// Weeks follow ISO-8601 and therefore start on Monday.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PeriodKind {
    Week,
    Month,
}

fn period_key(kind: PeriodKind, date: DateTime<Utc>) -> (i32, u32) {
    match kind {
        PeriodKind::Week => {
            let week = date.iso_week();
            (week.year(), week.week())
        }
        PeriodKind::Month => (date.year(), date.month()),
    }
}

fn previous_period(kind: PeriodKind, date: DateTime<Utc>, back: u32) -> Option<DateTime<Utc>> {
    match kind {
        PeriodKind::Week => date.checked_sub_days(Days::new(u64::from(back) * 7)),
        PeriodKind::Month => date.checked_sub_months(Months::new(back)),
    }
}

/// Ids of the `keep` most recent snapshots (the GFS daily tier).
pub fn select_most_recent(snapshots: &[(u64, DateTime<Utc>)], keep: u32) -> HashSet<u64> {
    let mut ordered: Vec<_> = snapshots.to_vec();
    ordered.sort_by(|a, b| b.1.cmp(&a.1).then(b.0.cmp(&a.0)));
    ordered
        .into_iter()
        .take(keep as usize)
        .map(|(id, _)| id)
        .collect()
}

/// For each of the last `periods` calendar buckets counted back from `now`
/// (inclusive), the oldest snapshot falling inside that bucket.
///
/// A bucket containing no snapshot contributes nothing; nothing is borrowed
/// from neighbouring buckets.
pub fn select_representatives(
    snapshots: &[(u64, DateTime<Utc>)],
    periods: u32,
    kind: PeriodKind,
    now: DateTime<Utc>,
) -> HashSet<u64> {
    let mut kept = HashSet::new();

    for back in 0..periods {
        let Some(anchor) = previous_period(kind, now, back) else {
            break;
        };
        let bucket = period_key(kind, anchor);

        let representative = snapshots
            .iter()
            .filter(|(_, at)| period_key(kind, *at) == bucket)
            .min_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));

        if let Some((id, _)) = representative {
            kept.insert(*id);
        }
    }

    kept
}

/// Union of the daily, weekly and monthly GFS tiers for one database
/// partition. Everything outside the returned set is up for deletion.
pub fn gfs_keep_set(
    snapshots: &[(u64, DateTime<Utc>)],
    daily: u32,
    weekly: u32,
    monthly: u32,
    now: DateTime<Utc>,
) -> HashSet<u64> {
    let mut kept = select_most_recent(snapshots, daily);
    kept.extend(select_representatives(snapshots, weekly, PeriodKind::Week, now));
    kept.extend(select_representatives(snapshots, monthly, PeriodKind::Month, now));
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn most_recent_takes_newest_first() {
        let snaps = vec![(1, at(2024, 1, 1)), (2, at(2024, 1, 3)), (3, at(2024, 1, 2))];
        let kept = select_most_recent(&snaps, 2);
        assert_eq!(kept, HashSet::from([2, 3]));
    }

    #[test]
    fn most_recent_with_zero_keeps_nothing() {
        let snaps = vec![(1, at(2024, 1, 1))];
        assert!(select_most_recent(&snaps, 0).is_empty());
    }

    #[test]
    fn weekly_representative_is_oldest_of_each_week() {
        // 2024-01-15 is a Monday (ISO week 3).
        let now = at(2024, 1, 17);
        let snaps = vec![
            (1, at(2024, 1, 15)), // week 3, oldest
            (2, at(2024, 1, 16)), // week 3
            (3, at(2024, 1, 9)),  // week 2
            (4, at(2024, 1, 12)), // week 2, newer
            (5, at(2024, 1, 3)),  // week 1, outside the window
        ];
        let kept = select_representatives(&snaps, 2, PeriodKind::Week, now);
        assert_eq!(kept, HashSet::from([1, 3]));
    }

    #[test]
    fn monthly_representative_wraps_across_year_boundary() {
        let now = at(2024, 1, 10);
        let snaps = vec![
            (1, at(2024, 1, 2)),
            (2, at(2024, 1, 8)),
            (3, at(2023, 12, 5)),
            (4, at(2023, 12, 20)),
        ];
        let kept = select_representatives(&snaps, 2, PeriodKind::Month, now);
        assert_eq!(kept, HashSet::from([1, 3]));
    }

    #[test]
    fn empty_bucket_contributes_nothing() {
        let now = at(2024, 3, 10);
        let snaps = vec![(1, at(2024, 3, 5))];
        let kept = select_representatives(&snaps, 3, PeriodKind::Month, now);
        assert_eq!(kept, HashSet::from([1]));
    }

    #[test]
    fn gfs_union_deduplicates_tiers() {
        // One snapshot that is simultaneously the newest, this week's oldest
        // and this month's oldest is counted once.
        let now = at(2024, 2, 6);
        let snaps = vec![(7, at(2024, 2, 5))];
        let kept = gfs_keep_set(&snaps, 1, 1, 1, now);
        assert_eq!(kept, HashSet::from([7]));
    }

    #[test]
    fn empty_gfs_policy_is_detected() {
        let empty = RetentionPolicy::Gfs { daily: None, weekly: Some(0), monthly: None };
        assert!(empty.is_empty_gfs());

        let live = RetentionPolicy::Gfs { daily: Some(2), weekly: None, monthly: None };
        assert!(!live.is_empty_gfs());
        assert!(!RetentionPolicy::Forever.is_empty_gfs());
    }
}
