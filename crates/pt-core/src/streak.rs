//! Streak aggregation: total online time per user.

use std::collections::HashMap;

use chrono::Duration;

use crate::period::OnlinePeriod;
use crate::types::UserId;

/// Cumulative closed-period duration of one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedDuration {
    pub user_id: UserId,
    pub total_duration: Duration,
}

/// Sums closed-period durations per user.
///
/// Open periods contribute nothing: their true end is unknown. Users appear
/// in the order they first occur in `periods`, including users whose only
/// period is still open (with a zero total).
pub fn aggregate_durations<'a, I>(periods: I) -> Vec<AggregatedDuration>
where
    I: IntoIterator<Item = &'a OnlinePeriod>,
{
    let mut index: HashMap<&UserId, usize> = HashMap::new();
    let mut totals: Vec<AggregatedDuration> = Vec::new();

    for period in periods {
        let slot = *index.entry(&period.user_id).or_insert_with(|| {
            totals.push(AggregatedDuration {
                user_id: period.user_id.clone(),
                total_duration: Duration::zero(),
            });
            totals.len() - 1
        });
        if let Some(duration) = period.duration() {
            totals[slot].total_duration += duration;
        }
    }

    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0)
            .single()
            .expect("valid test timestamp")
            + Duration::seconds(secs)
    }

    fn period(user: &str, start: i64, end: Option<i64>) -> OnlinePeriod {
        OnlinePeriod {
            user_id: UserId::new(user).unwrap(),
            start: ts(start),
            end: end.map(ts),
        }
    }

    #[test]
    fn open_period_contributes_nothing() {
        let periods = [
            period("1", 0, Some(30)),
            period("1", 100, Some(145)),
            period("1", 200, None),
        ];
        let totals = aggregate_durations(&periods);
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].total_duration, Duration::seconds(75));
    }

    #[test]
    fn totals_keep_first_seen_order() {
        let periods = [
            period("b", 0, Some(10)),
            period("a", 0, Some(20)),
            period("b", 20, Some(25)),
        ];
        let totals = aggregate_durations(&periods);
        let ids: Vec<&str> = totals.iter().map(|t| t.user_id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);
        assert_eq!(totals[0].total_duration, Duration::seconds(15));
        assert_eq!(totals[1].total_duration, Duration::seconds(20));
    }

    #[test]
    fn only_open_period_gives_zero_total() {
        let totals = aggregate_durations(&[period("1", 0, None)]);
        assert_eq!(totals[0].total_duration, Duration::zero());
    }

    #[test]
    fn empty_input_gives_empty_output() {
        assert!(aggregate_durations(std::iter::empty::<&OnlinePeriod>()).is_empty());
    }
}
