//! Online period reconstruction.
//!
//! Turns per-user snapshot sequences into continuous online intervals.
//!
//! # Algorithm Summary
//!
//! 1. Keep one timeline per user, keyed by `user_id`, holding the previous
//!    snapshot and at most one open period.
//! 2. Classify each new snapshot against the previous one with
//!    [`detect_transition`].
//! 3. An online edge opens a period at the observation time. An offline edge
//!    closes it at the refined last-seen time when that time is plausible,
//!    otherwise at the observation time.
//! 4. When input runs out, open periods are emitted without an end.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::snapshot::PresenceSnapshot;
use crate::transition::{TransitionError, TransitionKind, detect_transition};
use crate::types::UserId;

/// One continuous online interval of one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlinePeriod {
    pub user_id: UserId,
    pub start: DateTime<Utc>,
    /// `None` while the user was still online at the last observation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl OnlinePeriod {
    pub const fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// Length of a closed period; `None` for open ones.
    pub fn duration(&self) -> Option<Duration> {
        self.end.map(|end| end - self.start)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconstructError {
    /// The per-user state machine reached an impossible state.
    #[error("reconstruction invariant violated for user {user_id}: {message}")]
    InvariantViolation { user_id: UserId, message: String },

    /// Snapshots of one user were supplied out of time order.
    #[error(
        "snapshot for user {user_id} at {observed_at} precedes the previous one at {previous}"
    )]
    OutOfOrder {
        user_id: UserId,
        observed_at: DateTime<Utc>,
        previous: DateTime<Utc>,
    },

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Counters for anomalies that were handled locally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconstructStats {
    pub snapshots: usize,
    /// Offline edges whose end came from `last_seen`.
    pub last_seen_used: usize,
    /// `last_seen` values ignored because they fell outside the open period.
    pub last_seen_discarded: usize,
    /// Offline edges that arrived with no open period.
    pub spurious_offline_edges: usize,
}

/// Output of a full reconstruction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconstruction {
    /// Periods grouped by user in first-seen order, each user's in start order.
    pub periods: Vec<OnlinePeriod>,
    pub stats: ReconstructStats,
}

#[derive(Debug)]
struct UserTimeline {
    previous: PresenceSnapshot,
    open: Option<OnlinePeriod>,
    closed: Vec<OnlinePeriod>,
}

impl UserTimeline {
    const fn new(first: PresenceSnapshot) -> Self {
        Self {
            previous: first,
            open: None,
            closed: Vec::new(),
        }
    }

    fn open(&mut self, start: DateTime<Utc>) -> Result<(), ReconstructError> {
        if let Some(open) = &self.open {
            return Err(ReconstructError::InvariantViolation {
                user_id: open.user_id.clone(),
                message: format!(
                    "online edge at {start} while the period started at {} is still open",
                    open.start
                ),
            });
        }
        self.open = Some(OnlinePeriod {
            user_id: self.previous.user_id.clone(),
            start,
            end: None,
        });
        Ok(())
    }

    fn close(
        &mut self,
        current: &PresenceSnapshot,
        stats: &mut ReconstructStats,
    ) -> Option<OnlinePeriod> {
        let Some(mut period) = self.open.take() else {
            stats.spurious_offline_edges += 1;
            tracing::debug!(
                user_id = %current.user_id,
                observed_at = %current.observed_at,
                "ignoring offline edge with no open period"
            );
            return None;
        };

        let end = match current.trusted_last_seen() {
            Some(last_seen) if last_seen >= period.start => {
                stats.last_seen_used += 1;
                last_seen
            }
            Some(last_seen) => {
                stats.last_seen_discarded += 1;
                tracing::warn!(
                    user_id = %current.user_id,
                    start = %period.start,
                    last_seen = %last_seen,
                    "discarding last_seen before period start"
                );
                current.observed_at
            }
            None => {
                if current.last_seen.is_some() {
                    stats.last_seen_discarded += 1;
                }
                current.observed_at
            }
        };

        period.end = Some(end);
        self.closed.push(period.clone());
        Some(period)
    }
}

/// Incremental per-user reconstruction state.
#[derive(Debug, Default)]
pub struct PeriodReconstructor {
    timelines: HashMap<UserId, UserTimeline>,
    order: Vec<UserId>,
    stats: ReconstructStats,
}

impl PeriodReconstructor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one snapshot; returns the period it closed, if any.
    ///
    /// Snapshots of the same user must arrive in non-decreasing `observed_at`
    /// order. Equal timestamps are processed in the order given.
    pub fn push(
        &mut self,
        snapshot: PresenceSnapshot,
    ) -> Result<Option<OnlinePeriod>, ReconstructError> {
        self.stats.snapshots += 1;

        match self.timelines.entry(snapshot.user_id.clone()) {
            Entry::Vacant(entry) => {
                self.order.push(snapshot.user_id.clone());
                let observed_at = snapshot.observed_at;
                let is_online = snapshot.is_online;
                let timeline = entry.insert(UserTimeline::new(snapshot));
                if is_online {
                    timeline.open(observed_at)?;
                }
                Ok(None)
            }
            Entry::Occupied(entry) => {
                let timeline = entry.into_mut();
                if snapshot.observed_at < timeline.previous.observed_at {
                    return Err(ReconstructError::OutOfOrder {
                        user_id: snapshot.user_id,
                        observed_at: snapshot.observed_at,
                        previous: timeline.previous.observed_at,
                    });
                }

                let closed = match detect_transition(&timeline.previous, &snapshot)? {
                    TransitionKind::WentOnline => {
                        timeline.open(snapshot.observed_at)?;
                        None
                    }
                    TransitionKind::WentOffline => timeline.close(&snapshot, &mut self.stats),
                    TransitionKind::NoChange => None,
                };
                timeline.previous = snapshot;
                Ok(closed)
            }
        }
    }

    /// Ends the input and returns every period, open ones last per user.
    pub fn finish(mut self) -> Reconstruction {
        let mut periods = Vec::new();
        for user_id in &self.order {
            if let Some(timeline) = self.timelines.remove(user_id) {
                periods.extend(timeline.closed);
                if let Some(open) = timeline.open {
                    tracing::debug!(user_id = %open.user_id, start = %open.start, "period still open");
                    periods.push(open);
                }
            }
        }
        Reconstruction {
            periods,
            stats: self.stats,
        }
    }
}

/// Reconstructs all periods from a finite snapshot sequence.
pub fn reconstruct_periods<I>(snapshots: I) -> Result<Reconstruction, ReconstructError>
where
    I: IntoIterator<Item = PresenceSnapshot>,
{
    let mut reconstructor = PeriodReconstructor::new();
    for snapshot in snapshots {
        reconstructor.push(snapshot)?;
    }
    Ok(reconstructor.finish())
}
