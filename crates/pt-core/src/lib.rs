//! Core domain logic for the presence tracker.
//!
//! This crate contains the fundamental types and logic for:
//! - Transition detection: the single rule for what counts as going online/offline
//! - Period reconstruction: turning coarse samples into online intervals
//! - Streak aggregation: total online time per user
//! - Live tracking: polling a snapshot source and notifying a sink

pub mod period;
pub mod snapshot;
pub mod streak;
pub mod tracker;
pub mod transition;
pub mod types;

pub use period::{
    OnlinePeriod, PeriodReconstructor, ReconstructError, ReconstructStats, Reconstruction,
    reconstruct_periods,
};
pub use snapshot::{LastSeen, PresenceSnapshot, UserProfile};
pub use streak::{AggregatedDuration, aggregate_durations};
pub use tracker::{
    NotificationKind, NotificationSink, SnapshotSource, SourceError, StatusTracker, TRACKED_FIELDS,
    TrackedState, TrackerError,
};
pub use transition::{TransitionError, TransitionKind, detect_transition};
pub use types::{Platform, UserField, UserId, ValidationError};
