//! Transition detection: the one rule both live tracking and log replay share.

use thiserror::Error;

use crate::snapshot::PresenceSnapshot;
use crate::types::UserId;

/// Classification of two consecutive snapshots of the same user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionKind {
    NoChange,
    WentOnline,
    WentOffline,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// Snapshots of two different users were compared.
    #[error("cannot compare snapshots of different users: {previous} vs {current}")]
    UserMismatch { previous: UserId, current: UserId },
}

/// Classifies the change between `previous` and `current`.
///
/// Re-affirmations (online → online, offline → offline) are `NoChange`.
pub fn detect_transition(
    previous: &PresenceSnapshot,
    current: &PresenceSnapshot,
) -> Result<TransitionKind, TransitionError> {
    if previous.user_id != current.user_id {
        return Err(TransitionError::UserMismatch {
            previous: previous.user_id.clone(),
            current: current.user_id.clone(),
        });
    }

    Ok(match (previous.is_online, current.is_online) {
        (false, true) => TransitionKind::WentOnline,
        (true, false) => TransitionKind::WentOffline,
        _ => TransitionKind::NoChange,
    })
}
