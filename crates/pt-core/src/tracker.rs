//! Live status tracking.
//!
//! The tracker polls a [`SnapshotSource`] for a fixed set of users, compares
//! each user's new snapshot with the previous one, and reports changes to a
//! [`NotificationSink`]. Users are keyed by id, so sources may return them in
//! any order.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::snapshot::PresenceSnapshot;
use crate::transition::{TransitionError, TransitionKind, detect_transition};
use crate::types::{UserField, UserId};

/// Fields requested on every acquisition.
pub const TRACKED_FIELDS: &[UserField] = &[
    UserField::FirstName,
    UserField::LastName,
    UserField::ScreenName,
    UserField::Online,
    UserField::LastSeen,
];

/// Errors a snapshot source reports once its own retries are exhausted.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("snapshot source unavailable after {attempts} attempt(s): {reason}")]
    Unavailable { attempts: u32, reason: String },
    #[error("malformed response from snapshot source: {0}")]
    Malformed(String),
}

/// Anything that can produce the current snapshots of a set of users.
pub trait SnapshotSource {
    fn fetch(
        &self,
        user_ids: &[UserId],
        fields: &[UserField],
    ) -> impl Future<Output = Result<Vec<PresenceSnapshot>, SourceError>>;
}

/// What a notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// First acquisition found the user online.
    InitialOnline,
    /// First acquisition found the user offline.
    InitialOffline,
    WentOnline,
    WentOffline,
}

impl NotificationKind {
    const fn initial(is_online: bool) -> Self {
        if is_online {
            Self::InitialOnline
        } else {
            Self::InitialOffline
        }
    }

    const fn from_transition(kind: TransitionKind) -> Option<Self> {
        match kind {
            TransitionKind::NoChange => None,
            TransitionKind::WentOnline => Some(Self::WentOnline),
            TransitionKind::WentOffline => Some(Self::WentOffline),
        }
    }
}

/// Receives tracker notifications.
pub trait NotificationSink {
    fn notify(&mut self, snapshot: &PresenceSnapshot, kind: NotificationKind) -> io::Result<()>;

    /// Called with every complete acquisition before any notification for it.
    fn acquired(&mut self, _batch: &[PresenceSnapshot]) -> io::Result<()> {
        Ok(())
    }
}

impl<F> NotificationSink for F
where
    F: FnMut(&PresenceSnapshot, NotificationKind) -> io::Result<()>,
{
    fn notify(&mut self, snapshot: &PresenceSnapshot, kind: NotificationKind) -> io::Result<()> {
        self(snapshot, kind)
    }
}

/// Per-user tracking state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedState {
    Unknown,
    Online,
    Offline,
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("poll interval must be positive")]
    InvalidInterval,
    #[error("no users to track")]
    NoUsers,
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("failed to deliver notification: {0}")]
    Sink(#[from] io::Error),
}

/// Live tracker state: the last snapshot seen for each user.
#[derive(Debug)]
pub struct StatusTracker {
    user_ids: Vec<UserId>,
    poll_interval: Duration,
    last: HashMap<UserId, PresenceSnapshot>,
}

impl StatusTracker {
    pub fn new(user_ids: Vec<UserId>, poll_interval: Duration) -> Result<Self, TrackerError> {
        if poll_interval.is_zero() {
            return Err(TrackerError::InvalidInterval);
        }
        if user_ids.is_empty() {
            return Err(TrackerError::NoUsers);
        }
        Ok(Self {
            user_ids,
            poll_interval,
            last: HashMap::new(),
        })
    }

    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn state(&self, user_id: &UserId) -> TrackedState {
        match self.last.get(user_id) {
            None => TrackedState::Unknown,
            Some(snapshot) if snapshot.is_online => TrackedState::Online,
            Some(_) => TrackedState::Offline,
        }
    }

    /// Processes one acquisition and returns how many notifications were sent.
    pub fn observe<K>(
        &mut self,
        batch: Vec<PresenceSnapshot>,
        sink: &mut K,
    ) -> Result<usize, TrackerError>
    where
        K: NotificationSink + ?Sized,
    {
        sink.acquired(&batch)?;

        let mut sent = 0;
        for snapshot in batch {
            let kind = match self.last.get(&snapshot.user_id) {
                None => Some(NotificationKind::initial(snapshot.is_online)),
                Some(previous) => {
                    NotificationKind::from_transition(detect_transition(previous, &snapshot)?)
                }
            };

            if let Some(kind) = kind {
                tracing::debug!(user_id = %snapshot.user_id, ?kind, "presence notification");
                sink.notify(&snapshot, kind)?;
                sent += 1;
            }
            self.last.insert(snapshot.user_id.clone(), snapshot);
        }
        Ok(sent)
    }

    /// Polls until `shutdown` resolves or the source fails.
    ///
    /// Shutdown is checked first at every await point. An acquisition that is
    /// interrupted produces no notifications.
    pub async fn run<S, K, F>(
        &mut self,
        source: &S,
        sink: &mut K,
        shutdown: F,
    ) -> Result<(), TrackerError>
    where
        S: SnapshotSource,
        K: NotificationSink + ?Sized,
        F: Future<Output = ()>,
    {
        let mut shutdown = std::pin::pin!(shutdown);
        tracing::info!(
            users = self.user_ids.len(),
            interval_secs = self.poll_interval.as_secs(),
            "tracking started"
        );

        loop {
            let batch = tokio::select! {
                biased;
                () = &mut shutdown => {
                    tracing::info!("shutdown during acquisition");
                    return Ok(());
                }
                result = source.fetch(&self.user_ids, TRACKED_FIELDS) => result?,
            };
            self.observe(batch, sink)?;

            tokio::select! {
                biased;
                () = &mut shutdown => {
                    tracing::info!("shutdown while waiting for next poll");
                    return Ok(());
                }
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
