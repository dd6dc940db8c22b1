//! Presence snapshots: one user's state at one observation instant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Platform, UserId};

/// When and where the source claims a user was last active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastSeen {
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

/// Display-only identity fields.
///
/// Never consulted by reconstruction or aggregation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_name: Option<String>,
}

/// A single observation of a user's online/offline state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    pub user_id: UserId,
    /// Timestamp of the poll or log record.
    pub observed_at: DateTime<Utc>,
    pub is_online: bool,
    /// Present only for some offline observations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<LastSeen>,
    #[serde(default)]
    pub profile: UserProfile,
}

impl PresenceSnapshot {
    /// Creates a snapshot without last-seen data or profile fields.
    pub fn new(user_id: UserId, observed_at: DateTime<Utc>, is_online: bool) -> Self {
        Self {
            user_id,
            observed_at,
            is_online,
            last_seen: None,
            profile: UserProfile::default(),
        }
    }

    #[must_use]
    pub const fn with_last_seen(mut self, last_seen: LastSeen) -> Self {
        self.last_seen = Some(last_seen);
        self
    }

    #[must_use]
    pub fn with_profile(mut self, profile: UserProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Returns the last-seen time only if it does not postdate the observation.
    ///
    /// A last-seen value after `observed_at` comes from clock skew or a source
    /// bug and is never trusted.
    pub fn trusted_last_seen(&self) -> Option<DateTime<Utc>> {
        let last_seen = self.last_seen?;
        if last_seen.time > self.observed_at {
            tracing::warn!(
                user_id = %self.user_id,
                observed_at = %self.observed_at,
                last_seen = %last_seen.time,
                "discarding last_seen after observation time"
            );
            return None;
        }
        Some(last_seen.time)
    }

    /// Human-readable name: "Last First", "First", the screen name, or `id<user_id>`.
    pub fn display_name(&self) -> String {
        let profile = &self.profile;
        let first = profile.first_name.as_deref().filter(|s| !s.is_empty());
        let last = profile.last_name.as_deref().filter(|s| !s.is_empty());
        match (last, first) {
            (Some(last), Some(first)) => format!("{last} {first}"),
            (None, Some(first)) => first.to_string(),
            (Some(last), None) => last.to_string(),
            (None, None) => profile
                .screen_name
                .as_deref()
                .filter(|s| !s.is_empty())
                .map_or_else(|| format!("id{}", self.user_id), str::to_string),
        }
    }
}
