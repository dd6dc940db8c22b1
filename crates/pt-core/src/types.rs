//! Core type definitions with validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// Unknown last-seen platform code or name.
    #[error("invalid platform: {value}")]
    InvalidPlatform { value: String },
}

/// Generates a validated string ID newtype with common trait implementations.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new ID after validation.
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                Ok(Self(id))
            }

            /// Returns the ID as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(
    /// A validated user identifier.
    ///
    /// User IDs are opaque non-empty strings, stable across every snapshot of
    /// the same user. Numeric VK ids and screen names both fit.
    UserId, "user ID"
);

/// Platform a user was last seen on, as reported by the VK API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Mobile,
    Iphone,
    Ipad,
    Android,
    Wphone,
    Windows,
    Web,
}

impl Platform {
    /// Maps a numeric VK platform code (1-7).
    pub const fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(Self::Mobile),
            2 => Some(Self::Iphone),
            3 => Some(Self::Ipad),
            4 => Some(Self::Android),
            5 => Some(Self::Wphone),
            6 => Some(Self::Windows),
            7 => Some(Self::Web),
            _ => None,
        }
    }

    /// String representation used in logs and recorded files.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mobile => "mobile",
            Self::Iphone => "iphone",
            Self::Ipad => "ipad",
            Self::Android => "android",
            Self::Wphone => "wphone",
            Self::Windows => "windows",
            Self::Web => "web",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(code) = trimmed.parse::<u64>() {
            return Self::from_code(code).ok_or_else(|| ValidationError::InvalidPlatform {
                value: s.to_string(),
            });
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "mobile" => Ok(Self::Mobile),
            "iphone" => Ok(Self::Iphone),
            "ipad" => Ok(Self::Ipad),
            "android" => Ok(Self::Android),
            "wphone" => Ok(Self::Wphone),
            "windows" => Ok(Self::Windows),
            "web" => Ok(Self::Web),
            _ => Err(ValidationError::InvalidPlatform {
                value: s.to_string(),
            }),
        }
    }
}

/// Attributes a snapshot source can be asked to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserField {
    Id,
    FirstName,
    LastName,
    ScreenName,
    Online,
    LastSeen,
}

impl UserField {
    /// Wire name of the field.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::FirstName => "first_name",
            Self::LastName => "last_name",
            Self::ScreenName => "screen_name",
            Self::Online => "online",
            Self::LastSeen => "last_seen",
        }
    }
}

impl fmt::Display for UserField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
