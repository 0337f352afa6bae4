//! Identifiers for actors and conversation threads
//!
//! TigerStyle: Explicit validation, immutable after creation.

use crate::constants::{ACTOR_ID_LENGTH_BYTES_MAX, THREAD_ID_LENGTH_BYTES_MAX};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// ActorId
// =============================================================================

/// Unique identifier for an actor within one stage
///
/// The runtime treats the ID as an opaque string. Caller-supplied IDs are
/// validated on construction; generated IDs are UUID text.
///
/// # TigerStyle
/// - Explicit validation on construction
/// - Immutable after creation
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    /// Create a new ActorId with validation
    ///
    /// # Errors
    /// Returns error if the id is empty, too long, or contains control characters.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();

        if id.is_empty() {
            return Err(Error::InvalidActorId {
                id,
                reason: "id must not be empty".into(),
            });
        }

        if id.len() > ACTOR_ID_LENGTH_BYTES_MAX {
            return Err(Error::ActorIdTooLong {
                length: id.len(),
                limit: ACTOR_ID_LENGTH_BYTES_MAX,
            });
        }

        if id.chars().any(char::is_control) {
            return Err(Error::InvalidActorId {
                id,
                reason: "id contains control characters".into(),
            });
        }

        Ok(Self(id))
    }

    /// Create ActorId without validation (for generated IDs)
    #[doc(hidden)]
    pub fn new_unchecked(id: String) -> Self {
        debug_assert!(!id.is_empty());
        debug_assert!(id.len() <= ACTOR_ID_LENGTH_BYTES_MAX);
        Self(id)
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for ActorId {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

// =============================================================================
// ThreadId
// =============================================================================

/// Identifier binding messages to one conversation
///
/// Thread IDs are only unique per counterpart: two different actors may run
/// conversations with the same thread ID against the same receiver.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    /// Create a new ThreadId with validation
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();

        if id.is_empty() || id.len() > THREAD_ID_LENGTH_BYTES_MAX {
            return Err(Error::InvalidThreadId {
                reason: format!(
                    "length {} outside 1..={}",
                    id.len(),
                    THREAD_ID_LENGTH_BYTES_MAX
                ),
                id,
            });
        }

        Ok(Self(id))
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for ThreadId {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}
