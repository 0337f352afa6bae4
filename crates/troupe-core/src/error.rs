//! Error types for Troupe
//!
//! TigerStyle: Explicit error types with context, using thiserror.

use thiserror::Error;

/// Result type alias for Troupe operations
pub type Result<T> = std::result::Result<T, Error>;

/// Troupe error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Actor Errors
    // =========================================================================
    #[error("Actor ID already in use: {id}")]
    DuplicateId { id: String },

    #[error("Stage is full: {count} actors (limit: {limit})")]
    StageFull { count: usize, limit: usize },

    #[error("Stage is shut down")]
    StageShutDown,

    #[error("Actor stopped: {id}")]
    ActorStopped { id: String },

    #[error("Behavior failed: {reason}")]
    BehaviorFailed { reason: String },

    #[error("Behavior panicked: {reason}")]
    BehaviorPanicked { reason: String },

    #[error("Message processing interrupted: {id}")]
    Interrupted { id: String },

    // =========================================================================
    // Conversation Errors
    // =========================================================================
    #[error("Conversation closed: {thread_id}")]
    ThreadClosed { thread_id: String },

    #[error("Conversation {thread_id} rejected by {actor_id}: {reason}")]
    ThreadOpenRejected {
        thread_id: String,
        actor_id: String,
        reason: String,
    },

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Invalid actor ID: {id}, reason: {reason}")]
    InvalidActorId { id: String, reason: String },

    #[error("Actor ID too long: {length} bytes exceeds limit of {limit} bytes")]
    ActorIdTooLong { length: usize, limit: usize },

    #[error("Invalid thread ID: {id}, reason: {reason}")]
    InvalidThreadId { id: String, reason: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {reason}")]
    Internal { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a duplicate ID error
    pub fn duplicate_id(id: impl Into<String>) -> Self {
        Self::DuplicateId { id: id.into() }
    }

    /// Create a behavior failure, the usual way for behavior code to give up on a message
    pub fn behavior(reason: impl Into<String>) -> Self {
        Self::BehaviorFailed {
            reason: reason.into(),
        }
    }

    /// Create a thread closed error
    pub fn thread_closed(thread_id: impl Into<String>) -> Self {
        Self::ThreadClosed {
            thread_id: thread_id.into(),
        }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }
}
