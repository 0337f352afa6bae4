//! TigerStyle constants for Troupe
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Actor Limits
// =============================================================================

/// Maximum length of an actor ID in bytes
pub const ACTOR_ID_LENGTH_BYTES_MAX: usize = 256;

/// Maximum length of a conversation thread ID in bytes
pub const THREAD_ID_LENGTH_BYTES_MAX: usize = 256;

/// Maximum number of live actors registered in one stage
pub const ACTOR_CONCURRENT_COUNT_MAX: usize = 1_000_000;

/// Default number of actors a stage accepts before refusing creation
pub const STAGE_ACTORS_COUNT_DEFAULT: usize = 100_000;

/// Attempts at drawing an unused random actor ID before giving up
pub const ACTOR_ID_GENERATION_ATTEMPTS_MAX: usize = 16;

// =============================================================================
// Mailbox Limits
// =============================================================================

/// Default quota: admitted-but-not-started messages per actor
pub const MAILBOX_QUOTA_COUNT_DEFAULT: usize = 1000;

/// Hard ceiling for any configured mailbox quota
pub const MAILBOX_QUOTA_COUNT_MAX: usize = 1_000_000;

/// Maximum number of messages buffered while an actor is suspended
pub const SUSPENDED_BUFFER_COUNT_MAX: usize = 100_000;

// =============================================================================
// Task Limits
// =============================================================================

/// Maximum delay accepted by the follow-up task facility (1 hour)
pub const TASK_DELAY_MS_MAX: u64 = 60 * 60 * 1000;

// =============================================================================
// Observability - Metric Names (TigerStyle: explicit, with units)
// =============================================================================

/// Metric: Total number of actors created (counter)
pub const METRIC_NAME_ACTORS_CREATED_TOTAL: &str = "troupe_actors_created_total";

/// Metric: Total number of actors stopped (counter)
pub const METRIC_NAME_ACTORS_STOPPED_TOTAL: &str = "troupe_actors_stopped_total";

/// Metric: Total number of dispatched messages (counter, labels: status)
pub const METRIC_NAME_MESSAGES_DISPATCHED_TOTAL: &str = "troupe_messages_dispatched_total";

/// Metric: Message processing duration in seconds (histogram)
pub const METRIC_NAME_MESSAGE_DURATION_SECONDS: &str = "troupe_message_duration_seconds";

/// Metric: Total number of bounced messages (counter, labels: reason)
pub const METRIC_NAME_MESSAGES_BOUNCED_TOTAL: &str = "troupe_messages_bounced_total";

/// Metric: Total number of supervision decisions (counter, labels: directive)
pub const METRIC_NAME_SUPERVISION_DECISIONS_TOTAL: &str = "troupe_supervision_decisions_total";

// Compile-time assertions for constant validity
const _: () = {
    assert!(ACTOR_ID_LENGTH_BYTES_MAX >= 64);
    assert!(MAILBOX_QUOTA_COUNT_DEFAULT <= MAILBOX_QUOTA_COUNT_MAX);
    assert!(STAGE_ACTORS_COUNT_DEFAULT <= ACTOR_CONCURRENT_COUNT_MAX);
    assert!(ACTOR_ID_GENERATION_ATTEMPTS_MAX > 0);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_have_units_in_names() {
        // All byte limits end in _BYTES_, time limits in _MS_, counts in _COUNT_
        let _: usize = ACTOR_ID_LENGTH_BYTES_MAX;
        let _: u64 = TASK_DELAY_MS_MAX;
        let _: usize = MAILBOX_QUOTA_COUNT_MAX;
    }
}
