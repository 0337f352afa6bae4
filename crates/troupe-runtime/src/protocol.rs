//! Messages the runtime itself sends and understands
//!
//! TigerStyle: Every notification is a typed struct, never a magic string.
//!
//! Behaviors receive the public types here like any other payload and match
//! on them with [`Message::downcast_ref`](crate::Message::downcast_ref). The
//! `pub(crate)` control messages are consumed by the engine and never reach a
//! behavior.

use crate::actor::Actor;
use std::any::TypeId;
use std::fmt;
use std::sync::Arc;
use troupe_core::{Error, ThreadId};

// =============================================================================
// Receipts
// =============================================================================

/// The message tagged `receipt_id` was processed successfully
#[derive(Debug, Clone)]
pub struct Delivery {
    pub receipt_id: String,
    pub actor: Actor,
}

/// Processing the message tagged `receipt_id` failed
#[derive(Debug, Clone)]
pub struct Failure {
    pub receipt_id: String,
    pub actor: Actor,
    pub cause: Arc<Error>,
}

/// Why a message was turned away without being processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BounceReason {
    /// The receiver's mailbox quota was full
    QuotaExceeded,
    /// The receiver was dismissed or stopped
    Dismissed,
    /// The conversation the message belonged to was aborted
    ThreadAborted,
}

impl BounceReason {
    /// Label used in metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            BounceReason::QuotaExceeded => "quota_exceeded",
            BounceReason::Dismissed => "dismissed",
            BounceReason::ThreadAborted => "thread_aborted",
        }
    }
}

impl fmt::Display for BounceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The message tagged `receipt_id` was never processed
#[derive(Debug, Clone)]
pub struct Bounce {
    pub receipt_id: String,
    pub actor: Actor,
    pub reason: BounceReason,
}

/// An observed actor has stopped
///
/// Each observer receives exactly one per observed actor.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub actor: Actor,
}

// =============================================================================
// Supervision
// =============================================================================

/// What a supervisor wants a suspended actor to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryDirective {
    /// Replay buffered messages and continue
    Resume,
    /// Drop buffered messages, run stop then start
    Restart,
    /// Stop the actor
    Stop,
}

impl RecoveryDirective {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryDirective::Resume => "resume",
            RecoveryDirective::Restart => "restart",
            RecoveryDirective::Stop => "stop",
        }
    }
}

/// Sent to a supervisor when one of its actors failed and suspended
#[derive(Debug, Clone)]
pub struct SupervisedFailure {
    pub failure_id: String,
    pub actor: Actor,
    pub cause: Arc<Error>,
}

/// Supervisor's answer to a [`SupervisedFailure`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisedRecovery {
    pub failure_id: String,
    pub directive: RecoveryDirective,
}

// =============================================================================
// Conversations
// =============================================================================

/// Events a conversation opener can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// Counterpart began processing a thread message
    Received,
    /// Counterpart finished a thread message successfully
    Completed,
    /// Counterpart failed on a thread message
    Failed,
    /// Counterpart buffered a thread message while suspended
    Delayed,
    /// Counterpart dropped a buffered thread message
    Discarded,
    /// Counterpart aborted the conversation or stopped
    Aborted,
}

impl NotificationKind {
    fn bit(self) -> u8 {
        match self {
            NotificationKind::Received => 1 << 0,
            NotificationKind::Completed => 1 << 1,
            NotificationKind::Failed => 1 << 2,
            NotificationKind::Delayed => 1 << 3,
            NotificationKind::Discarded => 1 << 4,
            NotificationKind::Aborted => 1 << 5,
        }
    }
}

/// Set of subscribed notification kinds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotificationKinds(u8);

impl NotificationKinds {
    /// No subscriptions
    pub fn none() -> Self {
        Self(0)
    }

    /// Received, Completed, Failed and Delayed
    pub fn all() -> Self {
        [
            NotificationKind::Received,
            NotificationKind::Completed,
            NotificationKind::Failed,
            NotificationKind::Delayed,
        ]
        .into_iter()
        .collect()
    }

    /// Add a kind
    pub fn with(mut self, kind: NotificationKind) -> Self {
        self.0 |= kind.bit();
        self
    }

    /// Whether `kind` is subscribed
    ///
    /// Discarded follows Delayed: whoever hears that a message was parked
    /// also hears when it is thrown away.
    pub fn contains(&self, kind: NotificationKind) -> bool {
        match kind {
            NotificationKind::Discarded => {
                self.0 & (NotificationKind::Discarded.bit() | NotificationKind::Delayed.bit()) != 0
            }
            _ => self.0 & kind.bit() != 0,
        }
    }
}

impl FromIterator<NotificationKind> for NotificationKinds {
    fn from_iter<I: IntoIterator<Item = NotificationKind>>(iter: I) -> Self {
        iter.into_iter().fold(Self::none(), Self::with)
    }
}

impl From<&[NotificationKind]> for NotificationKinds {
    fn from(kinds: &[NotificationKind]) -> Self {
        kinds.iter().copied().collect()
    }
}

/// Progress report raised by a conversation counterpart
#[derive(Debug, Clone)]
pub struct ThreadNotification {
    pub thread_id: ThreadId,
    /// The counterpart that raised the notification
    pub actor: Actor,
    pub kind: NotificationKind,
    /// Set for Failed, Discarded and, when known, Aborted
    pub cause: Option<Arc<Error>>,
}

/// Opener to counterpart: start tracking a conversation
#[derive(Debug, Clone)]
pub(crate) struct ThreadOpened {
    pub(crate) kinds: NotificationKinds,
}

/// Either side: conversation ended normally
#[derive(Debug, Clone)]
pub(crate) struct ThreadClosed;

/// Opener to counterpart: conversation ended abnormally
#[derive(Debug, Clone)]
pub(crate) struct ThreadAborted;

/// Set or clear the receiver's supervisor
#[derive(Debug, Clone)]
pub(crate) struct AssignSupervisor {
    pub(crate) supervisor: Option<Actor>,
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Lifecycle transitions reported to monitors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    Started,
    Suspended,
    Resumed,
    Stopped,
}

/// Best-effort lifecycle report
#[derive(Debug, Clone)]
pub struct LifecycleSignal {
    pub actor: Actor,
    pub event: LifecycleEvent,
}

/// Registry change reported to stage monitors
#[derive(Debug, Clone)]
pub enum StageEvent {
    Created(Actor),
    Removed(Actor),
}

pub(crate) fn is_protocol_type(type_id: TypeId) -> bool {
    [
        TypeId::of::<Delivery>(),
        TypeId::of::<Failure>(),
        TypeId::of::<Bounce>(),
        TypeId::of::<DeadLetter>(),
        TypeId::of::<SupervisedFailure>(),
        TypeId::of::<SupervisedRecovery>(),
        TypeId::of::<ThreadNotification>(),
        TypeId::of::<ThreadOpened>(),
        TypeId::of::<ThreadClosed>(),
        TypeId::of::<ThreadAborted>(),
        TypeId::of::<AssignSupervisor>(),
        TypeId::of::<LifecycleSignal>(),
        TypeId::of::<StageEvent>(),
    ]
    .contains(&type_id)
}
