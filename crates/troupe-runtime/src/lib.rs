//! Troupe Runtime
//!
//! In-process actor execution for Troupe.
//!
//! # Overview
//!
//! The runtime provides:
//! - A [`Stage`] that creates actors and keeps at most one per id
//! - Per-actor serialized dispatch with a bounded mailbox quota
//! - Receipts, dead letters and lifecycle signals as ordinary messages
//! - Supervision: a failing actor suspends until its supervisor decides
//! - Conversations: threads of messages with progress notifications
//!
//! # TigerStyle
//! - One callback at a time per actor
//! - Explicit dispatch states with checked transitions
//! - Bounded mailboxes, every rejection answered

pub mod actor;
mod agent;
pub mod behavior;
pub mod context;
pub mod conversation;
pub mod envelope;
pub mod message;
pub mod protocol;
pub mod quota;
pub mod stage;
pub mod state;
mod supervision;
pub mod tasks;
pub mod testing;

pub use actor::{Actor, Admission};
pub use behavior::Behavior;
pub use context::Context;
pub use conversation::{Conversation, ConversationGroup};
pub use envelope::{Envelope, Headers};
pub use message::Message;
pub use protocol::{
    Bounce, BounceReason, DeadLetter, Delivery, Failure, LifecycleEvent, LifecycleSignal,
    NotificationKind, NotificationKinds, RecoveryDirective, StageEvent, SupervisedFailure,
    SupervisedRecovery, ThreadNotification,
};
pub use quota::QuotaGuard;
pub use stage::{ActorSpec, Stage, StageBuilder};
pub use state::DispatchState;
pub use tasks::{TaskId, TaskScope};

pub use troupe_core::{ActorId, Error, Result, ThreadId, TroupeConfig};
