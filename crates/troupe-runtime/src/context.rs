//! Execution context handed to behavior callbacks
//!
//! TigerStyle: Requests made during a callback take effect after it returns.

use crate::actor::{Actor, Admission};
use crate::agent::Position;
use crate::behavior::Behavior;
use crate::conversation::Conversation;
use crate::envelope::{Envelope, Headers};
use crate::protocol::NotificationKinds;
use crate::stage::Stage;
use crate::tasks::{TaskId, TaskScope};
use std::any::Any;
use std::time::Duration;
use troupe_core::{ActorId, Result, ThreadId};

/// Per-callback view of the running actor
pub struct Context {
    myself: Actor,
    next_behavior: Option<Box<dyn Behavior>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("myself", &self.myself)
            .field("behavior_pending", &self.next_behavior.is_some())
            .finish()
    }
}

impl Context {
    pub(crate) fn new(myself: Actor) -> Self {
        Self {
            myself,
            next_behavior: None,
        }
    }

    pub(crate) fn take_behavior(&mut self) -> Option<Box<dyn Behavior>> {
        self.next_behavior.take()
    }

    /// Handle to the running actor
    pub fn myself(&self) -> &Actor {
        &self.myself
    }

    /// Running actor's id
    pub fn id(&self) -> &ActorId {
        self.myself.id()
    }

    /// Replace the behavior once the current callback returns
    ///
    /// The replacement's `start` is not run; it takes over mid-life.
    pub fn set_behavior<B: Behavior>(&mut self, behavior: B) {
        self.next_behavior = Some(Box::new(behavior));
    }

    /// Restart right after the current callback, ahead of queued messages
    pub fn restart_self(&self) {
        self.myself.agent.restart(Position::Front);
    }

    /// Stop right after the current callback, ahead of queued messages
    pub fn dismiss_self(&self) {
        self.myself.agent.dismiss(Position::Front);
    }

    /// Whether a stop was requested
    pub fn is_dismissed(&self) -> bool {
        self.myself.is_dismissed()
    }

    /// Follow-up task facility
    pub fn tasks(&self) -> &TaskScope {
        &self.myself.agent.tasks
    }

    /// Stage the actor lives in, if it still exists
    pub fn stage(&self) -> Option<Stage> {
        self.myself.agent.stage.upgrade().map(Stage::from_inner)
    }

    /// Current time from the stage clock
    pub fn now_ms(&self) -> u64 {
        self.myself.agent.io.now_ms()
    }

    /// Send with this actor as sender
    pub fn tell<M: Any + Send + Sync>(&self, target: &Actor, msg: M) -> Admission {
        target.tell_with(msg, Some(&self.myself), Headers::new())
    }

    /// Send with this actor as sender and explicit headers
    pub fn tell_with<M: Any + Send + Sync>(
        &self,
        target: &Actor,
        msg: M,
        headers: Headers,
    ) -> Admission {
        target.tell_with(msg, Some(&self.myself), headers)
    }

    /// Answer the sender of `envelope`, staying on its thread
    ///
    /// Returns `None` if the message had no sender.
    pub fn reply<M: Any + Send + Sync>(&self, envelope: &Envelope, msg: M) -> Option<Admission> {
        let sender = envelope.sender()?;
        Some(sender.tell_with(msg, Some(&self.myself), envelope.headers().thread_only()))
    }

    /// Send a message to this actor after `delay`
    ///
    /// The pending send is cancelled by stop and restart.
    pub fn tell_self_after<M: Any + Send + Sync>(&self, msg: M, delay: Duration) -> TaskId {
        let weak = std::sync::Arc::downgrade(&self.myself.agent);
        let message = crate::Message::new(msg);
        self.tasks().schedule(
            async move {
                if let Some(agent) = weak.upgrade() {
                    agent.actor().tell(message);
                }
            },
            delay,
        )
    }

    /// Open a conversation with `counterpart`
    pub fn thread(
        &self,
        counterpart: &Actor,
        thread_id: ThreadId,
        kinds: impl Into<NotificationKinds>,
    ) -> Result<Conversation> {
        Conversation::open(&self.myself, counterpart, thread_id, kinds)
    }

    /// This actor's side of the conversation `envelope` arrived on
    ///
    /// Returns `None` if the message was not part of a conversation.
    pub fn reply_thread(&self, envelope: &Envelope) -> Option<Conversation> {
        let thread_id = envelope.thread_id()?.clone();
        let opener = envelope.sender()?;
        Some(Conversation::join(&self.myself, opener, thread_id))
    }
}
