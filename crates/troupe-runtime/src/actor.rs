//! Actor handles
//!
//! TigerStyle: Immutable identity, sends never raise.
//!
//! An [`Actor`] is what client code holds. Cloning is cheap and keeps the same
//! identity; equality and hashing compare identity, not ids. Once the actor
//! has stopped the handle stays valid but inert: sends bounce.

use crate::agent::{Agent, Position};
use crate::conversation::Conversation;
use crate::envelope::Headers;
use crate::message::Message;
use crate::protocol::NotificationKinds;
use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use troupe_core::{ActorId, Result, ThreadId};

/// Outcome of handing messages to an actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Admission {
    /// Queued for dispatch
    Admitted,
    /// Turned away, the mailbox quota was full
    QuotaExceeded,
    /// Turned away, the actor was dismissed or stopped
    Dismissed,
}

impl Admission {
    /// Whether the messages were queued
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Addressable handle to an actor
#[derive(Clone)]
pub struct Actor {
    pub(crate) agent: Arc<Agent>,
}

impl Actor {
    pub(crate) fn from_agent(agent: Arc<Agent>) -> Self {
        Self { agent }
    }

    /// Actor id, unique within its stage
    pub fn id(&self) -> &ActorId {
        &self.agent.id
    }

    /// Send a message with no sender and no headers
    pub fn tell<M: Any + Send + Sync>(&self, msg: M) -> Admission {
        self.tell_with(msg, None, Headers::new())
    }

    /// Send a message
    ///
    /// A sender that asks for a receipt gets `Delivery`, `Failure` or
    /// `Bounce` back; a quota rejection is answered before this returns.
    pub fn tell_with<M: Any + Send + Sync>(
        &self,
        msg: M,
        sender: Option<&Actor>,
        headers: Headers,
    ) -> Admission {
        self.agent
            .tell_batch(vec![Message::new(msg)], sender.cloned(), headers)
    }

    /// Send several messages under one admission decision
    ///
    /// Either all are queued, back to back, or none are.
    pub fn tell_all<I, M>(&self, messages: I, sender: Option<&Actor>, headers: Headers) -> Admission
    where
        I: IntoIterator<Item = M>,
        M: Any + Send + Sync,
    {
        let messages: Vec<Message> = messages.into_iter().map(Message::new).collect();
        self.agent.tell_batch(messages, sender.cloned(), headers)
    }

    /// Stop after the message currently being processed
    pub fn dismiss(&self) {
        self.agent.dismiss(Position::Front);
    }

    /// Stop once everything already queued has been processed
    pub fn dismiss_lazy(&self) {
        self.agent.dismiss(Position::Back);
    }

    /// Stop now, interrupting the message being processed
    pub fn dismiss_now(&self) {
        self.agent.dismiss_now();
    }

    /// Run stop then start on the current behavior, in queue order
    pub fn restart(&self) {
        self.agent.restart(Position::Back);
    }

    /// Deliver a `DeadLetter` to `observer` when this actor stops
    pub fn add_observer(&self, observer: &Actor) {
        self.agent.add_observer(observer);
    }

    /// Stop observing
    pub fn remove_observer(&self, observer: &Actor) {
        self.agent.remove_observer(observer);
    }

    /// Deliver lifecycle signals to `monitor`
    pub fn add_monitor(&self, monitor: &Actor) {
        self.agent.add_monitor(monitor);
    }

    /// Stop monitoring
    pub fn remove_monitor(&self, monitor: &Actor) {
        self.agent.remove_monitor(monitor);
    }

    /// Set or clear the supervisor, in queue order
    pub fn set_supervisor(&self, supervisor: Option<&Actor>) -> Admission {
        self.agent.set_supervisor(supervisor.cloned())
    }

    /// Open a conversation from this actor to `counterpart`
    pub fn thread(
        &self,
        counterpart: &Actor,
        thread_id: ThreadId,
        kinds: impl Into<NotificationKinds>,
    ) -> Result<Conversation> {
        Conversation::open(self, counterpart, thread_id, kinds)
    }

    /// Whether a stop was requested
    pub fn is_dismissed(&self) -> bool {
        self.agent.is_dismissed()
    }

    /// Whether the stop sequence has completed
    pub fn is_stopped(&self) -> bool {
        self.agent.is_stopped()
    }

    /// Wait until the stop sequence has completed
    pub async fn wait_stopped(&self) {
        self.agent.wait_stopped().await;
    }

    /// Mailbox quota
    pub fn quota(&self) -> usize {
        self.agent.quota().limit()
    }

    /// Messages admitted whose dispatch has not started
    pub fn pending(&self) -> usize {
        self.agent.quota().admitted()
    }
}

impl PartialEq for Actor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.agent, &other.agent)
    }
}

impl Eq for Actor {}

impl Hash for Actor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.agent) as usize).hash(state);
    }
}

impl fmt::Debug for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Actor").field(&self.agent.id.as_str()).finish()
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.agent.id, f)
    }
}
