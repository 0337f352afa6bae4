//! Threaded conversations between two actors
//!
//! TigerStyle: Explicit open/close, symmetric bookkeeping on both sides.
//!
//! A conversation is a named sub-channel layered on ordinary messaging. The
//! opener announces it with a `ThreadOpened` carrying the notification kinds
//! it wants; every message tagged with the thread id then makes the
//! counterpart's engine report progress back to the opener.
//!
//! ```text
//!   opener                                   counterpart
//!     │ ── ThreadOpened{kinds} ─────────────────> │ subscribe (thread, opener)
//!     │ ── msg [thread] ────────────────────────> │
//!     │ <──────────── Received / Completed ────── │
//!     │ ── ThreadClosed | ThreadAborted ────────> │ unsubscribe
//! ```
//!
//! Thread ids are scoped per pair: the counterpart keys its bookkeeping by
//! `(thread_id, opener)`, so two openers may reuse the same id.

use crate::actor::{Actor, Admission};
use crate::envelope::Headers;
use crate::message::Message;
use crate::protocol::{
    NotificationKind, NotificationKinds, ThreadAborted, ThreadClosed, ThreadNotification,
    ThreadOpened,
};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use troupe_core::{ActorId, Error, Result, ThreadId};
use tracing::debug;

// =============================================================================
// Shared state and per-agent bookkeeping
// =============================================================================

/// End-of-life flags shared between a conversation handle and the engine
#[derive(Debug, Default)]
pub(crate) struct ThreadState {
    aborted: AtomicBool,
    closed: AtomicBool,
}

impl ThreadState {
    pub(crate) fn mark_aborted(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Counterpart-side record of a conversation someone opened with us
#[derive(Debug, Clone)]
pub(crate) struct Subscription {
    pub(crate) opener: Actor,
    pub(crate) kinds: NotificationKinds,
    pub(crate) state: Arc<ThreadState>,
}

/// Opener-side record of a conversation we opened
#[derive(Debug, Clone)]
struct Opened {
    counterpart: Actor,
    state: Arc<ThreadState>,
}

type ThreadKey = (ThreadId, ActorId);

/// Conversations an agent takes part in, on either side
#[derive(Debug, Default)]
pub(crate) struct ThreadBook {
    /// Keyed by (thread, counterpart)
    opened: HashMap<ThreadKey, Opened>,
    /// Keyed by (thread, opener)
    subscriptions: HashMap<ThreadKey, Subscription>,
    /// Threads the opener aborted whose messages may still be queued here
    aborted: HashSet<ThreadKey>,
}

fn key(thread_id: &ThreadId, peer: &ActorId) -> ThreadKey {
    (thread_id.clone(), peer.clone())
}

impl ThreadBook {
    fn register_opened(
        &mut self,
        thread_id: &ThreadId,
        counterpart: &Actor,
        state: Arc<ThreadState>,
    ) {
        self.opened.insert(
            key(thread_id, counterpart.id()),
            Opened {
                counterpart: counterpart.clone(),
                state,
            },
        );
    }

    fn forget_opened(&mut self, thread_id: &ThreadId, counterpart: &ActorId) {
        self.opened.remove(&key(thread_id, counterpart));
    }

    pub(crate) fn subscribe(
        &mut self,
        thread_id: ThreadId,
        opener: Actor,
        kinds: NotificationKinds,
    ) {
        let key = (thread_id, opener.id().clone());
        // Aborted before the open was processed; its ThreadAborted is still queued
        if self.aborted.contains(&key) {
            return;
        }
        self.subscriptions.insert(
            key,
            Subscription {
                opener,
                kinds,
                state: Arc::new(ThreadState::default()),
            },
        );
    }

    pub(crate) fn subscription(
        &self,
        thread_id: &ThreadId,
        opener: &ActorId,
    ) -> Option<&Subscription> {
        self.subscriptions.get(&key(thread_id, opener))
    }

    pub(crate) fn is_aborted(&self, thread_id: &ThreadId, opener: &ActorId) -> bool {
        self.aborted.contains(&key(thread_id, opener))
    }

    /// The peer closed the conversation, whichever side it was on
    pub(crate) fn closed_by(&mut self, thread_id: &ThreadId, peer: &ActorId) {
        let key = key(thread_id, peer);
        if let Some(subscription) = self.subscriptions.remove(&key) {
            subscription.state.mark_closed();
        }
        if let Some(opened) = self.opened.remove(&key) {
            opened.state.mark_closed();
        }
    }

    /// Eagerly record an opener's abort so queued thread messages bounce
    pub(crate) fn mark_aborted(&mut self, thread_id: &ThreadId, opener: &ActorId) {
        let key = key(thread_id, opener);
        if let Some(subscription) = self.subscriptions.get(&key) {
            subscription.state.mark_aborted();
        }
        self.aborted.insert(key);
    }

    /// The opener's `ThreadAborted` arrived; everything before it has bounced
    pub(crate) fn aborted_by_opener(&mut self, thread_id: &ThreadId, opener: &ActorId) {
        let key = key(thread_id, opener);
        if let Some(subscription) = self.subscriptions.remove(&key) {
            subscription.state.mark_aborted();
        }
        self.aborted.remove(&key);
    }

    /// Eagerly record a counterpart's abort so our own sends fail at once
    pub(crate) fn mark_opened_aborted(&mut self, thread_id: &ThreadId, counterpart: &ActorId) {
        if let Some(opened) = self.opened.get(&key(thread_id, counterpart)) {
            opened.state.mark_aborted();
        }
    }

    /// The counterpart's Aborted notification arrived
    pub(crate) fn aborted_by_counterpart(&mut self, thread_id: &ThreadId, counterpart: &ActorId) {
        if let Some(opened) = self.opened.remove(&key(thread_id, counterpart)) {
            opened.state.mark_aborted();
        }
    }

    /// Empty the book, returning what was in it
    pub(crate) fn take_all(
        &mut self,
    ) -> (
        Vec<(ThreadId, Actor, Arc<ThreadState>)>,
        Vec<(ThreadId, Subscription)>,
    ) {
        self.aborted.clear();
        let opened = self
            .opened
            .drain()
            .map(|((thread_id, _), o)| (thread_id, o.counterpart, o.state))
            .collect();
        let subscriptions = self
            .subscriptions
            .drain()
            .map(|((thread_id, _), s)| (thread_id, s))
            .collect();
        (opened, subscriptions)
    }
}

// =============================================================================
// Conversation handle
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Opener,
    Counterpart,
}

/// One side of a conversation
///
/// Cloning yields another handle to the same conversation.
#[derive(Debug, Clone)]
pub struct Conversation {
    thread_id: ThreadId,
    owner: Actor,
    counterpart: Actor,
    role: Role,
    state: Arc<ThreadState>,
}

impl Conversation {
    /// Open a conversation from `owner` to `counterpart`
    ///
    /// `ThreadOpened` goes through the counterpart's quota like any message.
    ///
    /// # Errors
    /// `ThreadOpenRejected` if the counterpart does not admit it.
    pub fn open(
        owner: &Actor,
        counterpart: &Actor,
        thread_id: ThreadId,
        kinds: impl Into<NotificationKinds>,
    ) -> Result<Self> {
        let kinds = kinds.into();
        let state = Arc::new(ThreadState::default());
        owner
            .agent
            .threads
            .lock()
            .register_opened(&thread_id, counterpart, state.clone());

        let admission = counterpart.tell_with(
            ThreadOpened { kinds },
            Some(owner),
            Headers::new().with_thread(thread_id.clone()),
        );
        if admission != Admission::Admitted {
            owner
                .agent
                .threads
                .lock()
                .forget_opened(&thread_id, counterpart.id());
            return Err(Error::ThreadOpenRejected {
                thread_id: thread_id.to_string(),
                actor_id: counterpart.id().to_string(),
                reason: format!("{:?}", admission),
            });
        }

        debug!(
            owner = %owner.id(),
            counterpart = %counterpart.id(),
            thread_id = %thread_id,
            "Conversation opened"
        );
        Ok(Self {
            thread_id,
            owner: owner.clone(),
            counterpart: counterpart.clone(),
            role: Role::Opener,
            state,
        })
    }

    /// Counterpart-side handle for a conversation `owner` takes part in
    pub(crate) fn join(owner: &Actor, opener: &Actor, thread_id: ThreadId) -> Self {
        let state = owner
            .agent
            .threads
            .lock()
            .subscription(&thread_id, opener.id())
            .map(|s| s.state.clone())
            .unwrap_or_default();
        Self {
            thread_id,
            owner: owner.clone(),
            counterpart: opener.clone(),
            role: Role::Counterpart,
            state,
        }
    }

    /// Thread identifier
    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    /// Actor on the other side
    pub fn counterpart(&self) -> &Actor {
        &self.counterpart
    }

    /// Actor this handle speaks for
    pub fn owner(&self) -> &Actor {
        &self.owner
    }

    /// Whether this handle opened the conversation
    pub fn is_opener(&self) -> bool {
        self.role == Role::Opener
    }

    /// Whether either side aborted
    pub fn is_aborted(&self) -> bool {
        self.state.is_aborted()
    }

    /// Whether the conversation was closed or aborted
    pub fn is_ended(&self) -> bool {
        self.state.is_aborted() || self.state.is_closed()
    }

    /// Send a message on this thread
    ///
    /// # Errors
    /// `ThreadClosed` once the conversation was closed or aborted.
    pub fn tell<M: Any + Send + Sync>(&self, msg: M) -> Result<Admission> {
        self.tell_with(msg, Headers::new())
    }

    /// Send with extra headers; the thread id is always overwritten
    pub fn tell_with<M: Any + Send + Sync>(&self, msg: M, headers: Headers) -> Result<Admission> {
        self.ensure_open()?;
        Ok(self.counterpart.tell_with(
            msg,
            Some(&self.owner),
            headers.with_thread(self.thread_id.clone()),
        ))
    }

    /// Send several messages on this thread under one admission
    pub fn tell_all<I, M>(&self, messages: I) -> Result<Admission>
    where
        I: IntoIterator<Item = M>,
        M: Any + Send + Sync,
    {
        self.ensure_open()?;
        Ok(self.counterpart.tell_all(
            messages,
            Some(&self.owner),
            Headers::new().with_thread(self.thread_id.clone()),
        ))
    }

    /// End the conversation normally; idempotent
    pub fn close(&self) {
        if self.is_ended() {
            return;
        }
        self.state.mark_closed();
        self.forget_locally();
        self.counterpart.agent.deliver_system(
            Message::new(ThreadClosed),
            Some(self.owner.clone()),
            Headers::new().with_thread(self.thread_id.clone()),
        );
    }

    /// End the conversation abnormally; idempotent
    ///
    /// From the opener, thread messages still queued at the counterpart are
    /// bounced. From the counterpart, the opener receives an Aborted
    /// notification.
    pub fn abort(&self) {
        if self.is_ended() {
            return;
        }
        self.state.mark_aborted();
        self.forget_locally();
        debug!(
            owner = %self.owner.id(),
            counterpart = %self.counterpart.id(),
            thread_id = %self.thread_id,
            "Conversation aborted"
        );

        match self.role {
            Role::Opener => {
                self.counterpart
                    .agent
                    .threads
                    .lock()
                    .mark_aborted(&self.thread_id, self.owner.id());
                self.counterpart.agent.deliver_system(
                    Message::new(ThreadAborted),
                    Some(self.owner.clone()),
                    Headers::new().with_thread(self.thread_id.clone()),
                );
            }
            Role::Counterpart => {
                self.counterpart
                    .agent
                    .threads
                    .lock()
                    .mark_opened_aborted(&self.thread_id, self.owner.id());
                let notification = ThreadNotification {
                    thread_id: self.thread_id.clone(),
                    actor: self.owner.clone(),
                    kind: NotificationKind::Aborted,
                    cause: None,
                };
                self.counterpart.agent.deliver_system(
                    Message::new(notification),
                    Some(self.owner.clone()),
                    Headers::new().with_thread(self.thread_id.clone()),
                );
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_ended() {
            return Err(Error::thread_closed(self.thread_id.as_str()));
        }
        Ok(())
    }

    fn forget_locally(&self) {
        let mut book = self.owner.agent.threads.lock();
        match self.role {
            Role::Opener => book.forget_opened(&self.thread_id, self.counterpart.id()),
            Role::Counterpart => {
                book.subscriptions
                    .remove(&key(&self.thread_id, self.counterpart.id()));
            }
        }
    }
}

// =============================================================================
// Conversation group
// =============================================================================

/// The same conversation held with several counterparts
#[derive(Debug, Clone)]
pub struct ConversationGroup {
    members: Vec<Conversation>,
}

impl ConversationGroup {
    /// Open `thread_id` with every counterpart
    ///
    /// If any open fails, the ones already opened are aborted and the error
    /// is returned.
    pub fn open(
        owner: &Actor,
        counterparts: &[Actor],
        thread_id: ThreadId,
        kinds: impl Into<NotificationKinds>,
    ) -> Result<Self> {
        let kinds = kinds.into();
        let mut members = Vec::with_capacity(counterparts.len());
        for counterpart in counterparts {
            match Conversation::open(owner, counterpart, thread_id.clone(), kinds) {
                Ok(conversation) => members.push(conversation),
                Err(e) => {
                    for opened in &members {
                        opened.abort();
                    }
                    return Err(e);
                }
            }
        }
        Ok(Self { members })
    }

    /// Members in opening order
    pub fn members(&self) -> &[Conversation] {
        &self.members
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the group has no members
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Send the same message to every member
    ///
    /// # Errors
    /// `ThreadClosed` if any member has ended; nothing is sent in that case.
    pub fn tell<M: Any + Send + Sync>(&self, msg: M) -> Result<Vec<Admission>> {
        self.ensure_open()?;
        let message = Message::new(msg);
        self.members
            .iter()
            .map(|member| member.tell(message.clone()))
            .collect()
    }

    /// Send the same batch to every member
    pub fn tell_all<M: Any + Send + Sync>(&self, messages: Vec<M>) -> Result<Vec<Admission>> {
        self.ensure_open()?;
        let messages: Vec<Message> = messages.into_iter().map(Message::new).collect();
        self.members
            .iter()
            .map(|member| member.tell_all(messages.iter().cloned()))
            .collect()
    }

    /// Close every member
    pub fn close(&self) {
        for member in &self.members {
            member.close();
        }
    }

    /// Abort every member
    pub fn abort(&self) {
        for member in &self.members {
            member.abort();
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.members.iter().find(|m| m.is_ended()) {
            Some(ended) => Err(Error::thread_closed(ended.thread_id().as_str())),
            None => Ok(()),
        }
    }
}
