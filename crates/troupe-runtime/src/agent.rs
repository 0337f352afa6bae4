//! Per-actor dispatch engine
//!
//! TigerStyle: One task at a time per actor, explicit queue, bounded mailbox.
//!
//! The agent owns everything behind an [`Actor`] handle: the behavior, the
//! quota guard, the serial work queue and the dispatch state machine.
//!
//! ```text
//!   tell ──> QuotaGuard ──> queue (VecDeque<Work>) ──> drain task on Executor
//!                                                        │
//!                          ┌─────────────────────────────┘
//!                          v
//!              Default: behavior.message()   Suspended: buffer   Stopped: bounce
//! ```
//!
//! Exactly one drain task runs per agent at a time. It holds the core lock
//! for as long as it runs, so the behavior is never entered concurrently.
//! `dismiss_now` is the only preemption point: it aborts the drain and starts
//! a fresh one whose first item is the stop.

use crate::actor::{Actor, Admission};
use crate::behavior::Behavior;
use crate::context::Context;
use crate::conversation::{Conversation, ThreadBook};
use crate::envelope::{Envelope, Headers};
use crate::message::Message;
use crate::protocol::{
    AssignSupervisor, Bounce, BounceReason, DeadLetter, Delivery as DeliveryReceipt, Failure,
    LifecycleEvent, LifecycleSignal, NotificationKind, SupervisedRecovery, ThreadAborted,
    ThreadClosed, ThreadNotification, ThreadOpened,
};
use crate::quota::QuotaGuard;
use crate::stage::StageInner;
use crate::state::{DispatchState, Suspension};
use crate::tasks::TaskScope;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use troupe_core::{metrics, ActorId, Error, Executor, IoContext, Result, TaskHandle};
use tracing::{debug, info, instrument, warn};

// =============================================================================
// Work items
// =============================================================================

/// One message on its way through the queue
#[derive(Debug, Clone)]
pub(crate) struct Delivery {
    pub(crate) message: Message,
    pub(crate) envelope: Envelope,
    /// Holds a quota slot until dispatch begins
    pub(crate) admitted: bool,
}

impl Delivery {
    /// Conversation this delivery belongs to, if it can raise notifications
    fn thread_key(&self) -> Option<(troupe_core::ThreadId, &Actor)> {
        if self.message.is_protocol() || self.envelope.is_system() {
            return None;
        }
        match (self.envelope.thread_id(), self.envelope.sender()) {
            (Some(thread_id), Some(sender)) => Some((thread_id.clone(), sender)),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub(crate) enum Work {
    Deliver(Delivery),
    Restart,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Position {
    Front,
    Back,
}

#[derive(Default)]
struct Queue {
    work: VecDeque<Work>,
    running: bool,
    generation: u64,
    drain: TaskHandle,
    in_flight: Option<Delivery>,
    closed: bool,
}

#[derive(Default)]
struct Watchers {
    observers: Vec<Actor>,
    monitors: Vec<Actor>,
    closed: bool,
}

/// State touched only by the running drain task
pub(crate) struct Core {
    pub(crate) behavior: Box<dyn Behavior>,
    pub(crate) started: bool,
    pub(crate) state: DispatchState,
    pub(crate) suspension: Option<Suspension>,
    pub(crate) supervisor: Option<Actor>,
    pub(crate) failure_thread: Option<Conversation>,
    pub(crate) delayed: VecDeque<Delivery>,
}

impl Core {
    pub(crate) fn transition(&mut self, next: DispatchState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {} -> {}",
            self.state,
            next
        );
        self.state = next;
    }
}

// =============================================================================
// Agent
// =============================================================================

/// Settings fixed at creation
pub(crate) struct AgentParams {
    pub(crate) id: ActorId,
    pub(crate) stage: Weak<StageInner>,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) io: IoContext,
    pub(crate) quota: usize,
    pub(crate) suspended_buffer_max: usize,
}

pub(crate) struct Agent {
    pub(crate) id: ActorId,
    pub(crate) stage: Weak<StageInner>,
    pub(crate) io: IoContext,
    executor: Arc<dyn Executor>,
    quota: QuotaGuard,
    suspended_buffer_max: usize,
    dismissed: Arc<AtomicBool>,
    terminated: AtomicBool,
    queue: Mutex<Queue>,
    core: tokio::sync::Mutex<Core>,
    watchers: Mutex<Watchers>,
    pub(crate) threads: Mutex<ThreadBook>,
    pub(crate) tasks: TaskScope,
    stopped: Notify,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("quota", &self.quota)
            .field("dismissed", &self.is_dismissed())
            .finish()
    }
}

impl Agent {
    pub(crate) fn new(params: AgentParams, behavior: Box<dyn Behavior>) -> Arc<Self> {
        let dismissed = Arc::new(AtomicBool::new(false));
        let tasks = TaskScope::new(params.executor.clone(), dismissed.clone());
        Arc::new(Self {
            id: params.id,
            stage: params.stage,
            io: params.io,
            executor: params.executor,
            quota: QuotaGuard::new(params.quota),
            suspended_buffer_max: params.suspended_buffer_max,
            dismissed,
            terminated: AtomicBool::new(false),
            queue: Mutex::new(Queue::default()),
            core: tokio::sync::Mutex::new(Core {
                behavior,
                started: false,
                state: DispatchState::Default,
                suspension: None,
                supervisor: None,
                failure_thread: None,
                delayed: VecDeque::new(),
            }),
            watchers: Mutex::new(Watchers::default()),
            threads: Mutex::new(ThreadBook::default()),
            tasks,
            stopped: Notify::new(),
        })
    }

    pub(crate) fn actor(self: &Arc<Self>) -> Actor {
        Actor::from_agent(self.clone())
    }

    pub(crate) fn quota(&self) -> &QuotaGuard {
        &self.quota
    }

    pub(crate) fn is_dismissed(&self) -> bool {
        self.dismissed.load(Ordering::SeqCst)
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Resolve once the stop sequence has completed
    pub(crate) async fn wait_stopped(&self) {
        let notified = self.stopped.notified();
        if self.is_stopped() {
            return;
        }
        notified.await;
    }

    // =========================================================================
    // Admission
    // =========================================================================

    /// Admission-checked send of a batch from one sender with one set of headers
    pub(crate) fn tell_batch(
        self: &Arc<Self>,
        messages: Vec<Message>,
        sender: Option<Actor>,
        headers: Headers,
    ) -> Admission {
        let now_ms = sender
            .as_ref()
            .map_or_else(|| self.io.now_ms(), |s| s.agent.io.now_ms());
        let deliveries: Vec<Delivery> = messages
            .into_iter()
            .map(|message| Delivery {
                message,
                envelope: Envelope::new(sender.clone(), headers.clone(), now_ms),
                admitted: true,
            })
            .collect();

        if self.is_dismissed() {
            for delivery in &deliveries {
                self.bounce(&delivery.envelope, BounceReason::Dismissed);
            }
            return Admission::Dismissed;
        }

        if !self.quota.try_admit(deliveries.len()) {
            debug!(
                actor_id = %self.id,
                count = deliveries.len(),
                limit = self.quota.limit(),
                "Quota exceeded"
            );
            for delivery in &deliveries {
                self.bounce(&delivery.envelope, BounceReason::QuotaExceeded);
            }
            return Admission::QuotaExceeded;
        }

        if self.submit(deliveries.into_iter().map(Work::Deliver), Position::Back) {
            Admission::Admitted
        } else {
            Admission::Dismissed
        }
    }

    /// Runtime-generated delivery; bypasses the quota and never asks for a receipt
    pub(crate) fn deliver_system(
        self: &Arc<Self>,
        message: Message,
        sender: Option<Actor>,
        headers: Headers,
    ) -> Admission {
        let envelope = Envelope::system(sender, headers, self.io.now_ms());
        let work = Work::Deliver(Delivery {
            message,
            envelope,
            admitted: false,
        });
        if self.submit(std::iter::once(work), Position::Back) {
            Admission::Admitted
        } else {
            Admission::Dismissed
        }
    }

    /// Queue work and make sure a drain is running; returns false if the agent already stopped
    fn submit(self: &Arc<Self>, work: impl IntoIterator<Item = Work>, position: Position) -> bool {
        let mut abandoned = false;
        let rejected: Vec<Work> = {
            let mut queue = self.queue.lock();
            if queue.closed {
                work.into_iter().collect()
            } else if !queue.running && self.executor.is_shutdown() {
                // No drain can start again; close instead of queueing forever
                queue.closed = true;
                abandoned = true;
                let mut rejected: Vec<Work> = queue.work.drain(..).collect();
                rejected.extend(work);
                rejected
            } else {
                for item in work {
                    match position {
                        Position::Front => queue.work.push_front(item),
                        Position::Back => queue.work.push_back(item),
                    }
                }
                if !queue.running {
                    queue.running = true;
                    let generation = queue.generation;
                    queue.drain = self.executor.spawn(Box::pin(self.clone().drain(generation)));
                }
                return true;
            }
        };
        for item in rejected {
            self.reject(item);
        }
        if abandoned {
            self.abandon();
        }
        false
    }

    fn reject(self: &Arc<Self>, work: Work) {
        if let Work::Deliver(delivery) = work {
            if delivery.admitted {
                self.quota.release(1);
            }
            self.bounce(&delivery.envelope, BounceReason::Dismissed);
        }
    }

    // =========================================================================
    // Receipts and notifications
    // =========================================================================

    pub(crate) fn bounce(self: &Arc<Self>, envelope: &Envelope, reason: BounceReason) {
        if envelope.is_system() {
            debug!(actor_id = %self.id, reason = %reason, "Dropped runtime message");
            return;
        }
        metrics::record_message_bounced(reason.as_str());
        debug!(actor_id = %self.id, reason = %reason, "Message bounced");
        if let Some((sender, receipt_id)) = receipt_target(envelope) {
            let bounce = Bounce {
                receipt_id,
                actor: self.actor(),
                reason,
            };
            sender.agent.deliver_system(
                Message::new(bounce),
                Some(self.actor()),
                envelope.headers().thread_only(),
            );
        }
    }

    fn receipt_delivered(self: &Arc<Self>, envelope: &Envelope) {
        if let Some((sender, receipt_id)) = receipt_target(envelope) {
            let receipt = DeliveryReceipt {
                receipt_id,
                actor: self.actor(),
            };
            sender.agent.deliver_system(
                Message::new(receipt),
                Some(self.actor()),
                envelope.headers().thread_only(),
            );
        }
    }

    fn receipt_failed(self: &Arc<Self>, envelope: &Envelope, cause: &Arc<Error>) {
        if let Some((sender, receipt_id)) = receipt_target(envelope) {
            let receipt = Failure {
                receipt_id,
                actor: self.actor(),
                cause: cause.clone(),
            };
            sender.agent.deliver_system(
                Message::new(receipt),
                Some(self.actor()),
                envelope.headers().thread_only(),
            );
        }
    }

    /// Tell the conversation opener about `delivery`, if it subscribed to `kind`
    fn notify_thread(
        self: &Arc<Self>,
        delivery: &Delivery,
        kind: NotificationKind,
        cause: Option<&Arc<Error>>,
    ) {
        let Some((thread_id, sender)) = delivery.thread_key() else {
            return;
        };
        let opener = {
            let book = self.threads.lock();
            match book.subscription(&thread_id, sender.id()) {
                Some(subscription) if subscription.kinds.contains(kind) => {
                    subscription.opener.clone()
                }
                _ => return,
            }
        };
        let notification = ThreadNotification {
            thread_id: thread_id.clone(),
            actor: self.actor(),
            kind,
            cause: cause.cloned(),
        };
        opener.agent.deliver_system(
            Message::new(notification),
            Some(self.actor()),
            Headers::new().with_thread(thread_id),
        );
    }

    /// Best-effort lifecycle report to monitors
    pub(crate) fn signal(self: &Arc<Self>, event: LifecycleEvent) {
        let monitors = self.watchers.lock().monitors.clone();
        for monitor in monitors {
            let signal = LifecycleSignal {
                actor: self.actor(),
                event,
            };
            monitor
                .agent
                .deliver_system(Message::new(signal), Some(self.actor()), Headers::new());
        }
    }

    // =========================================================================
    // Observers and monitors
    // =========================================================================

    pub(crate) fn add_observer(self: &Arc<Self>, observer: &Actor) {
        {
            let mut watchers = self.watchers.lock();
            if !watchers.closed {
                if !watchers.observers.contains(observer) {
                    watchers.observers.push(observer.clone());
                }
                return;
            }
        }
        let letter = DeadLetter { actor: self.actor() };
        observer
            .agent
            .deliver_system(Message::new(letter), Some(self.actor()), Headers::new());
    }

    pub(crate) fn remove_observer(&self, observer: &Actor) {
        self.watchers.lock().observers.retain(|o| o != observer);
    }

    pub(crate) fn add_monitor(self: &Arc<Self>, monitor: &Actor) {
        {
            let mut watchers = self.watchers.lock();
            if !watchers.closed {
                if !watchers.monitors.contains(monitor) {
                    watchers.monitors.push(monitor.clone());
                }
                return;
            }
        }
        let signal = LifecycleSignal {
            actor: self.actor(),
            event: LifecycleEvent::Stopped,
        };
        monitor
            .agent
            .deliver_system(Message::new(signal), Some(self.actor()), Headers::new());
    }

    pub(crate) fn remove_monitor(&self, monitor: &Actor) {
        self.watchers.lock().monitors.retain(|m| m != monitor);
    }

    // =========================================================================
    // Control
    // =========================================================================

    /// Request a stop; later requests are ignored
    pub(crate) fn dismiss(self: &Arc<Self>, position: Position) {
        if self.dismissed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(actor_id = %self.id, ?position, "Dismiss requested");
        self.submit(std::iter::once(Work::Stop), position);
    }

    /// Stop ahead of everything and interrupt the message being processed
    pub(crate) fn dismiss_now(self: &Arc<Self>) {
        if self.dismissed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.executor.is_shutdown() {
            // A live drain is never aborted without a replacement
            self.submit(std::iter::once(Work::Stop), Position::Front);
            return;
        }
        let interrupted = {
            let mut queue = self.queue.lock();
            if queue.closed {
                return;
            }
            queue.work.push_front(Work::Stop);
            let interrupted = if queue.running {
                queue.drain.abort();
                queue.generation = queue.generation.wrapping_add(1);
                queue.in_flight.take()
            } else {
                None
            };
            queue.running = true;
            let generation = queue.generation;
            queue.drain = self.executor.spawn(Box::pin(self.clone().drain(generation)));
            interrupted
        };

        info!(actor_id = %self.id, interrupted = interrupted.is_some(), "Dismissed immediately");
        if let Some(delivery) = interrupted {
            let cause = Arc::new(Error::Interrupted {
                id: self.id.to_string(),
            });
            metrics::record_message_dispatched("interrupted", 0.0);
            self.receipt_failed(&delivery.envelope, &cause);
            self.notify_thread(&delivery, NotificationKind::Failed, Some(&cause));
        }
    }

    pub(crate) fn restart(self: &Arc<Self>, position: Position) {
        self.submit(std::iter::once(Work::Restart), position);
    }

    pub(crate) fn set_supervisor(self: &Arc<Self>, supervisor: Option<Actor>) -> Admission {
        self.deliver_system(
            Message::new(AssignSupervisor { supervisor }),
            None,
            Headers::new(),
        )
    }

    // =========================================================================
    // Drain
    // =========================================================================

    async fn drain(self: Arc<Self>, generation: u64) {
        let mut core = self.core.lock().await;
        loop {
            let work = {
                let mut queue = self.queue.lock();
                if queue.generation != generation {
                    return;
                }
                match queue.work.pop_front() {
                    Some(work) => work,
                    None => {
                        queue.running = false;
                        return;
                    }
                }
            };

            match work {
                Work::Deliver(delivery) => self.deliver(&mut core, delivery).await,
                Work::Restart => self.restart_now(&mut core).await,
                Work::Stop => self.stop_now(&mut core).await,
            }

            // Let other actors sharing the worker make progress
            tokio::task::yield_now().await;
        }
    }

    #[instrument(
        skip_all,
        fields(actor_id = %self.id, message = delivery.message.type_name()),
        level = "trace"
    )]
    async fn deliver(self: &Arc<Self>, core: &mut Core, mut delivery: Delivery) {
        if delivery.admitted {
            self.quota.release(1);
            delivery.admitted = false;
        }
        delivery.envelope.mark_received(self.io.now_ms());

        if core.state == DispatchState::Stopped {
            self.bounce(&delivery.envelope, BounceReason::Dismissed);
            return;
        }

        if self.thread_is_aborted(&delivery) {
            self.bounce(&delivery.envelope, BounceReason::ThreadAborted);
            return;
        }

        if self.handle_control(core, &delivery).await {
            return;
        }

        match core.state {
            DispatchState::Default => self.dispatch(core, delivery).await,
            DispatchState::Suspended => self.defer(core, delivery),
            DispatchState::Stopped => self.bounce(&delivery.envelope, BounceReason::Dismissed),
        }
    }

    fn thread_is_aborted(&self, delivery: &Delivery) -> bool {
        match delivery.thread_key() {
            Some((thread_id, sender)) => self.threads.lock().is_aborted(&thread_id, sender.id()),
            None => false,
        }
    }

    /// Hand one message to the behavior (Default state only)
    pub(crate) async fn dispatch(self: &Arc<Self>, core: &mut Core, delivery: Delivery) {
        debug_assert!(core.state.can_dispatch());

        // In flight from here on, including a lazy start
        self.queue.lock().in_flight = Some(delivery.clone());

        if !core.started {
            if let Err(cause) = self.run_start(core).await {
                let cause = Arc::new(cause);
                warn!(actor_id = %self.id, error = %cause, "Start failed, stopping");
                if self.queue.lock().in_flight.take().is_some() {
                    self.receipt_failed(&delivery.envelope, &cause);
                    self.notify_thread(&delivery, NotificationKind::Failed, Some(&cause));
                }
                self.stop_now(core).await;
                return;
            }
        }

        self.notify_thread(&delivery, NotificationKind::Received, None);

        let started_ms = self.io.time.monotonic_ms();
        let mut ctx = Context::new(self.actor());
        let result = guarded(core.behavior.message(
            delivery.message.clone(),
            &delivery.envelope,
            &mut ctx,
        ))
        .await;
        self.apply_context(core, &mut ctx);
        let duration_seconds =
            self.io.time.monotonic_ms().saturating_sub(started_ms) as f64 / 1000.0;

        // dismiss_now already answered for an interrupted message
        let answered = self.queue.lock().in_flight.take().is_none();

        match result {
            Ok(()) => {
                metrics::record_message_dispatched("success", duration_seconds);
                if !answered {
                    self.receipt_delivered(&delivery.envelope);
                    self.notify_thread(&delivery, NotificationKind::Completed, None);
                }
            }
            Err(cause) => {
                metrics::record_message_dispatched("failure", duration_seconds);
                let cause = Arc::new(cause);
                warn!(
                    actor_id = %self.id,
                    message = delivery.message.type_name(),
                    error = %cause,
                    "Behavior failed"
                );
                if !answered {
                    self.receipt_failed(&delivery.envelope, &cause);
                    self.notify_thread(&delivery, NotificationKind::Failed, Some(&cause));
                }
                self.on_failure(core, cause).await;
            }
        }
    }

    /// Park a message while suspended
    fn defer(self: &Arc<Self>, core: &mut Core, delivery: Delivery) {
        if core.delayed.len() >= self.suspended_buffer_max {
            warn!(
                actor_id = %self.id,
                buffered = core.delayed.len(),
                "Suspended buffer full"
            );
            self.bounce(&delivery.envelope, BounceReason::QuotaExceeded);
            return;
        }
        self.notify_thread(&delivery, NotificationKind::Delayed, None);
        core.delayed.push_back(delivery);
    }

    /// Throw away every parked message
    pub(crate) fn discard_delayed(self: &Arc<Self>, core: &mut Core, cause: Option<&Arc<Error>>) {
        let fallback = Arc::new(Error::ActorStopped {
            id: self.id.to_string(),
        });
        let cause = cause.unwrap_or(&fallback);
        for delivery in core.delayed.drain(..) {
            self.receipt_failed(&delivery.envelope, cause);
            self.notify_thread(&delivery, NotificationKind::Discarded, Some(cause));
        }
    }

    fn apply_context(&self, core: &mut Core, ctx: &mut Context) {
        if let Some(next) = ctx.take_behavior() {
            debug!(actor_id = %self.id, "Behavior replaced");
            core.behavior = next;
        }
    }

    // =========================================================================
    // Control messages
    // =========================================================================

    /// Handle runtime protocol inline; returns true if the delivery was consumed
    async fn handle_control(self: &Arc<Self>, core: &mut Core, delivery: &Delivery) -> bool {
        let message = &delivery.message;
        if !message.is_protocol() {
            return false;
        }
        let envelope = &delivery.envelope;

        if let Some(opened) = message.downcast_ref::<ThreadOpened>() {
            if let (Some(thread_id), Some(sender)) = (envelope.thread_id(), envelope.sender()) {
                debug!(
                    actor_id = %self.id,
                    thread_id = %thread_id,
                    opener = %sender.id(),
                    "Conversation opened"
                );
                self.threads
                    .lock()
                    .subscribe(thread_id.clone(), sender.clone(), opened.kinds);
            }
            return true;
        }

        if message.is::<ThreadClosed>() {
            if let (Some(thread_id), Some(sender)) = (envelope.thread_id(), envelope.sender()) {
                self.threads.lock().closed_by(thread_id, sender.id());
                self.forget_failure_thread(core, thread_id, sender);
            }
            return true;
        }

        if message.is::<ThreadAborted>() {
            if let (Some(thread_id), Some(sender)) = (envelope.thread_id(), envelope.sender()) {
                debug!(
                    actor_id = %self.id,
                    thread_id = %thread_id,
                    opener = %sender.id(),
                    "Conversation aborted by opener"
                );
                self.threads.lock().aborted_by_opener(thread_id, sender.id());
                self.purge_delayed_thread(core, thread_id, sender);
            }
            return true;
        }

        if let Some(notification) = message.downcast_ref::<ThreadNotification>() {
            if notification.kind == NotificationKind::Aborted {
                self.threads
                    .lock()
                    .aborted_by_counterpart(&notification.thread_id, notification.actor.id());
                if self.is_failure_thread(core, &notification.thread_id, &notification.actor) {
                    core.failure_thread = None;
                    if core.state == DispatchState::Suspended {
                        info!(
                            actor_id = %self.id,
                            "Supervisor aborted failure conversation, stopping"
                        );
                        self.stop_now(core).await;
                    }
                    return true;
                }
            }
            return false;
        }

        if let Some(assign) = message.downcast_ref::<AssignSupervisor>() {
            self.assign_supervisor(core, assign.supervisor.clone()).await;
            return true;
        }

        if let Some(recovery) = message.downcast_ref::<SupervisedRecovery>() {
            self.recover(core, envelope, recovery).await;
            return true;
        }

        false
    }

    fn is_failure_thread(
        &self,
        core: &Core,
        thread_id: &troupe_core::ThreadId,
        peer: &Actor,
    ) -> bool {
        core.failure_thread
            .as_ref()
            .is_some_and(|c| c.thread_id() == thread_id && c.counterpart() == peer)
    }

    fn forget_failure_thread(
        &self,
        core: &mut Core,
        thread_id: &troupe_core::ThreadId,
        peer: &Actor,
    ) {
        if self.is_failure_thread(core, thread_id, peer) {
            core.failure_thread = None;
        }
    }

    /// Bounce parked messages of a conversation the opener aborted
    fn purge_delayed_thread(
        self: &Arc<Self>,
        core: &mut Core,
        thread_id: &troupe_core::ThreadId,
        opener: &Actor,
    ) {
        let (purged, kept): (Vec<Delivery>, Vec<Delivery>) =
            core.delayed.drain(..).partition(|d| {
                d.thread_key()
                    .is_some_and(|(t, sender)| &t == thread_id && sender == opener)
            });
        core.delayed = kept.into();
        for delivery in purged {
            self.bounce(&delivery.envelope, BounceReason::ThreadAborted);
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub(crate) async fn run_start(self: &Arc<Self>, core: &mut Core) -> Result<()> {
        let mut ctx = Context::new(self.actor());
        let result = guarded(core.behavior.start(&mut ctx)).await;
        self.apply_context(core, &mut ctx);
        result?;
        core.started = true;
        debug!(actor_id = %self.id, "Started");
        self.signal(LifecycleEvent::Started);
        Ok(())
    }

    async fn run_stop(self: &Arc<Self>, core: &mut Core) -> Result<()> {
        core.started = false;
        let mut ctx = Context::new(self.actor());
        let result = guarded(core.behavior.stop(&mut ctx)).await;
        self.apply_context(core, &mut ctx);
        result
    }

    /// Stop then start the current behavior; any failure stops the actor
    ///
    /// A suspended actor gives up its pending failure and parked messages
    /// first, then resumes normal dispatch.
    pub(crate) async fn restart_now(self: &Arc<Self>, core: &mut Core) {
        if core.state == DispatchState::Stopped {
            return;
        }
        if core.state == DispatchState::Suspended {
            self.leave_suspension(core);
        }
        let cancelled = self.tasks.cancel_all();
        info!(actor_id = %self.id, cancelled_tasks = cancelled, "Restarting");

        if core.started {
            if let Err(e) = self.run_stop(core).await {
                warn!(actor_id = %self.id, error = %e, "Stop failed during restart");
                self.stop_now(core).await;
                return;
            }
        }
        if let Err(e) = self.run_start(core).await {
            warn!(actor_id = %self.id, error = %e, "Start failed during restart");
            self.stop_now(core).await;
        }
    }

    /// Run the stop sequence; idempotent
    #[instrument(skip_all, fields(actor_id = %self.id), level = "debug")]
    pub(crate) async fn stop_now(self: &Arc<Self>, core: &mut Core) {
        if core.state == DispatchState::Stopped {
            return;
        }
        core.transition(DispatchState::Stopped);
        self.dismissed.store(true, Ordering::SeqCst);

        let remaining: Vec<Work> = {
            let mut queue = self.queue.lock();
            queue.closed = true;
            queue.work.drain(..).collect()
        };

        self.tasks.cancel_all();

        if core.started {
            if let Err(e) = self.run_stop(core).await {
                warn!(actor_id = %self.id, error = %e, "Stop callback failed");
            }
        }

        let cause = core.suspension.take().map(|s| s.cause);
        self.discard_delayed(core, cause.as_ref());
        for work in remaining {
            self.reject(work);
        }

        core.failure_thread = None;
        core.supervisor = None;
        self.finish_stop();
    }

    /// Stop without behavior callbacks once no drain can run again
    fn abandon(self: &Arc<Self>) {
        self.dismissed.store(true, Ordering::SeqCst);
        warn!(actor_id = %self.id, "Executor shut down, abandoning actor");
        self.tasks.cancel_all();
        if let Ok(mut core) = self.core.try_lock() {
            if core.state != DispatchState::Stopped {
                core.transition(DispatchState::Stopped);
            }
            let cause = core.suspension.take().map(|s| s.cause);
            self.discard_delayed(&mut core, cause.as_ref());
            core.failure_thread = None;
            core.supervisor = None;
        }
        self.finish_stop();
    }

    /// Release conversations and watchers, leave the stage, wake waiters
    fn finish_stop(self: &Arc<Self>) {
        self.close_threads();

        let (observers, monitors) = {
            let mut watchers = self.watchers.lock();
            watchers.closed = true;
            (
                std::mem::take(&mut watchers.observers),
                std::mem::take(&mut watchers.monitors),
            )
        };
        for observer in observers {
            let letter = DeadLetter { actor: self.actor() };
            observer
                .agent
                .deliver_system(Message::new(letter), Some(self.actor()), Headers::new());
        }
        for monitor in monitors {
            let signal = LifecycleSignal {
                actor: self.actor(),
                event: LifecycleEvent::Stopped,
            };
            monitor
                .agent
                .deliver_system(Message::new(signal), Some(self.actor()), Headers::new());
        }

        if let Some(stage) = self.stage.upgrade() {
            stage.remove(&self.actor());
        }

        metrics::record_actor_stopped();
        info!(actor_id = %self.id, "Stopped");
        self.terminated.store(true, Ordering::SeqCst);
        self.stopped.notify_waiters();
    }

    /// Abort every conversation this actor takes part in
    fn close_threads(self: &Arc<Self>) {
        let (opened, subscriptions) = self.threads.lock().take_all();

        // Counterparts of conversations we opened stop tracking them
        for (thread_id, counterpart, state) in opened {
            state.mark_aborted();
            counterpart.agent.threads.lock().mark_aborted(&thread_id, &self.id);
            counterpart.agent.deliver_system(
                Message::new(ThreadAborted),
                Some(self.actor()),
                Headers::new().with_thread(thread_id),
            );
        }

        // Openers of conversations with us hear that we are gone
        for (thread_id, subscription) in subscriptions {
            subscription.state.mark_aborted();
            subscription
                .opener
                .agent
                .threads
                .lock()
                .mark_opened_aborted(&thread_id, &self.id);
            let notification = ThreadNotification {
                thread_id: thread_id.clone(),
                actor: self.actor(),
                kind: NotificationKind::Aborted,
                cause: Some(Arc::new(Error::ActorStopped {
                    id: self.id.to_string(),
                })),
            };
            subscription.opener.agent.deliver_system(
                Message::new(notification),
                Some(self.actor()),
                Headers::new().with_thread(thread_id),
            );
        }
    }
}

fn receipt_target(envelope: &Envelope) -> Option<(Actor, String)> {
    if !envelope.wants_receipt() {
        return None;
    }
    match (envelope.sender(), &envelope.headers().receipt_id) {
        (Some(sender), Some(receipt_id)) => Some((sender.clone(), receipt_id.clone())),
        _ => None,
    }
}

/// Await a behavior callback, turning a panic into a failure
pub(crate) async fn guarded<F>(callback: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    match AssertUnwindSafe(callback).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            Err(Error::BehaviorPanicked { reason })
        }
    }
}
