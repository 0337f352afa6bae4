//! Dispatch engine tests: ordering, quota, receipts, dismissal, dead letters
//!
//! TigerStyle: Every rejection is answered, every stop is observed once.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use troupe_core::{Executor, IoContext, ManualClock, StdRngProvider, TokioExecutor};
use troupe_runtime::testing::Probe;
use troupe_runtime::{
    Actor, ActorSpec, Admission, Behavior, Bounce, BounceReason, Context, DeadLetter, Delivery,
    Envelope, Error, Failure, Headers, LifecycleEvent, LifecycleSignal, Message, Result, Stage,
};

// =============================================================================
// Test behaviors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Started,
    Stopped,
    Processed(&'static str),
    Entered,
}

/// Records lifecycle and text messages; fails on "fail", panics on "panic"
struct Worker {
    events: mpsc::UnboundedSender<Event>,
}

#[async_trait]
impl Behavior for Worker {
    async fn start(&mut self, _ctx: &mut Context) -> Result<()> {
        let _ = self.events.send(Event::Started);
        Ok(())
    }

    async fn message(
        &mut self,
        msg: Message,
        _envelope: &Envelope,
        ctx: &mut Context,
    ) -> Result<()> {
        match msg.downcast_ref::<&'static str>() {
            Some(&"fail") => Err(Error::behavior("asked to fail")),
            Some(&"panic") => panic!("asked to panic"),
            Some(&"block") => {
                let _ = self.events.send(Event::Entered);
                std::future::pending::<()>().await;
                Ok(())
            }
            Some(&"restart") => {
                ctx.restart_self();
                Ok(())
            }
            Some(&"swap") => {
                ctx.set_behavior(Shouter {
                    events: self.events.clone(),
                });
                Ok(())
            }
            Some(text) => {
                let _ = self.events.send(Event::Processed(*text));
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn stop(&mut self, _ctx: &mut Context) -> Result<()> {
        let _ = self.events.send(Event::Stopped);
        Ok(())
    }
}

/// Replacement behavior installed by "swap"
struct Shouter {
    events: mpsc::UnboundedSender<Event>,
}

#[async_trait]
impl Behavior for Shouter {
    async fn message(
        &mut self,
        _msg: Message,
        _envelope: &Envelope,
        _ctx: &mut Context,
    ) -> Result<()> {
        let _ = self.events.send(Event::Processed("SHOUT"));
        Ok(())
    }
}

/// Schedules a message to itself when started
struct Ticker {
    events: mpsc::UnboundedSender<Event>,
}

#[async_trait]
impl Behavior for Ticker {
    async fn start(&mut self, ctx: &mut Context) -> Result<()> {
        ctx.tell_self_after("tick", Duration::from_millis(10));
        Ok(())
    }

    async fn message(
        &mut self,
        msg: Message,
        _envelope: &Envelope,
        _ctx: &mut Context,
    ) -> Result<()> {
        if let Some(text) = msg.downcast_ref::<&'static str>() {
            let _ = self.events.send(Event::Processed(*text));
        }
        Ok(())
    }
}

/// Start never completes
struct Stalled {
    events: mpsc::UnboundedSender<Event>,
}

#[async_trait]
impl Behavior for Stalled {
    async fn start(&mut self, _ctx: &mut Context) -> Result<()> {
        let _ = self.events.send(Event::Entered);
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn message(
        &mut self,
        _msg: Message,
        _envelope: &Envelope,
        _ctx: &mut Context,
    ) -> Result<()> {
        Ok(())
    }
}

/// Start always fails
struct Reluctant {
    events: mpsc::UnboundedSender<Event>,
}

#[async_trait]
impl Behavior for Reluctant {
    async fn start(&mut self, _ctx: &mut Context) -> Result<()> {
        Err(Error::behavior("not ready"))
    }

    async fn message(
        &mut self,
        msg: Message,
        _envelope: &Envelope,
        _ctx: &mut Context,
    ) -> Result<()> {
        if let Some(text) = msg.downcast_ref::<&'static str>() {
            let _ = self.events.send(Event::Processed(*text));
        }
        Ok(())
    }

    async fn stop(&mut self, _ctx: &mut Context) -> Result<()> {
        let _ = self.events.send(Event::Stopped);
        Ok(())
    }
}

fn worker(stage: &Stage, spec: ActorSpec) -> (Actor, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let actor = stage
        .create_actor(spec, move |_| Ok(Worker { events: tx }))
        .unwrap();
    (actor, rx)
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out")
        .expect("channel closed")
}

// =============================================================================
// Ordering and admission
// =============================================================================

#[tokio::test]
async fn test_messages_dispatch_in_send_order() {
    let stage = Stage::builder().build().unwrap();
    let (probe, mut rx) = Probe::new();
    let actor = stage.spawn(probe).unwrap();

    for i in 0..100u32 {
        assert_eq!(actor.tell(i), Admission::Admitted);
    }
    for i in 0..100u32 {
        assert_eq!(rx.expect::<u32>().await, i);
    }
}

#[tokio::test]
async fn test_quota_rejection_answered_before_earlier_delivery() {
    let stage = Stage::builder().build().unwrap();
    let (probe, mut replies) = Probe::new();
    let sender = stage.spawn(probe).unwrap();
    let (receiver, mut events) = worker(&stage, ActorSpec::new().with_quota(1));

    let first = receiver.tell_with("x", Some(&sender), Headers::new().with_receipt("r1"));
    let second = receiver.tell_with("y", Some(&sender), Headers::new().with_receipt("r2"));
    assert_eq!(first, Admission::Admitted);
    assert_eq!(second, Admission::QuotaExceeded);

    let bounce = replies.expect::<Bounce>().await;
    assert_eq!(bounce.receipt_id, "r2");
    assert_eq!(bounce.reason, BounceReason::QuotaExceeded);
    assert_eq!(bounce.actor, receiver);

    let delivery = replies.expect::<Delivery>().await;
    assert_eq!(delivery.receipt_id, "r1");

    assert_eq!(next(&mut events).await, Event::Started);
    assert_eq!(next(&mut events).await, Event::Processed("x"));
    replies.expect_quiet(20).await;
}

#[tokio::test]
async fn test_tell_all_is_all_or_nothing() {
    let stage = Stage::builder().build().unwrap();
    let (probe, mut rx) = Probe::new();
    let actor = stage
        .create_actor(ActorSpec::new().with_quota(2), move |_| Ok(probe))
        .unwrap();

    assert_eq!(
        actor.tell_all([1u32, 2, 3], None, Headers::new()),
        Admission::QuotaExceeded
    );
    assert_eq!(actor.pending(), 0);

    assert_eq!(actor.tell_all([4u32, 5], None, Headers::new()), Admission::Admitted);
    assert_eq!(rx.expect::<u32>().await, 4);
    assert_eq!(rx.expect::<u32>().await, 5);
    rx.expect_quiet(20).await;
}

#[tokio::test]
async fn test_envelope_carries_sender_and_timing() {
    let stage = Stage::builder().build().unwrap();
    let (probe, mut rx) = Probe::new();
    let target = stage.spawn(probe).unwrap();
    let (other, _) = Probe::new();
    let sender = stage.spawn(other).unwrap();

    target.tell_with(7u32, Some(&sender), Headers::new());
    let (value, envelope) = rx.expect_with_envelope::<u32>().await;
    assert_eq!(value, 7);
    assert_eq!(envelope.sender(), Some(&sender));
    assert!(envelope.received_at_ms().is_some());
    assert!(envelope.received_at_ms().unwrap() >= envelope.sent_at_ms());
}

#[tokio::test]
async fn test_envelope_timing_follows_stage_clock() {
    let clock = Arc::new(ManualClock::new(1_000));
    let io = IoContext::new(clock.clone(), Arc::new(StdRngProvider::with_seed(7)));
    let stage = Stage::builder().with_io(io).build().unwrap();
    let (probe, mut rx) = Probe::new();
    let target = stage.spawn(probe).unwrap();
    let (other, _) = Probe::new();
    let sender = stage.spawn(other).unwrap();

    // Sender runs 250ms behind; the message then waits 40ms in the queue
    target.tell_with(
        7u32,
        Some(&sender),
        Headers::new().with_clock_offset_ms(-250),
    );
    clock.advance_ms(40);

    let (_, envelope) = rx.expect_with_envelope::<u32>().await;
    assert_eq!(envelope.sent_at_ms(), 750);
    assert_eq!(envelope.received_at_ms(), Some(1_040));
    assert_eq!(envelope.queued_ms(), Some(290));
}

// =============================================================================
// Receipts and failures
// =============================================================================

#[tokio::test]
async fn test_failure_receipt_and_unsupervised_stop() {
    let stage = Stage::builder().build().unwrap();
    let (probe, mut replies) = Probe::new();
    let sender = stage.spawn(probe).unwrap();
    let (actor, mut events) = worker(&stage, ActorSpec::new());

    actor.tell_with("fail", Some(&sender), Headers::new().with_receipt("f1"));

    let failure = replies.expect::<Failure>().await;
    assert_eq!(failure.receipt_id, "f1");
    assert!(matches!(*failure.cause, Error::BehaviorFailed { .. }));

    actor.wait_stopped().await;
    assert_eq!(next(&mut events).await, Event::Started);
    assert_eq!(next(&mut events).await, Event::Stopped);
    assert!(stage.get(actor.id()).is_none());
}

#[tokio::test]
async fn test_failed_start_answers_message_and_stops() {
    let stage = Stage::builder().build().unwrap();
    let (probe, mut replies) = Probe::new();
    let sender = stage.spawn(probe).unwrap();
    let (tx, mut events) = mpsc::unbounded_channel();
    let actor = stage.spawn(Reluctant { events: tx }).unwrap();

    actor.tell_with("first", Some(&sender), Headers::new().with_receipt("s1"));
    actor.tell_with("second", Some(&sender), Headers::new().with_receipt("s2"));

    let failure = replies.expect::<Failure>().await;
    assert_eq!(failure.receipt_id, "s1");
    assert!(matches!(*failure.cause, Error::BehaviorFailed { .. }));
    let bounce = replies.expect::<Bounce>().await;
    assert_eq!(bounce.receipt_id, "s2");
    assert_eq!(bounce.reason, BounceReason::Dismissed);

    actor.wait_stopped().await;
    assert!(stage.get(actor.id()).is_none());
    // Never started, so neither callback ran
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_panic_becomes_failure() {
    let stage = Stage::builder().build().unwrap();
    let (probe, mut replies) = Probe::new();
    let sender = stage.spawn(probe).unwrap();
    let (actor, _events) = worker(&stage, ActorSpec::new());

    actor.tell_with("panic", Some(&sender), Headers::new().with_receipt("p1"));

    let failure = replies.expect::<Failure>().await;
    assert_eq!(failure.receipt_id, "p1");
    match &*failure.cause {
        Error::BehaviorPanicked { reason } => assert_eq!(reason, "asked to panic"),
        other => panic!("unexpected cause: {other:?}"),
    }
    actor.wait_stopped().await;
}

#[tokio::test]
async fn test_no_receipt_without_receipt_id() {
    let stage = Stage::builder().build().unwrap();
    let (probe, mut replies) = Probe::new();
    let sender = stage.spawn(probe).unwrap();
    let (actor, mut events) = worker(&stage, ActorSpec::new());

    actor.tell_with("quiet", Some(&sender), Headers::new());
    assert_eq!(next(&mut events).await, Event::Started);
    assert_eq!(next(&mut events).await, Event::Processed("quiet"));
    replies.expect_quiet(20).await;
}

// =============================================================================
// Dismissal
// =============================================================================

#[tokio::test]
async fn test_dismiss_bounces_queued_messages() {
    let stage = Stage::builder().build().unwrap();
    let (probe, mut replies) = Probe::new();
    let sender = stage.spawn(probe).unwrap();
    let (actor, _events) = worker(&stage, ActorSpec::new());

    for receipt in ["a", "b", "c"] {
        actor.tell_with("work", Some(&sender), Headers::new().with_receipt(receipt));
    }
    actor.dismiss();
    assert!(actor.is_dismissed());

    for expected in ["a", "b", "c"] {
        let bounce = replies.expect::<Bounce>().await;
        assert_eq!(bounce.receipt_id, expected);
        assert_eq!(bounce.reason, BounceReason::Dismissed);
    }
    actor.wait_stopped().await;
}

#[tokio::test]
async fn test_dismiss_lazy_processes_queue_first() {
    let stage = Stage::builder().build().unwrap();
    let (actor, mut events) = worker(&stage, ActorSpec::new());

    actor.tell("one");
    actor.tell("two");
    actor.dismiss_lazy();
    assert_eq!(actor.tell("late"), Admission::Dismissed);

    assert_eq!(next(&mut events).await, Event::Started);
    assert_eq!(next(&mut events).await, Event::Processed("one"));
    assert_eq!(next(&mut events).await, Event::Processed("two"));
    assert_eq!(next(&mut events).await, Event::Stopped);
    actor.wait_stopped().await;
}

#[tokio::test]
async fn test_dismiss_now_interrupts_running_message() {
    let stage = Stage::builder().build().unwrap();
    let (probe, mut replies) = Probe::new();
    let sender = stage.spawn(probe).unwrap();
    let (actor, mut events) = worker(&stage, ActorSpec::new());

    actor.tell_with("block", Some(&sender), Headers::new().with_receipt("b1"));
    assert_eq!(next(&mut events).await, Event::Started);
    assert_eq!(next(&mut events).await, Event::Entered);

    actor.dismiss_now();

    let failure = replies.expect::<Failure>().await;
    assert_eq!(failure.receipt_id, "b1");
    assert!(matches!(*failure.cause, Error::Interrupted { .. }));

    actor.wait_stopped().await;
    assert_eq!(next(&mut events).await, Event::Stopped);
}

#[tokio::test]
async fn test_dismiss_now_during_start_fails_triggering_message() {
    let stage = Stage::builder().build().unwrap();
    let (probe, mut replies) = Probe::new();
    let sender = stage.spawn(probe).unwrap();
    let (tx, mut events) = mpsc::unbounded_channel();
    let actor = stage.spawn(Stalled { events: tx }).unwrap();

    actor.tell_with("x", Some(&sender), Headers::new().with_receipt("r1"));
    assert_eq!(next(&mut events).await, Event::Entered);

    actor.dismiss_now();

    let failure = replies.expect::<Failure>().await;
    assert_eq!(failure.receipt_id, "r1");
    assert!(matches!(*failure.cause, Error::Interrupted { .. }));
    actor.wait_stopped().await;
    replies.expect_quiet(20).await;
}

#[tokio::test]
async fn test_sends_after_executor_shutdown_are_refused() {
    let executor = Arc::new(TokioExecutor::current().unwrap());
    let stage = Stage::builder()
        .with_executor(executor.clone())
        .build()
        .unwrap();
    let (actor, mut events) = worker(&stage, ActorSpec::new().with_quota(1));

    executor.shutdown();

    assert_eq!(actor.tell("late"), Admission::Dismissed);
    assert_eq!(actor.pending(), 0);
    assert!(actor.is_stopped());
    actor.wait_stopped().await;
    assert!(stage.get(actor.id()).is_none());

    actor.dismiss_now();
    assert_eq!(actor.tell("later"), Admission::Dismissed);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_send_to_stopped_actor_bounces() {
    let stage = Stage::builder().build().unwrap();
    let (probe, mut replies) = Probe::new();
    let sender = stage.spawn(probe).unwrap();
    let (actor, _events) = worker(&stage, ActorSpec::new());

    actor.dismiss();
    actor.wait_stopped().await;

    let admission = actor.tell_with("late", Some(&sender), Headers::new().with_receipt("l1"));
    assert_eq!(admission, Admission::Dismissed);
    let bounce = replies.expect::<Bounce>().await;
    assert_eq!(bounce.receipt_id, "l1");
    assert_eq!(bounce.reason, BounceReason::Dismissed);
}

// =============================================================================
// Observers and monitors
// =============================================================================

#[tokio::test]
async fn test_dead_letter_delivered_exactly_once() {
    let stage = Stage::builder().build().unwrap();
    let (probe, mut letters) = Probe::new();
    let observer = stage.spawn(probe).unwrap();
    let (actor, _events) = worker(&stage, ActorSpec::new());

    actor.add_observer(&observer);
    actor.add_observer(&observer);
    actor.dismiss();
    actor.dismiss_now();
    actor.dismiss_lazy();
    actor.wait_stopped().await;

    let letter = letters.expect::<DeadLetter>().await;
    assert_eq!(letter.actor, actor);
    letters.expect_quiet(20).await;
}

#[tokio::test]
async fn test_observer_added_after_stop_is_told_at_once() {
    let stage = Stage::builder().build().unwrap();
    let (actor, _events) = worker(&stage, ActorSpec::new());
    actor.dismiss();
    actor.wait_stopped().await;

    let (probe, mut letters) = Probe::new();
    let late = stage.spawn(probe).unwrap();
    actor.add_observer(&late);
    assert_eq!(letters.expect::<DeadLetter>().await.actor, actor);
}

#[tokio::test]
async fn test_removed_observer_hears_nothing() {
    let stage = Stage::builder().build().unwrap();
    let (probe, mut letters) = Probe::new();
    let observer = stage.spawn(probe).unwrap();
    let (actor, _events) = worker(&stage, ActorSpec::new());

    actor.add_observer(&observer);
    actor.remove_observer(&observer);
    actor.dismiss();
    actor.wait_stopped().await;
    letters.expect_quiet(20).await;
}

#[tokio::test]
async fn test_monitor_sees_start_and_stop() {
    let stage = Stage::builder().build().unwrap();
    let (probe, mut signals) = Probe::new();
    let monitor = stage.spawn(probe).unwrap();
    let (actor, _events) = worker(&stage, ActorSpec::new());

    actor.add_monitor(&monitor);
    actor.tell("hello");
    actor.dismiss_lazy();

    let started = signals.expect::<LifecycleSignal>().await;
    assert_eq!(started.event, LifecycleEvent::Started);
    let stopped = signals.expect::<LifecycleSignal>().await;
    assert_eq!(stopped.event, LifecycleEvent::Stopped);
    assert_eq!(stopped.actor, actor);
}

// =============================================================================
// Context requests
// =============================================================================

#[tokio::test]
async fn test_restart_self_runs_stop_then_start() {
    let stage = Stage::builder().build().unwrap();
    let (actor, mut events) = worker(&stage, ActorSpec::new());

    actor.tell("restart");
    actor.tell("after");

    assert_eq!(next(&mut events).await, Event::Started);
    assert_eq!(next(&mut events).await, Event::Stopped);
    assert_eq!(next(&mut events).await, Event::Started);
    assert_eq!(next(&mut events).await, Event::Processed("after"));
    assert!(!actor.is_stopped());
}

#[tokio::test]
async fn test_set_behavior_applies_to_next_message() {
    let stage = Stage::builder().build().unwrap();
    let (actor, mut events) = worker(&stage, ActorSpec::new());

    actor.tell("before");
    actor.tell("swap");
    actor.tell("after");

    assert_eq!(next(&mut events).await, Event::Started);
    assert_eq!(next(&mut events).await, Event::Processed("before"));
    assert_eq!(next(&mut events).await, Event::Processed("SHOUT"));
}

#[tokio::test]
async fn test_tell_self_after_delivers_later() {
    let stage = Stage::builder().build().unwrap();
    let (tx, mut events) = mpsc::unbounded_channel();
    let actor = stage.spawn(Ticker { events: tx }).unwrap();

    actor.tell("go");
    assert_eq!(next(&mut events).await, Event::Processed("go"));
    assert_eq!(next(&mut events).await, Event::Processed("tick"));
}
