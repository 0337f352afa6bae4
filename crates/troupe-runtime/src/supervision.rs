//! Supervision coordinator
//!
//! TigerStyle: A failure is a conversation with the supervisor, not an exception.
//!
//! When a behavior fails and a supervisor is assigned, the agent suspends,
//! reports a [`SupervisedFailure`] on a conversation with the supervisor and
//! buffers everything else until a matching [`SupervisedRecovery`] arrives.
//!
//! ```text
//!   failure ──> Suspended ──SupervisedFailure──> supervisor
//!                   │                                │
//!                   │ <──SupervisedRecovery(id, d)───┘
//!                   v
//!   Resume: replay buffer in order    Restart: discard, stop+start
//!   Stop / thread abort: stop sequence
//! ```

use crate::actor::{Actor, Admission};
use crate::agent::{Agent, Core};
use crate::context::Context;
use crate::conversation::Conversation;
use crate::envelope::{Envelope, Headers};
use crate::message::Message;
use crate::protocol::{
    LifecycleEvent, NotificationKinds, RecoveryDirective, SupervisedFailure, SupervisedRecovery,
};
use crate::state::{DispatchState, Suspension};
use std::sync::Arc;
use troupe_core::{metrics, Error, Result, ThreadId};
use tracing::{debug, info, warn};

impl Agent {
    /// React to a failed `message` callback
    pub(crate) async fn on_failure(self: &Arc<Self>, core: &mut Core, cause: Arc<Error>) {
        match core.supervisor.clone() {
            Some(supervisor) => {
                let failure_id = self.io.gen_uuid();
                core.transition(DispatchState::Suspended);
                info!(
                    actor_id = %self.id,
                    supervisor = %supervisor.id(),
                    failure_id = %failure_id,
                    "Suspended pending supervisor decision"
                );
                if let Err(e) = self.report_failure(core, &supervisor, failure_id, cause) {
                    warn!(actor_id = %self.id, error = %e, "Failure report rejected, stopping");
                    self.stop_now(core).await;
                    return;
                }
                self.signal(LifecycleEvent::Suspended);
            }
            None => {
                info!(actor_id = %self.id, error = %cause, "Unsupervised failure, stopping");
                self.stop_now(core).await;
            }
        }
    }

    /// Send the pending failure to `supervisor` over the failure conversation
    fn report_failure(
        self: &Arc<Self>,
        core: &mut Core,
        supervisor: &Actor,
        failure_id: String,
        cause: Arc<Error>,
    ) -> Result<()> {
        let reusable = core
            .failure_thread
            .as_ref()
            .filter(|c| c.counterpart() == supervisor && !c.is_ended())
            .cloned();

        let conversation = match reusable {
            Some(conversation) => conversation,
            None => {
                if let Some(previous) = core.failure_thread.take() {
                    previous.close();
                }
                let thread_id = ThreadId::new(format!("supervision/{}", self.io.gen_uuid()))?;
                let conversation = Conversation::open(
                    &self.actor(),
                    supervisor,
                    thread_id,
                    NotificationKinds::none(),
                )?;
                core.failure_thread = Some(conversation.clone());
                conversation
            }
        };

        core.suspension = Some(Suspension {
            failure_id: failure_id.clone(),
            cause: cause.clone(),
        });

        let report = SupervisedFailure {
            failure_id,
            actor: self.actor(),
            cause,
        };
        match conversation.tell(report)? {
            Admission::Admitted => Ok(()),
            rejected => Err(Error::ThreadOpenRejected {
                thread_id: conversation.thread_id().to_string(),
                actor_id: supervisor.id().to_string(),
                reason: format!("failure report not admitted: {:?}", rejected),
            }),
        }
    }

    /// Apply a supervisor reassignment
    pub(crate) async fn assign_supervisor(self: &Arc<Self>, core: &mut Core, next: Option<Actor>) {
        let changed = core.supervisor.as_ref() != next.as_ref();
        core.supervisor = next.clone();
        if !changed {
            return;
        }
        debug!(
            actor_id = %self.id,
            supervisor = ?next.as_ref().map(|s| s.id().to_string()),
            "Supervisor assigned"
        );

        if core.state != DispatchState::Suspended {
            if let Some(previous) = core.failure_thread.take() {
                previous.close();
            }
            return;
        }

        match (next, core.suspension.clone()) {
            (Some(supervisor), Some(suspension)) => {
                info!(
                    actor_id = %self.id,
                    supervisor = %supervisor.id(),
                    failure_id = %suspension.failure_id,
                    "Re-reporting pending failure to new supervisor"
                );
                if let Err(e) =
                    self.report_failure(core, &supervisor, suspension.failure_id, suspension.cause)
                {
                    warn!(actor_id = %self.id, error = %e, "Failure re-report rejected, stopping");
                    self.stop_now(core).await;
                }
            }
            _ => {
                info!(actor_id = %self.id, "Supervisor cleared while suspended, stopping");
                self.stop_now(core).await;
            }
        }
    }

    /// Apply a supervisor's decision
    pub(crate) async fn recover(
        self: &Arc<Self>,
        core: &mut Core,
        envelope: &Envelope,
        recovery: &SupervisedRecovery,
    ) {
        let Some(suspension) = core.suspension.clone() else {
            warn!(
                actor_id = %self.id,
                failure_id = %recovery.failure_id,
                "Recovery received while not suspended, ignoring"
            );
            return;
        };

        let from_supervisor = match (envelope.sender(), core.supervisor.as_ref()) {
            (Some(sender), Some(supervisor)) => sender == supervisor,
            _ => false,
        };
        if !from_supervisor || recovery.failure_id != suspension.failure_id {
            warn!(
                actor_id = %self.id,
                expected = %suspension.failure_id,
                received = %recovery.failure_id,
                from_supervisor,
                "Mismatched recovery, ignoring"
            );
            return;
        }

        metrics::record_supervision_decision(recovery.directive.as_str());
        info!(
            actor_id = %self.id,
            failure_id = %suspension.failure_id,
            directive = recovery.directive.as_str(),
            "Applying supervisor decision"
        );

        match recovery.directive {
            RecoveryDirective::Resume => {
                core.suspension = None;
                core.transition(DispatchState::Default);
                self.signal(LifecycleEvent::Resumed);
                self.replay(core).await;
            }
            RecoveryDirective::Restart => {
                self.restart_now(core).await;
            }
            RecoveryDirective::Stop => {
                self.stop_now(core).await;
            }
        }
    }

    /// Drop the pending failure and every parked message, back to Default
    ///
    /// The failure conversation stays open for the next report.
    pub(crate) fn leave_suspension(self: &Arc<Self>, core: &mut Core) {
        let cause = core.suspension.take().map(|s| s.cause);
        self.discard_delayed(core, cause.as_ref());
        core.transition(DispatchState::Default);
        self.signal(LifecycleEvent::Resumed);
    }

    /// Dispatch parked messages in arrival order until empty or suspended again
    async fn replay(self: &Arc<Self>, core: &mut Core) {
        while core.state == DispatchState::Default {
            let Some(delivery) = core.delayed.pop_front() else {
                break;
            };
            self.dispatch(core, delivery).await;
        }
        if !core.delayed.is_empty() {
            debug!(
                actor_id = %self.id,
                remaining = core.delayed.len(),
                "Replay interrupted by another failure"
            );
        }
    }
}

impl SupervisedFailure {
    /// Answer this failure from the supervisor's behavior
    ///
    /// The recovery bypasses the failed actor's quota so a full mailbox
    /// cannot keep it suspended forever.
    pub fn respond(&self, ctx: &Context, directive: RecoveryDirective) -> Admission {
        let recovery = SupervisedRecovery {
            failure_id: self.failure_id.clone(),
            directive,
        };
        self.actor.agent.deliver_system(
            Message::new(recovery),
            Some(ctx.myself().clone()),
            Headers::new(),
        )
    }
}
