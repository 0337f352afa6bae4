//! Stage: the actor registry
//!
//! TigerStyle: Single entry point, explicit configuration, clean shutdown.
//!
//! The stage creates actors, guarantees at most one live actor per id and
//! tells monitors about registry changes. Ids are reserved under the registry
//! lock before the behavior is built, so a failing factory leaves the
//! registry exactly as it was.

use crate::actor::Actor;
use crate::agent::{Agent, AgentParams};
use crate::behavior::Behavior;
use crate::message::Message;
use crate::envelope::Headers;
use crate::protocol::StageEvent;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use troupe_core::constants::ACTOR_ID_GENERATION_ATTEMPTS_MAX;
use troupe_core::{
    metrics, ActorId, Error, Executor, IoContext, Result, TokioExecutor, TroupeConfig,
};
use tracing::{debug, info};

// =============================================================================
// Actor spec
// =============================================================================

/// How to create an actor
#[derive(Debug, Clone, Default)]
pub struct ActorSpec {
    /// Requested id; a random one is generated when unset
    pub id: Option<ActorId>,
    /// Mailbox quota; the configured default when unset
    pub quota: Option<usize>,
}

impl ActorSpec {
    /// Anonymous actor with default quota
    pub fn new() -> Self {
        Self::default()
    }

    /// Actor with a validated id
    pub fn named(id: impl Into<String>) -> Result<Self> {
        Ok(Self::new().with_id(ActorId::new(id)?))
    }

    /// Set the id
    pub fn with_id(mut self, id: ActorId) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the quota
    pub fn with_quota(mut self, quota: usize) -> Self {
        self.quota = Some(quota);
        self
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for a [`Stage`]
#[derive(Default)]
pub struct StageBuilder {
    executor: Option<Arc<dyn Executor>>,
    io: Option<IoContext>,
    config: TroupeConfig,
}

impl StageBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the executor; defaults to the current tokio runtime
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Set clock and randomness providers
    pub fn with_io(mut self, io: IoContext) -> Self {
        self.io = Some(io);
        self
    }

    /// Set the configuration
    pub fn with_config(mut self, config: TroupeConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the stage
    ///
    /// # Errors
    /// Invalid configuration, or no executor given outside a tokio runtime.
    pub fn build(self) -> Result<Stage> {
        self.config.validate()?;
        let executor: Arc<dyn Executor> = match self.executor {
            Some(executor) => executor,
            None => Arc::new(TokioExecutor::current()?),
        };

        info!(
            actors_count_max = self.config.stage.actors_count_max,
            quota_default = self.config.actor.quota_default,
            "Stage created"
        );

        Ok(Stage {
            inner: Arc::new(StageInner {
                executor,
                io: self.io.unwrap_or_default(),
                config: self.config,
                registry: Mutex::new(HashMap::new()),
                ready: Condvar::new(),
                monitors: Mutex::new(Notifier::Silent),
                shut_down: AtomicBool::new(false),
            }),
        })
    }
}

// =============================================================================
// Stage
// =============================================================================

enum Entry {
    /// Id taken, behavior still being built
    Reserved,
    Ready(Actor),
}

enum Notifier {
    Silent,
    Active(Vec<Actor>),
}

pub(crate) struct StageInner {
    executor: Arc<dyn Executor>,
    io: IoContext,
    config: TroupeConfig,
    registry: Mutex<HashMap<ActorId, Entry>>,
    ready: Condvar,
    monitors: Mutex<Notifier>,
    /// Set once shutdown begins; no actor is created after that
    shut_down: AtomicBool,
}

/// Registry that creates and finds actors
///
/// Cloning yields another handle to the same stage.
#[derive(Clone)]
pub struct Stage {
    inner: Arc<StageInner>,
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage").field("actors", &self.len()).finish()
    }
}

impl Stage {
    /// Builder with defaults
    pub fn builder() -> StageBuilder {
        StageBuilder::new()
    }

    pub(crate) fn from_inner(inner: Arc<StageInner>) -> Self {
        Self { inner }
    }

    /// Create an actor
    ///
    /// # Errors
    /// - `DuplicateId` if the requested id is taken
    /// - `StageFull` at capacity
    /// - `StageShutDown` once `shutdown` has been called
    /// - `InvalidConfiguration` for a quota outside `1..=quota_max`
    /// - whatever `factory` returns; the id is released in that case
    pub fn create_actor<B, F>(&self, spec: ActorSpec, factory: F) -> Result<Actor>
    where
        B: Behavior,
        F: FnOnce(&ActorId) -> Result<B>,
    {
        let quota = self.inner.resolve_quota(spec.quota)?;
        let id = self.inner.reserve(spec.id)?;
        self.inner.build(id, quota, factory)
    }

    /// Create an anonymous actor from a ready behavior
    pub fn spawn<B: Behavior>(&self, behavior: B) -> Result<Actor> {
        self.create_actor(ActorSpec::new(), move |_| Ok(behavior))
    }

    /// Return the actor registered under the spec's id, creating it if absent
    ///
    /// Concurrent callers for the same id get the same actor. Callers that
    /// lose the race wait for the winner; if the winner's factory fails, one
    /// of them builds instead. Without an id this is `create_actor`.
    pub fn get_or_create<B, F>(&self, spec: ActorSpec, factory: F) -> Result<Actor>
    where
        B: Behavior,
        F: FnOnce(&ActorId) -> Result<B>,
    {
        let Some(id) = spec.id.clone() else {
            return self.create_actor(spec, factory);
        };
        let quota = self.inner.resolve_quota(spec.quota)?;

        {
            let mut registry = self.inner.registry.lock();
            loop {
                match registry.get(&id) {
                    Some(Entry::Ready(actor)) => return Ok(actor.clone()),
                    Some(Entry::Reserved) => self.inner.ready.wait(&mut registry),
                    None => {
                        self.inner.check_capacity(registry.len())?;
                        registry.insert(id.clone(), Entry::Reserved);
                        break;
                    }
                }
            }
        }

        self.inner.build(id, quota, factory)
    }

    /// Actor registered under `id`
    pub fn get(&self, id: &ActorId) -> Option<Actor> {
        match self.inner.registry.lock().get(id) {
            Some(Entry::Ready(actor)) => Some(actor.clone()),
            _ => None,
        }
    }

    /// Every registered actor, in no particular order
    pub fn get_all(&self) -> Vec<Actor> {
        self.inner
            .registry
            .lock()
            .values()
            .filter_map(|entry| match entry {
                Entry::Ready(actor) => Some(actor.clone()),
                Entry::Reserved => None,
            })
            .collect()
    }

    /// Registered actors matching `predicate`
    ///
    /// The predicate runs outside the registry lock; a panic propagates.
    pub fn find_all<P>(&self, predicate: P) -> Vec<Actor>
    where
        P: Fn(&Actor) -> bool,
    {
        self.get_all().into_iter().filter(|a| predicate(a)).collect()
    }

    /// Some registered actor matching `predicate`
    pub fn find_any<P>(&self, predicate: P) -> Option<Actor>
    where
        P: Fn(&Actor) -> bool,
    {
        self.get_all().into_iter().find(|a| predicate(a))
    }

    /// Number of registered ids, including ones still being built
    pub fn len(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Whether the stage has no actors
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `StageEvent`s to `monitor`
    pub fn add_monitor(&self, monitor: &Actor) {
        let mut monitors = self.inner.monitors.lock();
        match &mut *monitors {
            Notifier::Silent => *monitors = Notifier::Active(vec![monitor.clone()]),
            Notifier::Active(list) => {
                if !list.contains(monitor) {
                    list.push(monitor.clone());
                }
            }
        }
    }

    /// Stop delivering `StageEvent`s to `monitor`
    pub fn remove_monitor(&self, monitor: &Actor) {
        let mut monitors = self.inner.monitors.lock();
        if let Notifier::Active(list) = &mut *monitors {
            list.retain(|m| m != monitor);
            if list.is_empty() {
                *monitors = Notifier::Silent;
            }
        }
    }

    /// Clock and randomness providers
    pub fn io(&self) -> &IoContext {
        &self.inner.io
    }

    /// Configuration the stage was built with
    pub fn config(&self) -> &TroupeConfig {
        &self.inner.config
    }

    /// Refuse new actors, dismiss every actor, wait for them to stop, then stop the executor
    pub async fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        let actors = self.get_all();
        info!(actors = actors.len(), "Stage shutting down");
        for actor in &actors {
            actor.dismiss();
        }
        for actor in &actors {
            actor.wait_stopped().await;
        }
        self.inner.executor.shutdown();
        info!("Stage shut down");
    }
}

impl StageInner {
    fn resolve_quota(&self, requested: Option<usize>) -> Result<usize> {
        let quota = requested.unwrap_or(self.config.actor.quota_default);
        if quota == 0 || quota > self.config.actor.quota_max {
            return Err(Error::InvalidConfiguration {
                field: "quota".into(),
                reason: format!("{} outside 1..={}", quota, self.config.actor.quota_max),
            });
        }
        Ok(quota)
    }

    fn check_capacity(&self, count: usize) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(Error::StageShutDown);
        }
        let limit = self.config.stage.actors_count_max;
        if count >= limit {
            return Err(Error::StageFull { count, limit });
        }
        Ok(())
    }

    fn reserve(&self, requested: Option<ActorId>) -> Result<ActorId> {
        let mut registry = self.registry.lock();
        self.check_capacity(registry.len())?;

        if let Some(id) = requested {
            if registry.contains_key(&id) {
                return Err(Error::duplicate_id(id.as_str()));
            }
            registry.insert(id.clone(), Entry::Reserved);
            return Ok(id);
        }

        for _ in 0..ACTOR_ID_GENERATION_ATTEMPTS_MAX {
            let id = ActorId::new_unchecked(self.io.gen_uuid());
            if !registry.contains_key(&id) {
                registry.insert(id.clone(), Entry::Reserved);
                return Ok(id);
            }
        }
        Err(Error::internal(format!(
            "no unused actor id after {} attempts",
            ACTOR_ID_GENERATION_ATTEMPTS_MAX
        )))
    }

    fn release(&self, id: &ActorId) {
        let mut registry = self.registry.lock();
        if matches!(registry.get(id), Some(Entry::Reserved)) {
            registry.remove(id);
        }
        self.ready.notify_all();
    }

    /// Build the behavior for a reserved id and publish the actor
    fn build<B, F>(self: &Arc<Self>, id: ActorId, quota: usize, factory: F) -> Result<Actor>
    where
        B: Behavior,
        F: FnOnce(&ActorId) -> Result<B>,
    {
        let behavior = match catch_unwind(AssertUnwindSafe(|| factory(&id))) {
            Ok(Ok(behavior)) => behavior,
            Ok(Err(e)) => {
                debug!(actor_id = %id, error = %e, "Factory failed, releasing id");
                self.release(&id);
                return Err(e);
            }
            Err(panic) => {
                self.release(&id);
                resume_unwind(panic);
            }
        };

        let agent = Agent::new(
            AgentParams {
                id: id.clone(),
                stage: Arc::downgrade(self),
                executor: self.executor.clone(),
                io: self.io.clone(),
                quota,
                suspended_buffer_max: self.config.actor.suspended_buffer_max,
            },
            Box::new(behavior),
        );
        let actor = agent.actor();

        {
            let mut registry = self.registry.lock();
            registry.insert(id.clone(), Entry::Ready(actor.clone()));
            self.ready.notify_all();
        }

        metrics::record_actor_created();
        debug!(actor_id = %id, quota, "Actor created");
        self.notify(StageEvent::Created(actor.clone()));
        Ok(actor)
    }

    /// Drop a stopped actor from the registry
    pub(crate) fn remove(&self, actor: &Actor) {
        let removed = {
            let mut registry = self.registry.lock();
            match registry.get(actor.id()) {
                Some(Entry::Ready(registered)) if registered == actor => {
                    registry.remove(actor.id());
                    true
                }
                _ => false,
            }
        };
        if removed {
            debug!(actor_id = %actor.id(), "Actor removed from stage");
            self.notify(StageEvent::Removed(actor.clone()));
        }
    }

    fn notify(&self, event: StageEvent) {
        let monitors = match &*self.monitors.lock() {
            Notifier::Silent => return,
            Notifier::Active(list) => list.clone(),
        };
        for monitor in monitors {
            monitor
                .agent
                .deliver_system(Message::new(event.clone()), None, Headers::new());
        }
    }
}
