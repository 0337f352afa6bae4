//! Stage tests: id uniqueness, capacity, lookups, monitors, shutdown
//!
//! TigerStyle: At most one live actor per id, no matter the interleaving.

use async_trait::async_trait;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use troupe_runtime::testing::Probe;
use troupe_runtime::{
    Actor, ActorId, ActorSpec, Behavior, Context, Envelope, Error, Message, Result, Stage,
    StageEvent, TroupeConfig,
};

struct Sink;

#[async_trait]
impl Behavior for Sink {
    async fn message(
        &mut self,
        _msg: Message,
        _envelope: &Envelope,
        _ctx: &mut Context,
    ) -> Result<()> {
        Ok(())
    }
}

fn named(id: &str) -> ActorSpec {
    ActorSpec::named(id).unwrap()
}

#[tokio::test]
async fn test_duplicate_id_rejected() {
    let stage = Stage::builder().build().unwrap();
    let first = stage.create_actor(named("alpha"), |_| Ok(Sink)).unwrap();
    assert_eq!(first.id().as_str(), "alpha");

    let second = stage.create_actor(named("alpha"), |_| Ok(Sink));
    assert!(matches!(second, Err(Error::DuplicateId { .. })));
    assert_eq!(stage.len(), 1);
}

#[tokio::test]
async fn test_generated_ids_are_unique() {
    let stage = Stage::builder().build().unwrap();
    let a = stage.spawn(Sink).unwrap();
    let b = stage.spawn(Sink).unwrap();
    assert_ne!(a.id(), b.id());
    assert_ne!(a, b);
}

#[tokio::test]
async fn test_factory_sees_reserved_id() {
    let stage = Stage::builder().build().unwrap();
    let mut seen = None;
    stage
        .create_actor(named("beta"), |id: &ActorId| {
            seen = Some(id.clone());
            Ok(Sink)
        })
        .unwrap();
    assert_eq!(seen.map(|id| id.to_string()), Some("beta".to_string()));
}

#[tokio::test]
async fn test_stage_full() {
    let mut config = TroupeConfig::default();
    config.stage.actors_count_max = 2;
    let stage = Stage::builder().with_config(config).build().unwrap();

    stage.spawn(Sink).unwrap();
    stage.spawn(Sink).unwrap();
    let third = stage.spawn(Sink);
    assert!(matches!(third, Err(Error::StageFull { count: 2, limit: 2 })));
}

#[tokio::test]
async fn test_invalid_quota_rejected() {
    let stage = Stage::builder().build().unwrap();
    let result = stage.create_actor(ActorSpec::new().with_quota(0), |_| Ok(Sink));
    assert!(matches!(result, Err(Error::InvalidConfiguration { .. })));
    assert!(stage.is_empty());
}

#[tokio::test]
async fn test_failed_factory_releases_id() {
    let stage = Stage::builder().build().unwrap();
    let failed = stage.create_actor(named("gamma"), |_| -> Result<Sink> {
        Err(Error::behavior("no resources"))
    });
    assert!(matches!(failed, Err(Error::BehaviorFailed { .. })));
    assert!(stage.is_empty());

    let retried = stage.create_actor(named("gamma"), |_| Ok(Sink));
    assert!(retried.is_ok());
}

#[tokio::test]
async fn test_panicking_factory_releases_id() {
    let stage = Stage::builder().build().unwrap();
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        stage.create_actor(named("delta"), |_| -> Result<Sink> { panic!("factory exploded") })
    }));
    assert!(outcome.is_err());
    assert!(stage.is_empty());
    assert!(stage.create_actor(named("delta"), |_| Ok(Sink)).is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_get_or_create_builds_once_under_contention() {
    let stage = Stage::builder().build().unwrap();
    let built = Arc::new(AtomicUsize::new(0));

    let actors: Vec<Actor> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stage = stage.clone();
                let built = built.clone();
                scope.spawn(move || {
                    stage
                        .get_or_create(named("shared"), |_| {
                            built.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(10));
                            Ok(Sink)
                        })
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(built.load(Ordering::SeqCst), 1);
    assert!(actors.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(stage.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_create_yields_one_winner() {
    let stage = Stage::builder().build().unwrap();

    let results: Vec<Result<Actor>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stage = stage.clone();
                scope.spawn(move || stage.create_actor(named("contested"), |_| Ok(Sink)))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, Error::DuplicateId { .. })));
}

#[tokio::test]
async fn test_get_or_create_returns_existing() {
    let stage = Stage::builder().build().unwrap();
    let created = stage.get_or_create(named("epsilon"), |_| Ok(Sink)).unwrap();
    let found = stage
        .get_or_create(named("epsilon"), |_| -> Result<Sink> {
            panic!("factory must not run for an existing id")
        })
        .unwrap();
    assert_eq!(created, found);
}

#[tokio::test]
async fn test_lookups() {
    let stage = Stage::builder().build().unwrap();
    let worker = stage.create_actor(named("worker-1"), |_| Ok(Sink)).unwrap();
    stage.create_actor(named("worker-2"), |_| Ok(Sink)).unwrap();
    stage.create_actor(named("clerk-1"), |_| Ok(Sink)).unwrap();

    assert_eq!(stage.get(worker.id()), Some(worker.clone()));
    assert!(stage.get(&ActorId::new("nobody").unwrap()).is_none());
    assert_eq!(stage.get_all().len(), 3);

    let workers = stage.find_all(|a| a.id().as_str().starts_with("worker"));
    assert_eq!(workers.len(), 2);
    let clerk = stage.find_any(|a| a.id().as_str().starts_with("clerk"));
    assert_eq!(clerk.map(|a| a.id().to_string()), Some("clerk-1".to_string()));
    assert!(stage.find_any(|a| a.id().as_str() == "ghost").is_none());
}

#[tokio::test]
async fn test_stopped_actor_leaves_registry_and_id_is_reusable() {
    let stage = Stage::builder().build().unwrap();
    let actor = stage.create_actor(named("zeta"), |_| Ok(Sink)).unwrap();
    actor.dismiss();
    actor.wait_stopped().await;

    assert!(stage.get(actor.id()).is_none());
    let replacement = stage.create_actor(named("zeta"), |_| Ok(Sink)).unwrap();
    assert_ne!(replacement, actor);
}

#[tokio::test]
async fn test_stage_monitor_sees_created_and_removed() {
    let stage = Stage::builder().build().unwrap();
    let (probe, mut events) = Probe::new();
    let monitor = stage.spawn(probe).unwrap();
    stage.add_monitor(&monitor);

    let actor = stage.spawn(Sink).unwrap();
    match events.expect::<StageEvent>().await {
        StageEvent::Created(created) => assert_eq!(created, actor),
        other => panic!("unexpected event: {other:?}"),
    }

    actor.dismiss();
    match events.expect::<StageEvent>().await {
        StageEvent::Removed(removed) => assert_eq!(removed, actor),
        other => panic!("unexpected event: {other:?}"),
    }

    stage.remove_monitor(&monitor);
    stage.spawn(Sink).unwrap();
    events.expect_quiet(20).await;
}

#[tokio::test]
async fn test_shutdown_stops_every_actor() {
    let stage = Stage::builder().build().unwrap();
    let actors: Vec<Actor> = (0..5).map(|_| stage.spawn(Sink).unwrap()).collect();
    for actor in &actors {
        actor.tell("work");
    }

    stage.shutdown().await;
    assert!(actors.iter().all(Actor::is_stopped));
    assert!(stage.is_empty());
}

#[tokio::test]
async fn test_no_actors_created_after_shutdown() {
    let stage = Stage::builder().build().unwrap();
    stage.shutdown().await;

    assert!(matches!(stage.spawn(Sink), Err(Error::StageShutDown)));
    let result = stage.get_or_create(named("late"), |_| Ok(Sink));
    assert!(matches!(result, Err(Error::StageShutDown)));
    assert!(stage.is_empty());
}

#[tokio::test]
async fn test_build_rejects_invalid_config() {
    let mut config = TroupeConfig::default();
    config.actor.quota_default = 0;
    let result = Stage::builder().with_config(config).build();
    assert!(matches!(result, Err(Error::InvalidConfiguration { .. })));
}
