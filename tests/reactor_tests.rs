use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use placer::kernel::entity::{EntityArena, EntityId};
use placer::kernel::error::{ErrorKind, PlacementError};
use placer::kernel::reactor::{FrameSource, PlacementReactor, ReactorConfig};
use placer::kernel::time::Tick;
use placer::services::memory::{RecordingProvisioner, StaticDirectory};
use placer::services::Provisioner;
use placer::sim::ArenaSim;

fn quiet_config() -> ReactorConfig {
    ReactorConfig {
        refresh_interval: Duration::from_secs(3600),
        arena_capacity: 8,
        ..ReactorConfig::default()
    }
}

async fn reactor_with(
    nodes: &[&str],
    provisioner: Arc<RecordingProvisioner>,
    config: ReactorConfig,
) -> (PlacementReactor, Arc<StaticDirectory>) {
    let directory = Arc::new(StaticDirectory::new(nodes.iter().copied()));
    let mut reactor =
        PlacementReactor::new(directory.clone(), provisioner, config).with_rng(StdRng::seed_from_u64(9));
    let _ = reactor.prime().await;
    (reactor, directory)
}

/// Ticks with no new signals until `done` holds or two seconds pass.
async fn tick_until(reactor: &mut PlacementReactor, mut done: impl FnMut(&PlacementReactor) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !done(reactor) {
        assert!(Instant::now() < deadline, "condition not reached in time");
        reactor.tick_step(&[]).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[tokio::test]
async fn test_successful_placement_annotates_entity() {
    let (mut reactor, _) = reactor_with(&["n1", "n2"], Arc::new(RecordingProvisioner::succeeding()), quiet_config()).await;
    let e1 = reactor.arena.spawn(reactor.tick).unwrap();

    let report = reactor.tick_step(&[e1]).unwrap();
    assert_eq!(report.intents, 1);
    assert_eq!(report.dispatched, 1);
    assert!(reactor.arena.get(e1).unwrap().resolved_pending);

    tick_until(&mut reactor, |r| !r.arena.get(e1).unwrap().resolved_pending).await;

    let entity = reactor.arena.get(e1).unwrap();
    let target = entity.assigned_target.as_deref().unwrap();
    assert!(target == "n1" || target == "n2");
    assert!(entity.last_error.is_none());
    assert_eq!(reactor.log.stats().successes, 1);
    assert_eq!(reactor.log.last_target(), Some(target));
}

#[tokio::test]
async fn test_empty_inventory_marks_entity_same_tick() {
    let provisioner = Arc::new(RecordingProvisioner::succeeding());
    let (mut reactor, _) = reactor_with(&[], provisioner.clone(), quiet_config()).await;
    let e2 = reactor.arena.spawn(reactor.tick).unwrap();

    let report = reactor.tick_step(&[e2]).unwrap();

    assert_eq!(report.applied.len(), 1);
    let entity = reactor.arena.get(e2).unwrap();
    assert!(!entity.resolved_pending);
    assert_eq!(entity.last_error, Some(ErrorKind::NoTargetsAvailable));
    assert_eq!(provisioner.call_count(), 0);
    assert_eq!(reactor.log.stats().no_targets, 1);
}

#[tokio::test]
async fn test_provision_failure_leaves_target_unset() {
    let (mut reactor, _) = reactor_with(&["n1"], Arc::new(RecordingProvisioner::failing()), quiet_config()).await;
    let e3 = reactor.arena.spawn(reactor.tick).unwrap();

    reactor.tick_step(&[e3]).unwrap();
    tick_until(&mut reactor, |r| !r.arena.get(e3).unwrap().resolved_pending).await;

    let entity = reactor.arena.get(e3).unwrap();
    assert!(entity.assigned_target.is_none());
    assert_eq!(entity.last_error, Some(ErrorKind::ProvisionFailed));
    assert_eq!(reactor.log.stats().successes, 0);
    assert_eq!(reactor.log.stats().provision_failures, 1);
}

#[tokio::test]
async fn test_repeated_signals_issue_one_call() {
    let provisioner = Arc::new(RecordingProvisioner::succeeding().with_latency(Duration::from_millis(30)));
    let (mut reactor, _) = reactor_with(&["n1"], provisioner.clone(), quiet_config()).await;
    let e4 = reactor.arena.spawn(reactor.tick).unwrap();

    let first = reactor.tick_step(&[e4, e4]).unwrap();
    assert_eq!(first.intents, 1);
    for _ in 0..5 {
        let report = reactor.tick_step(&[e4]).unwrap();
        assert_eq!(report.intents, 0);
    }

    tick_until(&mut reactor, |r| !r.arena.get(e4).unwrap().resolved_pending).await;
    reactor.tick_step(&[e4]).unwrap();

    assert_eq!(provisioner.call_count(), 1);
    assert_eq!(provisioner.peak_concurrency(), 1);
}

#[tokio::test]
async fn test_tick_does_not_wait_for_slow_provisioning() {
    let provisioner = Arc::new(RecordingProvisioner::succeeding().with_latency(Duration::from_millis(300)));
    let (mut reactor, _) = reactor_with(&["n1", "n2"], provisioner, quiet_config()).await;
    let ids: Vec<EntityId> = (0..4).map(|_| reactor.arena.spawn(reactor.tick).unwrap()).collect();

    let start = Instant::now();
    let report = reactor.tick_step(&ids).unwrap();
    for _ in 0..10 {
        reactor.tick_step(&[]).unwrap();
    }

    assert_eq!(report.dispatched, 4);
    assert!(start.elapsed() < Duration::from_millis(100), "ticks must not block on the remote call");
    assert!(reactor.arena.iter().all(|e| e.resolved_pending));
}

#[tokio::test]
async fn test_late_result_for_recycled_entity_is_discarded() {
    let provisioner = Arc::new(RecordingProvisioner::succeeding().with_latency(Duration::from_millis(30)));
    let (mut reactor, _) = reactor_with(&["n1"], provisioner, quiet_config()).await;
    let old = reactor.arena.spawn(reactor.tick).unwrap();

    reactor.tick_step(&[old]).unwrap();
    assert!(reactor.arena.recycle(old));
    let replacement = reactor.arena.spawn(reactor.tick).unwrap();
    assert_eq!(replacement.slot, old.slot);

    tick_until(&mut reactor, |r| r.log.stats().discarded == 1).await;

    let entity = reactor.arena.get(replacement).unwrap();
    assert!(entity.assigned_target.is_none(), "result must not land on the new occupant");
    assert!(!entity.resolved_pending);
    assert_eq!(reactor.log.stats().successes, 0);
    assert_eq!(reactor.dispatcher().in_flight_count(), 0);
}

#[tokio::test]
async fn test_results_may_complete_out_of_order() {
    let provisioner = Arc::new(RecordingProvisioner::succeeding());
    let (mut reactor, _) = reactor_with(&["n1", "n2", "n3"], provisioner, quiet_config()).await;
    let ids: Vec<EntityId> = (0..6).map(|_| reactor.arena.spawn(reactor.tick).unwrap()).collect();

    reactor.tick_step(&ids).unwrap();
    tick_until(&mut reactor, |r| r.arena.iter().all(|e| !e.resolved_pending)).await;

    assert!(reactor.arena.iter().all(|e| e.assigned_target.is_some()));
    assert_eq!(reactor.log.stats().successes, 6);
}

#[tokio::test]
async fn test_refresh_failure_keeps_serving_stale_inventory() {
    let config = ReactorConfig {
        refresh_interval: Duration::ZERO,
        ..quiet_config()
    };
    let (mut reactor, directory) = reactor_with(&["n1"], Arc::new(RecordingProvisioner::succeeding()), config).await;
    directory.set_unavailable(true);

    tick_until(&mut reactor, |r| r.log.stats().refresh_failures >= 2).await;
    assert_eq!(reactor.cache.snapshot().len(), 1);

    let e = reactor.arena.spawn(reactor.tick).unwrap();
    reactor.tick_step(&[e]).unwrap();
    tick_until(&mut reactor, |r| !r.arena.get(e).unwrap().resolved_pending).await;
    assert_eq!(reactor.arena.get(e).unwrap().assigned_target.as_deref(), Some("n1"));
}

#[tokio::test]
async fn test_periodic_refresh_picks_up_new_targets() {
    let config = ReactorConfig {
        refresh_interval: Duration::ZERO,
        ..quiet_config()
    };
    let (mut reactor, directory) = reactor_with(&["n1"], Arc::new(RecordingProvisioner::succeeding()), config).await;

    directory.set_targets(["n7"]);
    tick_until(&mut reactor, |r| r.cache.snapshot().first().map(|t| t.id.as_str()) == Some("n7")).await;
}

#[tokio::test]
async fn test_stalled_directory_does_not_wedge_refresh() {
    let config = ReactorConfig {
        refresh_interval: Duration::from_millis(10),
        refresh_timeout: Duration::from_millis(20),
        ..quiet_config()
    };
    let directory = Arc::new(StaticDirectory::new(["n1"]));
    directory.set_stalled(true);
    let mut reactor = PlacementReactor::new(directory.clone(), Arc::new(RecordingProvisioner::succeeding()), config);

    let primed = tokio::time::timeout(Duration::from_secs(1), reactor.prime())
        .await
        .expect("prime must finish against a stalled directory");
    assert_eq!(primed, Err(ErrorKind::InventoryUnavailable));

    tick_until(&mut reactor, |r| r.log.stats().refresh_failures >= 3).await;
    assert!(directory.calls() >= 3, "refresh must be retried after a timeout");

    directory.set_stalled(false);
    tick_until(&mut reactor, |r| r.cache.snapshot().len() == 1).await;
}

struct PanickingProvisioner;

#[async_trait]
impl Provisioner for PanickingProvisioner {
    async fn create_workload(&self, _target_id: &str, _request_id: &str) -> anyhow::Result<()> {
        panic!("provisioner bug");
    }
}

#[tokio::test]
async fn test_panicked_provisioning_task_fails_entity() {
    let directory = Arc::new(StaticDirectory::new(["n1"]));
    let mut reactor = PlacementReactor::new(directory, Arc::new(PanickingProvisioner), quiet_config());
    reactor.prime().await.unwrap();
    let e = reactor.arena.spawn(reactor.tick).unwrap();

    reactor.tick_step(&[e]).unwrap();
    assert!(reactor.dispatcher().is_in_flight(e));
    tick_until(&mut reactor, |r| !r.arena.get(e).unwrap().resolved_pending).await;

    let entity = reactor.arena.get(e).unwrap();
    assert_eq!(entity.last_error, Some(ErrorKind::ProvisionFailed));
    assert!(entity.assigned_target.is_none());
    assert_eq!(reactor.dispatcher().in_flight_count(), 0);
    assert_eq!(reactor.log.stats().provision_failures, 1);
}

#[test]
fn test_fatal_tick_aborts_in_flight_attempts() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let provisioner = Arc::new(RecordingProvisioner::succeeding().with_latency(Duration::from_secs(30)));
    let (mut reactor, _) = runtime.block_on(reactor_with(&["n1"], provisioner, quiet_config()));
    let first = reactor.arena.spawn(reactor.tick).unwrap();
    let second = reactor.arena.spawn(reactor.tick).unwrap();

    runtime.block_on(async { reactor.tick_step(&[first]) }).unwrap();
    assert_eq!(reactor.dispatcher().in_flight_count(), 1);

    // Outside the runtime nothing can be spawned.
    let err = reactor.tick_step(&[second]).unwrap_err();
    assert!(matches!(err, PlacementError::RuntimeUnavailable(_)));
    assert_eq!(reactor.dispatcher().in_flight_count(), 0, "fatal tick must not leave attempts running");
}

struct Scripted {
    resolve_at: u64,
    id: Option<EntityId>,
}

impl FrameSource for Scripted {
    fn frame(&mut self, arena: &mut EntityArena, tick: Tick) -> Vec<EntityId> {
        if self.id.is_none() {
            self.id = arena.spawn(tick);
        }
        if tick.frame >= self.resolve_at {
            self.id.into_iter().collect()
        } else {
            Vec::new()
        }
    }
}

#[tokio::test]
async fn test_run_loop_stops_after_max_ticks() {
    let config = ReactorConfig {
        tick: Duration::from_millis(1),
        ..quiet_config()
    };
    let (mut reactor, _) = reactor_with(&["n1"], Arc::new(RecordingProvisioner::succeeding()), config).await;
    let mut source = Scripted { resolve_at: 3, id: None };

    reactor.run(&mut source, CancellationToken::new(), Some(200)).await.unwrap();

    assert_eq!(reactor.tick.frame, 200);
    let entity = reactor.arena.get(source.id.unwrap()).unwrap();
    assert_eq!(entity.assigned_target.as_deref(), Some("n1"));
}

#[tokio::test]
async fn test_run_loop_honours_cancellation() {
    let config = ReactorConfig {
        tick: Duration::from_millis(1),
        ..quiet_config()
    };
    let (mut reactor, _) = reactor_with(&["n1"], Arc::new(RecordingProvisioner::succeeding()), config).await;
    let mut sim = ArenaSim::new(3, 0.1);

    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        stopper.cancel();
    });

    tokio::time::timeout(Duration::from_secs(2), reactor.run(&mut sim, cancel, None))
        .await
        .expect("loop should stop on cancel")
        .unwrap();
    assert!(reactor.tick.frame > 0);
    assert_eq!(reactor.dispatcher().in_flight_count(), 0);
}
