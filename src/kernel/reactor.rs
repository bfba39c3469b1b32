use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dispatcher::{Dispatch, DispatcherConfig, PlacementDispatcher};
use super::entity::{EntityArena, EntityId};
use super::error::{ErrorKind, PlacementError};
use super::event::{PipelineEvent, PlacementOutcome, PlacementResult};
use super::inventory::{InventoryCache, DEFAULT_REFRESH_TIMEOUT};
use super::reducer::PlacementReducer;
use super::telemetry::{PlacementLog, DEFAULT_LOG_CAPACITY};
use super::time::{Tick, TICK_MS};
use crate::services::{Directory, Provisioner};

const QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct ReactorConfig {
    pub tick: Duration,
    /// Minimum gap between inventory refreshes. Zero refreshes whenever the
    /// previous refresh has reported back.
    pub refresh_interval: Duration,
    /// Bound on one directory query; an elapsed query counts as a failed refresh.
    pub refresh_timeout: Duration,
    pub arena_capacity: usize,
    pub log_capacity: usize,
    pub dispatcher: DispatcherConfig,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(TICK_MS),
            refresh_interval: Duration::from_secs(2),
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            arena_capacity: 60,
            log_capacity: DEFAULT_LOG_CAPACITY,
            dispatcher: DispatcherConfig::default(),
        }
    }
}

/// The collaborator that owns entity lifecycle and collision.
/// Called once per frame on the frame thread.
pub trait FrameSource {
    /// Mutates the arena (spawn / recycle) and returns ids resolved this frame.
    fn frame(&mut self, arena: &mut EntityArena, tick: Tick) -> Vec<EntityId>;

    /// Read-only view after the tick has been applied.
    fn present(&mut self, _arena: &EntityArena, _log: &PlacementLog) {}
}

/// What one tick did.
#[derive(Debug, Default)]
pub struct TickReport {
    pub tick: Tick,
    pub intents: usize,
    pub dispatched: usize,
    pub applied: Vec<PlacementResult>,
    pub refresh_started: bool,
}

/// Drives the placement pipeline from a single frame thread.
///
/// All entity writes happen inside `tick_step`. Spawned work (provisioning,
/// inventory refresh) reports back through `receiver`, which is drained
/// without blocking at the top of each tick.
pub struct PlacementReactor {
    pub arena: EntityArena,
    pub tick: Tick,
    pub log: PlacementLog,
    pub cache: InventoryCache,
    reducer: PlacementReducer,
    dispatcher: PlacementDispatcher,
    directory: Arc<dyn Directory>,
    tx: mpsc::Sender<PipelineEvent>,
    receiver: mpsc::Receiver<PipelineEvent>,
    refresh_task: Option<JoinHandle<()>>,
    last_refresh: Option<Instant>,
    config: ReactorConfig,
}

impl PlacementReactor {
    pub fn new(directory: Arc<dyn Directory>, provisioner: Arc<dyn Provisioner>, config: ReactorConfig) -> Self {
        let (tx, receiver) = mpsc::channel(QUEUE_CAPACITY);
        let cache = InventoryCache::new().with_refresh_timeout(config.refresh_timeout);
        let dispatcher = PlacementDispatcher::new(cache.clone(), provisioner, tx.clone(), config.dispatcher.clone());

        Self {
            arena: EntityArena::with_capacity(config.arena_capacity),
            tick: Tick::new(),
            log: PlacementLog::with_capacity(config.log_capacity),
            cache,
            reducer: PlacementReducer::new(),
            dispatcher,
            directory,
            tx,
            receiver,
            refresh_task: None,
            last_refresh: None,
            config,
        }
    }

    pub fn with_rng(mut self, rng: impl rand::RngCore + Send + 'static) -> Self {
        self.dispatcher = self.dispatcher.with_rng(rng);
        self
    }

    pub fn dispatcher(&self) -> &PlacementDispatcher {
        &self.dispatcher
    }

    /// Awaits one refresh in place. Meant for startup, before the loop runs.
    pub async fn prime(&mut self) -> Result<usize, ErrorKind> {
        self.last_refresh = Some(Instant::now());
        let outcome = self.cache.refresh(self.directory.as_ref()).await;
        if outcome.is_err() {
            self.log.record_refresh_failure();
        }
        outcome
    }

    /// One frame: drain results, maybe refresh, reduce, dispatch.
    /// Never awaits. Fails only if async work cannot be spawned; in-flight
    /// attempts are aborted before the error is returned.
    pub fn tick_step(&mut self, newly_resolved: &[EntityId]) -> Result<TickReport, PlacementError> {
        match self.step(newly_resolved) {
            Ok(report) => Ok(report),
            Err(e) => {
                self.dispatcher.abort_all();
                Err(e)
            }
        }
    }

    fn step(&mut self, newly_resolved: &[EntityId]) -> Result<TickReport, PlacementError> {
        self.tick = self.tick.next();
        let mut report = TickReport {
            tick: self.tick,
            ..TickReport::default()
        };

        // 1. Drain async reports
        let finished = self.dispatcher.finished();
        let refresh_finished = self.refresh_task.as_ref().is_some_and(|task| task.is_finished());
        while let Ok(event) = self.receiver.try_recv() {
            match event {
                PipelineEvent::Placement(result) => {
                    self.dispatcher.complete(result.entity_id);
                    self.apply(&result);
                    report.applied.push(result);
                }
                PipelineEvent::InventoryRefreshed(outcome) => {
                    self.refresh_task = None;
                    if outcome.is_err() {
                        self.log.record_refresh_failure();
                    }
                }
            }
        }

        // Tasks that exited without a result
        for entity_id in finished {
            if self.dispatcher.release(entity_id) {
                warn!(entity = %entity_id, "provisioning task ended without a result");
                let result = PlacementResult::failure(entity_id, ErrorKind::ProvisionFailed, None);
                self.apply(&result);
                report.applied.push(result);
            }
        }
        if refresh_finished && self.refresh_task.take().is_some() {
            warn!("inventory refresh ended without a result");
            self.log.record_refresh_failure();
        }

        // 2. Refresh inventory off-thread
        report.refresh_started = self.maybe_refresh()?;

        // 3. Reduce
        let intents = self.reducer.reduce(&mut self.arena, newly_resolved);
        report.intents = intents.len();

        // 4. Dispatch in emission order
        for intent in intents {
            match self.dispatcher.dispatch(intent)? {
                Dispatch::Spawned { .. } => report.dispatched += 1,
                Dispatch::Immediate(result) => {
                    self.apply(&result);
                    report.applied.push(result);
                }
                Dispatch::AlreadyInFlight => {}
            }
        }

        Ok(report)
    }

    fn maybe_refresh(&mut self) -> Result<bool, PlacementError> {
        if self.refresh_task.is_some() {
            return Ok(false);
        }
        let due = match self.last_refresh {
            Some(at) => at.elapsed() >= self.config.refresh_interval,
            None => true,
        };
        if !due {
            return Ok(false);
        }

        let runtime = tokio::runtime::Handle::try_current()?;
        let cache = self.cache.clone();
        let directory = self.directory.clone();
        let tx = self.tx.clone();
        let task = runtime.spawn(async move {
            let outcome = cache.refresh(directory.as_ref()).await;
            let _ = tx.send(PipelineEvent::InventoryRefreshed(outcome)).await;
        });

        self.refresh_task = Some(task);
        self.last_refresh = Some(Instant::now());
        Ok(true)
    }

    /// Writes a result onto its entity if that entity still exists.
    fn apply(&mut self, result: &PlacementResult) {
        let Some(entity) = self.arena.get_mut(result.entity_id) else {
            warn!(entity = %result.entity_id, "entity left the arena, placement result discarded");
            self.log.record_discarded();
            return;
        };

        entity.resolved_pending = false;
        match &result.outcome {
            PlacementOutcome::Success { target } => {
                entity.assigned_target = Some(target.clone());
                entity.last_error = None;
            }
            PlacementOutcome::Failure { kind } => {
                entity.last_error = Some(*kind);
            }
        }
        self.log.record(self.tick, result);
    }

    /// Fixed-cadence driver. Missed frames are skipped, not replayed.
    pub async fn run<F: FrameSource>(
        &mut self,
        source: &mut F,
        cancel: CancellationToken,
        max_ticks: Option<u64>,
    ) -> Result<(), PlacementError> {
        info!(tick_ms = self.config.tick.as_millis() as u64, "placement loop started");

        let mut cadence = interval(self.config.tick);
        cadence.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = cadence.tick() => {}
            }

            let resolved = source.frame(&mut self.arena, self.tick.next());
            let report = self.tick_step(&resolved)?;
            if report.intents > 0 || !report.applied.is_empty() {
                debug!(
                    tick = report.tick.frame,
                    intents = report.intents,
                    dispatched = report.dispatched,
                    applied = report.applied.len(),
                    "tick"
                );
            }
            source.present(&self.arena, &self.log);

            if max_ticks.is_some_and(|max| self.tick.frame >= max) {
                break;
            }
        }

        self.dispatcher.abort_all();
        info!(
            ticks = self.tick.frame,
            successes = self.log.stats().successes,
            active = self.arena.active_count(),
            capacity = self.arena.capacity(),
            "placement loop stopped"
        );
        Ok(())
    }
}
