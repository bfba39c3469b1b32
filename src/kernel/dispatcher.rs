use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::entity::EntityId;
use super::error::{ErrorKind, PlacementError};
use super::event::{PipelineEvent, PlacementIntent, PlacementResult, TargetRecord};
use super::inventory::InventoryCache;
use super::retry::RetryPolicy;
use crate::services::Provisioner;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Hard limit on a single provisioning call.
    pub provision_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            provision_timeout: Duration::from_secs(5),
            retry: RetryPolicy::none(),
        }
    }
}

/// What `dispatch` did with an intent.
#[derive(Debug)]
pub enum Dispatch {
    /// A provisioning task is running; its result arrives on the queue.
    Spawned { target: String, request_id: Uuid },
    /// Resolved without touching the network.
    Immediate(PlacementResult),
    /// The entity already has an attempt in flight. Nothing was issued.
    AlreadyInFlight,
}

/// Turns intents into asynchronous provisioning attempts.
///
/// Lives on the frame thread. Target selection happens here, synchronously,
/// against one snapshot; only the remote call runs on a spawned task.
pub struct PlacementDispatcher {
    cache: InventoryCache,
    provisioner: Arc<dyn Provisioner>,
    rng: Box<dyn RngCore + Send>,
    tx: mpsc::Sender<PipelineEvent>,
    in_flight: HashMap<EntityId, JoinHandle<()>>,
    config: DispatcherConfig,
}

impl PlacementDispatcher {
    pub fn new(
        cache: InventoryCache,
        provisioner: Arc<dyn Provisioner>,
        tx: mpsc::Sender<PipelineEvent>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            cache,
            provisioner,
            rng: Box::new(StdRng::from_entropy()),
            tx,
            in_flight: HashMap::new(),
            config,
        }
    }

    /// Replaces the selection RNG, e.g. with a seeded one for replay.
    pub fn with_rng(mut self, rng: impl RngCore + Send + 'static) -> Self {
        self.rng = Box::new(rng);
        self
    }

    pub fn dispatch(&mut self, intent: PlacementIntent) -> Result<Dispatch, PlacementError> {
        let entity_id = intent.entity_id;

        if self.in_flight.contains_key(&entity_id) {
            debug!(entity = %entity_id, "placement already in flight");
            return Ok(Dispatch::AlreadyInFlight);
        }

        let snapshot = self.cache.snapshot();
        if snapshot.is_empty() {
            warn!(entity = %entity_id, "no targets in inventory");
            return Ok(Dispatch::Immediate(PlacementResult::failure(
                entity_id,
                ErrorKind::NoTargetsAvailable,
                None,
            )));
        }

        let target = snapshot[self.rng.gen_range(0..snapshot.len())].clone();
        let request_id = Uuid::new_v4();

        let runtime = tokio::runtime::Handle::try_current()?;
        let handle = runtime.spawn(provision(
            self.provisioner.clone(),
            self.tx.clone(),
            self.config.clone(),
            entity_id,
            target.clone(),
            request_id,
        ));
        self.in_flight.insert(entity_id, handle);

        info!(entity = %entity_id, node = %target.id, request_id = %request_id, "placement dispatched");
        Ok(Dispatch::Spawned {
            target: target.id,
            request_id,
        })
    }

    /// Releases the in-flight slot once the entity's result has been drained.
    pub fn complete(&mut self, entity_id: EntityId) {
        self.in_flight.remove(&entity_id);
    }

    /// Entities whose task has already exited. Take this before draining the
    /// queue: a finished task has sent its result by then, so any of these
    /// still in flight after the drain ended without reporting (it panicked).
    pub fn finished(&self) -> Vec<EntityId> {
        self.in_flight
            .iter()
            .filter(|(_, task)| task.is_finished())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Releases `entity_id` if it is still in flight, returning whether it was.
    pub fn release(&mut self, entity_id: EntityId) -> bool {
        self.in_flight.remove(&entity_id).is_some()
    }

    pub fn is_in_flight(&self, entity_id: EntityId) -> bool {
        self.in_flight.contains_key(&entity_id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn abort_all(&mut self) {
        for (_, task) in self.in_flight.drain() {
            task.abort();
        }
    }
}

/// One logical placement: up to `retry.attempts()` sequential calls against
/// the same target, each with its own request id and timeout.
async fn provision(
    provisioner: Arc<dyn Provisioner>,
    tx: mpsc::Sender<PipelineEvent>,
    config: DispatcherConfig,
    entity_id: EntityId,
    target: TargetRecord,
    first_request_id: Uuid,
) {
    let mut request_id = first_request_id;

    for attempt in 0..config.retry.attempts() {
        if attempt > 0 {
            tokio::time::sleep(config.retry.delay_for_attempt(attempt - 1)).await;
            request_id = Uuid::new_v4();
        }

        let name = request_id.to_string();
        let call = provisioner.create_workload(&target.id, &name);
        match tokio::time::timeout(config.provision_timeout, call).await {
            Ok(Ok(())) => {
                info!(entity = %entity_id, node = %target.id, request_id = %request_id, "workload created");
                let result = PlacementResult::success(entity_id, target.id.clone(), request_id);
                deliver(&tx, result).await;
                return;
            }
            Ok(Err(e)) => {
                warn!(entity = %entity_id, node = %target.id, attempt = attempt + 1, error = %e, "provisioning failed");
            }
            Err(_) => {
                warn!(entity = %entity_id, node = %target.id, attempt = attempt + 1, "provisioning timed out");
            }
        }
    }

    let result = PlacementResult::failure(entity_id, ErrorKind::ProvisionFailed, Some(request_id));
    deliver(&tx, result).await;
}

async fn deliver(tx: &mpsc::Sender<PipelineEvent>, result: PlacementResult) {
    let entity_id = result.entity_id;
    if tx.send(PipelineEvent::Placement(result)).await.is_err() {
        debug!(entity = %entity_id, "result queue closed, placement result dropped");
    }
}
