//! In-process directory and provisioner. Used by tests and `--dry-run`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{Directory, Provisioner};
use crate::kernel::event::TargetRecord;

/// Directory with a settable target list, an availability switch and a
/// stall switch that makes queries hang.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    targets: Mutex<Vec<TargetRecord>>,
    unavailable: AtomicBool,
    stalled: AtomicBool,
    calls: AtomicUsize,
}

impl StaticDirectory {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let dir = Self::default();
        dir.set_targets(ids);
        dir
    }

    pub fn set_targets<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let targets = ids.into_iter().map(TargetRecord::new).collect();
        *self.targets.lock().unwrap_or_else(|e| e.into_inner()) = targets;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// While set, queries never answer.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn list_targets(&self) -> Result<Vec<TargetRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("directory unreachable"));
        }
        Ok(self.targets.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadCall {
    pub target_id: String,
    pub request_id: String,
}

/// Records every call. Outcomes come from a script (front first), then fall
/// back to `default_ok`.
#[derive(Debug)]
pub struct RecordingProvisioner {
    calls: Mutex<Vec<WorkloadCall>>,
    script: Mutex<VecDeque<bool>>,
    default_ok: bool,
    latency: Duration,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

impl Default for RecordingProvisioner {
    fn default() -> Self {
        Self::succeeding()
    }
}

impl RecordingProvisioner {
    pub fn succeeding() -> Self {
        Self::with_default(true)
    }

    pub fn failing() -> Self {
        Self::with_default(false)
    }

    fn with_default(default_ok: bool) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            default_ok,
            latency: Duration::ZERO,
            active: AtomicUsize::new(0),
            peak_active: AtomicUsize::new(0),
        }
    }

    /// Each call sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queues explicit outcomes for the next calls.
    pub fn with_script(self, outcomes: impl IntoIterator<Item = bool>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(outcomes);
        self
    }

    pub fn calls(&self) -> Vec<WorkloadCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Highest number of calls that were awaiting an answer at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }
}

/// Decrements on drop so a timed-out call still leaves the count.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Provisioner for RecordingProvisioner {
    async fn create_workload(&self, target_id: &str, request_id: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(WorkloadCall {
                target_id: target_id.to_string(),
                request_id: request_id.to_string(),
            });

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now_active, Ordering::SeqCst);
        let _active = ActiveGuard(&self.active);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let ok = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(self.default_ok);

        if ok {
            Ok(())
        } else {
            Err(anyhow!("workload rejected on {}", target_id))
        }
    }
}
