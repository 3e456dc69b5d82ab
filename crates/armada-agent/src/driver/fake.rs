//! Fake runtime driver for deterministic testing.

use std::collections::HashMap;
use std::sync::Arc;

use armada_core::{Job, JobId};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{DriverError, RuntimeDriver, WorkloadHandle, WorkloadState};

/// Recorded call to [`FakeDriver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Start { job_id: JobId },
    Stop { handle: WorkloadHandle },
    Status { handle: WorkloadHandle },
}

/// In-memory runtime. Clones share state, so one instance can outlive the
/// agents that use it (a "host" surviving an agent restart).
#[derive(Clone, Default)]
pub struct FakeDriver {
    inner: Arc<Mutex<FakeState>>,
}

#[derive(Default)]
struct FakeState {
    workloads: HashMap<WorkloadHandle, (JobId, WorkloadState)>,
    calls: Vec<DriverCall>,
    next: u64,
    failing_starts: u32,
    failing_stops: u32,
    start_gate: Option<Arc<Notify>>,
    exit_on_start: Option<i32>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.inner.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    pub fn start_count(&self) -> usize {
        self.count(|call| matches!(call, DriverCall::Start { .. }))
    }

    pub fn stop_count(&self) -> usize {
        self.count(|call| matches!(call, DriverCall::Stop { .. }))
    }

    fn count(&self, pred: impl Fn(&DriverCall) -> bool) -> usize {
        self.inner.lock().calls.iter().filter(|c| pred(c)).count()
    }

    /// Handles of workloads currently running for `job_id`.
    pub fn running(&self, job_id: &JobId) -> Vec<WorkloadHandle> {
        self.inner
            .lock()
            .workloads
            .iter()
            .filter(|(_, (id, state))| id == job_id && *state == WorkloadState::Running)
            .map(|(handle, _)| handle.clone())
            .collect()
    }

    /// Number of workloads the runtime still holds, whatever their state.
    pub fn tracked(&self) -> usize {
        self.inner.lock().workloads.len()
    }

    /// Park the next start until the returned gate is notified.
    pub fn hold_next_start(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.inner.lock().start_gate = Some(Arc::clone(&gate));
        gate
    }

    /// Make every started workload exit immediately with `code`.
    pub fn exit_on_start(&self, code: i32) {
        self.inner.lock().exit_on_start = Some(code);
    }

    /// Make the next `n` starts fail.
    pub fn fail_next_starts(&self, n: u32) {
        self.inner.lock().failing_starts = n;
    }

    /// Make the next `n` stops fail.
    pub fn fail_next_stops(&self, n: u32) {
        self.inner.lock().failing_stops = n;
    }

    /// Simulate the workload exiting on its own.
    pub fn set_exited(&self, handle: &WorkloadHandle, code: i32) {
        if let Some((_, state)) = self.inner.lock().workloads.get_mut(handle) {
            *state = WorkloadState::Exited { code: Some(code) };
        }
    }
}

#[async_trait]
impl RuntimeDriver for FakeDriver {
    async fn start(&self, job: &Job) -> Result<WorkloadHandle, DriverError> {
        let gate = {
            let mut inner = self.inner.lock();
            inner.calls.push(DriverCall::Start {
                job_id: job.id.clone(),
            });
            inner.start_gate.take()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut inner = self.inner.lock();
        if inner.failing_starts > 0 {
            inner.failing_starts -= 1;
            return Err(DriverError::StartFailed("injected start failure".into()));
        }
        inner.next += 1;
        let handle = WorkloadHandle::new(format!("fake-{}", inner.next));
        let state = match inner.exit_on_start {
            Some(code) => WorkloadState::Exited { code: Some(code) },
            None => WorkloadState::Running,
        };
        inner.workloads.insert(handle.clone(), (job.id.clone(), state));
        Ok(handle)
    }

    async fn stop(&self, handle: &WorkloadHandle) -> Result<(), DriverError> {
        let mut inner = self.inner.lock();
        inner.calls.push(DriverCall::Stop {
            handle: handle.clone(),
        });
        if inner.failing_stops > 0 {
            inner.failing_stops -= 1;
            return Err(DriverError::StopFailed("injected stop failure".into()));
        }
        inner.workloads.remove(handle);
        Ok(())
    }

    async fn status(&self, handle: &WorkloadHandle) -> Result<WorkloadState, DriverError> {
        let mut inner = self.inner.lock();
        inner.calls.push(DriverCall::Status {
            handle: handle.clone(),
        });
        Ok(inner
            .workloads
            .get(handle)
            .map(|(_, state)| *state)
            .unwrap_or(WorkloadState::Unknown))
    }
}
