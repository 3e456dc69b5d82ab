//! Local process driver: runs a job's `command` with its `env`.
//!
//! The image reference is not interpreted. Children are killed when the
//! driver is dropped, so workloads never outlive the daemon that owns them.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use armada_core::Job;
use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{DriverError, RuntimeDriver, WorkloadHandle, WorkloadState};

#[derive(Default)]
pub struct ProcessDriver {
    children: Mutex<HashMap<WorkloadHandle, Child>>,
    next: AtomicU64,
}

impl ProcessDriver {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) async fn tracked(&self) -> usize {
        self.children.lock().await.len()
    }
}

#[async_trait]
impl RuntimeDriver for ProcessDriver {
    async fn start(&self, job: &Job) -> Result<WorkloadHandle, DriverError> {
        let Some((program, args)) = job.command.split_first() else {
            return Err(DriverError::StartFailed(format!("job {} has no command", job.id)));
        };
        let child = Command::new(program)
            .args(args)
            .envs(&job.env)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DriverError::StartFailed(format!("{program}: {e}")))?;

        let seq = self.next.fetch_add(1, Ordering::SeqCst);
        let pid = child.id().unwrap_or_default();
        let handle = WorkloadHandle::new(format!("proc-{pid}-{seq}"));
        info!(job_id = %job.id, %handle, pid, "process started");
        self.children.lock().await.insert(handle.clone(), child);
        Ok(handle)
    }

    async fn stop(&self, handle: &WorkloadHandle) -> Result<(), DriverError> {
        let Some(mut child) = self.children.lock().await.remove(handle) else {
            debug!(%handle, "stop of unknown process");
            return Ok(());
        };
        // `kill` waits for the process; an already exited child is fine.
        if child
            .try_wait()
            .map_err(|e| DriverError::StopFailed(e.to_string()))?
            .is_none()
        {
            child
                .kill()
                .await
                .map_err(|e| DriverError::StopFailed(e.to_string()))?;
        }
        info!(%handle, "process stopped");
        Ok(())
    }

    async fn status(&self, handle: &WorkloadHandle) -> Result<WorkloadState, DriverError> {
        let mut children = self.children.lock().await;
        let Some(child) = children.get_mut(handle) else {
            return Ok(WorkloadState::Unknown);
        };
        match child
            .try_wait()
            .map_err(|e| DriverError::StatusFailed(e.to_string()))?
        {
            Some(status) => Ok(WorkloadState::Exited {
                code: status.code(),
            }),
            None => Ok(WorkloadState::Running),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn job(command: &[&str]) -> Job {
        Job::builder("proc", "1", "local")
            .command(command.iter().copied())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn start_status_stop() {
        let driver = ProcessDriver::new();
        let handle = driver.start(&job(&["sleep", "30"])).await.unwrap();
        assert_eq!(driver.status(&handle).await.unwrap(), WorkloadState::Running);

        driver.stop(&handle).await.unwrap();
        assert_eq!(driver.status(&handle).await.unwrap(), WorkloadState::Unknown);
        // Idempotent.
        driver.stop(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn exit_is_reported() {
        let driver = ProcessDriver::new();
        let handle = driver.start(&job(&["sh", "-c", "exit 3"])).await.unwrap();

        let mut state = WorkloadState::Running;
        for _ in 0..100 {
            state = driver.status(&handle).await.unwrap();
            if state != WorkloadState::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(state, WorkloadState::Exited { code: Some(3) });
    }

    #[tokio::test]
    async fn missing_command_fails() {
        let driver = ProcessDriver::new();
        assert!(matches!(
            driver.start(&job(&[])).await,
            Err(DriverError::StartFailed(_))
        ));
        assert!(matches!(
            driver.start(&job(&["/nonexistent/binary"])).await,
            Err(DriverError::StartFailed(_))
        ));
    }
}
