use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::buffer::{BufferStatus, SampleBuffer};
use super::state::TaskState;
use super::worker::{samples_per_read, SamplingWorker, WorkerConfig};
use super::TaskId;
use crate::config::TaskDefaults;
use crate::discovery::DeviceEnumerator;
use crate::error::{DaqError, DaqResult};
use crate::hal::{DeviceDescriptor, DriverLease, DriverRegistry, SampleBlock, TaskParameters, TaskType};
use crate::validation::ParameterValidator;

const UNEXPECTED_EXIT: &str = "sampling worker terminated unexpectedly";

/// Snapshot of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub id: TaskId,
    pub task_type: TaskType,
    pub driver_name: String,
    pub device: DeviceDescriptor,
    pub parameters: TaskParameters,
    pub state: TaskState,
    pub last_error: Option<String>,
    pub buffer: Option<BufferStatus>,
    /// Creation time in Unix milliseconds
    pub created_at_ms: u64,
}

struct TaskEntry {
    id: TaskId,
    task_type: TaskType,
    driver_name: String,
    device: DeviceDescriptor,
    parameters: TaskParameters,
    created_at_ms: u64,
    inner: tokio::sync::Mutex<TaskInner>,
}

struct TaskInner {
    state: TaskState,
    lease: Option<DriverLease>,
    buffer: Option<Arc<SampleBuffer>>,
    worker: Option<SamplingWorker>,
    last_error: Option<String>,
}

impl TaskInner {
    fn transition(&mut self, id: TaskId, target: TaskState, operation: &'static str) -> DaqResult<()> {
        if !self.state.can_transition_to(target) {
            return Err(DaqError::InvalidState {
                task: id,
                state: self.state,
                operation,
            });
        }
        debug!(task = %id, from = %self.state, to = %target, "Task state transition");
        self.state = target;
        if !target.holds_driver() {
            self.lease = None;
        }
        Ok(())
    }

    /// Surface a fault recorded by the worker, or a worker that exited
    /// without being asked to, as `Failed`
    fn reconcile(&mut self, id: TaskId) {
        if self.state != TaskState::Running {
            return;
        }
        let Some(worker) = self.worker.as_ref() else {
            return;
        };
        let fault = match worker.shared().fault() {
            Some(fault) => fault,
            None if worker.is_finished() && !worker.shared().is_cancelled() => {
                UNEXPECTED_EXIT.to_string()
            }
            None => return,
        };
        warn!(task = %id, error = %fault, "Task failed");
        self.state = TaskState::Failed;
        self.last_error = Some(fault);
    }
}

impl TaskEntry {
    fn status(&self, inner: &TaskInner) -> TaskStatus {
        TaskStatus {
            id: self.id,
            task_type: self.task_type,
            driver_name: self.driver_name.clone(),
            device: self.device.clone(),
            parameters: self.parameters,
            state: inner.state,
            last_error: inner.last_error.clone(),
            buffer: inner.buffer.as_ref().map(|b| b.status()),
            created_at_ms: self.created_at_ms,
        }
    }
}

/// Owns every acquisition task and drives its lifecycle
pub struct TaskManager {
    registry: Arc<DriverRegistry>,
    enumerator: Arc<DeviceEnumerator>,
    defaults: TaskDefaults,
    tasks: RwLock<HashMap<TaskId, Arc<TaskEntry>>>,
    retired: Mutex<HashSet<TaskId>>,
}

impl TaskManager {
    pub fn new(
        registry: Arc<DriverRegistry>,
        enumerator: Arc<DeviceEnumerator>,
        defaults: TaskDefaults,
    ) -> Self {
        Self {
            registry,
            enumerator,
            defaults,
            tasks: RwLock::new(HashMap::new()),
            retired: Mutex::new(HashSet::new()),
        }
    }

    /// Validate a request against the device and allocate a Configured task.
    ///
    /// Touches no hardware beyond the driver's device query.
    pub async fn create_task(
        &self,
        driver_name: &str,
        task_type: TaskType,
        device_id: &str,
        parameters: TaskParameters,
    ) -> DaqResult<TaskId> {
        let lease = self.registry.acquire(driver_name).await?;

        let device = self.enumerator.find_device(driver_name, device_id).await?;
        if !device.supports(task_type) {
            return Err(DaqError::UnsupportedTaskType {
                device: device.id.clone(),
                task_type: task_type.to_string(),
            });
        }

        ParameterValidator::validate(&parameters, &device, lease.board_count())?;
        ParameterValidator::validate_footprint(
            &parameters,
            samples_per_read(parameters.sample_rate, self.defaults.read_interval()),
            self.defaults.buffer_capacity,
            self.defaults.max_buffer_bytes,
        )?;

        let buffer = SampleBuffer::new(self.defaults.buffer_capacity, self.defaults.backpressure);
        let mut inner = TaskInner {
            state: TaskState::Created,
            lease: Some(lease),
            buffer: Some(Arc::new(buffer)),
            worker: None,
            last_error: None,
        };

        let id = {
            let mut tasks = self.tasks.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            let id = loop {
                let candidate = Uuid::new_v4();
                if !tasks.contains_key(&candidate) && !self.is_retired(candidate) {
                    break candidate;
                }
            };
            inner.transition(id, TaskState::Configured, "configure")?;

            let entry = TaskEntry {
                id,
                task_type,
                driver_name: driver_name.to_string(),
                device,
                parameters,
                created_at_ms: unix_millis(),
                inner: tokio::sync::Mutex::new(inner),
            };
            tasks.insert(id, Arc::new(entry));
            id
        };

        info!(
            task = %id,
            driver = %driver_name,
            device = %device_id,
            task_type = %task_type,
            channels = parameters.channel_count,
            sample_rate = parameters.sample_rate,
            "Task created"
        );
        Ok(id)
    }

    /// Spawn the sampling worker
    pub async fn start_task(&self, id: TaskId) -> DaqResult<()> {
        let entry = self.entry(id)?;
        let mut inner = entry.inner.lock().await;
        inner.reconcile(id);

        if inner.state != TaskState::Configured {
            return Err(DaqError::InvalidState {
                task: id,
                state: inner.state,
                operation: "start",
            });
        }
        let (Some(lease), Some(buffer)) = (inner.lease.as_ref(), inner.buffer.as_ref()) else {
            return Err(DaqError::InvalidState {
                task: id,
                state: inner.state,
                operation: "start",
            });
        };

        let config = WorkerConfig {
            task_id: id,
            device_id: entry.device.id.clone(),
            task_type: entry.task_type,
            parameters: entry.parameters,
            read_interval: self.defaults.read_interval(),
        };
        let worker = SamplingWorker::spawn(lease.adapter().clone(), config, Arc::clone(buffer));

        inner.transition(id, TaskState::Running, "start")?;
        inner.worker = Some(worker);
        info!(task = %id, "Task started");
        Ok(())
    }

    /// Cooperatively stop a running task, or clean up a failed one
    pub async fn stop_task(&self, id: TaskId) -> DaqResult<()> {
        let entry = self.entry(id)?;
        let mut inner = entry.inner.lock().await;
        inner.reconcile(id);

        match inner.state {
            TaskState::Running => {
                let grace = self.defaults.shutdown_grace();
                let outcome = match inner.worker.as_mut() {
                    Some(worker) => worker.stop(grace).await,
                    None => Ok(()),
                };

                match outcome {
                    Ok(()) => {
                        if let Some(worker) = inner.worker.take() {
                            if let Some(fault) = worker.shared().fault() {
                                inner.last_error = Some(fault);
                            }
                        }
                        inner.transition(id, TaskState::Stopped, "stop")?;
                        info!(task = %id, "Task stopped");
                        Ok(())
                    }
                    Err(waited) => {
                        let waited_ms = waited.as_millis() as u64;
                        inner.transition(id, TaskState::Failed, "stop")?;
                        inner.last_error =
                            Some(format!("worker did not acknowledge shutdown within {waited_ms} ms"));
                        warn!(task = %id, waited_ms, "Task shutdown timed out");
                        Err(DaqError::ShutdownTimeout { task: id, waited_ms })
                    }
                }
            }
            TaskState::Failed => {
                if let Some(worker) = inner.worker.take() {
                    worker.abort();
                }
                inner.transition(id, TaskState::Stopped, "stop")?;
                info!(task = %id, "Failed task cleaned up");
                Ok(())
            }
            state => Err(DaqError::InvalidState {
                task: id,
                state,
                operation: "stop",
            }),
        }
    }

    /// Retire a task that is not running
    pub async fn delete_task(&self, id: TaskId) -> DaqResult<()> {
        let entry = match self.entry(id) {
            Ok(entry) => entry,
            Err(e) if self.is_retired(id) => {
                debug!(task = %id, error = %e, "Delete of retired task");
                return Err(DaqError::InvalidState {
                    task: id,
                    state: TaskState::Deleted,
                    operation: "delete",
                });
            }
            Err(e) => return Err(e),
        };

        let mut inner = entry.inner.lock().await;
        inner.reconcile(id);
        inner.transition(id, TaskState::Deleted, "delete")?;
        if let Some(worker) = inner.worker.take() {
            worker.abort();
        }
        inner.buffer = None;
        drop(inner);

        self.retired
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id);
        self.tasks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&id);

        info!(task = %id, "Task deleted");
        Ok(())
    }

    pub async fn task_status(&self, id: TaskId) -> DaqResult<TaskStatus> {
        let entry = self.entry(id)?;
        let mut inner = entry.inner.lock().await;
        inner.reconcile(id);
        Ok(entry.status(&inner))
    }

    /// Drain up to `max_blocks` blocks, oldest first
    pub async fn read_samples(&self, id: TaskId, max_blocks: usize) -> DaqResult<Vec<SampleBlock>> {
        let entry = self.entry(id)?;
        let mut inner = entry.inner.lock().await;
        inner.reconcile(id);

        match (inner.state, inner.buffer.as_ref()) {
            (TaskState::Running | TaskState::Stopped | TaskState::Failed, Some(buffer)) => {
                Ok(buffer.drain(max_blocks))
            }
            (state, _) => Err(DaqError::InvalidState {
                task: id,
                state,
                operation: "read",
            }),
        }
    }

    /// Every live task, oldest first
    pub async fn list_tasks(&self) -> Vec<TaskStatus> {
        let mut statuses = Vec::new();
        for entry in self.entries() {
            let mut inner = entry.inner.lock().await;
            inner.reconcile(entry.id);
            statuses.push(entry.status(&inner));
        }
        statuses.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms).then(a.id.cmp(&b.id)));
        statuses
    }

    /// Tasks currently in `Running`
    pub async fn active_task_count(&self) -> usize {
        let mut count = 0;
        for entry in self.entries() {
            let mut inner = entry.inner.lock().await;
            inner.reconcile(entry.id);
            if inner.state == TaskState::Running {
                count += 1;
            }
        }
        count
    }

    /// A running task sampling `device_id` on `driver_name`, if any
    pub async fn running_task_on(&self, driver_name: &str, device_id: &str) -> Option<TaskId> {
        for entry in self.entries() {
            if entry.driver_name != driver_name || entry.device.id != device_id {
                continue;
            }
            let mut inner = entry.inner.lock().await;
            inner.reconcile(entry.id);
            if inner.state == TaskState::Running {
                return Some(entry.id);
            }
        }
        None
    }

    pub fn task_count(&self) -> usize {
        self.tasks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Stop every running task, then delete every task
    pub async fn shutdown(&self) {
        let ids: Vec<TaskId> = self.entries().iter().map(|e| e.id).collect();
        if ids.is_empty() {
            return;
        }
        info!(tasks = ids.len(), "Shutting down tasks");

        for &id in &ids {
            match self.stop_task(id).await {
                Ok(()) | Err(DaqError::InvalidState { .. }) | Err(DaqError::TaskNotFound(_)) => {}
                Err(e) => warn!(task = %id, error = %e, "Failed to stop task during shutdown"),
            }
        }
        for &id in &ids {
            if let Err(e) = self.delete_task(id).await {
                warn!(task = %id, error = %e, "Failed to delete task during shutdown");
            }
        }
    }

    fn entry(&self, id: TaskId) -> DaqResult<Arc<TaskEntry>> {
        self.tasks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&id)
            .cloned()
            .ok_or(DaqError::TaskNotFound(id))
    }

    fn entries(&self) -> Vec<Arc<TaskEntry>> {
        self.tasks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect()
    }

    fn is_retired(&self, id: TaskId) -> bool {
        self.retired
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&id)
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
