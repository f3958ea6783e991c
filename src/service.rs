//! Transport-agnostic façade over the registry, discovery and task manager.
//!
//! Request and response types use camelCase field names so they can be
//! (de)serialized straight from an HTTP or IPC layer. Lifecycle commands
//! answer with an [`OperationResponse`] instead of an error; queries return
//! [`DaqResult`] so the caller can map [`crate::error::ErrorKind`] to a status.

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

use crate::config::ServiceConfig;
use crate::diagnostics::{self, DeviceTestReport};
use crate::discovery::{DeviceEnumerator, DiscoveryFailure};
use crate::error::{DaqError, DaqResult};
use crate::hal::{CapabilitySet, DriverDescriptor, DriverRegistry, SampleBlock, TaskParameters, TaskType};
use crate::task::{TaskId, TaskManager, TaskStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadDriverRequest {
    pub driver_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResponse {
    pub success: bool,
    pub message: String,
}

impl OperationResponse {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub driver_name: String,
    pub task_type: TaskType,
    /// Accepts a JSON string or number
    #[serde(deserialize_with = "device_id_from_json")]
    pub device_id: String,
    pub parameters: TaskParameters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    pub id: String,
    pub name: String,
    pub model: String,
    pub driver_name: String,
    pub capabilities: CapabilitySet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub loaded_driver_count: usize,
    pub device_count: usize,
    pub active_task_count: usize,
    pub drivers: Vec<DriverDescriptor>,
    pub discovery_errors: Vec<DiscoveryFailure>,
    /// Unix milliseconds
    pub last_updated: u64,
}

fn device_id_from_json<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(id) => Ok(id),
        Value::Number(id) => Ok(id.to_string()),
        other => Err(de::Error::custom(format!(
            "deviceId must be a string or number, got {other}"
        ))),
    }
}

pub struct DaqService {
    config: ServiceConfig,
    registry: Arc<DriverRegistry>,
    enumerator: Arc<DeviceEnumerator>,
    tasks: TaskManager,
}

impl DaqService {
    /// Wire a service around a registry whose adapters are already registered
    pub fn new(config: ServiceConfig, registry: DriverRegistry) -> Self {
        let registry = Arc::new(registry.with_config(config.drivers.clone()));
        let enumerator = Arc::new(DeviceEnumerator::new(
            Arc::clone(&registry),
            config.discovery_timeout(),
        ));
        let tasks = TaskManager::new(
            Arc::clone(&registry),
            Arc::clone(&enumerator),
            config.tasks.clone(),
        );

        Self {
            config,
            registry,
            enumerator,
            tasks,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DriverRegistry> {
        &self.registry
    }

    pub fn task_manager(&self) -> &TaskManager {
        &self.tasks
    }

    /// Load every configured driver when auto-loading is enabled.
    ///
    /// Individual failures are logged; returns the number of loaded drivers.
    pub async fn initialize(&self) -> usize {
        if self.config.auto_load_drivers {
            let mut names: Vec<&String> = self.config.drivers.keys().collect();
            names.sort();
            for name in names {
                if let Err(e) = self.registry.load_driver(name).await {
                    warn!(driver = %name, error = %e, "Auto-load failed");
                }
            }
        }

        let loaded = self.registry.loaded_drivers().len();
        info!(loaded, "Service initialized");
        loaded
    }

    /// Stop and delete every task, then unload every driver
    pub async fn shutdown(&self) {
        self.tasks.shutdown().await;
        for e in self.registry.unload_all().await {
            warn!(error = %e, "Driver unload failed during shutdown");
        }
        info!("Service shut down");
    }

    pub fn health(&self) -> bool {
        true
    }

    /// Names of all registered drivers
    pub fn list_drivers(&self) -> Vec<String> {
        self.registry
            .list_drivers()
            .into_iter()
            .map(|d| d.name)
            .collect()
    }

    pub fn driver_info(&self, driver_name: &str) -> DaqResult<DriverDescriptor> {
        self.registry.descriptor(driver_name)
    }

    pub async fn list_devices(&self) -> Vec<DeviceSummary> {
        self.enumerator
            .discover_devices()
            .await
            .devices
            .into_iter()
            .map(|d| DeviceSummary {
                id: d.id,
                name: d.name,
                model: d.model,
                driver_name: d.driver_name,
                capabilities: d.capabilities,
            })
            .collect()
    }

    /// Open, read and close one device to check it responds.
    ///
    /// Refused while a running task samples the device. The driver is
    /// pinned for the duration of the test.
    pub async fn test_device(&self, driver_name: &str, device_id: &str) -> DaqResult<DeviceTestReport> {
        let lease = self.registry.acquire(driver_name).await?;
        let device = self.enumerator.find_device(driver_name, device_id).await?;
        if let Some(task) = self.tasks.running_task_on(driver_name, device_id).await {
            return Err(DaqError::DeviceBusy {
                driver: driver_name.to_string(),
                device: device_id.to_string(),
                task,
            });
        }

        let adapter = lease.adapter().get()?;
        info!(driver = %driver_name, device = %device_id, "Starting device self-test");
        Ok(diagnostics::test_device(adapter, &device, self.config.discovery_timeout()).await)
    }

    pub async fn load_driver(&self, request: LoadDriverRequest) -> OperationResponse {
        match self.registry.load_driver(&request.driver_name).await {
            Ok(descriptor) => OperationResponse::ok(format!(
                "Driver {} {} loaded",
                descriptor.name, descriptor.version
            )),
            Err(e) => OperationResponse::failed(e.to_string()),
        }
    }

    pub async fn unload_driver(&self, request: LoadDriverRequest) -> OperationResponse {
        match self.registry.unload_driver(&request.driver_name).await {
            Ok(()) => OperationResponse::ok(format!("Driver {} unloaded", request.driver_name)),
            Err(e) => OperationResponse::failed(e.to_string()),
        }
    }

    /// Unload then load again; refused while tasks hold the driver
    pub async fn reload_driver(&self, request: LoadDriverRequest) -> OperationResponse {
        if let Err(e) = self.registry.unload_driver(&request.driver_name).await {
            return OperationResponse::failed(e.to_string());
        }
        match self.registry.load_driver(&request.driver_name).await {
            Ok(_) => OperationResponse::ok(format!("Driver {} reloaded", request.driver_name)),
            Err(e) => OperationResponse::failed(e.to_string()),
        }
    }

    pub async fn create_task(&self, request: CreateTaskRequest) -> CreateTaskResponse {
        let result = self
            .tasks
            .create_task(
                &request.driver_name,
                request.task_type,
                &request.device_id,
                request.parameters,
            )
            .await;

        match result {
            Ok(id) => CreateTaskResponse {
                success: true,
                message: format!("Task {id} created"),
                task_id: Some(id),
            },
            Err(e) => CreateTaskResponse {
                success: false,
                message: e.to_string(),
                task_id: None,
            },
        }
    }

    pub async fn start_task(&self, id: TaskId) -> OperationResponse {
        match self.tasks.start_task(id).await {
            Ok(()) => OperationResponse::ok(format!("Task {id} started")),
            Err(e) => OperationResponse::failed(e.to_string()),
        }
    }

    pub async fn stop_task(&self, id: TaskId) -> OperationResponse {
        match self.tasks.stop_task(id).await {
            Ok(()) => OperationResponse::ok(format!("Task {id} stopped")),
            Err(e) => OperationResponse::failed(e.to_string()),
        }
    }

    pub async fn delete_task(&self, id: TaskId) -> OperationResponse {
        match self.tasks.delete_task(id).await {
            Ok(()) => OperationResponse::ok(format!("Task {id} deleted")),
            Err(e) => OperationResponse::failed(e.to_string()),
        }
    }

    pub async fn task_status(&self, id: TaskId) -> DaqResult<TaskStatus> {
        self.tasks.task_status(id).await
    }

    pub async fn read_samples(&self, id: TaskId, max_blocks: usize) -> DaqResult<Vec<SampleBlock>> {
        self.tasks.read_samples(id, max_blocks).await
    }

    pub async fn list_tasks(&self) -> Vec<TaskStatus> {
        self.tasks.list_tasks().await
    }

    pub async fn status(&self) -> ServiceStatus {
        let report = self.enumerator.discover_devices().await;
        let drivers: Vec<DriverDescriptor> = self
            .registry
            .list_drivers()
            .into_iter()
            .filter(|d| self.registry.is_loaded(&d.name))
            .collect();

        ServiceStatus {
            loaded_driver_count: drivers.len(),
            device_count: report.devices.len(),
            active_task_count: self.tasks.active_task_count().await,
            drivers,
            discovery_errors: report.errors,
            last_updated: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
        }
    }
}
