use async_trait::async_trait;
use anyhow::Result;

use super::types::{CapabilitySet, DeviceDescriptor, SampleBlock, TaskParameters, TaskType};
use crate::config::DriverConfig;

/// Capability provider for one vendor's hardware family.
///
/// The registry owns the adapter once it is loaded; everything else only
/// borrows it for the duration of a call.
#[async_trait]
pub trait DriverAdapter: Send + Sync {
    /// Unique driver identifier (e.g., "JY5500", "MockDriver")
    fn driver_id(&self) -> &str;

    fn version(&self) -> &str;

    /// Task types this driver family can run
    fn capabilities(&self) -> CapabilitySet;

    /// Number of boards addressable through this driver
    fn board_count(&self) -> u32 {
        1
    }

    /// Bring up the native side. Called once per load.
    async fn initialize(&self, config: &DriverConfig) -> Result<()>;

    /// Release the native side. Called once per unload.
    async fn shutdown(&self) -> Result<()>;

    /// Enumerate connected devices (empty when no hardware is attached)
    async fn enumerate(&self) -> Result<Vec<DeviceDescriptor>>;

    /// Open a sampling session on one device
    async fn open(
        &self,
        device_id: &str,
        task_type: TaskType,
        parameters: &TaskParameters,
    ) -> Result<Box<dyn DeviceSession>>;
}

/// An open device session, owned by exactly one sampling worker
#[async_trait]
pub trait DeviceSession: Send {
    /// Read one block of `samples_per_channel` samples for every channel.
    ///
    /// Output tasks return the values written to the outputs.
    async fn read(&mut self, samples_per_channel: usize) -> Result<SampleBlock>;

    async fn close(&mut self) -> Result<()>;
}
