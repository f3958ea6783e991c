use crate::config::DriverConfig;
use crate::hal::{
    CapabilitySet, DeviceDescriptor, DeviceSession, DriverAdapter, Range, SampleBlock,
    TaskParameters, TaskType,
};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use rand::Rng;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Runtime-switchable failure injection shared by every instance of a driver
#[derive(Debug)]
pub struct FaultPlan {
    pub fail_initialize: AtomicBool,
    pub fail_enumerate: AtomicBool,
    pub fail_open: AtomicBool,
    /// Reads succeed this many times per session, then fail
    pub fail_read_after: AtomicU64,
    /// Artificial latency added to every read
    pub read_delay_ms: AtomicU64,
    pub init_delay_ms: AtomicU64,
    pub enumerate_delay_ms: AtomicU64,
    /// Reads panic instead of returning an error
    pub panic_on_read: AtomicBool,
    /// Analog reads return values past the configured range
    pub saturate: AtomicBool,
}

impl Default for FaultPlan {
    fn default() -> Self {
        Self {
            fail_initialize: AtomicBool::new(false),
            fail_enumerate: AtomicBool::new(false),
            fail_open: AtomicBool::new(false),
            fail_read_after: AtomicU64::new(u64::MAX),
            read_delay_ms: AtomicU64::new(0),
            init_delay_ms: AtomicU64::new(0),
            enumerate_delay_ms: AtomicU64::new(0),
            panic_on_read: AtomicBool::new(false),
            saturate: AtomicBool::new(false),
        }
    }
}

/// Call counters, observable from tests
#[derive(Debug, Default)]
pub struct SimulatedStats {
    pub initializations: AtomicU64,
    pub shutdowns: AtomicU64,
    pub enumerations: AtomicU64,
    pub opens: AtomicU64,
    pub reads: AtomicU64,
    pub closes: AtomicU64,
}

impl SimulatedStats {
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::SeqCst)
    }
}

/// Driver adapter that fabricates devices and sine-plus-noise samples.
///
/// Cloning shares the fault plan and counters, so a test can keep a handle
/// while the registry builds fresh instances through [`SimulatedDriver::factory`].
#[derive(Clone)]
pub struct SimulatedDriver {
    name: String,
    version: String,
    board_count: u32,
    devices: Vec<DeviceDescriptor>,
    faults: Arc<FaultPlan>,
    stats: Arc<SimulatedStats>,
    initialized: Arc<AtomicBool>,
}

impl SimulatedDriver {
    /// A driver exposing one device with id "1" and model "<name>-SIM"
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let device = Self::default_device(&name, "1");
        Self {
            name,
            version: "1.0.0".to_string(),
            board_count: 1,
            devices: vec![device],
            faults: Arc::new(FaultPlan::default()),
            stats: Arc::new(SimulatedStats::default()),
            initialized: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn default_device(driver: &str, id: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            id: id.to_string(),
            name: format!("{} Simulated Device {}", driver, id),
            model: format!("{}-SIM", driver),
            driver_name: driver.to_string(),
            channel_count: 8,
            sample_rate_range: Range::new(1.0, 1_000_000.0),
            voltage_range: Range::new(-10.0, 10.0),
            capabilities: TaskType::ALL.into_iter().collect(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_board_count(mut self, board_count: u32) -> Self {
        self.board_count = board_count;
        self
    }

    pub fn with_devices(mut self, devices: Vec<DeviceDescriptor>) -> Self {
        self.devices = devices;
        self
    }

    pub fn faults(&self) -> Arc<FaultPlan> {
        Arc::clone(&self.faults)
    }

    pub fn stats(&self) -> Arc<SimulatedStats> {
        Arc::clone(&self.stats)
    }

    /// Factory for [`crate::hal::DriverRegistry::register`]
    pub fn factory(&self) -> impl Fn() -> Box<dyn DriverAdapter> + Send + Sync + 'static {
        let template = self.clone();
        move || {
            let mut instance = template.clone();
            instance.initialized = Arc::new(AtomicBool::new(false));
            Box::new(instance)
        }
    }
}

#[async_trait]
impl DriverAdapter for SimulatedDriver {
    fn driver_id(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn capabilities(&self) -> CapabilitySet {
        self.devices
            .iter()
            .flat_map(|d| d.capabilities.iter().copied())
            .collect()
    }

    fn board_count(&self) -> u32 {
        self.board_count
    }

    async fn initialize(&self, config: &DriverConfig) -> Result<()> {
        let delay = self.faults.init_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.faults.fail_initialize.load(Ordering::SeqCst) {
            bail!("simulated initialization failure");
        }
        self.stats.initializations.fetch_add(1, Ordering::SeqCst);
        self.initialized.store(true, Ordering::SeqCst);
        if config.debug_mode {
            tracing::debug!(driver = %self.name, devices = self.devices.len(), "Simulated driver initialized");
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.stats.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn enumerate(&self) -> Result<Vec<DeviceDescriptor>> {
        if !self.initialized.load(Ordering::SeqCst) {
            bail!("driver {} not initialized", self.name);
        }
        let delay = self.faults.enumerate_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.faults.fail_enumerate.load(Ordering::SeqCst) {
            bail!("simulated enumeration failure");
        }
        self.stats.enumerations.fetch_add(1, Ordering::SeqCst);
        Ok(self.devices.clone())
    }

    async fn open(
        &self,
        device_id: &str,
        task_type: TaskType,
        parameters: &TaskParameters,
    ) -> Result<Box<dyn DeviceSession>> {
        if self.faults.fail_open.load(Ordering::SeqCst) {
            bail!("simulated open failure on device {}", device_id);
        }
        if !self.devices.iter().any(|d| d.id == device_id) {
            return Err(anyhow!("device {} not present", device_id));
        }
        self.stats.opens.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(SimulatedSession {
            task_type,
            channel_count: parameters.channel_count as usize,
            sample_rate: parameters.sample_rate,
            min_range: parameters.min_range,
            max_range: parameters.max_range,
            sequence: 0,
            faults: Arc::clone(&self.faults),
            stats: Arc::clone(&self.stats),
        }))
    }
}

struct SimulatedSession {
    task_type: TaskType,
    channel_count: usize,
    sample_rate: f64,
    min_range: f64,
    max_range: f64,
    sequence: u64,
    faults: Arc<FaultPlan>,
    stats: Arc<SimulatedStats>,
}

impl SimulatedSession {
    fn generate(&self, samples_per_channel: usize) -> Vec<f64> {
        let mut rng = rand::thread_rng();
        let mut data = Vec::with_capacity(samples_per_channel * self.channel_count);
        let start = self.sequence * samples_per_channel as u64;

        for sample in 0..samples_per_channel {
            let t = (start + sample as u64) as f64 / self.sample_rate;
            for ch in 0..self.channel_count {
                let frequency = 5.0 * (ch + 1) as f64;
                let value = if self.task_type.is_digital() {
                    if (2.0 * PI * frequency * t).sin() >= 0.0 { 1.0 } else { 0.0 }
                } else {
                    // Quarter of the range as amplitude, 10% noise
                    let amplitude = (self.max_range - self.min_range) / 4.0;
                    let offset = (self.max_range + self.min_range) / 2.0;
                    let noise = (rng.gen::<f64>() - 0.5) * amplitude * 0.1;
                    offset + amplitude * (2.0 * PI * frequency * t).sin() + noise
                };
                data.push(value);
            }
        }

        data
    }
}

#[async_trait]
impl DeviceSession for SimulatedSession {
    async fn read(&mut self, samples_per_channel: usize) -> Result<SampleBlock> {
        let delay = self.faults.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.sequence >= self.faults.fail_read_after.load(Ordering::SeqCst) {
            bail!("simulated read failure after {} blocks", self.sequence);
        }
        if self.faults.panic_on_read.load(Ordering::SeqCst) {
            panic!("simulated driver crash on block {}", self.sequence);
        }

        let mut data = self.generate(samples_per_channel);
        if self.faults.saturate.load(Ordering::SeqCst) && !self.task_type.is_digital() {
            let rail = self.max_range + (self.max_range - self.min_range);
            data.iter_mut().for_each(|v| *v = rail);
        }
        let block = SampleBlock::new(self.sequence, self.channel_count, data, self.sample_rate);
        self.sequence += 1;
        self.stats.reads.fetch_add(1, Ordering::SeqCst);
        Ok(block)
    }

    async fn close(&mut self) -> Result<()> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> TaskParameters {
        TaskParameters {
            board_index: 0,
            channel_count: 2,
            sample_rate: 1000.0,
            min_range: -10.0,
            max_range: 10.0,
        }
    }

    #[tokio::test]
    async fn test_enumerate_requires_initialize() {
        let driver = SimulatedDriver::new("X");
        assert!(driver.enumerate().await.is_err());

        driver.initialize(&DriverConfig::default()).await.unwrap();
        let devices = driver.enumerate().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "1");
        assert!(devices[0].model.contains('X'));
    }

    #[tokio::test]
    async fn test_session_samples_stay_in_range() {
        let driver = SimulatedDriver::new("X");
        let mut session = driver.open("1", TaskType::AnalogIn, &params()).await.unwrap();

        let block = session.read(100).await.unwrap();
        assert_eq!(block.channel_count, 2);
        assert_eq!(block.samples_per_channel, 100);
        assert!(block.data.iter().all(|v| (-10.0..=10.0).contains(v)));

        let next = session.read(100).await.unwrap();
        assert_eq!(next.sequence, 1);
        assert_eq!(next.timestamp_us, 100_000);
    }

    #[tokio::test]
    async fn test_digital_samples_are_binary() {
        let driver = SimulatedDriver::new("X");
        let mut session = driver.open("1", TaskType::DigitalIn, &params()).await.unwrap();
        let block = session.read(50).await.unwrap();
        assert!(block.data.iter().all(|v| *v == 0.0 || *v == 1.0));
    }

    #[tokio::test]
    async fn test_read_fault_injection() {
        let driver = SimulatedDriver::new("X");
        driver.faults().fail_read_after.store(1, Ordering::SeqCst);

        let mut session = driver.open("1", TaskType::AnalogIn, &params()).await.unwrap();
        assert!(session.read(10).await.is_ok());
        assert!(session.read(10).await.is_err());
    }

    #[tokio::test]
    async fn test_saturated_samples_leave_range() {
        let driver = SimulatedDriver::new("X");
        driver.faults().saturate.store(true, Ordering::SeqCst);

        let mut session = driver.open("1", TaskType::AnalogIn, &params()).await.unwrap();
        let block = session.read(10).await.unwrap();
        assert!(block.data.iter().all(|v| *v > 10.0));
    }
}
