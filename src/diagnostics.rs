//! Short hardware self-test of one device.
//!
//! The test opens a session, reads a single block, checks the samples
//! against what the device advertises, and closes the session again. A
//! failing step is reported as a failed check inside the report rather than
//! as an error, so the caller always learns how far the device got.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

use crate::hal::{DeviceDescriptor, DriverAdapter, Range, SampleBlock, TaskParameters, TaskType};

/// Samples per channel read by the self-test
const TEST_BLOCK_SAMPLES: usize = 64;
/// Preferred sample rate, pulled into the device's range when needed
const TEST_SAMPLE_RATE: f64 = 1000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCheck {
    /// One of "open", "read", "range", "close"
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTestReport {
    pub driver_name: String,
    pub device_id: String,
    pub device_name: String,
    pub task_type: Option<TaskType>,
    pub passed: bool,
    pub checks: Vec<DeviceCheck>,
    /// Unix milliseconds
    pub tested_at_ms: u64,
}

impl DeviceTestReport {
    pub fn check(&self, name: &str) -> Option<&DeviceCheck> {
        self.checks.iter().find(|c| c.name == name)
    }
}

/// Task type exercised by the self-test: analog input when available
pub fn test_task_type(device: &DeviceDescriptor) -> Option<TaskType> {
    if device.supports(TaskType::AnalogIn) {
        Some(TaskType::AnalogIn)
    } else {
        device.capabilities.iter().next().copied()
    }
}

/// Run the self-test against `device`, bounding every driver call by `step_timeout`
pub async fn test_device(
    adapter: Arc<dyn DriverAdapter>,
    device: &DeviceDescriptor,
    step_timeout: Duration,
) -> DeviceTestReport {
    let task_type = test_task_type(device);
    let mut report = DeviceTestReport {
        driver_name: device.driver_name.clone(),
        device_id: device.id.clone(),
        device_name: device.name.clone(),
        task_type,
        passed: false,
        checks: Vec::new(),
        tested_at_ms: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default(),
    };

    let Some(task_type) = task_type else {
        record(&mut report, "open", Instant::now(), Err("device advertises no task types".into()));
        return finish(report);
    };

    let parameters = TaskParameters {
        board_index: 0,
        channel_count: device.channel_count.max(1),
        sample_rate: TEST_SAMPLE_RATE
            .max(device.sample_rate_range.min)
            .min(device.sample_rate_range.max),
        min_range: device.voltage_range.min,
        max_range: device.voltage_range.max,
    };

    let started = Instant::now();
    let opened = bounded(step_timeout, adapter.open(&device.id, task_type, &parameters)).await;
    let mut session = match opened {
        Ok(session) => {
            record(&mut report, "open", started, Ok(format!("{task_type} session opened")));
            session
        }
        Err(message) => {
            record(&mut report, "open", started, Err(message));
            return finish(report);
        }
    };

    let started = Instant::now();
    match bounded(step_timeout, session.read(TEST_BLOCK_SAMPLES)).await {
        Ok(block) => {
            let summary = format!(
                "{} samples on {} channels",
                block.samples_per_channel, block.channel_count
            );
            record(&mut report, "read", started, Ok(summary));

            let started = Instant::now();
            let checked = check_samples(&block, task_type, &device.voltage_range);
            record(&mut report, "range", started, checked);
        }
        Err(message) => record(&mut report, "read", started, Err(message)),
    }

    let started = Instant::now();
    let closed = bounded(step_timeout, session.close())
        .await
        .map(|()| "session closed".to_string());
    record(&mut report, "close", started, closed);

    finish(report)
}

/// Verify every sample is plausible for the task type
fn check_samples(block: &SampleBlock, task_type: TaskType, range: &Range) -> Result<String, String> {
    if block.data.is_empty() {
        return Err("driver returned an empty block".into());
    }

    if task_type.is_digital() {
        let bad = block.data.iter().filter(|v| **v != 0.0 && **v != 1.0).count();
        return if bad == 0 {
            Ok("all samples are logic levels".into())
        } else {
            Err(format!("{bad} of {} samples are not 0 or 1", block.data.len()))
        };
    }

    let bad = block
        .data
        .iter()
        .filter(|v| !v.is_finite() || !range.contains(**v))
        .count();
    if bad > 0 {
        return Err(format!(
            "{bad} of {} samples outside {range} V",
            block.data.len()
        ));
    }

    let lo = block.data.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = block.data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Ok(format!("samples span {lo:.3} V to {hi:.3} V within {range} V"))
}

async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = anyhow::Result<T>>,
) -> Result<T, String> {
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(_) => Err(format!("timed out after {} ms", limit.as_millis())),
    }
}

fn record(report: &mut DeviceTestReport, name: &str, started: Instant, outcome: Result<String, String>) {
    let (passed, message) = match outcome {
        Ok(message) => (true, message),
        Err(message) => {
            warn!(
                driver = %report.driver_name,
                device = %report.device_id,
                check = name,
                %message,
                "Device check failed"
            );
            (false, message)
        }
    };
    report.checks.push(DeviceCheck {
        name: name.to_string(),
        passed,
        message,
        duration_ms: started.elapsed().as_millis() as u64,
    });
}

fn finish(mut report: DeviceTestReport) -> DeviceTestReport {
    report.passed = !report.checks.is_empty() && report.checks.iter().all(|c| c.passed);
    info!(
        driver = %report.driver_name,
        device = %report.device_id,
        passed = report.passed,
        "Device self-test finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::{SimulatedDriver, SimulatedStats};
    use std::sync::atomic::Ordering;

    fn names(report: &DeviceTestReport) -> Vec<&str> {
        report.checks.iter().map(|c| c.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_hanging_read_is_bounded_and_session_closed() {
        let driver = SimulatedDriver::new("X");
        driver.faults().read_delay_ms.store(5_000, Ordering::SeqCst);
        let stats = driver.stats();
        let device = SimulatedDriver::default_device("X", "1");

        let report = test_device(Arc::new(driver), &device, Duration::from_millis(50)).await;

        assert!(!report.passed);
        assert_eq!(names(&report), vec!["open", "read", "close"]);
        assert!(report.check("read").unwrap().message.contains("timed out"));
        assert!(report.check("close").unwrap().passed);
        assert_eq!(SimulatedStats::get(&stats.closes), 1);
    }

    #[tokio::test]
    async fn test_digital_only_device_checks_logic_levels() {
        let mut device = SimulatedDriver::default_device("X", "1");
        device.capabilities = [TaskType::DigitalIn].into_iter().collect();
        let driver = SimulatedDriver::new("X").with_devices(vec![device.clone()]);

        let report = test_device(Arc::new(driver), &device, Duration::from_secs(1)).await;

        assert!(report.passed, "{report:?}");
        assert_eq!(report.task_type, Some(TaskType::DigitalIn));
        assert!(report.check("range").unwrap().message.contains("logic levels"));
    }

    #[tokio::test]
    async fn test_device_without_capabilities_fails() {
        let mut device = SimulatedDriver::default_device("X", "1");
        device.capabilities.clear();
        let driver = SimulatedDriver::new("X");

        let report = test_device(Arc::new(driver), &device, Duration::from_secs(1)).await;
        assert!(!report.passed);
        assert_eq!(report.task_type, None);
        assert_eq!(names(&report), vec!["open"]);
    }

    #[test]
    fn test_sample_check_counts_out_of_range_values() {
        let range = Range::new(-1.0, 1.0);
        let block = SampleBlock::new(0, 2, vec![0.5, -0.5, 2.0, f64::NAN], 1000.0);
        let message = check_samples(&block, TaskType::AnalogIn, &range).unwrap_err();
        assert!(message.starts_with("2 of 4"));

        let block = SampleBlock::new(0, 1, vec![-1.0, 1.0], 1000.0);
        assert!(check_samples(&block, TaskType::AnalogIn, &range).is_ok());
    }
}
