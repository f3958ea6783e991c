use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info_span, warn, Instrument};

use super::buffer::SampleBuffer;
use super::TaskId;
use crate::hal::{AdapterRef, TaskParameters, TaskType};

/// How often a worker blocked on a full buffer re-checks for cancellation
const BACKPRESSURE_POLL: Duration = Duration::from_millis(10);

/// State shared between a task and its sampling worker
#[derive(Debug, Default)]
pub(crate) struct WorkerShared {
    cancel: AtomicBool,
    fault: Mutex<Option<String>>,
}

impl WorkerShared {
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// First recorded fault wins
    pub fn record_fault(&self, message: String) {
        let mut fault = self.fault.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if fault.is_none() {
            *fault = Some(message);
        }
    }

    pub fn fault(&self) -> Option<String> {
        self.fault
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

pub(crate) struct WorkerConfig {
    pub task_id: TaskId,
    pub device_id: String,
    pub task_type: TaskType,
    pub parameters: TaskParameters,
    pub read_interval: Duration,
}

/// Samples per channel fetched on each tick
pub(crate) fn samples_per_read(sample_rate: f64, read_interval: Duration) -> usize {
    let samples = (sample_rate * read_interval.as_secs_f64()).ceil();
    if samples.is_finite() && samples >= 1.0 {
        samples as usize
    } else {
        1
    }
}

/// Background loop that moves sample blocks from a device session into a
/// task's buffer
pub(crate) struct SamplingWorker {
    handle: JoinHandle<()>,
    shared: Arc<WorkerShared>,
    read_interval: Duration,
}

impl SamplingWorker {
    pub fn spawn(adapter: AdapterRef, config: WorkerConfig, buffer: Arc<SampleBuffer>) -> Self {
        let shared = Arc::new(WorkerShared::default());
        let read_interval = config.read_interval;
        let span = info_span!("sampling", task = %config.task_id, driver = %adapter.driver_name());
        let handle = tokio::spawn(
            run(adapter, config, buffer, Arc::clone(&shared)).instrument(span),
        );

        Self {
            handle,
            shared,
            read_interval,
        }
    }

    pub fn shared(&self) -> &WorkerShared {
        &self.shared
    }

    /// True once the loop has exited, whether cleanly, by fault, or by panic
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal cancellation and wait for the loop to exit.
    ///
    /// Gives up after one read interval plus `grace`; the worker keeps
    /// running in that case and the caller decides whether to abort it.
    pub async fn stop(&mut self, grace: Duration) -> Result<(), Duration> {
        self.shared.request_cancel();
        let budget = self.read_interval + grace;
        match tokio::time::timeout(budget, &mut self.handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                // Panicked or aborted; either way it is gone
                self.shared.record_fault(format!("sampling worker terminated: {e}"));
                Ok(())
            }
            Err(_) => Err(budget),
        }
    }

    pub fn abort(self) {
        self.shared.request_cancel();
        self.handle.abort();
    }
}

impl Drop for SamplingWorker {
    fn drop(&mut self) {
        self.shared.request_cancel();
    }
}

async fn run(
    adapter: AdapterRef,
    config: WorkerConfig,
    buffer: Arc<SampleBuffer>,
    shared: Arc<WorkerShared>,
) {
    let opened = match adapter.get() {
        Ok(driver) => {
            driver
                .open(&config.device_id, config.task_type, &config.parameters)
                .await
        }
        Err(e) => {
            shared.record_fault(e.to_string());
            return;
        }
    };
    let mut session = match opened {
        Ok(session) => session,
        Err(e) => {
            error!(device = %config.device_id, error = %format!("{e:#}"), "Failed to open device session");
            shared.record_fault(format!("open failed: {e:#}"));
            return;
        }
    };

    let chunk = samples_per_read(config.parameters.sample_rate, config.read_interval);
    debug!(device = %config.device_id, samples_per_read = chunk, "Sampling started");

    let mut ticker = tokio::time::interval(config.read_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if shared.is_cancelled() {
            break;
        }

        match session.read(chunk).await {
            Ok(block) => {
                if !buffer.push(block, &shared.cancel, BACKPRESSURE_POLL).await {
                    break;
                }
            }
            Err(e) => {
                error!(error = %format!("{e:#}"), "Hardware read failed");
                shared.record_fault(format!("read failed: {e:#}"));
                break;
            }
        }
    }

    if let Err(e) = session.close().await {
        warn!(error = %format!("{e:#}"), "Failed to close device session");
        shared.record_fault(format!("close failed: {e:#}"));
    }
    debug!("Sampling stopped");
}
