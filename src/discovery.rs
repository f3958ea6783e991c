//! On-demand device discovery across every loaded driver.
//!
//! Nothing is cached: each call queries the drivers again. A driver whose
//! query fails or times out is reported next to the devices of the others,
//! so one broken adapter never hides the rest.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{DaqError, DaqResult};
use crate::hal::{AdapterRef, DeviceDescriptor, DriverRegistry};

/// A driver whose device query failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryFailure {
    pub driver_name: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryReport {
    /// Sorted by driver name, then device id (numeric ids by value)
    pub devices: Vec<DeviceDescriptor>,
    pub errors: Vec<DiscoveryFailure>,
}

impl DiscoveryReport {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct DeviceEnumerator {
    registry: Arc<DriverRegistry>,
    query_timeout: Duration,
}

impl DeviceEnumerator {
    pub fn new(registry: Arc<DriverRegistry>, query_timeout: Duration) -> Self {
        Self {
            registry,
            query_timeout,
        }
    }

    /// Query every loaded driver concurrently and merge the results
    pub async fn discover_devices(&self) -> DiscoveryReport {
        let adapters = self.registry.loaded_adapters();
        if adapters.is_empty() {
            debug!("No drivers loaded, nothing to discover");
            return DiscoveryReport::default();
        }

        let query_timeout = self.query_timeout;
        let handles: Vec<_> = adapters
            .into_iter()
            .map(|adapter| {
                let driver_name = adapter.driver_name().to_string();
                let handle = tokio::spawn(Self::query(adapter, query_timeout));
                (driver_name, handle)
            })
            .collect();

        let mut report = DiscoveryReport::default();
        for (driver_name, handle) in handles {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(e) => Err(DaqError::Hardware(format!("device query aborted: {e}"))),
            };

            match outcome {
                Ok(devices) => report.devices.extend(devices),
                Err(e) => {
                    warn!(driver = %driver_name, error = %e, "Device discovery failed");
                    report.errors.push(DiscoveryFailure {
                        driver_name,
                        message: e.to_string(),
                    });
                }
            }
        }

        report.devices.sort_by(|a, b| {
            a.driver_name
                .cmp(&b.driver_name)
                .then_with(|| compare_device_ids(&a.id, &b.id))
        });
        debug!(
            devices = report.devices.len(),
            failed_drivers = report.errors.len(),
            "Device discovery complete"
        );
        report
    }

    /// Devices of one loaded driver
    pub async fn discover_driver(&self, driver_name: &str) -> DaqResult<Vec<DeviceDescriptor>> {
        let adapter = self.registry.adapter(driver_name)?;
        Self::query(adapter, self.query_timeout).await
    }

    /// Look up one device by id on one driver
    pub async fn find_device(
        &self,
        driver_name: &str,
        device_id: &str,
    ) -> DaqResult<DeviceDescriptor> {
        self.discover_driver(driver_name)
            .await?
            .into_iter()
            .find(|d| d.id == device_id)
            .ok_or_else(|| DaqError::DeviceNotFound {
                driver: driver_name.to_string(),
                device: device_id.to_string(),
            })
    }

    async fn query(adapter: AdapterRef, query_timeout: Duration) -> DaqResult<Vec<DeviceDescriptor>> {
        let driver = adapter.get()?;
        let devices = match tokio::time::timeout(query_timeout, driver.enumerate()).await {
            Ok(Ok(devices)) => devices,
            Ok(Err(e)) => return Err(DaqError::hardware(e)),
            Err(_) => {
                return Err(DaqError::Hardware(format!(
                    "device query timed out after {} ms",
                    query_timeout.as_millis()
                )))
            }
        };

        let driver_name = adapter.driver_name();
        Ok(devices
            .into_iter()
            .map(|mut device| {
                device.driver_name = driver_name.to_string();
                device
            })
            .collect())
    }
}

/// Numeric ids order by value ("2" before "10"); anything else falls back to
/// string order, after the numeric ones
fn compare_device_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
