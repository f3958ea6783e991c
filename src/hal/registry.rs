use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::traits::DriverAdapter;
use super::types::{CapabilitySet, DriverDescriptor, LoadState};
use crate::config::DriverConfig;
use crate::error::{DaqError, DaqResult};

type AdapterFactory = Box<dyn Fn() -> Box<dyn DriverAdapter> + Send + Sync>;

struct SlotStatus {
    state: LoadState,
    adapter: Option<Arc<dyn DriverAdapter>>,
    last_error: Option<String>,
}

/// One catalog entry: static metadata, the factory, and the load state
struct DriverSlot {
    name: String,
    version: String,
    capabilities: CapabilitySet,
    board_count: u32,
    factory: AdapterFactory,
    /// Serializes load, unload and lease acquisition for this driver only
    lifecycle: Mutex<()>,
    status: RwLock<SlotStatus>,
    active_tasks: Arc<AtomicUsize>,
}

impl DriverSlot {
    fn status(&self) -> RwLockReadGuard<'_, SlotStatus> {
        self.status.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn status_mut(&self) -> RwLockWriteGuard<'_, SlotStatus> {
        self.status.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn descriptor(&self) -> DriverDescriptor {
        let status = self.status();
        DriverDescriptor {
            name: self.name.clone(),
            version: self.version.clone(),
            capabilities: self.capabilities.clone(),
            board_count: self.board_count,
            state: status.state,
            last_error: status.last_error.clone(),
        }
    }

    fn adapter_ref(&self) -> DaqResult<AdapterRef> {
        let status = self.status();
        match (&status.state, &status.adapter) {
            (LoadState::Loaded, Some(adapter)) => Ok(AdapterRef {
                driver_name: self.name.clone(),
                adapter: Arc::downgrade(adapter),
            }),
            _ => Err(DaqError::DriverNotLoaded(self.name.clone())),
        }
    }
}

/// Non-owning reference to a loaded adapter
#[derive(Clone)]
pub struct AdapterRef {
    driver_name: String,
    adapter: Weak<dyn DriverAdapter>,
}

impl AdapterRef {
    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    /// Borrow the adapter for one call; fails once the driver is unloaded
    pub fn get(&self) -> DaqResult<Arc<dyn DriverAdapter>> {
        self.adapter
            .upgrade()
            .ok_or_else(|| DaqError::DriverNotLoaded(self.driver_name.clone()))
    }
}

impl fmt::Debug for AdapterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRef")
            .field("driver_name", &self.driver_name)
            .finish()
    }
}

/// Marks one non-terminal task against a driver.
///
/// While any lease is alive the driver refuses to unload. Dropping the lease
/// releases the claim.
#[derive(Debug)]
pub struct DriverLease {
    adapter: AdapterRef,
    board_count: u32,
    active_tasks: Arc<AtomicUsize>,
}

impl DriverLease {
    pub fn driver_name(&self) -> &str {
        self.adapter.driver_name()
    }

    pub fn adapter(&self) -> &AdapterRef {
        &self.adapter
    }

    pub fn board_count(&self) -> u32 {
        self.board_count
    }
}

impl Drop for DriverLease {
    fn drop(&mut self) {
        self.active_tasks.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Catalog of driver adapters and owner of their load lifecycle
pub struct DriverRegistry {
    slots: HashMap<String, Arc<DriverSlot>>,
    configs: HashMap<String, DriverConfig>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            configs: HashMap::new(),
        }
    }

    /// Attach per-driver settings used at load time
    pub fn with_config(mut self, configs: HashMap<String, DriverConfig>) -> Self {
        self.configs = configs;
        self
    }

    /// Add an adapter family to the catalog.
    ///
    /// The factory is invoked once here to read the adapter's metadata, and
    /// again on every load so each load starts from a fresh instance.
    pub fn register<F>(&mut self, factory: F)
    where
        F: Fn() -> Box<dyn DriverAdapter> + Send + Sync + 'static,
    {
        let template = factory();
        let name = template.driver_id().to_string();

        let slot = DriverSlot {
            name: name.clone(),
            version: template.version().to_string(),
            capabilities: template.capabilities(),
            board_count: template.board_count(),
            factory: Box::new(factory),
            lifecycle: Mutex::new(()),
            status: RwLock::new(SlotStatus {
                state: LoadState::Unloaded,
                adapter: None,
                last_error: None,
            }),
            active_tasks: Arc::new(AtomicUsize::new(0)),
        };

        debug!(driver = %name, "Registered driver adapter");
        self.slots.insert(name, Arc::new(slot));
    }

    /// Every driver the process knows how to load, loaded or not
    pub fn list_drivers(&self) -> Vec<DriverDescriptor> {
        let mut drivers: Vec<_> = self.slots.values().map(|s| s.descriptor()).collect();
        drivers.sort_by(|a, b| a.name.cmp(&b.name));
        drivers
    }

    pub fn descriptor(&self, name: &str) -> DaqResult<DriverDescriptor> {
        Ok(self.slot(name)?.descriptor())
    }

    pub fn loaded_drivers(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .slots
            .values()
            .filter(|s| s.status().state == LoadState::Loaded)
            .map(|s| s.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.slots
            .get(name)
            .map(|s| s.status().state == LoadState::Loaded)
            .unwrap_or(false)
    }

    /// Number of non-terminal tasks holding a lease on `name`
    pub fn active_tasks(&self, name: &str) -> usize {
        self.slots
            .get(name)
            .map(|s| s.active_tasks.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Non-owning references to every loaded adapter, sorted by name
    pub fn loaded_adapters(&self) -> Vec<AdapterRef> {
        let mut refs: Vec<_> = self
            .slots
            .values()
            .filter_map(|s| s.adapter_ref().ok())
            .collect();
        refs.sort_by(|a, b| a.driver_name.cmp(&b.driver_name));
        refs
    }

    /// Reference to one loaded adapter
    pub fn adapter(&self, name: &str) -> DaqResult<AdapterRef> {
        self.slot(name)?.adapter_ref()
    }

    /// Resolve and initialize a driver. Already-loaded drivers are left as is.
    pub async fn load_driver(&self, name: &str) -> DaqResult<DriverDescriptor> {
        let slot = self.slot(name)?;
        let _guard = slot.lifecycle.lock().await;

        if slot.status().state == LoadState::Loaded {
            debug!(driver = %name, "Driver already loaded");
            return Ok(slot.descriptor());
        }

        let config = self.configs.get(name).cloned().unwrap_or_default();
        match Self::bring_up(&slot, &config).await {
            Ok(adapter) => {
                let mut status = slot.status_mut();
                status.state = LoadState::Loaded;
                status.adapter = Some(adapter);
                status.last_error = None;
                drop(status);

                info!(driver = %name, version = %slot.version, "Driver loaded");
                Ok(slot.descriptor())
            }
            Err(reason) => {
                let mut status = slot.status_mut();
                status.state = LoadState::Error;
                status.adapter = None;
                status.last_error = Some(reason.clone());
                drop(status);

                warn!(driver = %name, %reason, "Driver load failed");
                Err(DaqError::DriverLoad {
                    driver: name.to_string(),
                    reason,
                })
            }
        }
    }

    async fn bring_up(
        slot: &DriverSlot,
        config: &DriverConfig,
    ) -> std::result::Result<Arc<dyn DriverAdapter>, String> {
        if let Some(path) = &config.driver_path {
            if !path.exists() {
                return Err(format!("native driver binary not found at {}", path.display()));
            }
        }

        let adapter: Arc<dyn DriverAdapter> = Arc::from((slot.factory)());

        if let Some(expected) = &config.expected_version {
            if adapter.version() != expected.as_str() {
                return Err(format!(
                    "version mismatch: expected {}, adapter reports {}",
                    expected,
                    adapter.version()
                ));
            }
        }

        match tokio::time::timeout(config.load_timeout(), adapter.initialize(config)).await {
            Ok(Ok(())) => Ok(adapter),
            Ok(Err(e)) => Err(format!("initialization rejected: {e:#}")),
            Err(_) => Err(format!(
                "initialization timed out after {} ms",
                config.timeout_ms
            )),
        }
    }

    /// Release a driver's adapter. Unloading an unloaded driver is a no-op.
    pub async fn unload_driver(&self, name: &str) -> DaqResult<()> {
        let slot = self.slot(name)?;
        let _guard = slot.lifecycle.lock().await;

        let active_tasks = slot.active_tasks.load(Ordering::Acquire);
        if active_tasks > 0 {
            return Err(DaqError::DriverBusy {
                driver: name.to_string(),
                active_tasks,
            });
        }

        let adapter = {
            let mut status = slot.status_mut();
            status.state = LoadState::Unloaded;
            status.last_error = None;
            status.adapter.take()
        };

        match adapter {
            Some(adapter) => {
                if let Err(e) = adapter.shutdown().await {
                    warn!(driver = %name, error = %format!("{e:#}"), "Driver shutdown reported an error");
                }
                info!(driver = %name, "Driver unloaded");
            }
            None => debug!(driver = %name, "Driver was not loaded"),
        }
        Ok(())
    }

    /// Teardown: unload every driver, logging the ones that refuse
    pub async fn unload_all(&self) -> Vec<DaqError> {
        let mut names: Vec<_> = self.slots.keys().cloned().collect();
        names.sort();

        let mut failures = Vec::new();
        for name in names {
            if let Err(e) = self.unload_driver(&name).await {
                warn!(driver = %name, error = %e, "Driver not unloaded during teardown");
                failures.push(e);
            }
        }
        failures
    }

    /// Claim a loaded driver on behalf of a new task
    pub async fn acquire(&self, name: &str) -> DaqResult<DriverLease> {
        let slot = self.slot(name)?;
        let _guard = slot.lifecycle.lock().await;

        let adapter = slot.adapter_ref()?;
        slot.active_tasks.fetch_add(1, Ordering::AcqRel);
        Ok(DriverLease {
            adapter,
            board_count: slot.board_count,
            active_tasks: Arc::clone(&slot.active_tasks),
        })
    }

    fn slot(&self, name: &str) -> DaqResult<Arc<DriverSlot>> {
        self.slots
            .get(name)
            .cloned()
            .ok_or_else(|| DaqError::DriverNotFound(name.to_string()))
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
