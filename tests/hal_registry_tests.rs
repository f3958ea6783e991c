use daqhub::config::DriverConfig;
use daqhub::hal::mock::{SimulatedDriver, SimulatedStats};
use daqhub::hal::*;
use daqhub::{DaqError, ErrorKind};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn registry_with(driver: &SimulatedDriver) -> DriverRegistry {
    let mut registry = DriverRegistry::new();
    registry.register(driver.factory());
    registry
}

#[tokio::test]
async fn test_registry_register_and_list() {
    let mut registry = DriverRegistry::new();
    assert_eq!(registry.list_drivers().len(), 0);

    registry.register(SimulatedDriver::new("X").factory());
    registry.register(SimulatedDriver::new("A").with_version("2.1.0").factory());

    let drivers = registry.list_drivers();
    let names: Vec<_> = drivers.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["A", "X"]);
    assert_eq!(drivers[0].version, "2.1.0");
    assert!(drivers.iter().all(|d| d.state == LoadState::Unloaded));
    assert!(registry.loaded_drivers().is_empty());
}

#[tokio::test]
async fn test_load_is_idempotent() {
    let driver = SimulatedDriver::new("X");
    let stats = driver.stats();
    let registry = registry_with(&driver);

    let first = registry.load_driver("X").await.unwrap();
    let second = registry.load_driver("X").await.unwrap();

    assert_eq!(first.state, LoadState::Loaded);
    assert_eq!(second.state, LoadState::Loaded);
    assert_eq!(registry.loaded_drivers(), vec!["X".to_string()]);
    assert_eq!(SimulatedStats::get(&stats.initializations), 1);
}

#[tokio::test]
async fn test_concurrent_loads_initialize_once() {
    let driver = SimulatedDriver::new("X");
    driver.faults().init_delay_ms.store(30, Ordering::SeqCst);
    let stats = driver.stats();
    let registry = Arc::new(registry_with(&driver));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.load_driver("X").await })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }
    assert_eq!(SimulatedStats::get(&stats.initializations), 1);
}

#[tokio::test]
async fn test_independent_drivers_load_concurrently() {
    let slow = SimulatedDriver::new("A");
    slow.faults().init_delay_ms.store(500, Ordering::SeqCst);
    let mut registry = DriverRegistry::new();
    registry.register(slow.factory());
    registry.register(SimulatedDriver::new("B").factory());
    let registry = Arc::new(registry);

    let loading = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.load_driver("A").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let started = Instant::now();
    tokio::time::timeout(Duration::from_millis(200), registry.load_driver("B"))
        .await
        .expect("B waited behind A's lifecycle lock")
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(200));

    // A is still inside its initialize call
    assert!(!loading.is_finished());
    assert!(!registry.is_loaded("A"));
    assert!(registry.is_loaded("B"));

    // Unloading B does not wait for A either
    tokio::time::timeout(Duration::from_millis(200), registry.unload_driver("B"))
        .await
        .expect("B unload waited behind A's lifecycle lock")
        .unwrap();

    loading.await.unwrap().unwrap();
    assert!(registry.is_loaded("A"));
}

#[tokio::test]
async fn test_unknown_driver() {
    let registry = DriverRegistry::new();

    let err = registry.load_driver("Nope").await.unwrap_err();
    assert!(matches!(err, DaqError::DriverNotFound(ref name) if name == "Nope"));
    assert_eq!(err.kind(), ErrorKind::NotFound);

    assert!(matches!(
        registry.unload_driver("Nope").await,
        Err(DaqError::DriverNotFound(_))
    ));
}

#[tokio::test]
async fn test_failed_initialization_records_error() {
    let driver = SimulatedDriver::new("X");
    driver.faults().fail_initialize.store(true, Ordering::SeqCst);
    let registry = registry_with(&driver);

    let err = registry.load_driver("X").await.unwrap_err();
    assert!(matches!(err, DaqError::DriverLoad { .. }));
    assert_eq!(err.kind(), ErrorKind::Hardware);

    let descriptor = registry.descriptor("X").unwrap();
    assert_eq!(descriptor.state, LoadState::Error);
    assert!(descriptor.last_error.unwrap().contains("initialization"));
    assert!(!registry.is_loaded("X"));

    // An explicit retry after the fault clears succeeds
    driver.faults().fail_initialize.store(false, Ordering::SeqCst);
    registry.load_driver("X").await.unwrap();
    assert!(registry.descriptor("X").unwrap().last_error.is_none());
}

#[tokio::test]
async fn test_missing_native_binary() {
    let driver = SimulatedDriver::new("X");
    let stats = driver.stats();
    let temp_dir = tempfile::tempdir().unwrap();

    let mut configs = HashMap::new();
    configs.insert(
        "X".to_string(),
        DriverConfig {
            driver_path: Some(temp_dir.path().join("missing.dll")),
            ..Default::default()
        },
    );
    let registry = registry_with(&driver).with_config(configs);

    let err = registry.load_driver("X").await.unwrap_err();
    assert!(err.to_string().contains("not found"));
    assert_eq!(SimulatedStats::get(&stats.initializations), 0);
}

#[tokio::test]
async fn test_existing_native_binary_loads() {
    let driver = SimulatedDriver::new("X");
    let binary = tempfile::NamedTempFile::new().unwrap();

    let mut configs = HashMap::new();
    configs.insert(
        "X".to_string(),
        DriverConfig {
            driver_path: Some(binary.path().to_path_buf()),
            expected_version: Some("1.0.0".to_string()),
            ..Default::default()
        },
    );
    let registry = registry_with(&driver).with_config(configs);

    assert!(registry.load_driver("X").await.is_ok());
}

#[tokio::test]
async fn test_version_mismatch() {
    let driver = SimulatedDriver::new("X").with_version("1.0.0");
    let mut configs = HashMap::new();
    configs.insert(
        "X".to_string(),
        DriverConfig {
            expected_version: Some("2.0.0".to_string()),
            ..Default::default()
        },
    );
    let registry = registry_with(&driver).with_config(configs);

    let err = registry.load_driver("X").await.unwrap_err();
    assert!(err.to_string().contains("version mismatch"));
}

#[tokio::test]
async fn test_initialization_timeout() {
    let driver = SimulatedDriver::new("X");
    driver.faults().init_delay_ms.store(500, Ordering::SeqCst);
    let mut configs = HashMap::new();
    configs.insert(
        "X".to_string(),
        DriverConfig {
            timeout_ms: 20,
            ..Default::default()
        },
    );
    let registry = registry_with(&driver).with_config(configs);

    let err = registry.load_driver("X").await.unwrap_err();
    assert!(err.to_string().contains("timed out"));
    assert_eq!(registry.descriptor("X").unwrap().state, LoadState::Error);
}

#[tokio::test]
async fn test_unload_is_idempotent() {
    let driver = SimulatedDriver::new("X");
    let stats = driver.stats();
    let registry = registry_with(&driver);

    // Never loaded
    registry.unload_driver("X").await.unwrap();
    assert_eq!(SimulatedStats::get(&stats.shutdowns), 0);

    registry.load_driver("X").await.unwrap();
    registry.unload_driver("X").await.unwrap();
    registry.unload_driver("X").await.unwrap();

    assert_eq!(SimulatedStats::get(&stats.shutdowns), 1);
    assert_eq!(registry.descriptor("X").unwrap().state, LoadState::Unloaded);
}

#[tokio::test]
async fn test_lease_blocks_unload() {
    let driver = SimulatedDriver::new("X");
    let registry = registry_with(&driver);

    let err = registry.acquire("X").await.unwrap_err();
    assert!(matches!(err, DaqError::DriverNotLoaded(_)));
    assert_eq!(err.kind(), ErrorKind::Conflict);

    registry.load_driver("X").await.unwrap();
    let lease = registry.acquire("X").await.unwrap();
    assert_eq!(lease.driver_name(), "X");
    assert_eq!(registry.active_tasks("X"), 1);

    let err = registry.unload_driver("X").await.unwrap_err();
    assert!(matches!(err, DaqError::DriverBusy { active_tasks: 1, .. }));
    assert!(registry.is_loaded("X"));

    drop(lease);
    assert_eq!(registry.active_tasks("X"), 0);
    registry.unload_driver("X").await.unwrap();
}

#[tokio::test]
async fn test_adapter_ref_does_not_outlive_unload() {
    let driver = SimulatedDriver::new("X");
    let registry = registry_with(&driver);
    registry.load_driver("X").await.unwrap();

    let adapter = registry.adapter("X").unwrap();
    assert_eq!(adapter.get().unwrap().driver_id(), "X");

    registry.unload_driver("X").await.unwrap();
    assert!(matches!(adapter.get(), Err(DaqError::DriverNotLoaded(_))));
    assert!(registry.adapter("X").is_err());
}

#[tokio::test]
async fn test_unload_all() {
    let first = SimulatedDriver::new("A");
    let second = SimulatedDriver::new("B");
    let mut registry = DriverRegistry::new();
    registry.register(first.factory());
    registry.register(second.factory());

    registry.load_driver("A").await.unwrap();
    registry.load_driver("B").await.unwrap();
    let _lease = registry.acquire("B").await.unwrap();

    let failures = registry.unload_all().await;
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0], DaqError::DriverBusy { .. }));
    assert_eq!(registry.loaded_drivers(), vec!["B".to_string()]);
}
