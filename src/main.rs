use daqhub::config::{ServiceConfig, DEFAULT_CONFIG_PATH};
use daqhub::hal::mock::SimulatedDriver;
use daqhub::hal::{DriverRegistry, TaskParameters, TaskType};
use daqhub::service::{CreateTaskRequest, DaqService, LoadDriverRequest};
use daqhub::logging;
use std::time::Duration;

const DEMO_DRIVER: &str = "MockDriver";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = ServiceConfig::load(&config_path).await?;
    logging::init(&config.logging)?;

    let mut registry = DriverRegistry::new();
    registry.register(SimulatedDriver::new(DEMO_DRIVER).factory());

    let service = DaqService::new(config, registry);
    service.initialize().await;

    println!("daqhub demo");
    println!("===========\n");
    println!("Registered drivers: {:?}", service.list_drivers());

    let response = service
        .load_driver(LoadDriverRequest {
            driver_name: DEMO_DRIVER.to_string(),
        })
        .await;
    println!("Load: {}", response.message);
    if !response.success {
        anyhow::bail!("demo driver failed to load");
    }

    for device in service.list_devices().await {
        println!("Device {} ({}) on {}", device.id, device.model, device.driver_name);
        let report = service.test_device(&device.driver_name, &device.id).await?;
        for check in &report.checks {
            let verdict = if check.passed { "ok" } else { "FAILED" };
            println!("  {:<6} {:<6} {}", check.name, verdict, check.message);
        }
    }

    let created = service
        .create_task(CreateTaskRequest {
            driver_name: DEMO_DRIVER.to_string(),
            task_type: TaskType::AnalogIn,
            device_id: "1".to_string(),
            parameters: TaskParameters {
                board_index: 0,
                channel_count: 4,
                sample_rate: 1000.0,
                min_range: -10.0,
                max_range: 10.0,
            },
        })
        .await;
    println!("Create: {}", created.message);
    let task_id = created
        .task_id
        .ok_or_else(|| anyhow::anyhow!("task creation failed"))?;

    println!("Start: {}", service.start_task(task_id).await.message);
    tokio::time::sleep(Duration::from_millis(350)).await;

    for block in service.read_samples(task_id, 8).await? {
        let first: Vec<f64> = block.channel(0).take(4).collect();
        println!(
            "  block #{} t={}us {}x{} ch0={:.3?}",
            block.sequence, block.timestamp_us, block.samples_per_channel, block.channel_count, first
        );
    }

    let status = service.status().await;
    println!(
        "Status: {} driver(s), {} device(s), {} active task(s)",
        status.loaded_driver_count, status.device_count, status.active_task_count
    );

    println!("Stop: {}", service.stop_task(task_id).await.message);
    println!("Delete: {}", service.delete_task(task_id).await.message);

    service.shutdown().await;
    Ok(())
}
