//! Driver loop, heartbeat task and shutdown

use anyhow::Result;
use arbor_transport::{generate_client_id, Driver, MemoryBroker};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::state::DaemonState;

/// A wire event to inject once the driver is connected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialWrite {
    pub topic: String,
    pub value: String,
}

impl InitialWrite {
    /// Parse `topic=value`
    pub fn parse(raw: &str) -> Result<Self> {
        let (topic, value) = raw
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Expected topic=value, got {:?}", raw))?;
        if topic.is_empty() {
            anyhow::bail!("Empty topic in {:?}", raw);
        }
        Ok(Self {
            topic: topic.to_string(),
            value: value.to_string(),
        })
    }
}

/// Run until Ctrl-C or until `run_for` has elapsed
pub async fn run(
    state: DaemonState,
    config: &Config,
    broker: MemoryBroker,
    initial: Vec<InitialWrite>,
    run_for: Option<Duration>,
) -> Result<()> {
    let client_id = config
        .driver
        .client_id
        .clone()
        .unwrap_or_else(|| generate_client_id(&config.driver.name));
    let mut driver = Driver::new(
        state.hierarchy.clone(),
        broker.client(client_id.as_str()),
        config.driver_config(),
    );
    driver.connect()?;
    info!(client = %client_id, "Driver started");

    for write in &initial {
        let delivered = broker.publish(&write.topic, write.value.clone(), false)?;
        debug!(topic = %write.topic, delivered, "Injected initial write");
    }

    let running = Arc::new(AtomicBool::new(true));

    let heartbeat_task = state.heartbeat.map(|controls| {
        let hierarchy = state.hierarchy.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(controls.interval_secs));
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = controls.tick(&hierarchy) {
                    warn!(error = %e, "Heartbeat update failed");
                }
            }
        })
    });

    let wait_timeout = config.wait_timeout();
    let driver_running = running.clone();
    let driver_task = tokio::task::spawn_blocking(move || {
        while driver_running.load(Ordering::Relaxed) {
            if let Err(e) = driver.wait_and_process_one(wait_timeout) {
                warn!(error = %e, "Driver step failed");
                std::thread::sleep(wait_timeout);
            }
        }
        driver
    });

    let deadline = async {
        match run_for {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutdown requested");
        }
        _ = deadline => {
            info!("Run time elapsed");
        }
    }

    running.store(false, Ordering::Relaxed);
    if let Some(task) = heartbeat_task {
        task.abort();
    }
    let mut driver = driver_task.await?;
    // last heartbeat or write may still be queued
    if let Err(e) = driver.flush() {
        warn!(error = %e, "Final flush failed");
    }

    info!(retained = broker.retained_topics().len(), "Driver stopped");
    Ok(())
}

/// Print every retained topic with its payload
pub fn print_retained(broker: &MemoryBroker) {
    for topic in broker.retained_topics() {
        if let Some(payload) = broker.retained(&topic) {
            println!("{} = {}", topic, String::from_utf8_lossy(&payload));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::sample_config;

    #[test]
    fn test_initial_write_parsing() {
        assert_eq!(
            InitialWrite::parse("devices/boiler/pump/on=1").unwrap(),
            InitialWrite {
                topic: "devices/boiler/pump/on".into(),
                value: "1".into()
            }
        );
        assert_eq!(InitialWrite::parse("a/b=").unwrap().value, "");
        assert!(InitialWrite::parse("no-separator").is_err());
        assert!(InitialWrite::parse("=1").is_err());
    }

    #[tokio::test]
    async fn test_run_applies_initial_writes() {
        let mut config = sample_config();
        config.heartbeat.enabled = false;
        config.driver.wait_timeout_ms = 10;
        let state = DaemonState::build(&config).unwrap();
        let broker = MemoryBroker::new();
        let initial = vec![InitialWrite::parse("devices/boiler/pump/on=1").unwrap()];

        run(state.clone(), &config, broker.clone(), initial, Some(Duration::from_millis(200)))
            .await
            .unwrap();

        let pump = state.hierarchy.resolve(&"boiler/pump".parse().unwrap()).unwrap();
        assert_eq!(state.hierarchy.value(pump).unwrap(), "1");
        assert_eq!(broker.retained("devices/boiler/pump").as_deref(), Some(&b"1"[..]));
        assert_eq!(
            broker.retained("devices/boiler/meta/name").as_deref(),
            Some(&b"Boiler room"[..])
        );
    }
}
