//! Tree construction and the application-side heartbeat

use anyhow::{Context, Result};
use arbor_core::control_type::{GENERIC, TEXT};
use arbor_core::{Control, ControlOptions, ControlType, Device, Hierarchy, Node, NodeId};
use tracing::{debug, info};

use crate::config::{Config, DeviceConfig, HeartbeatConfig};

/// Controls written by the heartbeat task
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatControls {
    pub uptime: NodeId,
    pub last_seen: NodeId,
    pub interval_secs: u64,
}

impl HeartbeatControls {
    /// Advance uptime by one interval and stamp the current time
    pub fn tick(&self, hierarchy: &Hierarchy) -> Result<()> {
        let step = self.interval_secs;
        hierarchy.modify_value_as::<u64, _>(self.uptime, |uptime| uptime + step)?;
        hierarchy.set_value(self.last_seen, chrono::Utc::now().to_rfc3339())?;
        Ok(())
    }
}

/// Shared daemon state
#[derive(Clone)]
pub struct DaemonState {
    pub hierarchy: Hierarchy,
    pub heartbeat: Option<HeartbeatControls>,
}

impl DaemonState {
    /// Build the device tree described by `config`
    pub fn build(config: &Config) -> Result<Self> {
        let hierarchy = Hierarchy::new(Node::router(config.driver.name.as_str()))
            .with_context(|| format!("Invalid driver name {:?}", config.driver.name))?;

        for device in &config.devices {
            add_device(&hierarchy, device)
                .with_context(|| format!("Failed to build device {:?}", device.name))?;
        }

        let heartbeat = if config.heartbeat.enabled {
            Some(add_heartbeat(&hierarchy, &config.heartbeat)?)
        } else {
            None
        };

        info!(
            devices = config.devices.len(),
            heartbeat = heartbeat.is_some(),
            "Device tree built"
        );
        Ok(Self { hierarchy, heartbeat })
    }
}

fn add_device(hierarchy: &Hierarchy, config: &DeviceConfig) -> Result<NodeId> {
    let description = config.description.clone().unwrap_or_else(|| config.name.clone());
    let mut device = Device::new(description);
    if config.auto_create {
        device = device.with_factory(|alias| {
            let options = ControlOptions::new(&TEXT).subscribe_immediately(false);
            Control::build(Some(alias), "", options)
        });
    }
    let id = hierarchy.add_child(hierarchy.root(), device.into_node(config.name.as_str()))?;

    for control in &config.controls {
        let options = control.to_options()?;
        let node = Control::build(control.name.as_deref(), control.initial.as_str(), options)?;
        let control_id = hierarchy.add_child(id, node)?;
        debug!(device = %config.name, control = %control_id, "Added control");
    }
    Ok(id)
}

fn add_heartbeat(hierarchy: &Hierarchy, config: &HeartbeatConfig) -> Result<HeartbeatControls> {
    let device = hierarchy.add_child(
        hierarchy.root(),
        Device::new("Arbor status").into_node(config.device.as_str()),
    )?;
    let status = |control_type: &'static ControlType, units: Option<&str>| {
        let options = ControlOptions::new(control_type)
            .readonly(true)
            .accepting_messages(false)
            .subscribe_immediately(false);
        match units {
            Some(units) => options.units(units),
            None => options,
        }
    };
    let uptime = hierarchy.add_child(
        device,
        Control::build(Some("uptime"), "0", status(&GENERIC, Some("s")).order(1))?,
    )?;
    let last_seen = hierarchy.add_child(
        device,
        Control::build(Some("last_seen"), "", status(&TEXT, None).order(2))?,
    )?;
    Ok(HeartbeatControls {
        uptime,
        last_seen,
        interval_secs: config.interval_secs.max(1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::sample_config;
    use arbor_core::{Disposition, Message, Topic};

    fn t(raw: &str) -> Topic {
        Topic::parse(raw).unwrap()
    }

    #[test]
    fn test_build_from_sample() {
        let state = DaemonState::build(&sample_config()).unwrap();
        let hierarchy = &state.hierarchy;

        let temperature = hierarchy.resolve(&t("boiler/temperature")).unwrap();
        assert_eq!(hierarchy.value(temperature).unwrap(), "20");
        assert!(hierarchy.resolve(&t("boiler/pump")).is_some());
        assert!(hierarchy.resolve(&t("system/uptime")).is_some());

        let outgoing = hierarchy.take_outgoing();
        assert!(outgoing.contains(&Message::publish(t("boiler/meta/name"), "Boiler room")));
        assert!(outgoing.contains(&Message::subscribe(t("boiler/pump/on"))));
    }

    #[test]
    fn test_heartbeat_tick() {
        let state = DaemonState::build(&sample_config()).unwrap();
        let heartbeat = state.heartbeat.unwrap();
        state.hierarchy.take_outgoing();

        heartbeat.tick(&state.hierarchy).unwrap();
        heartbeat.tick(&state.hierarchy).unwrap();
        assert_eq!(state.hierarchy.value_as::<u64>(heartbeat.uptime).unwrap(), 10);
        assert!(!state.hierarchy.value(heartbeat.last_seen).unwrap().is_empty());

        // status controls ignore wire writes
        let write = Message::value_change(t("system/uptime/on"), "0");
        assert_eq!(state.hierarchy.dispatch(&write), Disposition::Rejected);
    }

    #[test]
    fn test_auto_create_device() {
        let mut config = Config::default();
        config.heartbeat.enabled = false;
        config.devices.push(DeviceConfig {
            name: "notes".to_string(),
            description: None,
            auto_create: true,
            controls: Vec::new(),
        });
        let state = DaemonState::build(&config).unwrap();
        assert!(state.heartbeat.is_none());

        let write = Message::value_change(t("notes/today"), "sunny");
        assert!(state.hierarchy.dispatch(&write).is_accepted());
        let today = state.hierarchy.resolve(&t("notes/today")).unwrap();
        assert_eq!(state.hierarchy.value(today).unwrap(), "sunny");
    }

    #[test]
    fn test_duplicate_device_fails() {
        let mut config = sample_config();
        config.devices.push(config.devices[0].clone());
        let err = DaemonState::build(&config).err().unwrap();
        assert!(format!("{:#}", err).contains("boiler"));
    }
}
