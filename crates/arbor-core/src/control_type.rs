//! Built-in control types
//!
//! The registry is built once on first use and never changes afterwards.
//! Controls hold `&'static ControlType` references into it.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::error::ValueError;

/// Textual shape of a control value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Integer,
    Float,
    /// `R;G;B`, each component 0..=255
    Rgb,
    /// Any text
    Text,
}

/// Descriptor of one control type
#[derive(Debug, Clone, PartialEq)]
pub struct ControlType {
    /// Published on `meta/type`
    pub meta_type: &'static str,
    /// Name used for a control that is not given one
    pub default_name: &'static str,
    pub default_description: &'static str,
    pub kind: ValueKind,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ControlType {
    const fn new(
        meta_type: &'static str,
        default_name: &'static str,
        default_description: &'static str,
        kind: ValueKind,
    ) -> Self {
        Self {
            meta_type,
            default_name,
            default_description,
            kind,
            min: None,
            max: None,
        }
    }

    const fn bounded(self, min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max, ..self }
    }

    /// `range` takes its upper bound from the control
    pub fn is_range(&self) -> bool {
        self.meta_type == "range"
    }

    /// `generic` controls must carry units
    pub fn needs_units(&self) -> bool {
        self.meta_type == "generic"
    }

    /// Check a value against the type's built-in bounds
    pub fn validate(&self, value: &str) -> bool {
        self.validate_with_max(value, None)
    }

    /// Check a value, letting `max` override the upper bound
    pub fn validate_with_max(&self, value: &str, max: Option<i64>) -> bool {
        let upper = max.map(|m| m as f64).or(self.max);
        let in_bounds = |v: f64| {
            self.min.map_or(true, |min| v >= min) && upper.map_or(true, |max| v <= max)
        };
        match self.kind {
            ValueKind::Integer => parse_strict::<i64>(value).is_some_and(|v| in_bounds(v as f64)),
            ValueKind::Float => value
                .parse::<f64>()
                .is_ok_and(|v| v.is_finite() && in_bounds(v)),
            ValueKind::Rgb => is_rgb(value),
            ValueKind::Text => true,
        }
    }

    /// [`validate_with_max`](Self::validate_with_max) as a `Result`
    pub fn check(&self, value: &str, max: Option<i64>) -> Result<(), ValueError> {
        if self.validate_with_max(value, max) {
            Ok(())
        } else {
            Err(ValueError::Rejected {
                value: value.to_string(),
                control_type: self.meta_type,
            })
        }
    }
}

fn is_rgb(value: &str) -> bool {
    let components: Vec<&str> = value.split(';').collect();
    components.len() == 3 && components.iter().all(|c| parse_strict::<u8>(c).is_some())
}

/// `str::parse` accepts a leading `+` for integers; wire values may not carry one
fn parse_strict<T: std::str::FromStr>(value: &str) -> Option<T> {
    if value.starts_with('+') {
        return None;
    }
    value.parse().ok()
}

use ValueKind::{Float, Integer, Rgb, Text};

pub static SWITCH: ControlType =
    ControlType::new("switch", "switch", "Switch", Integer).bounded(Some(0.0), Some(1.0));
pub static ALARM: ControlType =
    ControlType::new("alarm", "alarm", "Alarm", Integer).bounded(Some(0.0), Some(1.0));
pub static PUSHBUTTON: ControlType =
    ControlType::new("pushbutton", "pushbutton", "Button", Integer).bounded(Some(1.0), Some(1.0));
pub static RANGE: ControlType =
    ControlType::new("range", "range", "Range", Integer).bounded(Some(0.0), None);
pub static RGB: ControlType = ControlType::new("rgb", "rgb", "Color", Rgb);
pub static TEXT: ControlType = ControlType::new("text", "text", "Text", Text);
pub static GENERIC: ControlType = ControlType::new("generic", "value", "Value", Float);
pub static TEMPERATURE: ControlType =
    ControlType::new("temperature", "temperature", "Temperature", Float);
pub static REL_HUMIDITY: ControlType =
    ControlType::new("rel_humidity", "humidity", "Relative humidity", Float)
        .bounded(Some(0.0), Some(100.0));
pub static ATMOSPHERIC_PRESSURE: ControlType =
    ControlType::new("atmospheric_pressure", "pressure", "Atmospheric pressure", Float);
pub static RAINFALL: ControlType =
    ControlType::new("rainfall", "rainfall", "Precipitation rate", Float);
pub static WIND_SPEED: ControlType = ControlType::new("wind_speed", "wind_speed", "Wind speed", Float);
pub static POWER: ControlType = ControlType::new("power", "power", "Power", Float);
pub static POWER_CONSUMPTION: ControlType =
    ControlType::new("power_consumption", "power_consumption", "Power consumption", Float);
pub static VOLTAGE: ControlType = ControlType::new("voltage", "voltage", "Voltage", Float);
pub static WATER_FLOW: ControlType = ControlType::new("water_flow", "water_flow", "Water flow", Float);
pub static WATER_CONSUMPTION: ControlType =
    ControlType::new("water_consumption", "water_consumption", "Water total consumption", Float);
pub static RESISTANCE: ControlType = ControlType::new("resistance", "resistance", "Resistance", Float);
pub static CONCENTRATION: ControlType =
    ControlType::new("concentration", "concentration", "Gas concentration", Float)
        .bounded(Some(0.0), None);
pub static HEAT_POWER: ControlType =
    ControlType::new("heat_power", "heat_power", "Heat power", Float).bounded(Some(0.0), None);
pub static HEAT_ENERGY: ControlType =
    ControlType::new("heat_energy", "heat_energy", "Heat energy", Float).bounded(Some(0.0), None);

static REGISTRY: Lazy<HashMap<&'static str, &'static ControlType>> = Lazy::new(|| {
    [
        &SWITCH,
        &ALARM,
        &PUSHBUTTON,
        &RANGE,
        &RGB,
        &TEXT,
        &GENERIC,
        &TEMPERATURE,
        &REL_HUMIDITY,
        &ATMOSPHERIC_PRESSURE,
        &RAINFALL,
        &WIND_SPEED,
        &POWER,
        &POWER_CONSUMPTION,
        &VOLTAGE,
        &WATER_FLOW,
        &WATER_CONSUMPTION,
        &RESISTANCE,
        &CONCENTRATION,
        &HEAT_POWER,
        &HEAT_ENERGY,
    ]
    .into_iter()
    .map(|control_type| (control_type.meta_type, control_type))
    .collect()
});

/// Find a built-in type by its `meta/type` string
pub fn lookup(meta_type: &str) -> Option<&'static ControlType> {
    REGISTRY.get(meta_type).copied()
}

/// Every registered `meta/type`, sorted
pub fn meta_types() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = REGISTRY.keys().copied().collect();
    names.sort_unstable();
    names
}
