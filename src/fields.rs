//! Field scaling and command tables.
//!
//! Everything here is plain data: scaling is described by [`ScalingKind`] and
//! interpreted by [`ScalingKind::read`] / [`ScalingKind::write`], so tables can
//! be loaded from configuration files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{FieldValue, StatusSnapshot};
use crate::{Error, Result};

/// Raw temperatures and voltages are reported in tenths.
pub const TENTHS: f64 = 10.0;

/// Fan speed value the device uses for automatic mode.
pub const FAN_SPEED_AUTO: i64 = 999;

/// Default writable setpoint range, in degrees.
pub const SETPOINT_MIN: f64 = 9.0;
pub const SETPOINT_MAX: f64 = 80.0;

/// Named non-linear transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    /// `999` reads as `"auto"`; other speeds pass through.
    FanSpeed,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingKind {
    #[default]
    Identity,
    Divide(f64),
    Custom(Transform),
}

impl ScalingKind {
    /// Raw device value to presentation value. Non-numeric input to a divider
    /// yields `Null`.
    pub fn read(&self, raw: &FieldValue) -> FieldValue {
        match self {
            ScalingKind::Identity => raw.clone(),
            ScalingKind::Divide(by) => match raw.as_f64() {
                Some(v) => FieldValue::Float(v / by),
                None => FieldValue::Null,
            },
            ScalingKind::Custom(Transform::FanSpeed) => match raw {
                FieldValue::Int(FAN_SPEED_AUTO) => FieldValue::Text("auto".to_string()),
                FieldValue::Text(s) if s.eq_ignore_ascii_case("auto") => {
                    FieldValue::Text("auto".to_string())
                }
                other => other.clone(),
            },
        }
    }

    /// Presentation value to the integer the control endpoint expects.
    pub fn write(&self, value: f64) -> Result<i64> {
        if !value.is_finite() {
            return Err(Error::Configuration(format!(
                "cannot send non-finite value {value}"
            )));
        }
        let raw = match self {
            ScalingKind::Divide(by) => value * by,
            ScalingKind::Identity | ScalingKind::Custom(Transform::FanSpeed) => value,
        };
        Ok(raw.round() as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub key: String,
    /// Alternate snapshot keys for the same field (other firmware layouts nest
    /// settings and heater readings).
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub scaling: ScalingKind,
    /// Lowest writable value, in presentation units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl FieldSpec {
    pub fn new(key: &str, scaling: ScalingKind) -> Self {
        Self {
            key: key.to_string(),
            aliases: Vec::new(),
            scaling,
            min: None,
            max: None,
        }
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_string());
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Reject scaling factors and bounds that cannot be applied.
    pub fn validate(&self) -> Result<()> {
        if let ScalingKind::Divide(by) = self.scaling
            && !(by.is_finite() && by > 0.0)
        {
            return Err(Error::Configuration(format!(
                "field '{}': divide factor must be finite and positive, got {by}",
                self.key
            )));
        }
        if self.min.is_some_and(|v| !v.is_finite()) || self.max.is_some_and(|v| !v.is_finite()) {
            return Err(Error::Configuration(format!(
                "field '{}': bounds must be finite",
                self.key
            )));
        }
        if let (Some(min), Some(max)) = (self.min, self.max)
            && min > max
        {
            return Err(Error::Configuration(format!(
                "field '{}': min {min} is above max {max}",
                self.key
            )));
        }
        Ok(())
    }

    /// Check `value` against the bounds before it is scaled and sent.
    pub fn check_write(&self, value: f64) -> Result<()> {
        if self.scaling == ScalingKind::Custom(Transform::FanSpeed)
            && value == FAN_SPEED_AUTO as f64
        {
            return Ok(());
        }
        let below = self.min.is_some_and(|min| value < min);
        let above = self.max.is_some_and(|max| value > max);
        if below || above {
            return Err(Error::Configuration(format!(
                "{value} is outside the writable range of '{}' ({} to {})",
                self.key,
                self.min.map_or("-".to_string(), |v| v.to_string()),
                self.max.map_or("-".to_string(), |v| v.to_string()),
            )));
        }
        Ok(())
    }

    /// Raw value from the snapshot, trying the primary key before aliases.
    pub fn raw<'a>(&self, snapshot: &'a StatusSnapshot) -> Option<&'a FieldValue> {
        snapshot
            .get(&self.key)
            .or_else(|| self.aliases.iter().find_map(|a| snapshot.get(a)))
    }

    pub fn read(&self, snapshot: &StatusSnapshot) -> Option<FieldValue> {
        self.raw(snapshot).map(|raw| self.scaling.read(raw))
    }
}

/// Known fields keyed by their primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<FieldSpec>", into = "Vec<FieldSpec>")]
pub struct FieldTable {
    specs: BTreeMap<String, FieldSpec>,
}

impl FieldTable {
    pub fn get(&self, key: &str) -> Option<&FieldSpec> {
        self.specs.get(key)
    }

    pub fn scaling(&self, key: &str) -> ScalingKind {
        self.get(key).map(|s| s.scaling).unwrap_or_default()
    }

    /// Scaled value of `key`; unknown keys are looked up verbatim and returned raw.
    pub fn read(&self, key: &str, snapshot: &StatusSnapshot) -> Option<FieldValue> {
        match self.get(key) {
            Some(spec) => spec.read(snapshot),
            None => snapshot.get(key).cloned(),
        }
    }

    /// Range check for a write to `key`; fields without a spec are unbounded.
    pub fn check_write(&self, key: &str, value: f64) -> Result<()> {
        match self.get(key) {
            Some(spec) => spec.check_write(value),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl From<Vec<FieldSpec>> for FieldTable {
    fn from(specs: Vec<FieldSpec>) -> Self {
        Self {
            specs: specs.into_iter().map(|s| (s.key.clone(), s)).collect(),
        }
    }
}

impl From<FieldTable> for Vec<FieldSpec> {
    fn from(table: FieldTable) -> Self {
        table.specs.into_values().collect()
    }
}

impl Default for FieldTable {
    fn default() -> Self {
        let tenths = ScalingKind::Divide(TENTHS);
        vec![
            FieldSpec::new("currenttemp", tenths),
            FieldSpec::new("enginetemp", tenths),
            FieldSpec::new("floortemp", tenths),
            FieldSpec::new("setpoint", tenths)
                .alias("settings_setpoint")
                .range(SETPOINT_MIN, SETPOINT_MAX),
            FieldSpec::new("battv", tenths).alias("heater1_battv"),
            FieldSpec::new("flametemp", tenths).alias("heater1_flametemp"),
            FieldSpec::new("inlettemp", tenths).alias("heater1_inlettemp"),
            FieldSpec::new("outlettemp", tenths).alias("heater1_outlettemp"),
            FieldSpec::new("fanspeed", ScalingKind::Custom(Transform::FanSpeed))
                .alias("settings_fanspeed")
                .range(0.0, 100.0),
            FieldSpec::new("currenthumidity", ScalingKind::Identity),
            FieldSpec::new("heaterstate", ScalingKind::Identity).alias("heater1_heaterstate"),
            FieldSpec::new("runtime", ScalingKind::Identity).alias("heater1_runtime"),
        ]
        .into()
    }
}

/// Built-in command maps for the firmware revisions seen in the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandPreset {
    #[default]
    Mcs7,
    Legacy,
}

/// Writable field key to control-endpoint `act` id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandSpec {
    commands: BTreeMap<String, u16>,
}

impl CommandSpec {
    pub fn new(commands: BTreeMap<String, u16>) -> Self {
        Self { commands }
    }

    pub fn preset(preset: CommandPreset) -> Self {
        let pairs: &[(&str, u16)] = match preset {
            CommandPreset::Mcs7 => &[
                ("setpoint", 101),
                ("fanspeed", 102),
                ("engineenable", 201),
                ("electricenable", 202),
                ("floorenable", 203),
                ("glycol", 204),
                ("fanenabled", 205),
                ("thermenabled", 206),
            ],
            CommandPreset::Legacy => &[
                ("setpoint", 1),
                ("fanspeed", 2),
                ("pump", 4),
                ("fan", 5),
                ("floorenable", 6),
                ("thermenabled", 8),
                ("electricenable", 10),
            ],
        };
        Self {
            commands: pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    pub fn act_id(&self, key: &str) -> Result<u16> {
        self.commands
            .get(key)
            .copied()
            .ok_or_else(|| Error::Configuration(format!("no command mapped for '{key}'")))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.commands.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u16)> {
        self.commands.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl Default for CommandSpec {
    fn default() -> Self {
        Self::preset(CommandPreset::default())
    }
}
