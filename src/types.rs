use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// One decoded status value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Text(String),
    Null,
}

impl FieldValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of the value. Integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(i) => Some(*i as f64),
            FieldValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(i) => write!(f, "{i}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Null => f.write_str("null"),
        }
    }
}

/// Prefix of keys produced from the device fault list.
pub const FAULT_PREFIX: &str = "fault_";

/// Flat, immutable view of one `status.xml` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusSnapshot {
    fields: BTreeMap<String, FieldValue>,
}

impl StatusSnapshot {
    pub fn new(fields: BTreeMap<String, FieldValue>) -> Self {
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// First present value among `keys`, in order.
    pub fn first_of<'a>(&'a self, keys: &[&str]) -> Option<&'a FieldValue> {
        keys.iter().find_map(|k| self.fields.get(*k))
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(FieldValue::as_i64)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Fault entries as `(name, value)`, with the `fault_` prefix removed.
    pub fn faults(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(FAULT_PREFIX).map(|name| (name, v)))
    }

    /// Names of faults currently reporting a non-zero value.
    pub fn active_faults(&self) -> Vec<&str> {
        self.faults()
            .filter(|(_, v)| v.as_f64().is_some_and(|n| n != 0.0))
            .map(|(name, _)| name)
            .collect()
    }

    pub fn version(&self) -> Option<&str> {
        self.get("version").and_then(FieldValue::as_str)
    }
}

/// What the heater is doing, as far as polling cadence is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityState {
    Active,
    Idle,
    Off,
}

const HEATER_STATE_KEYS: &[&str] = &["heaterstate", "heater1_heaterstate"];
const HEAT_ON_KEYS: &[&str] = &["heater1_heaton", "heaton"];

impl ActivityState {
    /// `systemheat == 0` is off. A non-zero heater state with the flame flag
    /// set (or absent) is active. Anything else is idle.
    pub fn classify(snapshot: &StatusSnapshot) -> Self {
        let enabled = snapshot.get_i64("systemheat").is_none_or(|v| v != 0);
        if !enabled {
            return ActivityState::Off;
        }

        let running = snapshot
            .first_of(HEATER_STATE_KEYS)
            .and_then(FieldValue::as_i64)
            .is_some_and(|v| v != 0);
        let flame = snapshot
            .first_of(HEAT_ON_KEYS)
            .and_then(FieldValue::as_i64)
            .is_none_or(|v| v != 0);

        if running && flame {
            ActivityState::Active
        } else {
            ActivityState::Idle
        }
    }
}

/// Consumer-visible health of a coordinated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    /// No successful fetch yet.
    #[default]
    NoData,
    Available,
    /// Recent polls failed, but still inside the grace threshold; the last good
    /// snapshot keeps being served.
    Degraded,
    Unavailable,
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available | Availability::Degraded)
    }
}

/// A single field that differs between two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub key: String,
    pub old: Option<FieldValue>,
    pub new: Option<FieldValue>,
}

/// Notifications delivered to coordinator subscribers.
#[derive(Debug, Clone)]
pub enum Event {
    Updated {
        snapshot: Arc<StatusSnapshot>,
        changes: Vec<FieldChange>,
    },
    Unavailable {
        consecutive_failures: u32,
        reason: String,
    },
}
