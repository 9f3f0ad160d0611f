mod client;
pub mod codec;
mod config;
mod coordinator;
mod diff;
mod error;
mod fields;
mod logger;
pub mod protocol;
mod registry;
pub mod scheduler;
mod types;

pub use client::{DEFAULT_TIMEOUT, DeviceApi, DeviceClient, DeviceClientBuilder};
pub use config::{BurstConfig, DeviceConfig, MessageLogConfig, PollingConfig};
pub use coordinator::{
    EventCallback, PollStats, Subscription, UpdateCoordinator, UpdateCoordinatorBuilder,
};
pub use error::{Error, Result};
pub use fields::{
    CommandPreset, CommandSpec, FAN_SPEED_AUTO, FieldSpec, FieldTable, SETPOINT_MAX, SETPOINT_MIN,
    ScalingKind, TENTHS, Transform,
};
pub use logger::MessageLogMode;
pub use registry::{DeviceRegistry, EntryId};
pub use scheduler::{AdaptiveIntervals, BurstSettings, PollScheduler, PollingMode};
pub use types::*;
