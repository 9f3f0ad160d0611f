//! Poll interval selection.
//!
//! [`PollScheduler::current_interval`] depends only on the configured mode,
//! the burst countdown and the snapshot handed in, so it can be exercised
//! without a device or a runtime.

use std::time::Duration;

use tracing::warn;

use crate::types::{ActivityState, StatusSnapshot};

pub const MIN_INTERVAL: Duration = Duration::from_secs(3);
pub const MAX_INTERVAL: Duration = Duration::from_secs(30);

pub const DEFAULT_BURST_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_BURST_POLLS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptiveIntervals {
    pub active: Duration,
    pub idle: Duration,
    pub off: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingMode {
    Fixed(Duration),
    Adaptive(AdaptiveIntervals),
}

impl PollingMode {
    /// Same mode with every interval clamped into `[MIN_INTERVAL, MAX_INTERVAL]`.
    pub fn clamped(self) -> Self {
        match self {
            PollingMode::Fixed(interval) => PollingMode::Fixed(clamp_interval(interval)),
            PollingMode::Adaptive(t) => PollingMode::Adaptive(AdaptiveIntervals {
                active: clamp_interval(t.active),
                idle: clamp_interval(t.idle),
                off: clamp_interval(t.off),
            }),
        }
    }

    fn interval_for(&self, snapshot: Option<&StatusSnapshot>) -> Duration {
        match self {
            PollingMode::Fixed(interval) => *interval,
            PollingMode::Adaptive(t) => match snapshot.map(ActivityState::classify) {
                None | Some(ActivityState::Active) => t.active,
                Some(ActivityState::Idle) => t.idle,
                Some(ActivityState::Off) => t.off,
            },
        }
    }
}

fn clamp_interval(interval: Duration) -> Duration {
    let clamped = interval.clamp(MIN_INTERVAL, MAX_INTERVAL);
    if clamped != interval {
        warn!(
            requested_secs = interval.as_secs_f64(),
            clamped_secs = clamped.as_secs_f64(),
            "poll interval out of range, clamping"
        );
    }
    clamped
}

/// Short fast-polling override after a user command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstSettings {
    pub enabled: bool,
    pub interval: Duration,
    pub polls: u32,
}

impl Default for BurstSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: DEFAULT_BURST_INTERVAL,
            polls: DEFAULT_BURST_POLLS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollScheduler {
    mode: PollingMode,
    burst: BurstSettings,
    burst_remaining: u32,
}

impl PollScheduler {
    pub fn new(mode: PollingMode, burst: BurstSettings) -> Self {
        Self {
            mode: mode.clamped(),
            burst,
            burst_remaining: 0,
        }
    }

    pub fn mode(&self) -> PollingMode {
        self.mode
    }

    pub fn burst_remaining(&self) -> u32 {
        self.burst_remaining
    }

    pub fn current_interval(&self, snapshot: Option<&StatusSnapshot>) -> Duration {
        if self.burst_remaining > 0 {
            return self.burst.interval;
        }
        self.mode.interval_for(snapshot)
    }

    /// Start a burst. Returns `false` when burst mode is disabled.
    pub fn trigger_burst(&mut self) -> bool {
        if !self.burst.enabled || self.burst.polls == 0 {
            return false;
        }
        self.burst_remaining = self.burst.polls;
        true
    }

    /// Count one scheduled poll against the burst.
    pub fn complete_poll(&mut self) {
        self.burst_remaining = self.burst_remaining.saturating_sub(1);
    }
}

impl Default for PollScheduler {
    fn default() -> Self {
        Self::new(
            PollingMode::Fixed(Duration::from_secs(10)),
            BurstSettings::default(),
        )
    }
}
