//! Scheduled polling, availability tracking and change fan-out for one device.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::client::{DeviceApi, DeviceClient};
use crate::config::{DEFAULT_MAX_FAILURES, DeviceConfig};
use crate::diff::diff_snapshots;
use crate::fields::{CommandSpec, FieldTable};
use crate::scheduler::PollScheduler;
use crate::types::{Availability, Event, FieldValue, StatusSnapshot};
use crate::{Error, Result};

pub type EventCallback = Arc<dyn Fn(&Event) + Send + Sync>;
type Listeners = Mutex<Vec<(u64, EventCallback)>>;

const RESPONSE_TIME_WINDOW: usize = 100;
const REDACTED: &str = "**REDACTED**";
const REDACTED_KEYS: &[&str] = &["infra_ip", "key", "ssid"];

/// Poll counters kept for diagnostics. Serializes with the derived success
/// rate and average response time included.
#[derive(Debug, Clone, Default)]
pub struct PollStats {
    pub total_polls: u64,
    pub successful_polls: u64,
    pub failed_polls: u64,
    pub last_poll: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    response_times: VecDeque<Duration>,
}

#[derive(Serialize)]
struct PollStatsReport<'a> {
    total_polls: u64,
    successful_polls: u64,
    failed_polls: u64,
    last_poll: Option<&'a DateTime<Utc>>,
    last_success: Option<&'a DateTime<Utc>>,
    success_rate: Option<f64>,
    average_response_ms: Option<f64>,
}

impl Serialize for PollStats {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        PollStatsReport {
            total_polls: self.total_polls,
            successful_polls: self.successful_polls,
            failed_polls: self.failed_polls,
            last_poll: self.last_poll.as_ref(),
            last_success: self.last_success.as_ref(),
            success_rate: self.success_rate(),
            average_response_ms: self.average_response_ms(),
        }
        .serialize(serializer)
    }
}

impl PollStats {
    fn record_success(&mut self, elapsed: Duration) {
        let now = Utc::now();
        self.total_polls += 1;
        self.successful_polls += 1;
        self.last_poll = Some(now);
        self.last_success = Some(now);
        if self.response_times.len() == RESPONSE_TIME_WINDOW {
            self.response_times.pop_front();
        }
        self.response_times.push_back(elapsed);
    }

    fn record_failure(&mut self) {
        self.total_polls += 1;
        self.failed_polls += 1;
        self.last_poll = Some(Utc::now());
    }

    /// Mean response time over the most recent successful polls.
    pub fn average_response_ms(&self) -> Option<f64> {
        if self.response_times.is_empty() {
            return None;
        }
        let total: Duration = self.response_times.iter().sum();
        Some(total.as_secs_f64() * 1000.0 / self.response_times.len() as f64)
    }

    pub fn success_rate(&self) -> Option<f64> {
        (self.total_polls > 0).then(|| self.successful_polls as f64 / self.total_polls as f64)
    }
}

#[derive(Debug, Default)]
struct CoordinatorState {
    last_good: Option<Arc<StatusSnapshot>>,
    consecutive_failures: u32,
    availability: Availability,
}

struct Inner<C> {
    name: String,
    client: C,
    commands: CommandSpec,
    fields: FieldTable,
    max_failures: u32,
    state: RwLock<CoordinatorState>,
    scheduler: Mutex<PollScheduler>,
    stats: Mutex<PollStats>,
    listeners: Arc<Listeners>,
    next_listener_id: AtomicU64,
    cycle_gate: tokio::sync::Mutex<()>,
    reschedule: Notify,
}

impl<C: DeviceApi> Inner<C> {
    fn read_state(&self) -> RwLockReadGuard<'_, CoordinatorState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, CoordinatorState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn scheduler(&self) -> MutexGuard<'_, PollScheduler> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stats(&self) -> MutexGuard<'_, PollStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_interval(&self) -> Duration {
        let snapshot = self.read_state().last_good.clone();
        self.scheduler().current_interval(snapshot.as_deref())
    }

    /// One fetch with full state handling. Cycles are serialized by the gate.
    async fn refresh_cycle(&self) -> Result<Arc<StatusSnapshot>> {
        let _cycle = self.cycle_gate.lock().await;

        let started = Instant::now();
        let result = self.client.fetch_status().await;
        let elapsed = started.elapsed();

        match result {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                let event = self.record_success(Arc::clone(&snapshot), elapsed);
                // The new snapshot may select a different tier; restart the
                // loop's timer from this cycle.
                self.reschedule.notify_one();
                self.notify(&event);
                Ok(snapshot)
            }
            Err(e) => {
                if let Some(event) = self.record_failure(&e) {
                    self.notify(&event);
                }
                Err(e)
            }
        }
    }

    fn record_success(&self, snapshot: Arc<StatusSnapshot>, elapsed: Duration) -> Event {
        self.stats().record_success(elapsed);

        let changes = {
            let mut state = self.write_state();
            let changes = diff_snapshots(state.last_good.as_deref(), &snapshot);
            if state.availability == Availability::Unavailable {
                info!(
                    device = %self.name,
                    after_failures = state.consecutive_failures,
                    "device recovered"
                );
            }
            state.consecutive_failures = 0;
            state.last_good = Some(Arc::clone(&snapshot));
            state.availability = Availability::Available;
            changes
        };

        let next = self.scheduler().current_interval(Some(&snapshot));
        trace!(
            device = %self.name,
            elapsed_ms = elapsed.as_millis() as u64,
            changed = changes.len(),
            next_interval_secs = next.as_secs(),
            "poll succeeded"
        );

        Event::Updated { snapshot, changes }
    }

    fn record_failure(&self, error: &Error) -> Option<Event> {
        self.stats().record_failure();

        let mut state = self.write_state();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        let failures = state.consecutive_failures;

        if failures > self.max_failures {
            if state.availability == Availability::Unavailable {
                debug!(device = %self.name, failures, error = %error, "device still unavailable");
                return None;
            }
            state.availability = Availability::Unavailable;
            warn!(
                device = %self.name,
                failures,
                error = %error,
                "device unavailable"
            );
            return Some(Event::Unavailable {
                consecutive_failures: failures,
                reason: error.to_string(),
            });
        }

        if state.last_good.is_some() {
            state.availability = Availability::Degraded;
        }
        debug!(
            device = %self.name,
            failures,
            max_failures = self.max_failures,
            error = %error,
            "poll failed, keeping last snapshot"
        );
        None
    }

    fn notify(&self, event: &Event) {
        let listeners: Vec<EventCallback> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for cb in &listeners {
            cb(event);
        }
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(device = %self.name, "poll loop started");
        loop {
            let interval = self.current_interval();
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.reschedule.notified() => {
                    trace!(device = %self.name, "rescheduling poll");
                    continue;
                }
                _ = tokio::time::sleep(interval) => {}
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.refresh_cycle() => {}
            }
            self.scheduler().complete_poll();
        }
        info!(device = %self.name, "poll loop stopped");
    }
}

/// Handle returned by [`UpdateCoordinator::subscribe`]. Dropping it removes the
/// callback.
#[must_use = "dropping a Subscription unsubscribes the callback"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Keep the callback registered for the lifetime of the coordinator.
    pub fn detach(mut self) {
        self.listeners = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }
}

pub struct UpdateCoordinatorBuilder<C> {
    client: C,
    name: String,
    commands: CommandSpec,
    fields: FieldTable,
    max_failures: u32,
    scheduler: PollScheduler,
}

impl<C: DeviceApi> UpdateCoordinatorBuilder<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            name: "rixens".to_string(),
            commands: CommandSpec::default(),
            fields: FieldTable::default(),
            max_failures: DEFAULT_MAX_FAILURES,
            scheduler: PollScheduler::default(),
        }
    }

    /// Label used in log output and diagnostics.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn commands(mut self, commands: CommandSpec) -> Self {
        self.commands = commands;
        self
    }

    pub fn fields(mut self, fields: FieldTable) -> Self {
        self.fields = fields;
        self
    }

    /// Consecutive failed polls tolerated before the device is unavailable.
    pub fn max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures;
        self
    }

    pub fn scheduler(mut self, scheduler: PollScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn build(self) -> UpdateCoordinator<C> {
        UpdateCoordinator {
            inner: Arc::new(Inner {
                name: self.name,
                client: self.client,
                commands: self.commands,
                fields: self.fields,
                max_failures: self.max_failures,
                state: RwLock::new(CoordinatorState::default()),
                scheduler: Mutex::new(self.scheduler),
                stats: Mutex::new(PollStats::default()),
                listeners: Arc::new(Mutex::new(Vec::new())),
                next_listener_id: AtomicU64::new(0),
                cycle_gate: tokio::sync::Mutex::new(()),
                reschedule: Notify::new(),
            }),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }
}

/// Owns the poll loop and the last good snapshot for one device.
///
/// Starts in [`Availability::NoData`]; [`first_refresh`](Self::first_refresh)
/// must succeed before the device is reported available. After that, fetch
/// errors never reach callers of the loop: up to `max_failures` consecutive
/// failures keep the previous snapshot in place ([`Availability::Degraded`]),
/// one more marks the device [`Availability::Unavailable`] and emits a single
/// [`Event::Unavailable`]. The next successful poll recovers.
pub struct UpdateCoordinator<C: DeviceApi = DeviceClient> {
    inner: Arc<Inner<C>>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl UpdateCoordinator<DeviceClient> {
    /// Build the client and coordinator described by `config`, sharing `http`.
    pub fn from_config(config: &DeviceConfig, http: reqwest::Client) -> Result<Self> {
        config.validate()?;

        let mut client = DeviceClient::builder(&config.host)
            .port(config.port)
            .http_client(http)
            .timeout(config.timeout());
        if let Some(ref log) = config.message_log {
            client = client.message_log(log.mode, &log.path);
        }

        Ok(Self::builder(client.build()?)
            .name(config.display_name())
            .commands(config.command_spec())
            .fields(config.field_table())
            .max_failures(config.max_failures)
            .scheduler(config.scheduler())
            .build())
    }

    /// [`from_config`](Self::from_config) followed by the initial fetch. The
    /// loop is not started.
    pub async fn setup(config: &DeviceConfig, http: reqwest::Client) -> Result<Self> {
        let coordinator = Self::from_config(config, http)?;
        coordinator.first_refresh().await?;
        Ok(coordinator)
    }
}

impl<C: DeviceApi> UpdateCoordinator<C> {
    pub fn builder(client: C) -> UpdateCoordinatorBuilder<C> {
        UpdateCoordinatorBuilder::new(client)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn client(&self) -> &C {
        &self.inner.client
    }

    /// Initial fetch. Unlike scheduled polls, the error is returned.
    pub async fn first_refresh(&self) -> Result<()> {
        match self.inner.refresh_cycle().await {
            Ok(snapshot) => {
                info!(
                    device = %self.inner.name,
                    fields = snapshot.len(),
                    version = snapshot.version().unwrap_or("unknown"),
                    "initial status fetched"
                );
                Ok(())
            }
            Err(e) => {
                warn!(device = %self.inner.name, error = %e, "initial status fetch failed");
                Err(e)
            }
        }
    }

    /// Spawn the scheduled poll loop. Calling it while the loop runs is a no-op.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(inner.run(self.shutdown.clone())));
    }

    /// Stop the poll loop and wait for it to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(device = %self.inner.name, error = %e, "poll task ended abnormally");
        }
    }

    /// Out-of-band poll, handled exactly like a scheduled one.
    pub async fn request_refresh(&self) {
        let _ = self.inner.refresh_cycle().await;
    }

    /// Switch to the burst interval and wake the loop to pick it up.
    pub fn trigger_burst(&self) {
        if self.inner.scheduler().trigger_burst() {
            debug!(device = %self.inner.name, "burst polling triggered");
            self.inner.reschedule.notify_one();
        }
    }

    /// Send `value` (in presentation units) for the writable field `key`.
    ///
    /// An unmapped key or a value outside the field's range fails with
    /// [`Error::Configuration`] before anything is sent. A rejected or failed command returns `Ok(false)`. On success a
    /// burst is triggered and the status is refreshed before returning.
    pub async fn set_parameter(&self, key: &str, value: f64) -> Result<bool> {
        let act_id = self.inner.commands.act_id(key)?;
        self.inner.fields.check_write(key, value)?;
        let raw = self.inner.fields.scaling(key).write(value)?;
        debug!(device = %self.inner.name, key, value, act = act_id, raw, "set parameter");

        if !self.inner.client.set_parameter(act_id, raw).await {
            return Ok(false);
        }
        self.trigger_burst();
        self.request_refresh().await;
        Ok(true)
    }

    pub fn latest_snapshot(&self) -> Option<Arc<StatusSnapshot>> {
        self.inner.read_state().last_good.clone()
    }

    pub fn availability(&self) -> Availability {
        self.inner.read_state().availability
    }

    pub fn is_available(&self) -> bool {
        self.availability().is_available()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.read_state().consecutive_failures
    }

    /// Interval the loop will sleep before its next scheduled poll.
    pub fn current_interval(&self) -> Duration {
        self.inner.current_interval()
    }

    /// Scaled value of `key` from the latest snapshot.
    pub fn value(&self, key: &str) -> Option<FieldValue> {
        let snapshot = self.latest_snapshot()?;
        self.inner.fields.read(key, &snapshot)
    }

    pub fn stats(&self) -> PollStats {
        self.inner.stats().clone()
    }

    /// Register `callback` for [`Event`]s. Callbacks run synchronously on the
    /// polling task after the state has been updated.
    pub fn subscribe(&self, callback: impl Fn(&Event) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.inner.listeners),
        }
    }

    /// State dump with network identifiers redacted.
    pub fn diagnostics(&self) -> Value {
        let (availability, failures, data) = {
            let state = self.inner.read_state();
            (
                state.availability,
                state.consecutive_failures,
                state.last_good.as_deref().map(redact),
            )
        };
        let stats = self.stats();
        let interval = self.current_interval();
        let burst_remaining = self.inner.scheduler().burst_remaining();
        json!({
            "name": self.inner.name,
            "availability": availability,
            "consecutive_failures": failures,
            "max_failures": self.inner.max_failures,
            "current_interval_secs": interval.as_secs(),
            "burst_remaining": burst_remaining,
            "stats": stats,
            "data": data,
        })
    }
}

impl<C: DeviceApi> Drop for UpdateCoordinator<C> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn is_redacted(key: &str) -> bool {
    REDACTED_KEYS
        .iter()
        .any(|r| key == *r || key.strip_suffix(r).is_some_and(|p| p.ends_with('_')))
}

fn redact(snapshot: &StatusSnapshot) -> Value {
    let mut map = Map::new();
    for (key, value) in snapshot.iter() {
        let value = if is_redacted(key) {
            Value::String(REDACTED.to_string())
        } else {
            json!(value)
        };
        map.insert(key.to_string(), value);
    }
    Value::Object(map)
}
