use std::collections::HashMap;
use std::fmt;

use tracing::info;
use uuid::Uuid;

use crate::Result;
use crate::config::DeviceConfig;
use crate::coordinator::UpdateCoordinator;

/// Identifier of a configured device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(Uuid);

impl EntryId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Running coordinators, one per configured device, sharing one HTTP pool.
pub struct DeviceRegistry {
    http: reqwest::Client,
    devices: HashMap<EntryId, UpdateCoordinator>,
}

impl DeviceRegistry {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            devices: HashMap::new(),
        }
    }

    /// Set up a coordinator for `config` and start its poll loop. Nothing is
    /// registered when the initial fetch fails.
    pub async fn add(&mut self, config: &DeviceConfig) -> Result<EntryId> {
        let coordinator = UpdateCoordinator::setup(config, self.http.clone()).await?;
        coordinator.start();

        let id = EntryId::new();
        info!(entry = %id, device = coordinator.name(), "device added");
        self.devices.insert(id, coordinator);
        Ok(id)
    }

    pub fn get(&self, id: EntryId) -> Option<&UpdateCoordinator> {
        self.devices.get(&id)
    }

    /// Stop and forget a device. Returns `false` for an unknown id.
    pub async fn remove(&mut self, id: EntryId) -> bool {
        let Some(coordinator) = self.devices.remove(&id) else {
            return false;
        };
        coordinator.shutdown().await;
        info!(entry = %id, device = coordinator.name(), "device removed");
        true
    }

    pub fn ids(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.devices.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub async fn shutdown_all(&mut self) {
        for (_, coordinator) in self.devices.drain() {
            coordinator.shutdown().await;
        }
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}
