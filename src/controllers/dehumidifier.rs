//! Dehumidifier controller: humidity readings and water tank state.

use anyhow::{Result, bail};
use async_trait::async_trait;
use log::{info, warn};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{cloud::ApplianceDescriptor, host::AccessoryHandle, registry::CapabilityState};

use super::DeviceController;

/// Mirrored characteristics of a dehumidifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DehumidifierState {
    pub running: bool,
    pub humidity: Option<u64>,
    pub target_humidity: Option<u64>,
    pub water_tank_full: bool,
}

/// Controller for the dehumidifier model family.
#[derive(Debug)]
pub struct DehumidifierController {
    identity: Uuid,
    display_name: String,
    state: RwLock<DehumidifierState>,
}

impl DehumidifierController {
    pub fn new(
        handle: &AccessoryHandle,
        descriptor: &ApplianceDescriptor,
        _capabilities: &CapabilityState,
    ) -> Self {
        let controller = Self {
            identity: handle.identity,
            display_name: descriptor.display_name.clone(),
            state: RwLock::new(DehumidifierState::default()),
        };
        info!("Dehumidifier '{}' mirrored", controller.display_name);
        controller
    }

    /// Current characteristic snapshot.
    pub async fn snapshot(&self) -> DehumidifierState {
        self.state.read().await.clone()
    }
}

#[async_trait]
impl DeviceController for DehumidifierController {
    fn model(&self) -> &'static str {
        "dehumidifier"
    }

    async fn update(&self, descriptor: &ApplianceDescriptor) -> Result<()> {
        let status = &descriptor.status;
        if status.is_null() {
            return Ok(());
        }
        let Some(status) = status.as_object() else {
            bail!(
                "dehumidifier {} sent a non-object status document",
                descriptor.appliance_id
            );
        };

        let next = DehumidifierState {
            running: status
                .get("applianceState")
                .and_then(|v| v.as_str())
                .is_some_and(|s| s == "running"),
            humidity: status.get("sensorHumidity").and_then(|v| v.as_u64()),
            target_humidity: status.get("targetHumidity").and_then(|v| v.as_u64()),
            water_tank_full: status
                .get("waterTankFull")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        };

        let mut state = self.state.write().await;
        if next.water_tank_full && !state.water_tank_full {
            warn!("'{}' reports a full water tank", self.display_name);
        }
        if *state != next {
            info!(
                "'{}' ({}): running={} humidity={:?} target={:?} tank_full={}",
                self.display_name,
                self.identity,
                next.running,
                next.humidity,
                next.target_humidity,
                next.water_tank_full
            );
        }
        *state = next;
        Ok(())
    }
}
