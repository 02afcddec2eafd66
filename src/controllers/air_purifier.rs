//! Air purifier controller: fan speed, air quality, filter life.

use anyhow::{Result, bail};
use async_trait::async_trait;
use log::{info, warn};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{cloud::ApplianceDescriptor, host::AccessoryHandle, registry::CapabilityState};

use super::DeviceController;

/// Fan speed ceiling assumed when the capability document does not carry one.
const DEFAULT_MAX_FAN_SPEED: u64 = 5;

/// Mirrored characteristics of an air purifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PurifierState {
    pub running: bool,
    pub fan_speed: Option<u64>,
    pub pm25: Option<u64>,
    pub filter_life: Option<u64>,
}

/// Controller for the air purifier model family.
#[derive(Debug)]
pub struct AirPurifierController {
    identity: Uuid,
    display_name: String,
    max_fan_speed: u64,
    state: RwLock<PurifierState>,
}

impl AirPurifierController {
    pub fn new(
        handle: &AccessoryHandle,
        descriptor: &ApplianceDescriptor,
        capabilities: &CapabilityState,
    ) -> Self {
        let max_fan_speed = match capabilities {
            CapabilityState::Known(doc) => doc
                .pointer("/fanSpeed/max")
                .and_then(|v| v.as_u64())
                .unwrap_or(DEFAULT_MAX_FAN_SPEED),
            _ => DEFAULT_MAX_FAN_SPEED,
        };

        let controller = Self {
            identity: handle.identity,
            display_name: descriptor.display_name.clone(),
            max_fan_speed,
            state: RwLock::new(PurifierState::default()),
        };
        info!(
            "Air purifier '{}' mirrored (max fan speed {})",
            controller.display_name, controller.max_fan_speed
        );
        controller
    }

    /// Current characteristic snapshot.
    pub async fn snapshot(&self) -> PurifierState {
        self.state.read().await.clone()
    }
}

#[async_trait]
impl DeviceController for AirPurifierController {
    fn model(&self) -> &'static str {
        "air-purifier"
    }

    async fn update(&self, descriptor: &ApplianceDescriptor) -> Result<()> {
        let status = &descriptor.status;
        if status.is_null() {
            return Ok(());
        }
        let Some(status) = status.as_object() else {
            bail!(
                "air purifier {} sent a non-object status document",
                descriptor.appliance_id
            );
        };

        let mut next = PurifierState {
            running: status
                .get("applianceState")
                .and_then(|v| v.as_str())
                .is_some_and(|s| s == "running"),
            fan_speed: status.get("fanSpeed").and_then(|v| v.as_u64()),
            pm25: status.get("PM2_5").and_then(|v| v.as_u64()),
            filter_life: status.get("filterLife").and_then(|v| v.as_u64()),
        };

        if let Some(speed) = next.fan_speed {
            if speed > self.max_fan_speed {
                warn!(
                    "'{}' reports fan speed {} above capability max {}, clamping",
                    self.display_name, speed, self.max_fan_speed
                );
                next.fan_speed = Some(self.max_fan_speed);
            }
        }

        let mut state = self.state.write().await;
        if *state != next {
            info!(
                "'{}' ({}): running={} fan_speed={:?} pm25={:?}",
                self.display_name, self.identity, next.running, next.fan_speed, next.pm25
            );
        }
        *state = next;
        Ok(())
    }
}
