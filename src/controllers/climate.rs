//! Climate (air conditioner) controller: mode, ambient and target temperature.

use anyhow::{Result, bail};
use async_trait::async_trait;
use log::{info, warn};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{cloud::ApplianceDescriptor, host::AccessoryHandle, registry::CapabilityState};

use super::DeviceController;

/// Mirrored characteristics of a climate unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClimateState {
    pub running: bool,
    pub mode: Option<String>,
    pub ambient_temperature_c: Option<f64>,
    pub target_temperature_c: Option<f64>,
}

/// Controller for the climate model family.
#[derive(Debug)]
pub struct ClimateController {
    identity: Uuid,
    display_name: String,
    supports_heating: bool,
    state: RwLock<ClimateState>,
}

impl ClimateController {
    pub fn new(
        handle: &AccessoryHandle,
        descriptor: &ApplianceDescriptor,
        capabilities: &CapabilityState,
    ) -> Self {
        // Heating is optional hardware; cooling-only units advertise no
        // "heat" entry in the capability mode list.
        let supports_heating = match capabilities {
            CapabilityState::Known(doc) => doc
                .pointer("/mode/values")
                .and_then(|v| v.as_array())
                .is_some_and(|modes| modes.iter().any(|m| m.as_str() == Some("heat"))),
            _ => false,
        };

        let controller = Self {
            identity: handle.identity,
            display_name: descriptor.display_name.clone(),
            supports_heating,
            state: RwLock::new(ClimateState::default()),
        };
        info!(
            "Climate unit '{}' mirrored (heating: {})",
            controller.display_name, controller.supports_heating
        );
        controller
    }

    /// Current characteristic snapshot.
    pub async fn snapshot(&self) -> ClimateState {
        self.state.read().await.clone()
    }
}

#[async_trait]
impl DeviceController for ClimateController {
    fn model(&self) -> &'static str {
        "climate"
    }

    async fn update(&self, descriptor: &ApplianceDescriptor) -> Result<()> {
        let status = &descriptor.status;
        if status.is_null() {
            return Ok(());
        }
        let Some(status) = status.as_object() else {
            bail!(
                "climate unit {} sent a non-object status document",
                descriptor.appliance_id
            );
        };

        let mode = status
            .get("mode")
            .and_then(|v| v.as_str())
            .map(str::to_owned);
        if mode.as_deref() == Some("heat") && !self.supports_heating {
            warn!(
                "'{}' reports heat mode but its capabilities exclude heating",
                self.display_name
            );
        }

        let next = ClimateState {
            running: status
                .get("applianceState")
                .and_then(|v| v.as_str())
                .is_some_and(|s| s == "running"),
            mode,
            ambient_temperature_c: status.get("ambientTemperatureC").and_then(|v| v.as_f64()),
            target_temperature_c: status.get("targetTemperatureC").and_then(|v| v.as_f64()),
        };

        let mut state = self.state.write().await;
        if *state != next {
            info!(
                "'{}' ({}): running={} mode={:?} ambient={:?} target={:?}",
                self.display_name,
                self.identity,
                next.running,
                next.mode,
                next.ambient_temperature_c,
                next.target_temperature_c
            );
        }
        *state = next;
        Ok(())
    }
}
