//! Per-model device controllers and the model dispatch factory.
//!
//! Each supported appliance model gets its own controller translating polled
//! status documents into host-visible characteristic state. Command semantics
//! live on the other side of the host framework and are not part of this
//! daemon.

pub mod air_purifier;
pub mod climate;
pub mod dehumidifier;

use anyhow::Result;
use async_trait::async_trait;

use crate::{cloud::ApplianceDescriptor, host::AccessoryHandle, registry::CapabilityState};

pub use air_purifier::AirPurifierController;
pub use climate::ClimateController;
pub use dehumidifier::DehumidifierController;

/// Trait for per-model appliance controllers.
///
/// A controller is constructed once per reconciliation with the resolved
/// capability document and afterwards only consumes fresh descriptors from
/// the polling cycle.
#[async_trait]
pub trait DeviceController: Send + Sync + core::fmt::Debug {
    /// Model family this controller handles.
    fn model(&self) -> &'static str;

    /// Applies a freshly polled descriptor to the mirrored characteristics.
    async fn update(&self, descriptor: &ApplianceDescriptor) -> Result<()>;
}

/// Closed set of appliance models this daemon can mirror.
///
/// Unknown model tags are a handled `None` from [`SupportedModel::for_model_name`],
/// never a crash: the reconciliation engine skips such appliances entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportedModel {
    AirPurifier,
    Climate,
    Dehumidifier,
}

impl SupportedModel {
    /// Maps a remote model tag to a supported model family.
    pub fn for_model_name(model_name: &str) -> Option<Self> {
        match model_name {
            "PURE500" | "BREEZE7" => Some(Self::AirPurifier),
            "COMFORT600" => Some(Self::Climate),
            "DRY300" => Some(Self::Dehumidifier),
            _ => None,
        }
    }

    /// Constructs the controller for this model.
    pub fn build(
        self,
        handle: &AccessoryHandle,
        descriptor: &ApplianceDescriptor,
        capabilities: &CapabilityState,
    ) -> Box<dyn DeviceController> {
        match self {
            Self::AirPurifier => Box::new(AirPurifierController::new(
                handle,
                descriptor,
                capabilities,
            )),
            Self::Climate => Box::new(ClimateController::new(handle, descriptor, capabilities)),
            Self::Dehumidifier => {
                Box::new(DehumidifierController::new(handle, descriptor, capabilities))
            }
        }
    }
}
