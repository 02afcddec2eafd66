//! In-memory accessory registry: the local mirror of the remote fleet.

use uuid::Uuid;

use crate::{
    cloud::ApplianceDescriptor,
    controllers::DeviceController,
    host::AccessoryHandle,
};

/// Capability classification for one appliance.
///
/// Three states, deliberately not a boolean: `Unknown` means the document
/// was never fetched and the next discovery pass must fetch it; `Unsupported`
/// is a cached, final classification and must not trigger another fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum CapabilityState {
    /// Not fetched yet.
    Unknown,
    /// Fetch failed or the cloud reported no document; the appliance stays
    /// usable with reduced functionality.
    Unsupported,
    /// Capability document as returned by the cloud.
    Known(serde_json::Value),
}

impl CapabilityState {
    /// True only for [`CapabilityState::Unknown`]; the one state that
    /// requires a capability fetch.
    pub fn needs_fetch(&self) -> bool {
        matches!(self, CapabilityState::Unknown)
    }
}

/// Local record of one remote appliance.
///
/// Owned exclusively by [`AccessoryRegistry`]. Created fresh when an
/// appliance id is first seen, or restored from the persisted accessory cache
/// with the controller absent until a discovery pass supplies descriptor and
/// capabilities.
pub struct AccessoryRecord {
    pub identity: Uuid,
    pub descriptor: ApplianceDescriptor,
    pub capabilities: CapabilityState,
    pub controller: Option<Box<dyn DeviceController>>,
    pub handle: AccessoryHandle,
}

impl AccessoryRecord {
    /// Rebuilds a record from a handle replayed by the host, honoring the
    /// capability classification cached in its context blob.
    ///
    /// Returns `None` when the context blob carries no descriptor; such a
    /// handle cannot be mirrored until discovery sees the appliance again.
    pub fn restored(handle: AccessoryHandle) -> Option<Self> {
        let descriptor = handle.cached_descriptor()?;
        Some(Self {
            identity: handle.identity,
            capabilities: handle.cached_capabilities(),
            descriptor,
            controller: None,
            handle,
        })
    }
}

/// Insertion-ordered collection of accessory records, keyed by identity.
///
/// Records are never removed during normal operation; appliances that
/// disappear from the remote listing are left stale.
#[derive(Default)]
pub struct AccessoryRegistry {
    records: Vec<AccessoryRecord>,
}

impl AccessoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: AccessoryRecord) {
        self.records.push(record);
    }

    pub fn get(&self, identity: Uuid) -> Option<&AccessoryRecord> {
        self.records.iter().find(|r| r.identity == identity)
    }

    pub fn get_mut(&mut self, identity: Uuid) -> Option<&mut AccessoryRecord> {
        self.records.iter_mut().find(|r| r.identity == identity)
    }

    pub fn contains(&self, identity: Uuid) -> bool {
        self.get(identity).is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AccessoryRecord> {
        self.records.iter()
    }
}
