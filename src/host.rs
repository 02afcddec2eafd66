//! Host accessory framework seam: identity derivation, handle creation, and
//! the persisted accessory cache replayed across restarts.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::{Context, Result, bail};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{cloud::ApplianceDescriptor, registry::CapabilityState};

/// Namespace for deriving accessory identities from appliance ids.
const IDENTITY_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6b, 0x1e, 0x0a, 0x52, 0x9c, 0x47, 0x4d, 0x0f, 0x8a, 0x3d, 0x5e, 0x21, 0x7f, 0x0c, 0x44,
    0x9b,
]);

/// Local accessory representation handed out by the host.
///
/// The `context` blob is mutable and persisted by the host across process
/// restarts; the daemon caches the appliance identity and its capability
/// classification in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessoryHandle {
    pub identity: Uuid,
    pub display_name: String,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl AccessoryHandle {
    /// Records the descriptor and capability classification in the persisted
    /// context blob. An unknown capability state stores nothing, so a restart
    /// still triggers a fetch; an unsupported one stores an explicit null.
    pub fn store_context(
        &mut self,
        descriptor: &ApplianceDescriptor,
        capabilities: &CapabilityState,
    ) {
        self.context.insert(
            "applianceId".to_string(),
            Value::String(descriptor.appliance_id.clone()),
        );
        self.context.insert(
            "modelName".to_string(),
            Value::String(descriptor.model_name.clone()),
        );
        match capabilities {
            CapabilityState::Unknown => {
                self.context.remove("capabilities");
            }
            CapabilityState::Unsupported => {
                self.context.insert("capabilities".to_string(), Value::Null);
            }
            CapabilityState::Known(doc) => {
                self.context
                    .insert("capabilities".to_string(), doc.clone());
            }
        }
    }

    /// Capability classification cached in the context blob.
    ///
    /// A missing key means never fetched; an explicit null means the
    /// appliance was classified as unsupported. The two must not collapse.
    pub fn cached_capabilities(&self) -> CapabilityState {
        match self.context.get("capabilities") {
            None => CapabilityState::Unknown,
            Some(Value::Null) => CapabilityState::Unsupported,
            Some(doc) => CapabilityState::Known(doc.clone()),
        }
    }

    /// Reconstructs a descriptor from the context blob, if one was cached.
    pub fn cached_descriptor(&self) -> Option<ApplianceDescriptor> {
        let appliance_id = self.context.get("applianceId")?.as_str()?.to_string();
        let model_name = self.context.get("modelName")?.as_str()?.to_string();
        Some(ApplianceDescriptor {
            appliance_id,
            model_name,
            display_name: self.display_name.clone(),
            status: Value::Null,
        })
    }
}

/// Host accessory framework operations.
///
/// Identity derivation is deterministic so the same appliance maps to the
/// same accessory across restarts.
pub trait AccessoryHost: Send + Sync {
    fn derive_identity(&self, appliance_id: &str) -> Uuid {
        Uuid::new_v5(&IDENTITY_NAMESPACE, appliance_id.as_bytes())
    }

    fn create_handle(&self, display_name: &str, identity: Uuid) -> AccessoryHandle {
        AccessoryHandle {
            identity,
            display_name: display_name.to_string(),
            context: Map::new(),
        }
    }

    /// Registers new accessories. Registering an identity twice is an error.
    fn register_accessories(&self, handles: &[AccessoryHandle]) -> Result<()>;

    /// Persists an updated context blob for an already-registered accessory.
    fn persist_context(&self, handle: &AccessoryHandle) -> Result<()>;

    /// Accessories persisted by a previous process lifetime.
    fn cached_accessories(&self) -> Vec<AccessoryHandle>;
}

/// File-backed accessory cache.
///
/// Stores registered handles as a JSON array and rewrites the file with a
/// tmp+rename so a crash mid-save never corrupts the cache.
pub struct FileHost {
    path: PathBuf,
    entries: Mutex<Vec<AccessoryHandle>>,
}

impl FileHost {
    /// Opens the cache at `path`, loading any previously persisted entries.
    pub fn load(path: PathBuf) -> Result<Self> {
        let entries: Vec<AccessoryHandle> = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read accessory cache: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Malformed accessory cache: {}", path.display()))?
        } else {
            Vec::new()
        };

        info!(
            "Accessory cache at {} holds {} entries",
            path.display(),
            entries.len()
        );

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn save(&self, entries: &[AccessoryHandle], path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(entries)
            .context("Failed to serialize accessory cache")?;

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json).with_context(|| {
            format!("Failed to write temporary cache to {}", tmp_path.display())
        })?;

        fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to move cache to {}", path.display()))?;

        Ok(())
    }
}

impl AccessoryHost for FileHost {
    fn register_accessories(&self, handles: &[AccessoryHandle]) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        for handle in handles {
            if entries.iter().any(|e| e.identity == handle.identity) {
                bail!("accessory {} is already registered", handle.identity);
            }
            info!(
                "Registering accessory '{}' ({})",
                handle.display_name, handle.identity
            );
            entries.push(handle.clone());
        }
        self.save(&entries, &self.path)
    }

    fn persist_context(&self, handle: &AccessoryHandle) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        match entries.iter_mut().find(|e| e.identity == handle.identity) {
            Some(entry) => *entry = handle.clone(),
            None => bail!("accessory {} is not registered", handle.identity),
        }
        self.save(&entries, &self.path)
    }

    fn cached_accessories(&self) -> Vec<AccessoryHandle> {
        self.entries.lock().unwrap().clone()
    }
}
