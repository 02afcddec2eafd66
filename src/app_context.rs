//! Application state and global context management.

use std::{
    path::PathBuf,
    sync::{Arc, atomic::AtomicBool},
};

use anyhow::Result;
use log::{info, warn};
use tokio::sync::{Mutex, RwLock};

use crate::{
    cloud::{ApplianceApi, http::HttpApplianceApi},
    config::ConfigManager,
    host::{AccessoryHost, FileHost},
    registry::{AccessoryRecord, AccessoryRegistry},
    session::TokenStore,
};

/// Shared application state containing all runtime data.
///
/// This structure holds the shared state needed by the polling and
/// reconciliation services. All mutable fields are wrapped in appropriate
/// synchronization primitives for safe concurrent access.
pub struct AppState {
    /// Configuration manager for centralized config handling
    pub config_manager: Arc<ConfigManager>,
    /// Cloud API collaborator
    pub cloud: Arc<dyn ApplianceApi>,
    /// Session lifecycle and credential state
    pub token_store: Arc<TokenStore>,
    /// Host accessory framework seam
    pub host: Arc<dyn AccessoryHost>,
    /// Local mirror of the remote fleet
    pub registry: Arc<RwLock<AccessoryRegistry>>,
    /// Set after the first discovery pass finishes; cleared never.
    pub devices_discovered: AtomicBool,
    /// Serializes polling ticks so a slow cycle is never overlapped.
    pub tick_guard: Mutex<()>,
}

impl AppState {
    /// Creates a new AppState from the given configuration manager,
    /// constructing the real cloud client and the file-backed accessory
    /// cache.
    pub async fn new(config_manager: Arc<ConfigManager>) -> Result<Self> {
        let config = config_manager.clone_config().await;

        let cloud: Arc<dyn ApplianceApi> = Arc::new(HttpApplianceApi::new(
            config.auth_url.clone(),
            config.api_key.clone(),
        ));
        let cache_path = match &config.accessory_cache {
            Some(path) => path.clone(),
            None => Self::default_cache_path(&config_manager),
        };
        let host: Arc<dyn AccessoryHost> = Arc::new(FileHost::load(cache_path)?);

        Ok(Self::with_collaborators(
            config_manager,
            cloud,
            host,
            &config.base_url,
        ))
    }

    /// Assembles the state around externally supplied collaborators.
    pub fn with_collaborators(
        config_manager: Arc<ConfigManager>,
        cloud: Arc<dyn ApplianceApi>,
        host: Arc<dyn AccessoryHost>,
        fallback_base_url: &str,
    ) -> Self {
        let token_store = Arc::new(TokenStore::new(cloud.clone(), fallback_base_url));
        Self {
            config_manager,
            cloud,
            token_store,
            host,
            registry: Arc::new(RwLock::new(AccessoryRegistry::new())),
            devices_discovered: AtomicBool::new(false),
            tick_guard: Mutex::new(()),
        }
    }

    fn default_cache_path(config_manager: &ConfigManager) -> PathBuf {
        config_manager
            .path()
            .parent()
            .map(|dir| dir.join("accessories.json"))
            .unwrap_or_else(|| PathBuf::from("accessories.json"))
    }

    /// Replays accessories persisted by a previous process lifetime into the
    /// registry so their capability classification survives the restart.
    ///
    /// Handles without a cached descriptor are skipped with a warning; they
    /// are picked up again once discovery sees the appliance.
    pub async fn restore_cached_accessories(&self) {
        let mut registry = self.registry.write().await;
        for handle in self.host.cached_accessories() {
            if registry.contains(handle.identity) {
                continue;
            }
            let identity = handle.identity;
            match AccessoryRecord::restored(handle) {
                Some(record) => {
                    info!(
                        "Restored accessory '{}' ({})",
                        record.descriptor.display_name, record.identity
                    );
                    registry.insert(record);
                }
                None => warn!("Cached accessory {identity} has no usable context, skipping"),
            }
        }
        info!("Registry holds {} restored accessories", registry.len());
    }
}
