//! Discovery reconciliation: matching the remote appliance listing against
//! the local registry, resolving capabilities cache-first, and registering
//! new accessories with the host.

use std::sync::{Arc, atomic::Ordering};

use anyhow::{Context, Result};
use log::{debug, error, info, warn};

use crate::{
    app_context::AppState,
    cloud::{self, ApplianceDescriptor, CloudError},
    controllers::SupportedModel,
    registry::{AccessoryRecord, CapabilityState},
    session::Authorization,
};

/// Runs discovery passes against the shared application state.
///
/// Each appliance in the listing is reconciled independently; one failing
/// appliance never aborts the pass for the rest.
pub struct ReconciliationEngine {
    state: Arc<AppState>,
}

impl ReconciliationEngine {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// One discovery pass. Returns the number of appliances reconciled.
    ///
    /// Without a session the pass is deferred, not failed: the next cycle
    /// retries once the token phase has produced credentials. The listing
    /// call is the only step that fails the pass as a whole.
    pub async fn discover(&self) -> Result<usize> {
        let Some(auth) = self.state.token_store.authorization().await else {
            info!("No cloud session yet, deferring discovery");
            return Ok(0);
        };

        let listing = self
            .state
            .cloud
            .list_appliances(&auth.access_token, &auth.base_url)
            .await
            .context("appliance listing")?;
        info!("Remote listing returned {} appliances", listing.len());

        let mut reconciled = 0;
        for descriptor in &listing {
            match self.reconcile_appliance(descriptor, &auth).await {
                Ok(true) => reconciled += 1,
                Ok(false) => {}
                Err(e) => error!(
                    "Failed to reconcile appliance {}: {}",
                    descriptor.appliance_id,
                    cloud::describe(&e)
                ),
            }
        }

        self.state.devices_discovered.store(true, Ordering::Release);
        info!("Discovery pass reconciled {reconciled} appliances");
        Ok(reconciled)
    }

    /// Reconciles one appliance. `Ok(false)` means the model is not in the
    /// factory registry and the appliance was skipped entirely.
    async fn reconcile_appliance(
        &self,
        descriptor: &ApplianceDescriptor,
        auth: &Authorization,
    ) -> Result<bool> {
        let Some(model) = SupportedModel::for_model_name(&descriptor.model_name) else {
            warn!(
                "Appliance {} has unsupported model '{}', skipping",
                descriptor.appliance_id, descriptor.model_name
            );
            return Ok(false);
        };

        let identity = self.state.host.derive_identity(&descriptor.appliance_id);

        // Cache-first: a previously classified appliance, including the
        // explicit unsupported marker, never costs another network call.
        let cached = {
            let registry = self.state.registry.read().await;
            registry.get(identity).map(|r| r.capabilities.clone())
        };
        let capabilities = match cached {
            Some(caps) if !caps.needs_fetch() => caps,
            _ => self.resolve_capabilities(&descriptor.appliance_id, auth).await,
        };

        let mut registry = self.state.registry.write().await;
        match registry.get_mut(identity) {
            Some(record) => {
                record.descriptor = descriptor.clone();
                record.capabilities = capabilities;
                record.controller =
                    Some(model.build(&record.handle, descriptor, &record.capabilities));
                record.handle.store_context(descriptor, &record.capabilities);
                self.state
                    .host
                    .persist_context(&record.handle)
                    .with_context(|| {
                        format!("persisting context for {}", descriptor.appliance_id)
                    })?;
            }
            None => {
                let mut handle = self
                    .state
                    .host
                    .create_handle(&descriptor.display_name, identity);
                handle.store_context(descriptor, &capabilities);
                let controller = model.build(&handle, descriptor, &capabilities);
                self.state
                    .host
                    .register_accessories(std::slice::from_ref(&handle))
                    .with_context(|| {
                        format!("registering accessory for {}", descriptor.appliance_id)
                    })?;
                registry.insert(AccessoryRecord {
                    identity,
                    descriptor: descriptor.clone(),
                    capabilities,
                    controller: Some(controller),
                    handle,
                });
            }
        }
        Ok(true)
    }

    /// Fetches the capability document for an appliance.
    ///
    /// Any failure, not-found included, classifies the appliance as
    /// unsupported rather than failing reconciliation; it stays mirrored
    /// with reduced functionality.
    async fn resolve_capabilities(
        &self,
        appliance_id: &str,
        auth: &Authorization,
    ) -> CapabilityState {
        match self
            .state
            .cloud
            .get_capabilities(appliance_id, &auth.access_token, &auth.base_url)
            .await
        {
            Ok(doc) => CapabilityState::Known(doc),
            Err(CloudError::NotFound) => {
                debug!("Appliance {appliance_id} has no capability document");
                CapabilityState::Unsupported
            }
            Err(e) => {
                warn!("Capability fetch for {appliance_id} failed: {e}");
                CapabilityState::Unsupported
            }
        }
    }
}
