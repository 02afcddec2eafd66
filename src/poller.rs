//! Recurring polling cycle: token phase, discovery phase, status poll phase.

use std::{sync::Arc, sync::atomic::Ordering, time::SystemTime};

use anyhow::{Context, Result};
use futures::future::join_all;
use log::{debug, error, info};

use crate::{
    app_context::AppState,
    cloud,
    event::{Event, EventBus},
    reconcile::ReconciliationEngine,
};

/// Drives the recurring polling cycle against the shared state.
///
/// A tick runs three phases in order behind one failure boundary: renew the
/// session if it expired, run discovery if none has completed yet, otherwise
/// poll appliance status. Any phase error ends the tick; the next tick fires
/// unconditionally on the fixed interval.
pub struct PollingScheduler {
    state: Arc<AppState>,
    engine: ReconciliationEngine,
    event_bus: EventBus,
}

impl PollingScheduler {
    pub fn new(state: Arc<AppState>, event_bus: EventBus) -> Self {
        let engine = ReconciliationEngine::new(state.clone());
        Self {
            state,
            engine,
            event_bus,
        }
    }

    /// One best-effort session-then-discover sequence before the interval
    /// starts. Failures are logged, never propagated: the first tick retries.
    pub async fn startup(&self) {
        let seed = self.state.config_manager.get().await.refresh_token.clone();
        match self.state.token_store.bootstrap(seed.as_deref()).await {
            Ok(()) => {
                let _ = self.event_bus.publish(Event::SessionRefreshed);
            }
            Err(e) => {
                error!("Startup session bootstrap failed: {}", cloud::describe(&e));
                return;
            }
        }

        match self.engine.discover().await {
            Ok(count) => {
                let _ = self.event_bus.publish(Event::DiscoveryCompleted(count));
            }
            Err(e) => error!("Startup discovery failed: {}", cloud::describe(&e)),
        }
    }

    /// One polling tick.
    ///
    /// Ticks are serialized behind the state's tick guard: a slow cycle
    /// delays the next one instead of overlapping it, so registry mutation
    /// and host registration stay single-writer.
    pub async fn tick(&self) -> Result<()> {
        let _cycle = self.state.tick_guard.lock().await;

        if self.state.token_store.is_expired(SystemTime::now()).await {
            self.renew_session().await.context("session renewal")?;
            let _ = self.event_bus.publish(Event::SessionRefreshed);
        }

        if !self.state.devices_discovered.load(Ordering::Acquire) {
            let count = self.engine.discover().await.context("discovery pass")?;
            let _ = self.event_bus.publish(Event::DiscoveryCompleted(count));
            return Ok(());
        }

        self.poll_status().await
    }

    /// Renews the session. A store that never held a session falls back to
    /// the bootstrap path, since there is no refresh token to rotate.
    async fn renew_session(&self) -> Result<()> {
        if self.state.token_store.authorization().await.is_some() {
            self.state.token_store.refresh().await
        } else {
            let seed = self.state.config_manager.get().await.refresh_token.clone();
            self.state.token_store.bootstrap(seed.as_deref()).await
        }
    }

    /// Lightweight status pass: refreshes descriptors for known records and
    /// feeds them to their controllers. Listing entries without a matching
    /// record are ignored; only discovery adds accessories.
    async fn poll_status(&self) -> Result<()> {
        let Some(auth) = self.state.token_store.authorization().await else {
            debug!("No session for status poll, skipping");
            return Ok(());
        };

        let listing = self
            .state
            .cloud
            .list_appliances(&auth.access_token, &auth.base_url)
            .await
            .context("status listing")?;

        let mut refreshed = Vec::new();
        {
            let mut registry = self.state.registry.write().await;
            for descriptor in listing {
                let identity = self.state.host.derive_identity(&descriptor.appliance_id);
                match registry.get_mut(identity) {
                    Some(record) => {
                        record.descriptor = descriptor;
                        refreshed.push(identity);
                    }
                    None => debug!(
                        "Appliance {} not yet mirrored, ignoring until next discovery",
                        descriptor.appliance_id
                    ),
                }
            }
        }

        // Fan out the controller updates and wait for all of them to settle;
        // one rejected update never cancels the others.
        let registry = self.state.registry.read().await;
        let updates = refreshed
            .iter()
            .filter_map(|identity| registry.get(*identity))
            .filter_map(|record| {
                record.controller.as_ref().map(|controller| async move {
                    (
                        record.descriptor.appliance_id.as_str(),
                        controller.update(&record.descriptor).await,
                    )
                })
            });
        for (appliance_id, result) in join_all(updates).await {
            if let Err(e) = result {
                error!(
                    "Status update for {appliance_id} failed: {}",
                    cloud::describe(&e)
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{ApplianceApi, ApplianceDescriptor, CloudError, SessionTokens};
    use crate::config::{Config, ConfigManager};
    use crate::host::{AccessoryHandle, AccessoryHost};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use std::path::PathBuf;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicU32;

    // Mock cloud recording the order of operations across phases.
    struct ScriptedCloud {
        appliances: StdMutex<Vec<ApplianceDescriptor>>,
        operations: StdMutex<Vec<String>>,
        exchange_count: AtomicU32,
        fail_refresh: StdMutex<bool>,
        fail_sign_in: StdMutex<bool>,
        expires_in: StdMutex<u64>,
    }

    impl ScriptedCloud {
        fn new(appliances: Vec<ApplianceDescriptor>) -> Self {
            Self {
                appliances: StdMutex::new(appliances),
                operations: StdMutex::new(Vec::new()),
                exchange_count: AtomicU32::new(0),
                fail_refresh: StdMutex::new(false),
                fail_sign_in: StdMutex::new(false),
                expires_in: StdMutex::new(3600),
            }
        }

        fn record(&self, op: &str) {
            self.operations.lock().unwrap().push(op.to_string());
        }

        fn operations(&self) -> Vec<String> {
            self.operations.lock().unwrap().clone()
        }

        fn issue(&self) -> SessionTokens {
            let n = self.exchange_count.fetch_add(1, Ordering::SeqCst) + 1;
            SessionTokens {
                access_token: format!("access-{n}"),
                refresh_token: format!("refresh-{n}"),
                expires_in: *self.expires_in.lock().unwrap(),
                regional_base_url: None,
            }
        }
    }

    #[async_trait]
    impl ApplianceApi for ScriptedCloud {
        async fn sign_in(&self) -> Result<SessionTokens, CloudError> {
            self.record("sign_in");
            if *self.fail_sign_in.lock().unwrap() {
                return Err(CloudError::Auth("rejected".to_string()));
            }
            Ok(self.issue())
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<SessionTokens, CloudError> {
            self.record("refresh");
            if *self.fail_refresh.lock().unwrap() {
                return Err(CloudError::Auth("token revoked".to_string()));
            }
            Ok(self.issue())
        }

        async fn list_appliances(
            &self,
            _access_token: &str,
            _base_url: &str,
        ) -> Result<Vec<ApplianceDescriptor>, CloudError> {
            self.record("list");
            Ok(self.appliances.lock().unwrap().clone())
        }

        async fn get_capabilities(
            &self,
            appliance_id: &str,
            _access_token: &str,
            _base_url: &str,
        ) -> Result<Value, CloudError> {
            self.record(&format!("capabilities:{appliance_id}"));
            Err(CloudError::NotFound)
        }
    }

    #[derive(Default)]
    struct QuietHost {
        registered: StdMutex<Vec<AccessoryHandle>>,
    }

    impl AccessoryHost for QuietHost {
        fn register_accessories(&self, handles: &[AccessoryHandle]) -> Result<()> {
            self.registered.lock().unwrap().extend_from_slice(handles);
            Ok(())
        }
        fn persist_context(&self, _handle: &AccessoryHandle) -> Result<()> {
            Ok(())
        }
        fn cached_accessories(&self) -> Vec<AccessoryHandle> {
            Vec::new()
        }
    }

    fn descriptor(id: &str, model: &str, status: Value) -> ApplianceDescriptor {
        ApplianceDescriptor {
            appliance_id: id.to_string(),
            model_name: model.to_string(),
            display_name: format!("Appliance {id}"),
            status,
        }
    }

    fn scheduler_with(
        cloud: Arc<ScriptedCloud>,
        host: Arc<QuietHost>,
        config: Config,
    ) -> (Arc<AppState>, PollingScheduler) {
        let manager = Arc::new(ConfigManager::new(
            config,
            PathBuf::from("/tmp/fleetmirrord-test.yml"),
        ));
        let state = Arc::new(AppState::with_collaborators(
            manager,
            cloud,
            host,
            "https://api.example.net",
        ));
        let scheduler = PollingScheduler::new(state.clone(), EventBus::new());
        (state, scheduler)
    }

    fn config_with_key() -> Config {
        Config {
            api_key: Some("k".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn startup_without_seed_takes_sign_in_path() {
        let cloud = Arc::new(ScriptedCloud::new(Vec::new()));
        let (_, scheduler) = scheduler_with(
            cloud.clone(),
            Arc::new(QuietHost::default()),
            config_with_key(),
        );

        scheduler.startup().await;

        assert_eq!(cloud.operations(), vec!["sign_in", "list"]);
    }

    #[tokio::test]
    async fn startup_with_seed_token_exchanges_it() {
        let cloud = Arc::new(ScriptedCloud::new(Vec::new()));
        let config = Config {
            refresh_token: Some("seed".to_string()),
            ..Default::default()
        };
        let (_, scheduler) =
            scheduler_with(cloud.clone(), Arc::new(QuietHost::default()), config);

        scheduler.startup().await;

        assert_eq!(cloud.operations(), vec!["refresh", "list"]);
    }

    #[tokio::test]
    async fn startup_failure_leaves_scheduler_usable() {
        let cloud = Arc::new(ScriptedCloud::new(Vec::new()));
        *cloud.fail_sign_in.lock().unwrap() = true;
        let (state, scheduler) = scheduler_with(
            cloud.clone(),
            Arc::new(QuietHost::default()),
            config_with_key(),
        );

        scheduler.startup().await;
        assert!(!state.devices_discovered.load(Ordering::Acquire));

        // The next tick self-heals once the cloud recovers.
        *cloud.fail_sign_in.lock().unwrap() = false;
        scheduler.tick().await.unwrap();
        assert!(state.devices_discovered.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn first_tick_discovers_instead_of_polling() {
        let cloud = Arc::new(ScriptedCloud::new(vec![descriptor(
            "a",
            "PURE500",
            Value::Null,
        )]));
        let host = Arc::new(QuietHost::default());
        let (state, scheduler) = scheduler_with(cloud.clone(), host.clone(), config_with_key());

        scheduler.tick().await.unwrap();

        // Token phase, then discovery with its capability fetch. No second
        // listing for a status pass in the same tick.
        assert_eq!(
            cloud.operations(),
            vec!["sign_in", "list", "capabilities:a"]
        );
        assert!(state.devices_discovered.load(Ordering::Acquire));
        assert_eq!(host.registered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_tick_polls_status_only() {
        let cloud = Arc::new(ScriptedCloud::new(vec![descriptor(
            "a",
            "PURE500",
            Value::Null,
        )]));
        let host = Arc::new(QuietHost::default());
        let (_, scheduler) = scheduler_with(cloud.clone(), host, config_with_key());

        scheduler.tick().await.unwrap();
        cloud.appliances.lock().unwrap()[0] =
            descriptor("a", "PURE500", json!({"applianceState": "running", "fanSpeed": 2}));
        scheduler.tick().await.unwrap();

        // Second tick is a bare listing: no exchange, no capability fetch,
        // no re-registration.
        assert_eq!(
            cloud.operations(),
            vec!["sign_in", "list", "capabilities:a", "list"]
        );
    }

    #[tokio::test]
    async fn poll_ignores_appliances_without_records() {
        let cloud = Arc::new(ScriptedCloud::new(vec![descriptor(
            "a",
            "PURE500",
            Value::Null,
        )]));
        let host = Arc::new(QuietHost::default());
        let (state, scheduler) = scheduler_with(cloud.clone(), host.clone(), config_with_key());

        scheduler.tick().await.unwrap();

        // A new appliance appears after discovery already completed.
        cloud
            .appliances
            .lock()
            .unwrap()
            .push(descriptor("b", "DRY300", Value::Null));
        scheduler.tick().await.unwrap();

        assert_eq!(state.registry.read().await.len(), 1);
        assert_eq!(host.registered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expired_session_is_renewed_before_polling() {
        let cloud = Arc::new(ScriptedCloud::new(Vec::new()));
        // Tokens expire immediately, so every tick hits the token phase.
        *cloud.expires_in.lock().unwrap() = 0;
        let (_, scheduler) = scheduler_with(
            cloud.clone(),
            Arc::new(QuietHost::default()),
            config_with_key(),
        );

        scheduler.tick().await.unwrap();
        scheduler.tick().await.unwrap();

        assert_eq!(
            cloud.operations(),
            vec!["sign_in", "list", "refresh", "list"]
        );
    }

    #[tokio::test]
    async fn failed_refresh_aborts_tick_before_any_polling() {
        let cloud = Arc::new(ScriptedCloud::new(vec![descriptor(
            "a",
            "PURE500",
            Value::Null,
        )]));
        *cloud.expires_in.lock().unwrap() = 0;
        let (state, scheduler) = scheduler_with(
            cloud.clone(),
            Arc::new(QuietHost::default()),
            config_with_key(),
        );

        scheduler.tick().await.unwrap();
        *cloud.fail_refresh.lock().unwrap() = true;
        assert!(scheduler.tick().await.is_err());

        // The failing tick performed the exchange and nothing else.
        assert_eq!(
            cloud.operations(),
            vec!["sign_in", "list", "capabilities:a", "refresh"]
        );
        assert!(state.devices_discovered.load(Ordering::Acquire));

        // The boundary does not poison later ticks.
        *cloud.fail_refresh.lock().unwrap() = false;
        scheduler.tick().await.unwrap();
        assert_eq!(cloud.operations().last().map(String::as_str), Some("list"));
    }

    // Controller double that records the statuses it is fed and can be told
    // to reject every update.
    #[derive(Debug)]
    struct RecordingController {
        fail: bool,
        seen: Arc<StdMutex<Vec<Value>>>,
    }

    #[async_trait]
    impl crate::controllers::DeviceController for RecordingController {
        fn model(&self) -> &'static str {
            "recording"
        }

        async fn update(&self, descriptor: &ApplianceDescriptor) -> Result<()> {
            self.seen.lock().unwrap().push(descriptor.status.clone());
            if self.fail {
                anyhow::bail!("characteristic write rejected");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn failing_controller_update_does_not_abort_the_poll() {
        let cloud = Arc::new(ScriptedCloud::new(vec![
            descriptor("a", "PURE500", json!({"applianceState": "idle"})),
            descriptor("b", "PURE500", json!({"applianceState": "running"})),
        ]));
        let host = Arc::new(QuietHost::default());
        let (state, scheduler) = scheduler_with(cloud, host.clone(), config_with_key());
        state.token_store.sign_in().await.unwrap();

        // Seed mirrored records directly; the first one rejects every update.
        let seen_b = Arc::new(StdMutex::new(Vec::new()));
        {
            let mut registry = state.registry.write().await;
            for (id, fail, seen) in [
                ("a", true, Arc::new(StdMutex::new(Vec::new()))),
                ("b", false, seen_b.clone()),
            ] {
                let identity = host.derive_identity(id);
                registry.insert(crate::registry::AccessoryRecord {
                    identity,
                    descriptor: descriptor(id, "PURE500", Value::Null),
                    capabilities: crate::registry::CapabilityState::Unsupported,
                    controller: Some(Box::new(RecordingController { fail, seen })),
                    handle: host.create_handle(&format!("Appliance {id}"), identity),
                });
            }
        }
        state.devices_discovered.store(true, Ordering::Release);

        // The tick succeeds despite the rejected update.
        scheduler.tick().await.unwrap();

        // The healthy record still received its fresh status.
        assert_eq!(
            seen_b.lock().unwrap().as_slice(),
            &[json!({"applianceState": "running"})]
        );
    }

    #[tokio::test]
    async fn end_to_end_sign_in_discover_then_poll() {
        let cloud = Arc::new(ScriptedCloud::new(vec![
            descriptor("a", "PURE500", Value::Null),
            descriptor("x", "TOASTER9000", Value::Null),
        ]));
        let host = Arc::new(QuietHost::default());
        let (state, scheduler) = scheduler_with(cloud.clone(), host.clone(), config_with_key());

        // No refresh token configured, so the sign-in path is taken.
        scheduler.startup().await;
        assert_eq!(cloud.operations()[0], "sign_in");

        // Only the recognized model was registered.
        assert_eq!(host.registered.lock().unwrap().len(), 1);
        assert_eq!(state.registry.read().await.len(), 1);

        // Steady state: ticks only list and update existing records.
        let before = cloud.operations().len();
        scheduler.tick().await.unwrap();
        let ops = cloud.operations();
        assert_eq!(&ops[before..], &["list".to_string()]);
    }
}
