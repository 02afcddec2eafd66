use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use notify::{Event, EventHandler, RecursiveMode, Watcher, recommended_watcher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState,
    event::{ConfigChangeType, Event as AppEvent, EventBus},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

/// Configuration file monitoring service provider.
///
/// Provides a non-critical service that monitors the configuration file for
/// changes using filesystem notifications (inotify on Linux) and publishes
/// change events so hot-reloadable settings apply without a daemon restart.
///
/// # Priority and Criticality
///
/// - **Priority**: 6 (medium)
/// - **Critical**: No (optional service)
///
/// # Features
///
/// - Efficient filesystem event monitoring (inotify/kqueue)
/// - Configuration change classification and event publishing
/// - Debouncing for rapid file changes
/// - Cancel-safe async design
pub struct ConfigWatcherServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
}

impl ConfigWatcherServiceProvider {
    /// Creates a new configuration watcher service provider.
    pub fn new(state: Arc<AppState>, event_bus: EventBus) -> Self {
        Self { state, event_bus }
    }
}

#[async_trait]
impl ServiceProvider for ConfigWatcherServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let state = self.state.clone();
        let event_bus = self.event_bus.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_config_watcher_service(state, event_bus, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "ConfigWatcherService"
    }

    fn priority(&self) -> i32 {
        6
    }

    fn is_critical(&self) -> bool {
        false
    }
}

/// Bridges the synchronous notify callback into an async channel.
#[derive(Debug)]
struct AsyncEventHandler {
    sender: mpsc::UnboundedSender<notify::Result<Event>>,
}

impl EventHandler for AsyncEventHandler {
    fn handle_event(&mut self, event: notify::Result<Event>) {
        if let Err(e) = self.sender.send(event) {
            error!("Failed to forward filesystem event: {e}");
        }
    }
}

/// Watches the directory of the config file; editors typically replace the
/// file rather than modify it in place, so the exact path cannot be watched
/// directly. Events are debounced before the change analysis runs.
async fn run_config_watcher_service(
    state: Arc<AppState>,
    event_bus: EventBus,
    cancel_token: CancellationToken,
) -> Result<()> {
    let config_path = state.config_manager.path().to_path_buf();
    info!("Config watcher started for: {}", config_path.display());

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut watcher = recommended_watcher(AsyncEventHandler { sender: event_tx })?;

    let watch_path = match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => config_path.clone(),
    };

    watcher.watch(&watch_path, RecursiveMode::NonRecursive)?;
    info!("Watching directory: {}", watch_path.display());

    let mut debounce_interval = tokio::time::interval(Duration::from_millis(2000));
    debounce_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut has_pending_event = false;

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Config watcher service cancelled");
                break;
            }

            event_result = event_rx.recv() => {
                match event_result {
                    Some(Ok(event)) => {
                        let affects_config = event.paths.iter().any(|path| {
                            path == &config_path || path.file_name() == config_path.file_name()
                        });
                        let is_relevant = event.kind.is_modify() || event.kind.is_create();

                        if affects_config && is_relevant {
                            debug!("Config file event {:?}, scheduling debounced analysis", event.kind);
                            has_pending_event = true;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Filesystem watcher error: {e}");
                    }
                    None => {
                        warn!("Filesystem event channel closed, exiting");
                        break;
                    }
                }
            }

            _ = debounce_interval.tick(), if has_pending_event => {
                has_pending_event = false;

                if !config_path.exists() {
                    warn!("Configuration file {} no longer exists", config_path.display());
                    continue;
                }

                info!("Configuration file change detected, analyzing changes...");
                match state.config_manager.analyze_changes().await {
                    Ok(change_type) => {
                        if let ConfigChangeType::ColdRestart { changed_sections } = &change_type {
                            warn!(
                                "Changed sections {changed_sections:?} require a daemon restart to take effect"
                            );
                        }
                        if let Err(e) = event_bus.publish(AppEvent::ConfigChangeDetected(change_type)) {
                            error!("Failed to publish config change event: {e}");
                        }
                    }
                    Err(e) => {
                        error!("Failed to analyze configuration changes: {e}");
                    }
                }
            }
        }
    }

    if let Err(e) = watcher.unwatch(&watch_path) {
        warn!("Failed to unwatch path during cleanup: {e}");
    }

    info!("Config watcher service stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{ApplianceApi, ApplianceDescriptor, CloudError, SessionTokens};
    use crate::config::{Config, ConfigManager};
    use crate::host::{AccessoryHandle, AccessoryHost};
    use std::io::Write;
    use tempfile::NamedTempFile;
    use tokio::time::timeout;

    struct NullHost;
    impl AccessoryHost for NullHost {
        fn register_accessories(&self, _handles: &[AccessoryHandle]) -> Result<()> {
            Ok(())
        }
        fn persist_context(&self, _handle: &AccessoryHandle) -> Result<()> {
            Ok(())
        }
        fn cached_accessories(&self) -> Vec<AccessoryHandle> {
            Vec::new()
        }
    }

    struct NullCloud;

    #[async_trait]
    impl ApplianceApi for NullCloud {
        async fn sign_in(&self) -> Result<SessionTokens, CloudError> {
            Err(CloudError::Auth("offline".to_string()))
        }
        async fn refresh(&self, _refresh_token: &str) -> Result<SessionTokens, CloudError> {
            Err(CloudError::Auth("offline".to_string()))
        }
        async fn list_appliances(
            &self,
            _access_token: &str,
            _base_url: &str,
        ) -> Result<Vec<ApplianceDescriptor>, CloudError> {
            Ok(Vec::new())
        }
        async fn get_capabilities(
            &self,
            _appliance_id: &str,
            _access_token: &str,
            _base_url: &str,
        ) -> Result<serde_json::Value, CloudError> {
            Err(CloudError::NotFound)
        }
    }

    fn state_for(path: std::path::PathBuf) -> Arc<AppState> {
        let manager = Arc::new(ConfigManager::new(
            Config {
                api_key: Some("k".to_string()),
                ..Default::default()
            },
            path,
        ));
        Arc::new(AppState::with_collaborators(
            manager,
            Arc::new(NullCloud),
            Arc::new(NullHost),
            "https://api.example.net",
        ))
    }

    #[tokio::test]
    async fn provider_metadata() {
        let temp_file = NamedTempFile::new().unwrap();
        let state = state_for(temp_file.path().to_path_buf());
        let provider = ConfigWatcherServiceProvider::new(state, EventBus::new());

        assert_eq!(provider.name(), "ConfigWatcherService");
        assert_eq!(provider.priority(), 6);
        assert!(!provider.is_critical());
    }

    #[tokio::test]
    async fn watcher_service_starts_and_stops() {
        let temp_file = NamedTempFile::new().unwrap();
        let state = state_for(temp_file.path().to_path_buf());
        let provider = ConfigWatcherServiceProvider::new(state, EventBus::new());

        let mut task_manager = TaskManager::new();
        provider.start(&mut task_manager).await.unwrap();
        assert!(task_manager.is_running("ConfigWatcherService"));

        task_manager.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn file_change_publishes_classified_event() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "version: 1\napi_key: \"k\"").unwrap();
        temp_file.flush().unwrap();

        let state = state_for(temp_file.path().to_path_buf());
        let event_bus = EventBus::new();
        let mut event_rx = event_bus.subscribe();

        let provider = ConfigWatcherServiceProvider::new(state, event_bus);
        let mut task_manager = TaskManager::new();
        provider.start(&mut task_manager).await.unwrap();

        // Let the watcher install its inotify handle before modifying.
        tokio::time::sleep(Duration::from_millis(300)).await;
        std::fs::write(
            temp_file.path(),
            "version: 1\napi_key: \"k\"\npolling_interval: 60\n",
        )
        .unwrap();

        let event = timeout(Duration::from_secs(10), event_rx.recv())
            .await
            .expect("no config change event within timeout")
            .unwrap();
        match event {
            AppEvent::ConfigChangeDetected(ConfigChangeType::HotReload) => {}
            other => panic!("Expected hot-reload classification, got {other:?}"),
        }

        task_manager.shutdown_all().await.unwrap();
    }
}
