//! System coordinator for managing service lifecycle and dependency injection.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use log::info;

use crate::{
    app_context::AppState,
    config::ConfigManager,
    event::{ConfigChangeType, Event, EventBus},
    providers::{
        AppStateProvider, AsyncProvider, ConfigWatcherServiceProvider, PollingServiceProvider,
        ServiceProvider,
    },
    task_manager::TaskManager,
};

/// SystemCoordinator with Dependency Injection pattern.
///
/// Manages the complete lifecycle of all services using a provider-based
/// architecture for loose coupling and testability.
///
/// # Features
/// - Service prioritization (critical vs non-critical)
/// - Graceful degradation on service failures
/// - Event-driven communication between services
/// - Proper async initialization and shutdown
pub struct SystemCoordinator {
    task_manager: TaskManager,
    event_bus: EventBus,
    shared_state: Option<Arc<AppState>>,
    service_providers: Vec<Box<dyn ServiceProvider>>,
}

impl Default for SystemCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCoordinator {
    pub fn new() -> Self {
        Self {
            task_manager: TaskManager::new(),
            event_bus: EventBus::new(),
            shared_state: None,
            service_providers: Vec::new(),
        }
    }

    /// Asynchronously initializes all components.
    ///
    /// Builds the shared state, replays the persisted accessory cache into
    /// the registry, and registers the service providers.
    pub async fn initialize(&mut self, config_manager: ConfigManager) -> Result<()> {
        info!("Initializing SystemCoordinator...");

        let app_state_provider = AppStateProvider::new(config_manager);
        let state = app_state_provider
            .provide()
            .await
            .context("Failed to initialize application state")?;

        state.restore_cached_accessories().await;

        self.register_service_providers(state.clone());
        self.shared_state = Some(state);

        info!("SystemCoordinator initialization completed");
        Ok(())
    }

    /// Registers all service providers with prioritization.
    fn register_service_providers(&mut self, state: Arc<AppState>) {
        let mut providers: Vec<Box<dyn ServiceProvider>> = vec![
            Box::new(PollingServiceProvider::new(
                state.clone(),
                self.event_bus.clone(),
            )),
            Box::new(ConfigWatcherServiceProvider::new(
                state,
                self.event_bus.clone(),
            )),
        ];

        providers.sort_by_key(|b| std::cmp::Reverse(b.priority()));
        self.service_providers = providers;

        info!(
            "Registered {} service providers in priority order",
            self.service_providers.len()
        );
    }

    /// Starts all registered services in priority order.
    ///
    /// Critical services must start successfully, while non-critical services
    /// can fail without stopping the system.
    pub async fn start_all_services(&mut self) -> Result<()> {
        info!(
            "Starting {} services in priority order...",
            self.service_providers.len()
        );

        for provider in &self.service_providers {
            let is_critical = provider.is_critical();

            match provider.start(&mut self.task_manager).await {
                Ok(()) => {
                    info!(
                        "Service '{}' started (priority: {}, critical: {})",
                        provider.name(),
                        provider.priority(),
                        is_critical
                    );
                }
                Err(e) if is_critical => {
                    return Err(e).with_context(|| {
                        format!("Critical service '{}' failed to start", provider.name())
                    });
                }
                Err(e) => {
                    log::warn!(
                        "Non-critical service '{}' failed to start: {}",
                        provider.name(),
                        e
                    );
                }
            }
        }

        info!("All critical services started successfully");
        Ok(())
    }

    /// Main event loop with enhanced error handling.
    pub async fn run_main_loop(&mut self) -> Result<()> {
        let mut event_rx = self.event_bus.subscribe();
        info!("Starting main event loop");

        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    match result {
                        Ok(()) => {
                            info!("Received Ctrl+C, initiating graceful shutdown...");
                            self.shutdown().await
                                .context("Failed to shutdown gracefully after Ctrl+C")?;
                            break;
                        }
                        Err(e) => {
                            bail!("Failed to listen for shutdown signal: {}", e);
                        }
                    }
                }

                event = event_rx.recv() => {
                    if self.handle_event(event).await? {
                        break;
                    }
                }
            }
        }

        info!("Main event loop terminated");
        Ok(())
    }

    /// Handles application events. Returns `true` when the loop should end.
    async fn handle_event(
        &mut self,
        event_result: Result<Event, tokio::sync::broadcast::error::RecvError>,
    ) -> Result<bool> {
        match event_result {
            Ok(Event::ConfigChangeDetected(change_type)) => {
                self.handle_config_change(change_type)
                    .await
                    .context("Failed to handle config change")?;
            }
            Ok(Event::SystemShutdown) => {
                info!("Processing SystemShutdown event");
                self.shutdown()
                    .await
                    .context("Failed to shutdown gracefully after SystemShutdown event")?;
                return Ok(true);
            }
            Ok(Event::SessionRefreshed) => {
                info!("Cloud session refreshed");
            }
            Ok(Event::DiscoveryCompleted(count)) => {
                info!("Discovery completed with {count} appliances reconciled");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                bail!("Event bus channel closed unexpectedly");
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                log::warn!("Event bus lagged by {n} messages");
            }
        }
        Ok(false)
    }

    /// Handles configuration change based on type.
    async fn handle_config_change(&self, change_type: ConfigChangeType) -> Result<()> {
        match change_type {
            ConfigChangeType::HotReload => self.handle_hot_reload().await,
            ConfigChangeType::ColdRestart { changed_sections } => {
                log::warn!(
                    "Configuration changes in sections {changed_sections:?} require a restart"
                );
                log::warn!("Cloud collaborators are constructed at startup and will not be rebuilt");
                log::info!("Restart the daemon to apply them:");
                log::info!("  sudo systemctl restart fleetmirrord");
                Ok(())
            }
        }
    }

    /// Handles hot-reloadable configuration changes.
    async fn handle_hot_reload(&self) -> Result<()> {
        info!("Applying hot-reloadable configuration changes...");

        if let Some(state) = &self.shared_state {
            state
                .config_manager
                .reload()
                .await
                .context("Failed to reload configuration")?;

            // The polling service reads the interval on its next tick.
            info!("Hot configuration reload completed");
        } else {
            log::warn!("Cannot reload config: system state not initialized");
        }

        Ok(())
    }

    /// Performs graceful shutdown of all components.
    async fn shutdown(&mut self) -> Result<()> {
        info!("Initiating graceful shutdown...");

        if let Err(e) = self.task_manager.shutdown_all().await {
            log::error!("Error during task shutdown: {e}");
        }

        info!("Shutdown complete");
        Ok(())
    }

    /// Returns a reference to the EventBus for testing purposes.
    #[allow(dead_code)]
    pub const fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    #[allow(dead_code)]
    pub fn running_services(&self) -> Vec<&'static str> {
        self.service_providers.iter().map(|p| p.name()).collect()
    }
}
