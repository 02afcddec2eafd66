//! Application entry point and builder pattern implementation.

use crate::{config::ConfigManager, coordinator::SystemCoordinator};
use anyhow::Result;

/// Main application structure that orchestrates all daemon components.
///
/// Manages the complete lifecycle from initialization to shutdown,
/// coordinating all services through the SystemCoordinator.
///
/// # Example
///
/// ```no_run
/// use fleetmirrord::application::Application;
/// use fleetmirrord::config;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config_manager = config::ConfigManager::load(None).await?;
/// let mut app = Application::builder()
///     .with_config_manager(config_manager)
///     .build()?;
///
/// app.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Application {
    pub coordinator: SystemCoordinator,
    config_manager: ConfigManager,
}

impl Application {
    /// Creates a new ApplicationBuilder for constructing Application instances.
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    /// Runs the complete daemon lifecycle: initialize, start services, and
    /// run the main loop.
    pub async fn run(&mut self) -> Result<()> {
        self.coordinator
            .initialize(self.config_manager.clone())
            .await?;

        self.coordinator.start_all_services().await?;

        self.coordinator.run_main_loop().await?;

        Ok(())
    }
}

/// Builder pattern for creating Application instances.
pub struct ApplicationBuilder {
    config_manager: Option<ConfigManager>,
}

impl ApplicationBuilder {
    fn new() -> Self {
        Self {
            config_manager: None,
        }
    }

    /// Sets the configuration manager for the application.
    pub fn with_config_manager(mut self, config_manager: ConfigManager) -> Self {
        self.config_manager = Some(config_manager);
        self
    }

    /// Builds the Application instance with the provided configuration.
    pub fn build(self) -> Result<Application> {
        let config_manager = self
            .config_manager
            .ok_or_else(|| anyhow::anyhow!("Configuration manager is required"))?;

        Ok(Application {
            coordinator: SystemCoordinator::new(),
            config_manager,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::path::PathBuf;

    #[test]
    fn builder_requires_config_manager() {
        assert!(Application::builder().build().is_err());
    }

    #[test]
    fn builder_assembles_application() {
        let manager = ConfigManager::new(Config::default(), PathBuf::from("/tmp/test.yml"));
        let app = Application::builder()
            .with_config_manager(manager)
            .build()
            .unwrap();
        assert!(app.coordinator.running_services().is_empty());
    }
}
