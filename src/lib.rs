//! # fleetmirrord
//!
//! A daemon that maintains a live, authenticated mirror of a remote fleet of
//! smart appliances inside a local accessory runtime.
//!
//! ## Features
//!
//! - **Async Architecture**: Built on Tokio for high performance
//! - **Session Management**: Rotating refresh tokens with single-flight renewal
//! - **Discovery Reconciliation**: Remote appliance list synced against a
//!   persisted accessory cache on every pass
//! - **Capability Caching**: Capability documents fetched once and cached for
//!   the lifetime of an accessory, surviving restarts
//! - **Failure Isolation**: One appliance's failure never aborts the cycle for
//!   the rest
//! - **Hot Reload**: Configuration changes without restart
//!
//! ## Architecture
//!
//! The daemon uses a provider-based dependency injection system with:
//! - [`SystemCoordinator`](coordinator::SystemCoordinator) - Main lifecycle manager
//! - [`EventBus`](event::EventBus) - Inter-service communication
//! - [`AppState`](app_context::AppState) - Shared application state
//! - [`TokenStore`](session::TokenStore) - Cloud session lifecycle
//! - [`ReconciliationEngine`](reconcile::ReconciliationEngine) - Discovery passes
//! - [`PollingScheduler`](poller::PollingScheduler) - Recurring status cycle
//!
//! ## Example
//!
//! ```no_run
//! use fleetmirrord::{application::Application, config::ConfigManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config_manager = ConfigManager::load(None).await?;
//!     Application::builder()
//!         .with_config_manager(config_manager)
//!         .build()?
//!         .run()
//!         .await
//! }
//! ```

pub mod app_context;
pub mod application;
pub mod cli;
pub mod cloud;
pub mod config;
pub mod controllers;
pub mod coordinator;
pub mod event;
pub mod host;
pub mod poller;
pub mod providers;
pub mod reconcile;
pub mod registry;
pub mod session;
pub mod task_manager;
