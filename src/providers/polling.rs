use anyhow::Result;
use async_trait::async_trait;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_stream::{StreamExt, wrappers::IntervalStream};
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState,
    cloud,
    event::EventBus,
    poller::PollingScheduler,
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

/// Polling service provider.
///
/// Provides the critical service that keeps the cloud session alive, runs
/// discovery, and polls appliance status on the configured interval. This is
/// the core service; without it nothing is mirrored.
///
/// # Priority and Criticality
///
/// - **Priority**: 10 (highest)
/// - **Critical**: Yes
pub struct PollingServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
}

impl PollingServiceProvider {
    /// Creates a new polling service provider.
    pub fn new(state: Arc<AppState>, event_bus: EventBus) -> Self {
        Self { state, event_bus }
    }
}

#[async_trait]
impl ServiceProvider for PollingServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let state = self.state.clone();
        let event_bus = self.event_bus.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_polling_service(state, event_bus, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "PollingService"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn is_critical(&self) -> bool {
        true
    }
}

async fn run_polling_service(
    state: Arc<AppState>,
    event_bus: EventBus,
    cancel_token: CancellationToken,
) -> Result<()> {
    let scheduler = PollingScheduler::new(state.clone(), event_bus);

    // One best-effort bootstrap before the interval; the interval starts
    // regardless so a transient startup failure heals on the next tick.
    scheduler.startup().await;

    let mut period = u64::from(state.config_manager.get().await.polling_interval);
    let mut ticks = IntervalStream::new(interval(Duration::from_secs(period)));
    info!("Polling service running with a {period}s interval");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Polling service cancelled");
                break;
            }
            _instant = ticks.next() => {
                if let Err(e) = scheduler.tick().await {
                    error!("Poll cycle failed: {}", cloud::describe(&e));
                }

                // The interval is hot-reloadable; pick up a changed value
                // without restarting the service.
                let configured = u64::from(state.config_manager.get().await.polling_interval);
                if configured != period {
                    info!("Polling interval changed from {period}s to {configured}s");
                    period = configured;
                    ticks = IntervalStream::new(interval(Duration::from_secs(period)));
                }
            }
        }
    }
    Ok(())
}
