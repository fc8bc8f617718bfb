pub mod briefing;
pub mod db;
pub mod error;
pub mod executor;
pub mod llm;
pub mod metrics;
mod migrations;
pub mod progress;
pub mod resilience;
pub mod scheduler;
pub mod services;
pub mod sources;
pub mod state;
pub mod types;
pub mod util;

use std::sync::Arc;

use state::AppState;
use tokio::sync::mpsc;

/// Channel buffer size for scheduler messages
const SCHEDULER_CHANNEL_SIZE: usize = 32;

/// Run the scheduler and executor until ctrl-c, or until the scheduler has
/// nothing to do.
pub async fn run(state: Arc<AppState>) {
    // Create channel for scheduler -> executor communication
    let (scheduler_tx, scheduler_rx) = mpsc::channel(SCHEDULER_CHANNEL_SIZE);

    // Spawn scheduler
    let scheduler_state = state.clone();
    let scheduler_handle = tokio::spawn(async move {
        let scheduler = scheduler::Scheduler::new(scheduler_state, scheduler_tx);
        scheduler.run().await;
    });

    // Spawn executor
    let executor_state = state.clone();
    let executor_handle = tokio::spawn(async move {
        let executor = executor::Executor::new(executor_state);
        executor.run(scheduler_rx).await;
    });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                log::error!("Failed to listen for ctrl-c: {}", e);
            }
            log::info!("Shutting down");
        }
        _ = executor_handle => {
            log::info!("Executor stopped");
        }
    }
    scheduler_handle.abort();
}
