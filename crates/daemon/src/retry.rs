//! Retry scheduling (§4.4.5): exponential backoff between attempts, capped,
//! run as a fire-and-forget task cancellable by the daemon's shutdown token.

use crate::dispatch::Dispatcher;
use crate::error::DispatchError;
use crate::settings::DispatchSettings;
use std::sync::Arc;
use std::time::Duration;
use taskgw_adapters::Store;
use taskgw_core::{Clock, RunId};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

/// Schedule a next-attempt dispatch for a run that just failed. A no-op if
/// the task has no attempts remaining.
pub fn schedule_retry<C: Clock>(
    store: Arc<dyn Store>,
    dispatcher: Dispatcher<C>,
    settings: Arc<DispatchSettings>,
    failed_run_id: RunId,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        if let Err(err) = run_retry(&store, &dispatcher, &settings, &failed_run_id, &cancel).await {
            warn!(run_id = %failed_run_id, error = %err, "retry scheduling failed");
        }
    });
}

#[instrument(skip(store, dispatcher, settings, cancel))]
async fn run_retry<C: Clock>(
    store: &Arc<dyn Store>,
    dispatcher: &Dispatcher<C>,
    settings: &DispatchSettings,
    failed_run_id: &RunId,
    cancel: &CancellationToken,
) -> Result<(), DispatchError> {
    let run = store.get_run(failed_run_id).await?;
    let task = store.get_task(&run.task_id).await?;

    if task.max_attempts <= 1 || run.attempt >= task.max_attempts {
        return Ok(());
    }

    let delay = retry_delay(task.retry_base_seconds, task.retry_multiplier, run.attempt, settings.retry_max_delay);

    tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        _ = tokio::time::sleep(delay) => {}
    }

    let next = store.create_run(&run.task_id, &run.project_id, &run.repository_id, run.attempt + 1).await?;
    dispatcher.dispatch(&next.run_id).await?;
    Ok(())
}

/// `delay = base * multiplier^(attempt-1)`, capped at `max_delay` (§4.4.5).
fn retry_delay(base_seconds: u64, multiplier: f64, attempt: u32, max_delay: Duration) -> Duration {
    let exponent = (attempt.max(1) - 1) as i32;
    let seconds = base_seconds as f64 * multiplier.powi(exponent);
    Duration::from_secs_f64(seconds.max(0.0)).min(max_delay)
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
