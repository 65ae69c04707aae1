//! Per-event semantics for the event listener (§4.4.4): log fan-out, run
//! completion, and retry/recycle follow-through.

use crate::dispatch::{proxy_path, Dispatcher};
use crate::error::DispatchError;
use crate::retry::schedule_retry;
use crate::settings::DispatchSettings;
use std::sync::Arc;
use taskgw_adapters::{JobEvent, ProxyRouteRegistry, Publisher, RunLogEvent, Store, UiEvent};
use taskgw_core::{Clock, HarnessResultEnvelope, HarnessStatus, RunId, RunState, RuntimeId};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

pub struct EventHandler<C: Clock> {
    store: Arc<dyn Store>,
    lifecycle: Arc<taskgw_engine::LifecycleManager<C>>,
    proxy: Arc<dyn ProxyRouteRegistry>,
    publisher: Arc<dyn Publisher>,
    dispatcher: Dispatcher<C>,
    settings: Arc<DispatchSettings>,
    shutdown: CancellationToken,
}

impl<C: Clock> Clone for EventHandler<C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            lifecycle: self.lifecycle.clone(),
            proxy: self.proxy.clone(),
            publisher: self.publisher.clone(),
            dispatcher: self.dispatcher.clone(),
            settings: self.settings.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<C: Clock> EventHandler<C> {
    pub fn new(
        store: Arc<dyn Store>,
        lifecycle: Arc<taskgw_engine::LifecycleManager<C>>,
        proxy: Arc<dyn ProxyRouteRegistry>,
        publisher: Arc<dyn Publisher>,
        dispatcher: Dispatcher<C>,
        settings: Arc<DispatchSettings>,
        shutdown: CancellationToken,
    ) -> Self {
        Self { store, lifecycle, proxy, publisher, dispatcher, settings, shutdown }
    }

    pub fn publisher(&self) -> &Arc<dyn Publisher> {
        &self.publisher
    }

    /// Dispatch one `JobEventMessage` off a runtime's event hub (§4.4.4).
    #[instrument(skip(self, event))]
    pub async fn handle_job_event(&self, worker_id: &RuntimeId, event: JobEvent) -> Result<(), DispatchError> {
        let run_id = RunId::new(event.run_id.clone());

        if event.event_type == "log_chunk" {
            self.publisher.publish(UiEvent::Log {
                run_id,
                level: "chunk".to_string(),
                message: event.summary.clone().unwrap_or_default(),
            });
            return Ok(());
        }

        let message = event.summary.clone().or_else(|| event.error.clone()).unwrap_or_default();
        self.store
            .add_run_log(RunLogEvent { run_id: run_id.clone(), level: event.event_type.clone(), message: message.clone() })
            .await?;
        self.publisher.publish(UiEvent::Log { run_id: run_id.clone(), level: event.event_type.clone(), message });

        if event.event_type == "completed" {
            self.handle_completed(worker_id, &run_id, &event).await?;
        }
        Ok(())
    }

    async fn handle_completed(&self, worker_id: &RuntimeId, run_id: &RunId, event: &JobEvent) -> Result<(), DispatchError> {
        let envelope = parse_envelope(event);
        let succeeded = envelope.status == HarnessStatus::Succeeded;
        let failure_class = envelope.error.as_deref().and_then(classify_failure).map(str::to_string);
        let pr_url = event.metadata.get("prUrl").cloned();
        let output_json = serde_json::to_string(&envelope).ok();

        self.store
            .mark_run_completed(run_id, succeeded, envelope.summary.clone(), output_json, failure_class, pr_url)
            .await?;

        self.proxy.remove(&proxy_path(run_id));
        self.publisher.publish(UiEvent::RunStatus {
            run_id: run_id.clone(),
            state: if succeeded { RunState::Succeeded } else { RunState::Failed },
        });

        if self.lifecycle.recycle_after_run() {
            let _ = self.lifecycle.recycle(worker_id).await;
        } else {
            self.lifecycle.release_dispatch_slot(worker_id);
        }

        if !succeeded {
            self.store
                .create_finding_from_failure(run_id, envelope.error.as_deref().unwrap_or("run failed"))
                .await?;
            schedule_retry(
                self.store.clone(),
                self.dispatcher.clone(),
                self.settings.clone(),
                run_id.clone(),
                self.shutdown.clone(),
            );
        }

        Ok(())
    }
}

/// Parse `metadata["payload"]` as a Harness Envelope (§4.4.4 step 1); a
/// missing or invalid payload synthesises a failure envelope rather than
/// erroring the event loop.
fn parse_envelope(event: &JobEvent) -> HarnessResultEnvelope {
    event
        .metadata
        .get("payload")
        .and_then(|payload| serde_json::from_str(payload).ok())
        .unwrap_or_else(|| HarnessResultEnvelope {
            status: HarnessStatus::Failed,
            summary: Some("Worker completed without payload".to_string()),
            error: Some("Missing payload".to_string()),
            metadata: Default::default(),
            actions: Vec::new(),
            artifacts: Vec::new(),
            metrics: Default::default(),
        })
}

/// Classify a failure error string (§4.4.4 step 3).
pub fn classify_failure(error: &str) -> Option<&'static str> {
    if error.contains("Envelope validation") {
        Some("EnvelopeValidation")
    } else if error.to_lowercase().contains("timeout") || error.to_lowercase().contains("cancelled") {
        Some("Timeout")
    } else {
        None
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
