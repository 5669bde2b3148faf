//! Batch runs
//!
//! The pod runs the batch command against the mounted script. Once it is
//! up, two tasks are spawned: one follows the container output into a
//! buffer it owns, the other polls until the pod has finished. The caller
//! waits for the finish signal and then for the reader task itself, which
//! hands back the complete buffer.

use crate::client::{LogStream, WorkloadClient};
use crate::commander::DbCommander;
use crate::error::{PodsqlError, Result};
use crate::lifecycle::{PodLifecycle, PodPhase};
use crate::naming::WorkloadName;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

/// Captured result of one batch run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutput {
    /// Everything the container wrote
    pub output: String,
    /// Final pod phase
    pub phase: PodPhase,
}

impl BatchOutput {
    pub fn succeeded(&self) -> bool {
        self.phase == PodPhase::Succeeded
    }

    /// Output lines with the dashed rule under a table header and the
    /// trailing empty line removed
    pub fn rows(&self) -> Vec<&str> {
        let mut rows: Vec<&str> = self.output.split('\n').collect();
        if rows.len() >= 2 && rows[1].starts_with('-') {
            rows.remove(1);
        }
        if rows.last() == Some(&"") {
            rows.pop();
        }
        rows
    }
}

/// Run `commander`'s batch command in a new pod named `name` and collect
/// its output
#[instrument(skip(lifecycle, commander), fields(pod = %name))]
pub async fn run_batch(
    lifecycle: &PodLifecycle,
    commander: &dyn DbCommander,
    name: WorkloadName,
) -> Result<BatchOutput> {
    let mut workload = lifecycle.launch_run(commander, name).await?;
    lifecycle.await_ready(&mut workload).await?;

    let pod_name = workload.name().to_string();
    let logs = match lifecycle
        .client()
        .follow_logs(&pod_name, workload.container())
        .await
    {
        Ok(logs) => logs,
        Err(e) => return Err(lifecycle.abort(&mut workload, e).await),
    };

    let reader = tokio::spawn(collect_logs(logs));
    let (finished_tx, finished_rx) = oneshot::channel();
    let poller = tokio::spawn(poll_until_finished(
        lifecycle.client().clone(),
        pod_name,
        lifecycle.settings().poll_interval,
        finished_tx,
    ));

    let phase = match finished_rx.await {
        Ok(phase) => phase,
        Err(_) => {
            reader.abort();
            let cause = PodsqlError::stream("completion poller stopped before the pod finished");
            return Err(lifecycle.abort(&mut workload, cause).await);
        }
    };
    workload.observe(phase);
    info!(pod = %workload.name(), phase = %phase, "Pod finished");

    // The reader owns the buffer until here
    let collected = match reader.await {
        Ok(collected) => collected,
        Err(e) => Err(PodsqlError::stream(format!("log reader task failed: {}", e))),
    };
    if let Err(e) = poller.await {
        debug!(error = %e, "Completion poller ended abnormally");
    }
    let output = match collected {
        Ok(output) => output,
        Err(e) => return Err(lifecycle.abort(&mut workload, e).await),
    };

    lifecycle.delete(&mut workload).await?;

    Ok(BatchOutput {
        output: String::from_utf8_lossy(&output).into_owned(),
        phase,
    })
}

/// Read the followed output to its end
async fn collect_logs(mut logs: LogStream) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    while let Some(chunk) = logs.next().await {
        output.extend_from_slice(&chunk?);
    }
    debug!(bytes = output.len(), "Log stream ended");
    Ok(output)
}

/// Poll every `interval` until the pod has finished, then report its phase.
///
/// Lookup errors are logged and polling continues. Stops early if nobody
/// is waiting for the result anymore.
async fn poll_until_finished(
    client: Arc<dyn WorkloadClient>,
    name: String,
    interval: Duration,
    mut finished: oneshot::Sender<PodPhase>,
) {
    loop {
        tokio::select! {
            _ = finished.closed() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        match client.get_pod(&name).await {
            Ok(pod) => {
                let phase = PodPhase::of(&pod);
                if phase.is_finished() {
                    let _ = finished.send(phase);
                    return;
                }
                debug!(pod = %name, phase = %phase, "Waiting for pod to finish");
            }
            Err(e) => warn!(pod = %name, error = %e, "Failed to get pod"),
        }
    }
}
