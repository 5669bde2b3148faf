//! Pod lifecycle
//!
//! ```text
//! Created -> Polling -> Running | Succeeded | Failed -> Deleted
//!                    \-> ImageFetchFailed -----------/
//! ```
//!
//! Every failure after the pod exists deletes it before the error is
//! returned. A failed deletion is joined with the error that caused it.

use crate::client::WorkloadClient;
use crate::commander::DbCommander;
use crate::config::Settings;
use crate::error::{PodsqlError, Result};
use crate::naming::WorkloadName;
use crate::resources::ResourceBuilder;
use k8s_openapi::api::core::v1::Pod;
use std::fmt;
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

/// Waiting reason that aborts readiness polling
pub const IMAGE_PULL_BACKOFF: &str = "ImagePullBackOff";

/// Pod phase as reported by the API server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Phase of a fetched pod; a missing status counts as pending
    pub fn of(pod: &Pod) -> Self {
        match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
            Some("Running") => Self::Running,
            Some("Succeeded") => Self::Succeeded,
            Some("Failed") => Self::Failed,
            Some("Pending") | None => Self::Pending,
            Some(_) => Self::Unknown,
        }
    }

    /// Readiness polling stops at any of these
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Running | Self::Succeeded | Self::Failed)
    }

    /// The container has exited
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a workload is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadState {
    Created,
    Polling,
    Running,
    Succeeded,
    Failed,
    ImageFetchFailed,
    Deleted,
}

impl From<PodPhase> for WorkloadState {
    fn from(phase: PodPhase) -> Self {
        match phase {
            PodPhase::Running => Self::Running,
            PodPhase::Succeeded => Self::Succeeded,
            PodPhase::Failed => Self::Failed,
            PodPhase::Pending | PodPhase::Unknown => Self::Polling,
        }
    }
}

/// A created pod and the state it was last seen in
#[derive(Debug)]
pub struct Workload {
    name: WorkloadName,
    container: String,
    state: WorkloadState,
}

impl Workload {
    pub fn name(&self) -> &WorkloadName {
        &self.name
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn state(&self) -> WorkloadState {
        self.state
    }

    /// Record a phase observed outside of readiness polling
    pub fn observe(&mut self, phase: PodPhase) {
        if self.state != WorkloadState::Deleted {
            self.state = phase.into();
        }
    }
}

/// First container waiting on an image it cannot pull, as (reason, message)
fn image_pull_failure(pod: &Pod) -> Option<(String, String)> {
    let status = pod.status.as_ref()?;
    status
        .init_container_statuses
        .iter()
        .chain(status.container_statuses.iter())
        .flatten()
        .filter_map(|cs| cs.state.as_ref()?.waiting.as_ref())
        .find(|waiting| waiting.reason.as_deref() == Some(IMAGE_PULL_BACKOFF))
        .map(|waiting| {
            (
                waiting.reason.clone().unwrap_or_default(),
                waiting.message.clone().unwrap_or_default(),
            )
        })
}

/// Creates, watches and deletes workload pods
#[derive(Clone)]
pub struct PodLifecycle {
    client: Arc<dyn WorkloadClient>,
    settings: Settings,
}

impl PodLifecycle {
    pub fn new(client: Arc<dyn WorkloadClient>, settings: Settings) -> Self {
        Self { client, settings }
    }

    pub fn client(&self) -> &Arc<dyn WorkloadClient> {
        &self.client
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn builder<'a>(
        &self,
        commander: &'a dyn DbCommander,
        name: &'a WorkloadName,
    ) -> ResourceBuilder<'a> {
        ResourceBuilder::new(commander, name, &self.settings.namespace, self.settings.timezone)
    }

    /// Create an idle pod for an interactive session, plus its Secret
    #[instrument(skip(self, commander), fields(pod = %name, engine = %commander.engine()))]
    pub async fn launch_exec(
        &self,
        commander: &dyn DbCommander,
        name: WorkloadName,
    ) -> Result<Workload> {
        let builder = self.builder(commander, &name);
        let pod = builder.build_exec_pod();
        self.launch(&builder, &pod, false).await
    }

    /// Create a pod that runs the batch command, plus its ConfigMap and
    /// Secret
    #[instrument(skip(self, commander), fields(pod = %name, engine = %commander.engine()))]
    pub async fn launch_run(
        &self,
        commander: &dyn DbCommander,
        name: WorkloadName,
    ) -> Result<Workload> {
        let builder = self.builder(commander, &name);
        let pod = builder.build_run_pod();
        self.launch(&builder, &pod, true).await
    }

    async fn launch(
        &self,
        builder: &ResourceBuilder<'_>,
        pod: &Pod,
        with_script: bool,
    ) -> Result<Workload> {
        let created = self.client.create_pod(pod).await?;
        let mut workload = Workload {
            name: created
                .metadata
                .name
                .clone()
                .map(WorkloadName::from_pod_name)
                .ok_or_else(|| PodsqlError::Resource("created pod has no name".to_string()))?,
            container: builder.container_name().to_string(),
            state: WorkloadState::Created,
        };
        info!(pod = %workload.name, namespace = %self.settings.namespace, "Created pod");

        let attachments = async {
            if with_script {
                let config_map = builder.build_config_map(&created)?;
                self.client.create_config_map(&config_map).await?;
            }
            let secret = builder.build_secret(&created)?;
            self.client.create_secret(&secret).await
        }
        .await;

        match attachments {
            Ok(()) => Ok(workload),
            Err(e) => Err(self.abort(&mut workload, e).await),
        }
    }

    /// Poll until the pod is Running, Succeeded or Failed.
    ///
    /// Checks immediately, then every poll interval. An image pull back-off
    /// ends polling at once.
    pub async fn wait_for_running(&self, workload: &mut Workload) -> Result<PodPhase> {
        workload.state = WorkloadState::Polling;
        let deadline = Instant::now() + self.settings.ready_timeout;

        loop {
            let pod = self.client.get_pod(workload.name.as_str()).await?;
            let phase = PodPhase::of(&pod);
            if phase.is_ready() {
                workload.observe(phase);
                info!(pod = %workload.name, phase = %phase, "Pod is ready");
                return Ok(phase);
            }

            if let Some((reason, message)) = image_pull_failure(&pod) {
                workload.state = WorkloadState::ImageFetchFailed;
                warn!(pod = %workload.name, reason = %reason, "Image pull failed");
                return Err(PodsqlError::ImagePullBackOff { reason, message });
            }

            if Instant::now() >= deadline {
                return Err(PodsqlError::ReadyTimeout {
                    name: workload.name.to_string(),
                    timeout: self.settings.ready_timeout,
                });
            }

            debug!(pod = %workload.name, phase = %phase, "Waiting for pod");
            sleep(self.settings.poll_interval).await;
        }
    }

    /// [`Self::wait_for_running`], deleting the pod when it fails
    #[instrument(skip(self, workload), fields(pod = %workload.name))]
    pub async fn await_ready(&self, workload: &mut Workload) -> Result<PodPhase> {
        match self.wait_for_running(workload).await {
            Ok(phase) => Ok(phase),
            Err(e) => Err(self.abort(workload, e).await),
        }
    }

    /// Delete the pod with foreground propagation. Deleting twice is a
    /// no-op.
    pub async fn delete(&self, workload: &mut Workload) -> Result<()> {
        if workload.state == WorkloadState::Deleted {
            return Ok(());
        }
        // Marked first so a failed attempt is never repeated
        workload.state = WorkloadState::Deleted;
        self.client.delete_pod(workload.name.as_str()).await?;
        info!(pod = %workload.name, "Deleted pod");
        Ok(())
    }

    /// Delete the pod after `cause` and return the combined error
    pub async fn abort(&self, workload: &mut Workload, cause: PodsqlError) -> PodsqlError {
        warn!(pod = %workload.name, error = %cause, "Cleaning up after failure");
        let cleanup = self.delete(workload).await;
        if let Err(e) = &cleanup {
            warn!(pod = %workload.name, error = %e, "Failed to delete pod");
        }
        cause.with_cleanup(cleanup)
    }
}
