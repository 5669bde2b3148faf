//! In-memory [`WorkloadClient`] for lifecycle tests

use crate::client::{AttachedSession, LogStream, WorkloadClient};
use crate::error::{PodsqlError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::{FutureExt, StreamExt};
use k8s_openapi::api::core::v1::{
    ConfigMap, ContainerState, ContainerStateWaiting, ContainerStatus, Pod, PodStatus, Secret,
};
use kube::api::TerminalSize;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

/// Status with only the phase set
pub(crate) fn phase(phase: &str) -> PodStatus {
    PodStatus {
        phase: Some(phase.to_string()),
        ..Default::default()
    }
}

/// Pending status whose container cannot pull its image
pub(crate) fn image_pull_backoff() -> PodStatus {
    PodStatus {
        phase: Some("Pending".to_string()),
        container_statuses: Some(vec![ContainerStatus {
            name: "mysql".to_string(),
            image: "mysql:8.0".to_string(),
            state: Some(ContainerState {
                waiting: Some(ContainerStateWaiting {
                    reason: Some("ImagePullBackOff".to_string()),
                    message: Some("Back-off pulling image \"mysql:8.0\"".to_string()),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// Session that prints `output`, then finishes with `result`.
///
/// The returned receiver sees every terminal size the driver forwards.
pub(crate) fn session(
    output: &[u8],
    result: Result<()>,
) -> (AttachedSession, mpsc::Receiver<TerminalSize>) {
    let (resize_tx, resize_rx) = mpsc::channel(8);
    let session = AttachedSession {
        stdin: Box::new(tokio::io::sink()),
        stdout: Box::new(std::io::Cursor::new(output.to_vec())),
        resize: Some(resize_tx),
        done: futures::future::ready(result).boxed(),
    };
    (session, resize_rx)
}

#[derive(Default)]
struct MockState {
    statuses: VecDeque<PodStatus>,
    log_chunks: Vec<Bytes>,
    log_delay: Duration,
    session: Option<AttachedSession>,
    pods: Vec<Pod>,
    secrets: Vec<Secret>,
    config_maps: Vec<ConfigMap>,
    deleted: Vec<String>,
    exec_commands: Vec<Vec<String>>,
    get_calls: usize,
    fail_secret: bool,
    fail_delete: bool,
}

/// Scripted cluster: pod statuses are served in order, the last one
/// repeating forever
#[derive(Default)]
pub(crate) struct MockWorkloadClient {
    state: Mutex<MockState>,
}

impl MockWorkloadClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = PodStatus>) -> Self {
        self.state.get_mut().statuses = statuses.into_iter().collect();
        self
    }

    pub fn with_logs(mut self, chunks: &[&str], delay: Duration) -> Self {
        let state = self.state.get_mut();
        state.log_chunks = chunks.iter().map(|c| Bytes::from(c.to_string())).collect();
        state.log_delay = delay;
        self
    }

    pub fn with_session(mut self, session: AttachedSession) -> Self {
        self.state.get_mut().session = Some(session);
        self
    }

    pub fn failing_secret(mut self) -> Self {
        self.state.get_mut().fail_secret = true;
        self
    }

    pub fn failing_delete(mut self) -> Self {
        self.state.get_mut().fail_delete = true;
        self
    }

    pub fn pods(&self) -> Vec<Pod> {
        self.state.lock().pods.clone()
    }

    pub fn secrets(&self) -> Vec<Secret> {
        self.state.lock().secrets.clone()
    }

    pub fn config_maps(&self) -> Vec<ConfigMap> {
        self.state.lock().config_maps.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().deleted.clone()
    }

    pub fn exec_commands(&self) -> Vec<Vec<String>> {
        self.state.lock().exec_commands.clone()
    }

    pub fn get_calls(&self) -> usize {
        self.state.lock().get_calls
    }
}

#[async_trait]
impl WorkloadClient for MockWorkloadClient {
    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        let mut state = self.state.lock();
        let mut created = pod.clone();
        created.metadata.uid = Some(format!("uid-{}", state.pods.len() + 1));
        state.pods.push(created.clone());
        Ok(created)
    }

    async fn get_pod(&self, name: &str) -> Result<Pod> {
        let mut state = self.state.lock();
        state.get_calls += 1;
        let status = if state.statuses.len() > 1 {
            state.statuses.pop_front()
        } else {
            state.statuses.front().cloned()
        };
        let mut pod = state
            .pods
            .iter()
            .find(|p| p.metadata.name.as_deref() == Some(name))
            .cloned()
            .ok_or_else(|| PodsqlError::Resource(format!("pod {} not found", name)))?;
        pod.status = status;
        Ok(pod)
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.deleted.push(name.to_string());
        if state.fail_delete {
            return Err(PodsqlError::Resource("delete refused".to_string()));
        }
        Ok(())
    }

    async fn create_secret(&self, secret: &Secret) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_secret {
            return Err(PodsqlError::Resource("secret quota exceeded".to_string()));
        }
        state.secrets.push(secret.clone());
        Ok(())
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<()> {
        self.state.lock().config_maps.push(config_map.clone());
        Ok(())
    }

    async fn follow_logs(&self, _name: &str, _container: &str) -> Result<LogStream> {
        let (chunks, delay) = {
            let state = self.state.lock();
            (state.log_chunks.clone(), state.log_delay)
        };
        let stream = futures::stream::iter(chunks).then(move |chunk| async move {
            tokio::time::sleep(delay).await;
            Ok::<_, PodsqlError>(chunk)
        });
        Ok(stream.boxed())
    }

    async fn exec_attach(
        &self,
        _name: &str,
        _container: &str,
        command: Vec<String>,
    ) -> Result<AttachedSession> {
        let mut state = self.state.lock();
        state.exec_commands.push(command);
        state
            .session
            .take()
            .ok_or_else(|| PodsqlError::stream("no session scripted"))
    }
}
