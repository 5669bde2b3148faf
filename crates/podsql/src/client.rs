//! Cluster access
//!
//! [`WorkloadClient`] is the narrow set of Kubernetes calls the lifecycle
//! needs. [`KubeWorkloadClient`] implements it over `kube::Api`, scoped to a
//! single namespace; tests substitute an in-memory client.

use crate::error::{PodsqlError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::{mpsc, oneshot};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{AsyncReadExt, FutureExt, SinkExt, StreamExt};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret};
use kube::api::{Api, AttachParams, DeleteParams, LogParams, PostParams, TerminalSize};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::fmt;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

/// Chunk size used when forwarding log bytes
const LOG_CHUNK_SIZE: usize = 8 * 1024;

/// Followed container output, ending when the container exits
pub type LogStream = BoxStream<'static, Result<Bytes>>;

/// An exec session attached to a running container
pub struct AttachedSession {
    /// Remote standard input
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    /// Remote standard output (TTY sessions merge stderr into it)
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    /// Terminal size channel, present for TTY sessions
    pub resize: Option<mpsc::Sender<TerminalSize>>,
    /// Resolves once the remote process has exited
    pub done: BoxFuture<'static, Result<()>>,
}

impl fmt::Debug for AttachedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachedSession")
            .field("resize", &self.resize.is_some())
            .finish_non_exhaustive()
    }
}

/// Kubernetes operations used to drive one workload
#[async_trait]
pub trait WorkloadClient: Send + Sync {
    /// Submit a pod and return it as stored by the API server
    async fn create_pod(&self, pod: &Pod) -> Result<Pod>;

    /// Fetch the current state of a pod
    async fn get_pod(&self, name: &str) -> Result<Pod>;

    /// Delete a pod with foreground propagation
    async fn delete_pod(&self, name: &str) -> Result<()>;

    /// Submit a credential Secret
    async fn create_secret(&self, secret: &Secret) -> Result<()>;

    /// Submit a script ConfigMap
    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<()>;

    /// Follow a container's output until it exits
    async fn follow_logs(&self, name: &str, container: &str) -> Result<LogStream>;

    /// Attach an interactive TTY exec session running `command`
    async fn exec_attach(
        &self,
        name: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<AttachedSession>;
}

/// [`WorkloadClient`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeWorkloadClient {
    namespace: String,
    pods: Api<Pod>,
    secrets: Api<Secret>,
    config_maps: Api<ConfigMap>,
}

impl KubeWorkloadClient {
    /// Create a client scoped to `namespace`
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            pods: Api::namespaced(client.clone(), namespace),
            secrets: Api::namespaced(client.clone(), namespace),
            config_maps: Api::namespaced(client, namespace),
        }
    }

    /// Connect with an explicit kubeconfig, or the default discovery chain
    /// (`KUBECONFIG`, `~/.kube/config`, in-cluster) when none is given
    pub async fn connect(kubeconfig: Option<&Path>, namespace: &str) -> Result<Self> {
        let client = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    PodsqlError::config(format!(
                        "failed to read kubeconfig {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                let options = KubeConfigOptions::default();
                let config = Config::from_custom_kubeconfig(kubeconfig, &options)
                    .await
                    .map_err(|e| {
                        PodsqlError::config(format!("invalid kubeconfig {}: {}", path.display(), e))
                    })?;
                Client::try_from(config).map_err(|e| PodsqlError::kube("create client", e))?
            }
            None => Client::try_default()
                .await
                .map_err(|e| PodsqlError::kube("create client", e))?,
        };

        debug!(namespace = %namespace, "Connected to cluster");
        Ok(Self::new(client, namespace))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

#[async_trait]
impl WorkloadClient for KubeWorkloadClient {
    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        self.pods
            .create(&PostParams::default(), pod)
            .await
            .map_err(|e| PodsqlError::kube("create pod", e))
    }

    async fn get_pod(&self, name: &str) -> Result<Pod> {
        self.pods
            .get(name)
            .await
            .map_err(|e| PodsqlError::kube(format!("get pod {}", name), e))
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        self.pods
            .delete(name, &DeleteParams::foreground())
            .await
            .map_err(|e| PodsqlError::kube(format!("delete pod {}", name), e))?;
        Ok(())
    }

    async fn create_secret(&self, secret: &Secret) -> Result<()> {
        self.secrets
            .create(&PostParams::default(), secret)
            .await
            .map_err(|e| PodsqlError::kube("create secret", e))?;
        Ok(())
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<()> {
        self.config_maps
            .create(&PostParams::default(), config_map)
            .await
            .map_err(|e| PodsqlError::kube("create configmap", e))?;
        Ok(())
    }

    async fn follow_logs(&self, name: &str, container: &str) -> Result<LogStream> {
        let params = LogParams {
            follow: true,
            container: Some(container.to_string()),
            ..Default::default()
        };
        let pods = self.pods.clone();
        let name = name.to_string();
        let (opened_tx, opened_rx) = oneshot::channel::<Result<()>>();
        let (mut tx, rx) = mpsc::channel::<Result<Bytes>>(16);

        // The reader lives in its own task so the returned stream borrows
        // nothing from this client
        tokio::spawn(async move {
            let reader = match pods.log_stream(&name, &params).await {
                Ok(reader) => reader,
                Err(e) => {
                    let action = format!("follow logs of pod {}", name);
                    let _ = opened_tx.send(Err(PodsqlError::kube(action, e)));
                    return;
                }
            };
            if opened_tx.send(Ok(())).is_err() {
                return;
            }

            let mut reader = Box::pin(reader);
            let mut buf = vec![0u8; LOG_CHUNK_SIZE];
            loop {
                let item = match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => Ok(Bytes::copy_from_slice(&buf[..n])),
                    Err(e) => Err(PodsqlError::stream(e)),
                };
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }
        });

        opened_rx
            .await
            .map_err(|_| PodsqlError::stream("log reader stopped before opening"))??;
        Ok(rx.boxed())
    }

    async fn exec_attach(
        &self,
        name: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<AttachedSession> {
        let params = AttachParams::interactive_tty().container(container);
        let mut process = self
            .pods
            .exec(name, command, &params)
            .await
            .map_err(|e| PodsqlError::kube(format!("exec into pod {}", name), e))?;

        let stdin = process
            .stdin()
            .ok_or_else(|| PodsqlError::stream("exec session has no stdin"))?;
        let stdout = process
            .stdout()
            .ok_or_else(|| PodsqlError::stream("exec session has no stdout"))?;
        let resize = process.terminal_size();
        let status = process.take_status();

        let done = async move {
            if let Some(status) = status {
                if let Some(status) = status.await {
                    if status.status.as_deref() == Some("Failure") {
                        let message = status.message.unwrap_or_default();
                        warn!(message = %message, "Remote process failed");
                        return Err(PodsqlError::stream(format!(
                            "remote process failed: {}",
                            message
                        )));
                    }
                }
            }
            process.join().await.map_err(PodsqlError::stream)
        }
        .boxed();

        Ok(AttachedSession {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            resize,
            done,
        })
    }
}
