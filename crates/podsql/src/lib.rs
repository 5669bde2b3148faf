//! # podsql
//!
//! Run database clients inside short-lived Kubernetes pods.
//!
//! podsql takes the native arguments of `mysql`, `sqlcmd` or `psql`, starts
//! a pod with the matching client image in the cluster, runs the client
//! there and deletes the pod afterwards. Credentials travel through a
//! Secret and batch scripts through a ConfigMap, both owned by the pod so
//! they disappear with it.
//!
//! ## Modes
//!
//! - **Interactive**: no query given. An idle pod is started and the client
//!   shell is attached to the local terminal.
//! - **Batch**: a query, script or help flag is given. The pod runs the
//!   client once, its output is collected and printed.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use podsql::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let settings = Settings::default();
//!     let client = KubeWorkloadClient::connect(None, &settings.namespace).await?;
//!     let lifecycle = PodLifecycle::new(Arc::new(client), settings.clone());
//!
//!     let args: Vec<String> = ["-h", "db", "-e", "SELECT 1"]
//!         .iter()
//!         .map(|s| s.to_string())
//!         .collect();
//!     let commander = Engine::MySql.parse_args(&args)?;
//!     let name = WorkloadName::generate("mysql", settings.timezone, "alice", chrono::Utc::now());
//!
//!     let output = run_batch(&lifecycle, commander.as_ref(), name).await?;
//!     println!("{}", output.output);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`commander`] - Per-engine argument translation
//! - [`connect_info`] - Normalized connection descriptor
//! - [`naming`] - Pod, Secret and ConfigMap names
//! - [`resources`] - Kubernetes resource builders
//! - [`client`] - Cluster access seam
//! - [`lifecycle`] - Pod creation, readiness and deletion
//! - [`exec`] - Interactive sessions
//! - [`run`] - Batch runs
//! - [`terminal`] - Local terminal handling
//! - [`config`] - Configuration file and settings
//! - [`error`] - Error types

pub mod client;
pub mod commander;
pub mod config;
pub mod connect_info;
pub mod error;
pub mod exec;
pub mod lifecycle;
pub mod naming;
pub mod resources;
pub mod run;
pub mod terminal;

#[cfg(test)]
pub(crate) mod testing;

pub mod prelude {
    //! Re-exports for convenient usage
    pub use crate::client::{AttachedSession, KubeWorkloadClient, LogStream, WorkloadClient};
    pub use crate::commander::{DbCommander, Engine};
    pub use crate::config::{Overrides, PodsqlConfig, Settings};
    pub use crate::connect_info::ConnectInfo;
    pub use crate::error::{PodsqlError, Result};
    pub use crate::exec::run_interactive;
    pub use crate::lifecycle::{PodLifecycle, PodPhase, Workload, WorkloadState};
    pub use crate::naming::WorkloadName;
    pub use crate::resources::ResourceBuilder;
    pub use crate::run::{run_batch, BatchOutput};
    pub use crate::terminal::TerminalIo;
}
