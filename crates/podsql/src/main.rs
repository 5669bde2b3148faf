//! podsql command-line entry point
//!
//! Everything after the engine subcommand is handed to the engine's own
//! argument translation untouched.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use podsql::prelude::*;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Run database clients inside short-lived Kubernetes pods
#[derive(Parser, Debug)]
#[command(name = "podsql")]
#[command(about = "Run mysql, sqlcmd or psql in a throwaway Kubernetes pod")]
#[command(version)]
struct Cli {
    /// Configuration file (default: ~/.config/podsql.yaml)
    #[arg(long, env = "PODSQL_CONFIG")]
    config: Option<PathBuf>,

    /// Namespace to run the pod in
    #[arg(short = 'n', long)]
    namespace: Option<String>,

    /// Timezone for pod names and the container TZ (e.g. Asia/Tokyo)
    #[arg(long)]
    timezone: Option<String>,

    /// Kubeconfig file (default: KUBECONFIG or ~/.kube/config)
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "PODSQL_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the MySQL client with native mysql options
    #[command(disable_help_flag = true)]
    Mysql(NativeArgs),

    /// Run SQL Server sqlcmd with native sqlcmd options
    #[command(disable_help_flag = true)]
    Sqlcmd(NativeArgs),

    /// Run PostgreSQL psql with native psql options
    #[command(disable_help_flag = true, visible_alias = "psql")]
    Postgres(NativeArgs),
}

#[derive(Args, Debug)]
struct NativeArgs {
    /// Options passed to the database client
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, num_args = 0..)]
    args: Vec<String>,
}

/// Global options whose value is the following token
const VALUE_OPTIONS: &[&str] = &[
    "--config",
    "-n",
    "--namespace",
    "--timezone",
    "--kubeconfig",
    "--log-level",
];

/// Tokens after the engine subcommand exactly as given. clap swallows a
/// leading `--`, which the engine parsers treat as the end of options.
fn native_args(raw: &[String]) -> Option<Vec<String>> {
    let mut tokens = raw.iter().enumerate().skip(1);
    while let Some((i, token)) = tokens.next() {
        if VALUE_OPTIONS.contains(&token.as_str()) {
            tokens.next();
        } else if !token.starts_with('-') {
            return Some(raw[i + 1..].to_vec());
        }
    }
    None
}

impl Commands {
    fn into_parts(self) -> (Engine, Vec<String>) {
        match self {
            Self::Mysql(native) => (Engine::MySql, native.args),
            Self::Sqlcmd(native) => (Engine::SqlCmd, native.args),
            Self::Postgres(native) => (Engine::Postgres, native.args),
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let raw: Vec<String> = std::env::args_os()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();
    let cli = Cli::parse_from(&raw);
    init_logging(&cli);

    let config =
        PodsqlConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let settings = config
        .resolve(Overrides {
            timezone: cli.timezone,
            namespace: cli.namespace,
            kubeconfig: cli.kubeconfig,
        })
        .context("Invalid configuration")?;

    let (engine, parsed) = cli.command.into_parts();
    let args = native_args(&raw).unwrap_or(parsed);
    let args = if args.is_empty() {
        engine.default_args()
    } else {
        args
    };
    let commander = engine
        .parse_args(&args)
        .with_context(|| format!("Invalid {} arguments", engine))?;
    debug!(engine = %engine, connect_info = ?commander.connect_info(), "Parsed arguments");

    let client =
        KubeWorkloadClient::connect(settings.kubeconfig.as_deref(), &settings.namespace)
            .await
            .context("Failed to create Kubernetes client")?;
    let lifecycle = PodLifecycle::new(Arc::new(client), settings.clone());
    let name = WorkloadName::generate(
        engine.tag(),
        settings.timezone,
        &whoami::username(),
        Utc::now(),
    );

    info!(
        pod = %name,
        namespace = %settings.namespace,
        interactive = commander.is_interactive(),
        "Starting podsql"
    );

    if commander.is_interactive() {
        run_interactive(&lifecycle, commander.as_ref(), name, || {
            TerminalIo::local().map_err(PodsqlError::from)
        })
        .await?;
        return Ok(ExitCode::SUCCESS);
    }

    let result = run_batch(&lifecycle, commander.as_ref(), name).await?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(result.output.as_bytes())?;
    if !result.output.ends_with('\n') {
        writeln!(stdout)?;
    }
    stdout.flush()?;

    if result.succeeded() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Initialize logging subsystem. Logs go to stderr so batch output on
/// stdout stays clean.
fn init_logging(cli: &Cli) {
    let filter = if cli.verbose {
        EnvFilter::new("podsql=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .init();
}
