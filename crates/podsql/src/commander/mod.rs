//! Per-engine translation of native client arguments
//!
//! Every supported database client gets one [`DbCommander`] implementation.
//! A commander is built once from the raw arguments that followed the
//! engine subcommand and is never mutated afterwards. It knows:
//!
//! - the normalized [`ConnectInfo`] the arguments describe
//! - the query or script body to ship into the pod (batch mode)
//! - the shell commands to run for interactive and batch mode
//! - the container image and the secret keys the client reads from env
//!
//! Adding an engine means adding one implementation and one [`Engine`]
//! variant.

pub mod args;
pub mod mysql;
pub mod pgpass;
pub mod postgres;
pub mod sqlserver;

pub use mysql::MysqlCommander;
pub use postgres::{PgEnvironment, PostgresCommander};
pub use sqlserver::SqlServerCommander;

use crate::connect_info::ConnectInfo;
use crate::error::{PodsqlError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Directory the script object is mounted at inside the pod
pub const SCRIPT_DIR: &str = "/sql";

/// Key of the script inside the script object
pub const SCRIPT_KEY: &str = "query.sql";

/// Full in-pod path of the batch script
pub const SCRIPT_PATH: &str = "/sql/query.sql";

/// Env var carrying the user name from the credential object
pub const SECRET_USER_ENV: &str = "SECRET_DB_USER";

/// Env var carrying the password for clients that accept it as a flag
pub const SECRET_PASSWORD_ENV: &str = "SECRET_DB_PASSWORD";

/// Credential object key holding the user name
pub const USERNAME_KEY: &str = "username";

/// Credential object key holding the password
pub const PASSWORD_KEY: &str = "password";

/// Shell reference to the injected user name
pub(crate) const SECRET_USER_REF: &str = "\"$SECRET_DB_USER\"";

/// Translation of one engine's native arguments into pod commands
pub trait DbCommander: Send + Sync + fmt::Debug {
    /// Connection descriptor parsed from the arguments
    fn connect_info(&self) -> &ConnectInfo;

    /// Query or script body executed in batch mode
    fn query(&self) -> String;

    /// Command that prints the client's help text
    fn help_command(&self) -> String;

    /// Batch command: runs the mounted script to completion
    fn command(&self) -> String;

    /// Interactive command: starts the client shell with pass-through flags
    fn interactive_command(&self) -> String;

    /// Default container image for the client
    fn container_image(&self) -> &'static str;

    /// Environment variable name to credential object key
    fn secret_env(&self) -> BTreeMap<&'static str, &'static str>;

    /// Which engine this commander drives
    fn engine(&self) -> Engine;

    /// True when no query, script or help was requested
    fn is_interactive(&self) -> bool;
}

/// Supported database engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Engine {
    /// MySQL / MariaDB `mysql` client
    MySql,
    /// SQL Server `sqlcmd`
    SqlCmd,
    /// PostgreSQL `psql`
    Postgres,
}

impl Engine {
    /// All engines, in CLI order
    pub const ALL: [Engine; 3] = [Engine::MySql, Engine::SqlCmd, Engine::Postgres];

    /// Short tag used for pod names, container names and labels
    pub fn tag(&self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::SqlCmd => "sqlcmd",
            Self::Postgres => "postgres",
        }
    }

    /// Parse raw arguments into the engine's commander
    pub fn parse_args(&self, args: &[String]) -> Result<Box<dyn DbCommander>> {
        Ok(match self {
            Self::MySql => Box::new(MysqlCommander::parse(args)?),
            Self::SqlCmd => Box::new(SqlServerCommander::parse(args)?),
            Self::Postgres => Box::new(PostgresCommander::parse(args)?),
        })
    }

    /// Arguments used when the subcommand was given none
    pub fn default_args(&self) -> Vec<String> {
        let help = match self {
            Self::MySql | Self::Postgres => "--help",
            Self::SqlCmd => "-?",
        };
        vec![help.to_string()]
    }

    /// Guess the engine from a connection string such as
    /// `mysql://...`, `sqlserver://...` or `postgresql://...`
    pub fn from_connection_string(conn: &str) -> Option<Self> {
        if conn.contains("mysql") {
            Some(Self::MySql)
        } else if conn.contains("sqlserver") {
            Some(Self::SqlCmd)
        } else if conn.contains("postgresql") || conn.contains("postgres") {
            Some(Self::Postgres)
        } else {
            None
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

impl FromStr for Engine {
    type Err = PodsqlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Self::MySql),
            "sqlcmd" | "sqlserver" | "mssql" => Ok(Self::SqlCmd),
            "postgres" | "postgresql" | "psql" => Ok(Self::Postgres),
            other => Err(PodsqlError::config(format!("unknown engine '{}'", other))),
        }
    }
}

/// Pick the help, batch or interactive flavour shared by all engines
pub(crate) fn batch_or_help(
    help: bool,
    help_command: String,
    batch: impl FnOnce() -> String,
) -> String {
    if help {
        help_command
    } else {
        batch()
    }
}
