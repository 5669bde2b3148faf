//! PostgreSQL `psql` client
//!
//! Connection fields are resolved in three layers, each filling only what is
//! still unset: command-line flags and positionals, then the `PG*`
//! environment variables, then the first matching password file record.
//!
//! `-c` and `-f` accumulate in argument order. `-f` files are read on the
//! local host; full-line `--` comments are dropped and every other line is
//! kept verbatim.

use super::args::{
    escape_flag, find_flag, join_words, shell_quote, ArgCursor, FlagMatch, FlagSpec, Token,
};
use super::pgpass;
use super::{
    batch_or_help, DbCommander, Engine, PASSWORD_KEY, SCRIPT_PATH, SECRET_USER_ENV,
    SECRET_USER_REF, USERNAME_KEY,
};
use crate::connect_info::ConnectInfo;
use crate::error::{PodsqlError, Result};
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default PostgreSQL port
pub const DEFAULT_PORT: &str = "5432";

const IMAGE: &str = "postgres:16-alpine";

#[derive(Debug, Clone, Copy)]
enum Flag {
    Host,
    Port,
    User,
    Database,
    Command,
    File,
    /// psql option whose value is forwarded untouched
    Passthrough,
}

const FLAGS: &[FlagSpec<Flag>] = &[
    FlagSpec::new(Some("-h"), Some("--host"), Flag::Host),
    FlagSpec::new(Some("-p"), Some("--port"), Flag::Port),
    FlagSpec::new(Some("-U"), Some("--username"), Flag::User),
    FlagSpec::new(Some("-d"), Some("--dbname"), Flag::Database),
    FlagSpec::new(Some("-c"), Some("--command"), Flag::Command),
    FlagSpec::new(Some("-f"), Some("--file"), Flag::File),
    FlagSpec::new(Some("-v"), Some("--set"), Flag::Passthrough),
    FlagSpec::new(None, Some("--variable"), Flag::Passthrough),
    FlagSpec::new(Some("-P"), Some("--pset"), Flag::Passthrough),
    FlagSpec::new(Some("-F"), Some("--field-separator"), Flag::Passthrough),
    FlagSpec::new(Some("-R"), Some("--record-separator"), Flag::Passthrough),
    FlagSpec::new(Some("-T"), Some("--table-attr"), Flag::Passthrough),
    FlagSpec::new(Some("-o"), Some("--output"), Flag::Passthrough),
    FlagSpec::new(Some("-L"), Some("--log-file"), Flag::Passthrough),
];

/// The `PG*` environment consulted after flags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PgEnvironment {
    pub host: Option<String>,
    pub port: Option<String>,
    pub database: Option<String>,
    pub user: Option<String>,
    /// Password file location (`PGPASSFILE` or `~/.pgpass`)
    pub passfile: Option<PathBuf>,
}

impl PgEnvironment {
    /// Read the process environment. Empty variables count as unset.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            host: var("PGHOST"),
            port: var("PGPORT"),
            database: var("PGDATABASE"),
            user: var("PGUSER"),
            passfile: var("PGPASSFILE")
                .map(PathBuf::from)
                .or_else(|| dirs::home_dir().map(|home| home.join(".pgpass"))),
        }
    }
}

/// Commander for `psql`
#[derive(Debug, Clone)]
pub struct PostgresCommander {
    escaped_args: Vec<String>,
    connect_info: ConnectInfo,
    script: Vec<String>,
    help: Option<String>,
}

impl PostgresCommander {
    /// Parse `psql` arguments against the process environment
    pub fn parse(args: &[String]) -> Result<Self> {
        Self::parse_with_env(args, &PgEnvironment::from_env())
    }

    /// Parse `psql` arguments against an explicit environment
    pub fn parse_with_env(args: &[String], env: &PgEnvironment) -> Result<Self> {
        let mut commander = Self {
            escaped_args: Vec::new(),
            connect_info: ConnectInfo::default(),
            script: Vec::new(),
            help: None,
        };
        let mut port: Option<String> = None;
        let mut positionals = 0usize;

        let mut cursor = ArgCursor::new(args);
        while let Some(token) = cursor.next_token() {
            match token {
                Token::Flag("-?" | "--help") => commander.help = Some(String::new()),
                Token::Flag(flag) if flag.starts_with("--help=") => {
                    commander.help = Some(flag["--help=".len()..].to_string());
                }
                Token::Flag(flag) => match find_flag(FLAGS, flag) {
                    Some((Flag::Passthrough, matched)) => {
                        commander.passthrough(flag, matched, &mut cursor)?;
                    }
                    Some((kind, matched)) => {
                        let value = cursor.value(flag, matched)?;
                        match kind {
                            Flag::Port => port = Some(value),
                            _ => commander.assign(kind, value)?,
                        }
                    }
                    None => commander.escaped_args.push(escape_flag(flag)),
                },
                Token::Positional(value) => {
                    let info = &mut commander.connect_info;
                    let slot = match positionals {
                        0 => Some(&mut info.db_name),
                        1 => Some(&mut info.user),
                        _ => None,
                    };
                    positionals += 1;
                    match slot {
                        Some(field) if field.is_none() => *field = Some(value.to_string()),
                        _ => commander.escaped_args.push(shell_quote(value)),
                    }
                }
            }
        }

        commander.apply_env(env, port);
        if let Some(passfile) = &env.passfile {
            commander.apply_passfile(passfile)?;
        }

        Ok(commander)
    }

    fn assign(&mut self, flag: Flag, value: String) -> Result<()> {
        let info = &mut self.connect_info;
        match flag {
            Flag::Host => info.server = Some(value),
            Flag::User => info.user = Some(value),
            Flag::Database => info.db_name = Some(value),
            Flag::Command => self.script.push(value),
            Flag::File => self.script.extend(read_script(&value)?),
            Flag::Port | Flag::Passthrough => {}
        }
        Ok(())
    }

    /// Forward a value-taking psql option, keeping the value attached
    fn passthrough(
        &mut self,
        flag: &str,
        matched: FlagMatch<'_>,
        cursor: &mut ArgCursor<'_>,
    ) -> Result<()> {
        match matched {
            FlagMatch::Joined(_) => self.escaped_args.push(escape_flag(flag)),
            FlagMatch::Separated => {
                let value = cursor.value(flag, matched)?;
                self.escaped_args.push(flag.to_string());
                self.escaped_args.push(shell_quote(&value));
            }
        }
        Ok(())
    }

    fn apply_env(&mut self, env: &PgEnvironment, port: Option<String>) {
        let info = &mut self.connect_info;
        fill(&mut info.server, &env.host);
        fill(&mut info.db_name, &env.database);
        fill(&mut info.user, &env.user);
        info.port = port
            .or_else(|| env.port.clone())
            .unwrap_or_else(|| DEFAULT_PORT.to_string());
    }

    fn apply_passfile(&mut self, path: &Path) -> Result<()> {
        if let Some(entry) = pgpass::lookup(path, &self.connect_info)? {
            debug!(path = %path.display(), "Using password file record");
            entry.fill(&mut self.connect_info);
        }
        Ok(())
    }

    fn connection_words(&self) -> Vec<String> {
        let info = &self.connect_info;
        let mut words = vec!["psql".to_string()];
        if let Some(server) = &info.server {
            words.extend(["-h".to_string(), shell_quote(server)]);
        }
        words.extend([
            "-p".to_string(),
            shell_quote(&info.port),
            "-U".to_string(),
            SECRET_USER_REF.to_string(),
        ]);
        if let Some(db) = &info.db_name {
            words.extend(["-d".to_string(), shell_quote(db)]);
        }
        words.extend(self.escaped_args.iter().cloned());
        words
    }
}

fn fill(field: &mut Option<String>, value: &Option<String>) {
    if field.is_none() {
        field.clone_from(value);
    }
}

/// Read a local `-f` script, `-` meaning standard input
fn read_script(path: &str) -> Result<Vec<String>> {
    let contents = if path == "-" {
        std::io::stdin()
            .lock()
            .lines()
            .collect::<std::io::Result<Vec<_>>>()
            .map(|lines| lines.join("\n"))
    } else {
        std::fs::read_to_string(path)
    }
    .map_err(|source| PodsqlError::ScriptFile {
        path: PathBuf::from(path),
        source,
    })?;

    Ok(script_lines(&contents))
}

/// Script lines without full-line `--` comments
fn script_lines(contents: &str) -> Vec<String> {
    contents
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .map(str::to_string)
        .collect()
}

impl DbCommander for PostgresCommander {
    fn connect_info(&self) -> &ConnectInfo {
        &self.connect_info
    }

    fn query(&self) -> String {
        self.script.join("\n")
    }

    fn help_command(&self) -> String {
        match self.help.as_deref() {
            Some(topic) if !topic.is_empty() => format!("psql --help={}", shell_quote(topic)),
            _ => "psql --help".to_string(),
        }
    }

    fn command(&self) -> String {
        batch_or_help(self.help.is_some(), self.help_command(), || {
            let mut words = self.connection_words();
            words.extend(["-f".to_string(), SCRIPT_PATH.to_string()]);
            join_words(words)
        })
    }

    fn interactive_command(&self) -> String {
        join_words(self.connection_words())
    }

    fn container_image(&self) -> &'static str {
        IMAGE
    }

    fn secret_env(&self) -> BTreeMap<&'static str, &'static str> {
        BTreeMap::from([(SECRET_USER_ENV, USERNAME_KEY), ("PGPASSWORD", PASSWORD_KEY)])
    }

    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    fn is_interactive(&self) -> bool {
        self.script.is_empty() && self.help.is_none()
    }
}
