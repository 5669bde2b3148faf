//! SQL Server `sqlcmd` client
//!
//! sqlcmd flags are single letters whose value may be joined (`-Sdb`) or
//! separated (`-S db`). `-S` accepts `[tcp:]server[,port]`. `-q`/`-Q` carry
//! the single query; `-i` input files are not forwarded because the script
//! travels through the mounted script object instead.

use super::args::{escape_flag, find_flag, join_words, shell_quote, ArgCursor, FlagSpec, Token};
use super::{
    batch_or_help, DbCommander, Engine, PASSWORD_KEY, SCRIPT_PATH, SECRET_PASSWORD_ENV,
    SECRET_USER_ENV, SECRET_USER_REF, USERNAME_KEY,
};
use crate::connect_info::ConnectInfo;
use crate::error::Result;
use std::collections::BTreeMap;
use tracing::warn;

/// Default SQL Server port
pub const DEFAULT_PORT: &str = "1433";

const SQLCMD: &str = "/opt/mssql-tools/bin/sqlcmd";
const IMAGE: &str = "mcr.microsoft.com/mssql-tools";

#[derive(Debug, Clone, Copy)]
enum Flag {
    Server,
    User,
    Password,
    Database,
    Query,
    InputFile,
}

const FLAGS: &[FlagSpec<Flag>] = &[
    FlagSpec::new(Some("-S"), None, Flag::Server),
    FlagSpec::new(Some("-U"), None, Flag::User),
    FlagSpec::new(Some("-P"), None, Flag::Password),
    FlagSpec::new(Some("-d"), None, Flag::Database),
    FlagSpec::new(Some("-q"), None, Flag::Query),
    FlagSpec::new(Some("-Q"), None, Flag::Query),
    FlagSpec::new(Some("-i"), None, Flag::InputFile),
];

/// Commander for `sqlcmd`
#[derive(Debug, Clone)]
pub struct SqlServerCommander {
    escaped_args: Vec<String>,
    connect_info: ConnectInfo,
    query: Option<String>,
    help: bool,
}

impl SqlServerCommander {
    /// Parse `sqlcmd` arguments
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut commander = Self {
            escaped_args: Vec::new(),
            connect_info: ConnectInfo::with_default_port(DEFAULT_PORT),
            query: None,
            help: false,
        };

        let mut cursor = ArgCursor::new(args);
        while let Some(token) = cursor.next_token() {
            match token {
                Token::Positional(value) => commander.escaped_args.push(shell_quote(value)),
                Token::Flag("-?" | "--help") => commander.help = true,
                // DSN mode makes no sense inside the pod
                Token::Flag(flag) if flag.starts_with("-D") => {}
                Token::Flag(flag) => match find_flag(FLAGS, flag) {
                    Some((kind, matched)) => {
                        let value = cursor.value(flag, matched)?;
                        commander.assign(kind, value);
                    }
                    None => commander.escaped_args.push(escape_unknown(flag)),
                },
            }
        }

        Ok(commander)
    }

    fn assign(&mut self, flag: Flag, value: String) {
        let info = &mut self.connect_info;
        match flag {
            Flag::Server => {
                let (server, port) = split_server(&value);
                info.server = Some(server.to_string());
                if let Some(port) = port {
                    info.port = port.to_string();
                }
            }
            Flag::User => info.user = Some(value),
            Flag::Password => info.password = Some(value),
            Flag::Database => info.db_name = Some(value),
            Flag::Query => self.query = Some(value),
            Flag::InputFile => {
                warn!(file = %value, "Ignoring sqlcmd -i; pass the query with -q or -Q");
            }
        }
    }

    /// `server,port`, except for named instances which resolve their own port
    fn server_port(&self) -> Option<String> {
        let info = &self.connect_info;
        let server = info.server.as_deref()?;
        if server.contains('\\') {
            Some(server.to_string())
        } else {
            Some(format!("{},{}", server, info.port))
        }
    }

    fn connection_words(&self) -> Vec<String> {
        let mut words = vec![SQLCMD.to_string()];
        if let Some(server) = self.server_port() {
            words.extend(["-S".to_string(), shell_quote(&server)]);
        }
        words.extend([
            "-U".to_string(),
            SECRET_USER_REF.to_string(),
            "-P".to_string(),
            format!("\"${}\"", SECRET_PASSWORD_ENV),
        ]);
        if let Some(db) = &self.connect_info.db_name {
            words.extend(["-d".to_string(), shell_quote(db)]);
        }
        words
    }
}

/// Split `[tcp:]server[,port]`
fn split_server(value: &str) -> (&str, Option<&str>) {
    let value = value.strip_prefix("tcp:").unwrap_or(value);
    match value.split_once(',') {
        Some((server, port)) if !port.is_empty() => (server, Some(port)),
        Some((server, _)) => (server, None),
        None => (value, None),
    }
}

/// Short flags keep their letter bare and quote a joined value
fn escape_unknown(flag: &str) -> String {
    if flag.starts_with("--") || flag.len() <= 2 {
        return escape_flag(flag);
    }
    match flag.char_indices().nth(2) {
        Some((split, _)) => format!("{}{}", &flag[..split], shell_quote(&flag[split..])),
        None => escape_flag(flag),
    }
}

impl DbCommander for SqlServerCommander {
    fn connect_info(&self) -> &ConnectInfo {
        &self.connect_info
    }

    fn query(&self) -> String {
        self.query.clone().unwrap_or_default()
    }

    fn help_command(&self) -> String {
        format!("{} -?", SQLCMD)
    }

    fn command(&self) -> String {
        batch_or_help(self.help, self.help_command(), || {
            let mut words = self.connection_words();
            words.extend(["-i".to_string(), SCRIPT_PATH.to_string()]);
            words.extend(self.escaped_args.iter().cloned());
            join_words(words)
        })
    }

    fn interactive_command(&self) -> String {
        let mut words = self.connection_words();
        words.extend(self.escaped_args.iter().cloned());
        join_words(words)
    }

    fn container_image(&self) -> &'static str {
        IMAGE
    }

    fn secret_env(&self) -> BTreeMap<&'static str, &'static str> {
        BTreeMap::from([
            (SECRET_USER_ENV, USERNAME_KEY),
            (SECRET_PASSWORD_ENV, PASSWORD_KEY),
        ])
    }

    fn engine(&self) -> Engine {
        Engine::SqlCmd
    }

    fn is_interactive(&self) -> bool {
        self.query.is_none() && !self.help
    }
}
