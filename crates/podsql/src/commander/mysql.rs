//! MySQL `mysql` client
//!
//! Recognized flags: `-h/--host`, `-P/--port`, `-u/--user`, `-p/--password`,
//! `-D/--database`, `-e/--execute` and `-?/--help`. A later `-e` replaces an
//! earlier one. The password reaches the client through `MYSQL_PWD`, which
//! keeps it out of the process list inside the pod.

use super::args::{escape_flag, find_flag, join_words, shell_quote, ArgCursor, FlagSpec, Token};
use super::{
    batch_or_help, DbCommander, Engine, PASSWORD_KEY, SCRIPT_PATH, SECRET_USER_ENV,
    SECRET_USER_REF, USERNAME_KEY,
};
use crate::connect_info::ConnectInfo;
use crate::error::Result;
use std::collections::BTreeMap;

/// Default MySQL port
pub const DEFAULT_PORT: &str = "3306";

const IMAGE: &str = "mysql:8.0";

#[derive(Debug, Clone, Copy)]
enum Flag {
    Host,
    Port,
    User,
    Password,
    Database,
    Execute,
}

const FLAGS: &[FlagSpec<Flag>] = &[
    FlagSpec::new(Some("-h"), Some("--host"), Flag::Host),
    FlagSpec::new(Some("-P"), Some("--port"), Flag::Port),
    FlagSpec::new(Some("-u"), Some("--user"), Flag::User),
    FlagSpec::new(Some("-p"), Some("--password"), Flag::Password),
    FlagSpec::new(Some("-D"), Some("--database"), Flag::Database),
    FlagSpec::new(Some("-e"), Some("--execute"), Flag::Execute),
];

/// Commander for the MySQL client
#[derive(Debug, Clone)]
pub struct MysqlCommander {
    escaped_args: Vec<String>,
    connect_info: ConnectInfo,
    query: Option<String>,
    help: bool,
}

impl MysqlCommander {
    /// Parse `mysql` arguments
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
                Token::Flag(flag) => match find_flag(FLAGS, flag) {
                    Some((kind, matched)) => {
                        let value = cursor.value(flag, matched)?;
                        commander.assign(kind, value);
                    }
                    None => commander.escaped_args.push(escape_flag(flag)),
                },
            }
        }

        Ok(commander)
    }

    fn assign(&mut self, flag: Flag, value: String) {
        let info = &mut self.connect_info;
        match flag {
            Flag::Host => info.server = Some(value),
            Flag::Port => info.port = value,
            Flag::User => info.user = Some(value),
            Flag::Password => info.password = Some(value),
            Flag::Database => info.db_name = Some(value),
            Flag::Execute => self.query = Some(value),
        }
    }

    fn connection_words(&self) -> Vec<String> {
        let info = &self.connect_info;
        let mut words = vec!["mysql".to_string()];
        if let Some(server) = &info.server {
            words.extend(["-h".to_string(), shell_quote(server)]);
        }
        words.extend([
            "-P".to_string(),
            shell_quote(&info.port),
            "-u".to_string(),
            SECRET_USER_REF.to_string(),
        ]);
        if let Some(db) = &info.db_name {
            words.extend(["-D".to_string(), shell_quote(db)]);
        }
        words.extend(self.escaped_args.iter().cloned());
        words
    }
}

impl DbCommander for MysqlCommander {
    fn connect_info(&self) -> &ConnectInfo {
        &self.connect_info
    }

    fn query(&self) -> String {
        self.query.clone().unwrap_or_default()
    }

    fn help_command(&self) -> String {
        "mysql --help".to_string()
    }

    fn command(&self) -> String {
        batch_or_help(self.help, self.help_command(), || {
            format!("{} < {}", join_words(self.connection_words()), SCRIPT_PATH)
        })
    }

    fn interactive_command(&self) -> String {
        join_words(self.connection_words())
    }

    fn container_image(&self) -> &'static str {
        IMAGE
    }

    fn secret_env(&self) -> BTreeMap<&'static str, &'static str> {
        BTreeMap::from([(SECRET_USER_ENV, USERNAME_KEY), ("MYSQL_PWD", PASSWORD_KEY)])
    }

    fn engine(&self) -> Engine {
        Engine::MySql
    }

    fn is_interactive(&self) -> bool {
        self.query.is_none() && !self.help
    }
}
