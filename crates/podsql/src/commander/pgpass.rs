//! PostgreSQL password file (`~/.pgpass`) lookup
//!
//! Each non-comment line holds `host:port:database:user:password`. A column
//! of `*` matches anything; `\:` and `\\` escape a literal colon or
//! backslash. Only the first matching record is used.

use crate::connect_info::ConnectInfo;
use crate::error::{PodsqlError, Result};
use std::io::ErrorKind;
use std::path::Path;

const WILDCARD: &str = "*";
const FIELD_COUNT: usize = 5;

/// One record of a password file
#[derive(Clone, PartialEq, Eq)]
pub struct PassEntry {
    pub host: String,
    pub port: String,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for PassEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassEntry")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

impl PassEntry {
    /// Whether every set descriptor field agrees with this record
    pub fn matches(&self, info: &ConnectInfo) -> bool {
        column_matches(&self.host, info.server.as_deref())
            && column_matches(&self.port, Some(info.port.as_str()))
            && column_matches(&self.database, info.db_name.as_deref())
            && column_matches(&self.user, info.user.as_deref())
    }

    /// Fill still-unset descriptor fields from this record
    pub fn fill(&self, info: &mut ConnectInfo) {
        fill_field(&mut info.server, &self.host);
        fill_field(&mut info.db_name, &self.database);
        fill_field(&mut info.user, &self.user);
        // The password column is literal; `*` is only a wildcard in the
        // matching columns
        if is_unset(&info.password) {
            info.password = Some(self.password.clone());
        }
    }
}

fn column_matches(column: &str, value: Option<&str>) -> bool {
    match value {
        Some(value) if !value.is_empty() => column == WILDCARD || column == value,
        _ => true,
    }
}

fn is_unset(field: &Option<String>) -> bool {
    field.as_deref().map_or(true, str::is_empty)
}

fn fill_field(field: &mut Option<String>, column: &str) {
    if is_unset(field) && column != WILDCARD {
        *field = Some(column.to_string());
    }
}

/// Split a record on unescaped colons, resolving `\:` and `\\`
fn split_record(line: &str) -> Vec<String> {
    let mut fields = vec![String::new()];
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next) => push_char(&mut fields, next),
                None => push_char(&mut fields, '\\'),
            },
            ':' => fields.push(String::new()),
            other => push_char(&mut fields, other),
        }
    }
    fields
}

fn push_char(fields: &mut [String], c: char) {
    if let Some(field) = fields.last_mut() {
        field.push(c);
    }
}

/// Parse one line. Blank and comment lines yield `None`.
fn parse_line(path: &Path, line_no: usize, line: &str) -> Result<Option<PassEntry>> {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() || line.trim_start().starts_with('#') {
        return Ok(None);
    }

    let fields = split_record(line);
    if fields.len() != FIELD_COUNT {
        return Err(PodsqlError::InvalidPassFile {
            path: path.to_path_buf(),
            line: line_no,
            fields: fields.len(),
        });
    }

    let mut fields = fields.into_iter();
    let mut next = || fields.next().unwrap_or_default();
    Ok(Some(PassEntry {
        host: next(),
        port: next(),
        database: next(),
        user: next(),
        password: next(),
    }))
}

/// Find the first record in `contents` matching `info`.
///
/// Lines are checked in order and scanning stops at the first match, so a
/// malformed record after it is never seen.
pub fn find_entry(path: &Path, contents: &str, info: &ConnectInfo) -> Result<Option<PassEntry>> {
    for (idx, line) in contents.lines().enumerate() {
        if let Some(entry) = parse_line(path, idx + 1, line)? {
            if entry.matches(info) {
                return Ok(Some(entry));
            }
        }
    }
    Ok(None)
}

/// Look up `info` in the password file at `path`. A missing file is not an
/// error.
pub fn lookup(path: &Path, info: &ConnectInfo) -> Result<Option<PassEntry>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(PodsqlError::config(format!(
                "failed to read password file {}: {}",
                path.display(),
                e
            )))
        }
    };
    find_entry(path, &contents, info)
}
