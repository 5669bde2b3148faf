//! Token scanning and shell escaping shared by every engine parser
//!
//! Each engine declares its value-taking flags as a table of [`FlagSpec`]s.
//! A token matches a spec either in separated form (`-h host`,
//! `--host host`) or in joined form (`-hhost`, `-h=host`, `--host=host`);
//! both forms resolve to the same value through [`ArgCursor::value`].

use crate::error::{PodsqlError, Result};

/// Characters that never need quoting inside a `/bin/sh -c` command
const SHELL_SAFE: &str = "-_./:=,@%+";

/// A value-taking flag understood by an engine parser
#[derive(Debug, Clone, Copy)]
pub(crate) struct FlagSpec<K> {
    pub short: Option<&'static str>,
    pub long: Option<&'static str>,
    pub kind: K,
}

impl<K: Copy> FlagSpec<K> {
    pub const fn new(short: Option<&'static str>, long: Option<&'static str>, kind: K) -> Self {
        Self { short, long, kind }
    }

    /// Match a token against this flag
    fn matches<'t>(&self, token: &'t str) -> Option<FlagMatch<'t>> {
        if let Some(long) = self.long {
            if token == long {
                return Some(FlagMatch::Separated);
            }
            if let Some(value) = token.strip_prefix(long).and_then(|r| r.strip_prefix('=')) {
                return Some(FlagMatch::Joined(value));
            }
        }
        if let Some(short) = self.short {
            if token == short {
                return Some(FlagMatch::Separated);
            }
            if let Some(rest) = token.strip_prefix(short) {
                return Some(FlagMatch::Joined(rest.strip_prefix('=').unwrap_or(rest)));
            }
        }
        None
    }
}

/// How a token matched a flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlagMatch<'t> {
    /// The value is the next token
    Separated,
    /// The value was part of the token
    Joined(&'t str),
}

/// Find the first spec matching a token
pub(crate) fn find_flag<'t, K: Copy>(
    specs: &[FlagSpec<K>],
    token: &'t str,
) -> Option<(K, FlagMatch<'t>)> {
    specs
        .iter()
        .find_map(|spec| spec.matches(token).map(|m| (spec.kind, m)))
}

/// One raw argument, classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Token<'a> {
    /// Starts with `-` and appeared before any `--`
    Flag(&'a str),
    /// Anything else
    Positional(&'a str),
}

/// Left-to-right cursor over the raw argument list
pub(crate) struct ArgCursor<'a> {
    args: &'a [String],
    pos: usize,
    options_ended: bool,
}

impl<'a> ArgCursor<'a> {
    pub fn new(args: &'a [String]) -> Self {
        Self {
            args,
            pos: 0,
            options_ended: false,
        }
    }

    /// Advance to the next token. A bare `--` is consumed and turns every
    /// following token into a positional.
    pub fn next_token(&mut self) -> Option<Token<'a>> {
        loop {
            let arg = self.args.get(self.pos)?;
            self.pos += 1;

            if self.options_ended {
                return Some(Token::Positional(arg));
            }
            if arg == "--" {
                self.options_ended = true;
                continue;
            }
            if arg.len() > 1 && arg.starts_with('-') {
                return Some(Token::Flag(arg));
            }
            return Some(Token::Positional(arg));
        }
    }

    /// Resolve the value of a matched flag, consuming the next token for the
    /// separated form.
    pub fn value(&mut self, flag: &str, matched: FlagMatch<'_>) -> Result<String> {
        match matched {
            FlagMatch::Joined(value) => Ok(value.to_string()),
            FlagMatch::Separated => {
                let value = self
                    .args
                    .get(self.pos)
                    .ok_or_else(|| PodsqlError::missing_value(flag))?;
                self.pos += 1;
                Ok(value.clone())
            }
        }
    }
}

/// Quote a value for `/bin/sh`, leaving plain words untouched
pub fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || SHELL_SAFE.contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// Escape an unrecognized flag so it survives `/bin/sh -c` unchanged.
///
/// `--name=value` keeps the name bare and quotes the value.
pub fn escape_flag(token: &str) -> String {
    match token.split_once('=') {
        Some((name, value)) if token.starts_with("--") => {
            format!("{}={}", name, shell_quote(value))
        }
        _ => shell_quote(token),
    }
}

/// Join command words with single spaces
pub(crate) fn join_words<I, S>(words: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    words
        .into_iter()
        .map(|w| w.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
