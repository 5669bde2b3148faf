//! Workload naming
//!
//! Pod names look like `podsql-mysql-20240102-150405-alice-1a2b3c`: engine
//! tag, local timestamp in the configured timezone, the sanitized caller and
//! a random suffix so two invocations in the same second never collide.
//! Secret and ConfigMap names derive from the pod name.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::fmt;
use uuid::Uuid;

/// Prefix shared by every generated pod
pub const NAME_PREFIX: &str = "podsql";

const MAX_IDENTITY_LEN: usize = 20;
const SUFFIX_LEN: usize = 6;

/// Name of one ephemeral workload
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkloadName(String);

impl WorkloadName {
    /// Generate a fresh name for `engine_tag` run by `identity` at `now`
    pub fn generate(engine_tag: &str, tz: Tz, identity: &str, now: DateTime<Utc>) -> Self {
        let stamp = now.with_timezone(&tz).format("%Y%m%d-%H%M%S");
        let suffix = Uuid::new_v4().simple().to_string();
        let mut name = format!("{}-{}-{}", NAME_PREFIX, engine_tag, stamp);

        let identity = sanitize_identity(identity);
        if !identity.is_empty() {
            name.push('-');
            name.push_str(&identity);
        }
        name.push('-');
        name.push_str(&suffix[..SUFFIX_LEN]);
        Self(name)
    }

    /// Wrap an existing pod name
    pub fn from_pod_name(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the credential Secret owned by the pod
    pub fn secret_name(&self) -> String {
        format!("{}-secret", self.0)
    }

    /// Name of the script ConfigMap owned by the pod
    pub fn config_map_name(&self) -> String {
        format!("{}-cm", self.0)
    }
}

impl fmt::Display for WorkloadName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for WorkloadName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Reduce a user name to DNS-1123 label characters
fn sanitize_identity(identity: &str) -> String {
    let cleaned: String = identity
        .to_lowercase()
        .chars()
        .filter_map(|c| match c {
            'a'..='z' | '0'..='9' | '-' => Some(c),
            '_' | ' ' => Some('-'),
            _ => None,
        })
        .take(MAX_IDENTITY_LEN)
        .collect();
    cleaned.trim_matches('-').to_string()
}
