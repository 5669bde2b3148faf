//! Normalized connection descriptor shared by every engine

use std::fmt;

/// Endpoint and credentials for one database connection.
///
/// Every field except `port` is optional; `port` always carries the
/// engine default until a flag, environment variable or credentials file
/// overrides it.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectInfo {
    /// Server host name or address
    pub server: Option<String>,
    /// Server port
    pub port: String,
    /// User name
    pub user: Option<String>,
    /// Password
    pub password: Option<String>,
    /// Database name
    pub db_name: Option<String>,
}

impl ConnectInfo {
    /// Create a descriptor with only the default port set
    pub fn with_default_port(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Default::default()
        }
    }

    /// User name, or an empty string when unset
    pub fn user_or_empty(&self) -> &str {
        self.user.as_deref().unwrap_or_default()
    }

    /// Password, or an empty string when unset
    pub fn password_or_empty(&self) -> &str {
        self.password.as_deref().unwrap_or_default()
    }
}

impl fmt::Debug for ConnectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never leak the password into logs
        f.debug_struct("ConnectInfo")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("db_name", &self.db_name)
            .finish()
    }
}
