// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. The database URL doubles as the backend selector: when it is
// set, the workflow store and presence tracker run on PostgreSQL; when it is
// absent, both fall back to in-process state.

use std::net::SocketAddr;

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to sensible development defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// JWT signing secret for access tokens.
    pub jwt_secret: String,
    /// PostgreSQL connection string. Absent means in-process backends.
    pub database_url: Option<String>,
    /// Log filter directive (e.g. `info`, `runbook_relay=debug`).
    pub log_filter: String,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `RUNBOOK_RELAY_HOST` | `0.0.0.0` |
    /// | `RUNBOOK_RELAY_PORT` | `8080` |
    /// | `RUNBOOK_RELAY_JWT_SECRET` | dev-only placeholder |
    /// | `RUNBOOK_RELAY_DATABASE_URL` | *(none — in-process backends)* |
    /// | `RUNBOOK_RELAY_LOG_FILTER` | `info` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("RUNBOOK_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("RUNBOOK_RELAY_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret = env("RUNBOOK_RELAY_JWT_SECRET").unwrap_or_else(|_| {
            "runbook_local_development_jwt_secret_must_be_32_chars".into()
        });

        let database_url = env("RUNBOOK_RELAY_DATABASE_URL").ok();

        let log_filter =
            env("RUNBOOK_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());

        Self { listen_addr, jwt_secret, database_url, log_filter }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == "runbook_local_development_jwt_secret_must_be_32_chars"
    }
}
