// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. Individual modules (DB pool, CORS) may still read their own
// env vars — this module covers the core server settings.

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
    /// PostgreSQL connection string; `None` selects in-memory stores
    /// (development only).
    pub database_url: Option<String>,
    /// Log filter directive (e.g. `info`, `civica_relay=debug`).
    pub log_filter: String,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `CIVICA_RELAY_HOST` | `0.0.0.0` |
    /// | `CIVICA_RELAY_PORT` | `8080` |
    /// | `CIVICA_RELAY_JWT_SECRET` | dev-only placeholder |
    /// | `CIVICA_RELAY_DATABASE_URL` | *(none — in-memory stores)* |
    /// | `CIVICA_RELAY_LOG_FILTER` | `info` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("CIVICA_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 =
            env("CIVICA_RELAY_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret = env("CIVICA_RELAY_JWT_SECRET")
            .unwrap_or_else(|_| "civica_local_development_jwt_secret_must_be_32ch".into());

        let database_url = env("CIVICA_RELAY_DATABASE_URL").ok();

        let log_filter = env("CIVICA_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());

        Self { listen_addr, jwt_secret, database_url, log_filter }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == "civica_local_development_jwt_secret_must_be_32ch"
    }
}
