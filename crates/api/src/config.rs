use std::time::Duration;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development. In
/// production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0:8090`).
    pub bind: String,
    /// Registry database URL (default: `sqlite://plinth.db?mode=rwc`).
    pub database_url: String,
    /// Number of script worker threads (default: `4`).
    pub pool_size: usize,
    /// Deadline for a single script run in seconds (default: `60`).
    pub run_timeout_secs: u64,
    /// HTTP request timeout in seconds (default: `90`). Sits above the
    /// run deadline so the script error, not a bare 408, reaches clients.
    pub request_timeout_secs: u64,
    /// Admin credentials for the `/source` surface. `None` leaves the
    /// surface open, which is the local-development mode.
    pub admin: Option<AdminCredentials>,
}

/// Digest auth credentials for the admin surface.
#[derive(Debug, Clone)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                       |
    /// |---------------------------|-------------------------------|
    /// | `PLINTH_BIND`             | `0.0.0.0:8090`                |
    /// | `DATABASE_URL`            | `sqlite://plinth.db?mode=rwc` |
    /// | `PLINTH_POOL_SIZE`        | `4`                           |
    /// | `PLINTH_RUN_TIMEOUT_SECS` | `60`                          |
    /// | `PLINTH_REQUEST_TIMEOUT_SECS` | `90`                      |
    /// | `PLINTH_ADMIN_USER`       | unset (auth disabled)         |
    /// | `PLINTH_ADMIN_PASSWORD`   | unset (auth disabled)         |
    ///
    /// Unparseable numeric values fall back to their default with a
    /// warning rather than aborting startup.
    pub fn from_env() -> Self {
        let bind = std::env::var("PLINTH_BIND").unwrap_or_else(|_| "0.0.0.0:8090".into());

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://plinth.db?mode=rwc".into());

        let pool_size = env_parse("PLINTH_POOL_SIZE", 4).max(1);
        let run_timeout_secs = env_parse("PLINTH_RUN_TIMEOUT_SECS", 60);
        let request_timeout_secs = env_parse("PLINTH_REQUEST_TIMEOUT_SECS", 90);

        let admin = match (
            std::env::var("PLINTH_ADMIN_USER"),
            std::env::var("PLINTH_ADMIN_PASSWORD"),
        ) {
            (Ok(username), Ok(password)) if !username.is_empty() && !password.is_empty() => {
                Some(AdminCredentials { username, password })
            }
            _ => None,
        };

        Self {
            bind,
            database_url,
            pool_size,
            run_timeout_secs,
            request_timeout_secs,
            admin,
        }
    }

    /// Deadline for a single script run.
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

/// Read a numeric env var, falling back to `default` when unset or
/// unparseable.
fn env_parse<T: std::str::FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %raw, %default, "unparseable value, using default");
            default
        }),
        Err(_) => default,
    }
}
