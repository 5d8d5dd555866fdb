use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Settings {
    pub(super) runtime: RuntimeSettings,
    pub(super) database: DatabaseSettings,
    pub(super) engine: EngineSettings,
    pub(super) telemetry: TelemetrySettings,
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub environment: Environment,
    pub strict_config: bool,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub postgres_server: String,
    pub postgres_port: u16,
    pub postgres_user: String,
    pub postgres_password: String,
    pub postgres_db: String,
    pub database_url: Option<String>,
    pub max_connections: u32,
}

/// Cadences and limits of the live engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub fast_tick_millis: u64,
    pub slow_tick_millis: u64,
    pub lifecycle_tick_millis: u64,
    pub schedule_lookahead_seconds: u64,
    pub submit_grace_seconds: u64,
    pub persist_max_attempts: u32,
    /// Decimal digits kept when bucketing scores for statistics.
    pub score_precision: u32,
}

#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub log_level: String,
    pub json: bool,
    pub prometheus_enabled: bool,
    pub prometheus_listen_addr: SocketAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Staging,
    Test,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Test => "test",
        }
    }

    pub(super) fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("missing required secret for {0}")]
    MissingSecret(&'static str),
}

impl DatabaseSettings {
    pub fn database_url(&self) -> String {
        if let Some(url) = &self.database_url {
            return url.clone();
        }

        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.postgres_user,
            self.postgres_password,
            self.postgres_server,
            self.postgres_port,
            self.postgres_db
        )
    }
}

impl EngineSettings {
    pub fn fast_tick(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.fast_tick_millis)
    }

    pub fn slow_tick(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.slow_tick_millis)
    }

    pub fn lifecycle_tick(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.lifecycle_tick_millis)
    }

    pub fn schedule_lookahead(&self) -> time::Duration {
        time::Duration::seconds(i64::try_from(self.schedule_lookahead_seconds).unwrap_or(i64::MAX))
    }

    pub fn submit_grace(&self) -> time::Duration {
        time::Duration::seconds(i64::try_from(self.submit_grace_seconds).unwrap_or(i64::MAX))
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            fast_tick_millis: 2_000,
            slow_tick_millis: 15_000,
            lifecycle_tick_millis: 10_000,
            schedule_lookahead_seconds: 3_600,
            submit_grace_seconds: 0,
            persist_max_attempts: 5,
            score_precision: 2,
        }
    }
}
