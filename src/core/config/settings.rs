use std::net::{Ipv4Addr, SocketAddr};

use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_environment, parse_socket_addr, parse_u16,
    parse_u32, parse_u64,
};
use super::types::{
    ConfigError, DatabaseSettings, EngineSettings, Environment, RuntimeSettings, Settings,
    TelemetrySettings,
};

const MAX_SCORE_PRECISION: u32 = 6;
const DEFAULT_PROMETHEUS_PORT: u16 = 9464;

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            parse_environment(env_optional("QUIZ_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("QUIZ_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "quizlive");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "quizlive");
        let database_url = env_optional("DATABASE_URL");
        let max_connections = parse_u32(
            "POSTGRES_MAX_CONNECTIONS",
            env_or_default("POSTGRES_MAX_CONNECTIONS", "20"),
        )?;

        let fast_tick_millis =
            parse_u64("QUIZ_FAST_TICK_MILLIS", env_or_default("QUIZ_FAST_TICK_MILLIS", "2000"))?;
        let slow_tick_millis =
            parse_u64("QUIZ_SLOW_TICK_MILLIS", env_or_default("QUIZ_SLOW_TICK_MILLIS", "15000"))?;
        let lifecycle_tick_millis = parse_u64(
            "QUIZ_LIFECYCLE_TICK_MILLIS",
            env_or_default("QUIZ_LIFECYCLE_TICK_MILLIS", "10000"),
        )?;
        let schedule_lookahead_seconds = parse_u64(
            "QUIZ_SCHEDULE_LOOKAHEAD_SECONDS",
            env_or_default("QUIZ_SCHEDULE_LOOKAHEAD_SECONDS", "3600"),
        )?;
        let submit_grace_seconds = parse_u64(
            "QUIZ_SUBMIT_GRACE_SECONDS",
            env_or_default("QUIZ_SUBMIT_GRACE_SECONDS", "0"),
        )?;
        let persist_max_attempts = parse_u32(
            "QUIZ_PERSIST_MAX_ATTEMPTS",
            env_or_default("QUIZ_PERSIST_MAX_ATTEMPTS", "5"),
        )?;
        let score_precision =
            parse_u32("QUIZ_SCORE_PRECISION", env_or_default("QUIZ_SCORE_PRECISION", "2"))?;

        let log_level = env_or_default("QUIZ_LOG_LEVEL", "info");
        let json = env_optional("QUIZ_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_listen_addr = parse_socket_addr(
            "PROMETHEUS_LISTEN_ADDR",
            env_or_default("PROMETHEUS_LISTEN_ADDR", "0.0.0.0:9464"),
        )?;

        let settings = Self {
            runtime: RuntimeSettings { environment, strict_config },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
                max_connections,
            },
            engine: EngineSettings {
                fast_tick_millis,
                slow_tick_millis,
                lifecycle_tick_millis,
                schedule_lookahead_seconds,
                submit_grace_seconds,
                persist_max_attempts,
                score_precision,
            },
            telemetry: TelemetrySettings {
                log_level,
                json,
                prometheus_enabled,
                prometheus_listen_addr,
            },
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Development settings with the given engine tuning, for embedding the
    /// engine without reading the environment.
    pub fn with_engine(engine: EngineSettings) -> Result<Self, ConfigError> {
        let settings = Self { engine, ..Self::development() };
        settings.validate()?;
        Ok(settings)
    }

    fn development() -> Self {
        Self {
            runtime: RuntimeSettings {
                environment: Environment::Development,
                strict_config: false,
            },
            database: DatabaseSettings {
                postgres_server: "localhost".to_string(),
                postgres_port: 5432,
                postgres_user: "quizlive".to_string(),
                postgres_password: String::new(),
                postgres_db: "quizlive".to_string(),
                database_url: None,
                max_connections: 20,
            },
            engine: EngineSettings::default(),
            telemetry: TelemetrySettings {
                log_level: "info".to_string(),
                json: false,
                prometheus_enabled: false,
                prometheus_listen_addr: SocketAddr::from((
                    Ipv4Addr::UNSPECIFIED,
                    DEFAULT_PROMETHEUS_PORT,
                )),
            },
        }
    }

    pub fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub fn engine(&self) -> &EngineSettings {
        &self.engine
    }

    pub fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("QUIZ_FAST_TICK_MILLIS", self.engine.fast_tick_millis),
            ("QUIZ_SLOW_TICK_MILLIS", self.engine.slow_tick_millis),
            ("QUIZ_LIFECYCLE_TICK_MILLIS", self.engine.lifecycle_tick_millis),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue { field, value: "0".to_string() });
            }
        }

        if self.engine.slow_tick_millis < self.engine.fast_tick_millis {
            return Err(ConfigError::InvalidValue {
                field: "QUIZ_SLOW_TICK_MILLIS",
                value: self.engine.slow_tick_millis.to_string(),
            });
        }

        if self.engine.persist_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "QUIZ_PERSIST_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        if self.engine.score_precision > MAX_SCORE_PRECISION {
            return Err(ConfigError::InvalidValue {
                field: "QUIZ_SCORE_PRECISION",
                value: self.engine.score_precision.to_string(),
            });
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "POSTGRES_MAX_CONNECTIONS",
                value: "0".to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::env_lock;

    const VARS: &[&str] = &[
        "QUIZ_ENV",
        "ENVIRONMENT",
        "QUIZ_STRICT_CONFIG",
        "DATABASE_URL",
        "POSTGRES_SERVER",
        "POSTGRES_PORT",
        "POSTGRES_USER",
        "POSTGRES_PASSWORD",
        "POSTGRES_DB",
        "POSTGRES_MAX_CONNECTIONS",
        "QUIZ_FAST_TICK_MILLIS",
        "QUIZ_SLOW_TICK_MILLIS",
        "QUIZ_LIFECYCLE_TICK_MILLIS",
        "QUIZ_SCHEDULE_LOOKAHEAD_SECONDS",
        "QUIZ_SUBMIT_GRACE_SECONDS",
        "QUIZ_PERSIST_MAX_ATTEMPTS",
        "QUIZ_SCORE_PRECISION",
        "PROMETHEUS_LISTEN_ADDR",
    ];

    fn clear_env() {
        for key in VARS {
            std::env::remove_var(key);
        }
    }

    #[tokio::test]
    async fn load_uses_defaults() {
        let _guard = env_lock().await;
        clear_env();

        let settings = Settings::load().expect("settings");
        assert_eq!(settings.runtime().environment, Environment::Development);
        assert_eq!(settings.engine().fast_tick_millis, 2_000);
        assert_eq!(settings.engine().slow_tick_millis, 15_000);
        assert_eq!(settings.engine().persist_max_attempts, 5);
        assert_eq!(settings.engine().score_precision, 2);
        assert_eq!(
            settings.database().database_url(),
            "postgresql://quizlive:@localhost:5432/quizlive"
        );
    }

    #[tokio::test]
    async fn load_rejects_slow_tick_faster_than_fast_tick() {
        let _guard = env_lock().await;
        clear_env();
        std::env::set_var("QUIZ_FAST_TICK_MILLIS", "5000");
        std::env::set_var("QUIZ_SLOW_TICK_MILLIS", "1000");

        let err = Settings::load().expect_err("invalid cadence");
        assert!(matches!(err, ConfigError::InvalidValue { field: "QUIZ_SLOW_TICK_MILLIS", .. }));
        clear_env();
    }

    #[tokio::test]
    async fn strict_mode_requires_database_secret() {
        let _guard = env_lock().await;
        clear_env();
        std::env::set_var("QUIZ_ENV", "production");

        let err = Settings::load().expect_err("missing secret");
        assert!(matches!(err, ConfigError::MissingSecret("POSTGRES_PASSWORD")));

        std::env::set_var("DATABASE_URL", "postgresql://quiz:secret@db:5432/quiz");
        let settings = Settings::load().expect("settings with url");
        assert!(settings.runtime().strict_config);
        clear_env();
    }

    #[test]
    fn with_engine_validates_precision() {
        let engine = EngineSettings { score_precision: 7, ..EngineSettings::default() };
        assert!(Settings::with_engine(engine).is_err());
        assert!(Settings::with_engine(EngineSettings::default()).is_ok());
    }
}
