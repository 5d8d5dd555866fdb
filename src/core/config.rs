mod parsing;
mod settings;
mod types;

pub use types::{
    ConfigError, DatabaseSettings, EngineSettings, Environment, RuntimeSettings, Settings,
    TelemetrySettings,
};
