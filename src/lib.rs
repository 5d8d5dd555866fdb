pub mod engine;
pub mod models;
pub mod repositories;

pub(crate) mod cache;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod services;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

pub use crate::cache::ScheduleState;
pub use crate::core::config::{
    ConfigError, DatabaseSettings, EngineSettings, Environment, RuntimeSettings, Settings,
    TelemetrySettings,
};
pub use crate::db::types::{
    AssessmentType, CourseRole, InitializationState, ScoringType, SubmissionType,
};
pub use crate::engine::{ExerciseError, QuizEngine};
pub use crate::repositories::{Repositories, RepositoryError};
pub use crate::services::scoring::ScoringError;
pub use crate::services::statistics::StatisticsError;
pub use crate::services::submission_ingest::SubmissionError;

use crate::core::{shutdown, telemetry};

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let db_pool = db::init_pool(&settings).await?;
    db::run_migrations(&db_pool).await?;

    tracing::info!(
        environment = %settings.runtime().environment.as_str(),
        fast_tick_ms = settings.engine().fast_tick_millis,
        slow_tick_ms = settings.engine().slow_tick_millis,
        "Quiz live engine starting"
    );

    let engine = QuizEngine::new(settings, Repositories::postgres(db_pool));
    engine.start_default_schedule().await;

    shutdown::shutdown_signal().await;

    engine.stop_schedule().await;
    if let Err(err) = engine.flush().await {
        tracing::error!(error = %err, "Final flush of cached submissions failed");
    }
    tracing::info!("Quiz live engine stopped");

    Ok(())
}
