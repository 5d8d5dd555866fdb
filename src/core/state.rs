use std::sync::Arc;

use tokio::sync::Mutex;

use crate::cache::LiveCaches;
use crate::core::config::Settings;
use crate::repositories::Repositories;
use crate::services::statistics::StatisticsEngine;

/// Everything the ingest path and the scheduler loops share. Cheap to clone.
#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    repositories: Repositories,
    caches: LiveCaches,
    statistics: StatisticsEngine,
    rebuild_lock: Mutex<()>,
    persist_lock: Mutex<()>,
}

impl AppState {
    pub(crate) fn new(settings: Settings, repositories: Repositories) -> Self {
        let statistics = StatisticsEngine::new(settings.engine().score_precision);
        Self {
            inner: Arc::new(InnerState {
                settings,
                repositories,
                caches: LiveCaches::default(),
                statistics,
                rebuild_lock: Mutex::new(()),
                persist_lock: Mutex::new(()),
            }),
        }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn repos(&self) -> &Repositories {
        &self.inner.repositories
    }

    pub(crate) fn caches(&self) -> &LiveCaches {
        &self.inner.caches
    }

    pub(crate) fn statistics(&self) -> &StatisticsEngine {
        &self.inner.statistics
    }

    /// Serialises statistics rebuilds between the slow tick and on-demand
    /// recalculation.
    pub(crate) fn rebuild_lock(&self) -> &Mutex<()> {
        &self.inner.rebuild_lock
    }

    /// Held for a whole fast tick so an on-demand flush never runs alongside
    /// the scheduled one.
    pub(crate) fn persist_lock(&self) -> &Mutex<()> {
        &self.inner.persist_lock
    }
}
