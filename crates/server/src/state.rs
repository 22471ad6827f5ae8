use std::sync::Arc;

use slidesmith_core::artifact::ObjectStore;
use slidesmith_core::{Config, JobDispatcher, JobStore, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    job_store: Arc<dyn JobStore>,
    objects: Arc<dyn ObjectStore>,
    dispatcher: Arc<JobDispatcher>,
}

impl AppState {
    pub fn new(
        config: Config,
        job_store: Arc<dyn JobStore>,
        objects: Arc<dyn ObjectStore>,
        dispatcher: Arc<JobDispatcher>,
    ) -> Self {
        Self {
            config,
            job_store,
            objects,
            dispatcher,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn job_store(&self) -> &dyn JobStore {
        self.job_store.as_ref()
    }

    pub fn objects(&self) -> &dyn ObjectStore {
        self.objects.as_ref()
    }

    pub fn dispatcher(&self) -> &JobDispatcher {
        self.dispatcher.as_ref()
    }
}
