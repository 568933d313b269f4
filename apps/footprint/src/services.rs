//! The engine components the server and CLI share.

use crate::config::Config;
use crate::notify::LogNotifier;
use footprint_core::{CarbonEstimator, StageEngine, StorageBackend};
use std::sync::Arc;

/// Stage engine and carbon estimator over one store.
#[derive(Debug)]
pub struct Services {
    pub engine: StageEngine<StorageBackend>,
    pub estimator: CarbonEstimator<StorageBackend>,
}

impl Services {
    /// Wire both components to `store` using `config`'s settings and
    /// reference data.
    pub fn new(store: StorageBackend, config: &Config) -> Self {
        let store = Arc::new(store);
        let engine = StageEngine::new(Arc::clone(&store), config.engine)
            .with_notifier(Arc::new(LogNotifier));
        let estimator = CarbonEstimator::new(
            store,
            Arc::new(config.wattage.clone()),
            Arc::new(config.profiles()),
            config.emissions,
            config.engine.retry,
        );
        Self { engine, estimator }
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.engine.store().is_persistent()
    }
}
