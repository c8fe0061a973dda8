use std::sync::Arc;

use crate::config::Config;
use crate::models::{ItemRecord, RatingSet};
use crate::services::Engine;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(engine: Engine, config: Config) -> Self {
        Self {
            engine: Arc::new(engine),
            config: Arc::new(config),
        }
    }

    /// Builds state from in-memory data, training the first model synchronously
    pub fn from_data(records: Vec<ItemRecord>, ratings: RatingSet, config: Config) -> Self {
        let engine = Engine::bootstrap(
            records,
            ratings,
            config.hyperparameters(),
            config.test_fraction,
        );
        Self::new(engine, config)
    }
}
