use std::sync::Arc;
use std::time::Duration;

use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::pipeline::IngestionRunner;

pub struct AppState {
    pub runner: Arc<dyn IngestionRunner>,
    pub shutdown_token: CancellationToken,
    pub registry: RwLock<Registry>,
    /// Execution budget for one triggered run.
    pub run_timeout: Duration,
}

impl AppState {
    pub fn new(
        runner: Arc<dyn IngestionRunner>,
        shutdown_token: CancellationToken,
        run_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            shutdown_token,
            registry: RwLock::new(<Registry>::default()),
            run_timeout,
        }
    }
}
