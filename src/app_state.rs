use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, PipelineConfig};
use crate::services::{generator::ImageGenerator, verifier::ImageVerifier};

/// Everything the batch processor needs besides the queue and results.
#[derive(Clone)]
pub struct AppState {
    pub generator: Arc<dyn ImageGenerator>,
    pub verifier: Arc<dyn ImageVerifier>,
    pub pipeline: PipelineConfig,
    pub item_delay: Duration,
}

impl AppState {
    pub fn new(
        generator: Arc<dyn ImageGenerator>,
        verifier: Arc<dyn ImageVerifier>,
        pipeline: PipelineConfig,
    ) -> Self {
        Self {
            generator,
            verifier,
            pipeline,
            item_delay: Duration::ZERO,
        }
    }

    /// Share one client for both roles.
    pub fn with_shared<C>(client: C, config: &AppConfig) -> Self
    where
        C: ImageGenerator + ImageVerifier + 'static,
    {
        let client = Arc::new(client);
        Self::new(client.clone(), client, config.pipeline_config())
            .with_item_delay(Duration::from_millis(config.item_delay_ms))
    }

    pub fn with_item_delay(mut self, delay: Duration) -> Self {
        self.item_delay = delay;
        self
    }
}
