use crate::config::AppConfig;
use crate::gemini::{GeminiClient, ModelClient};
use crate::nutrition::services::AnalysisService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub analysis: Arc<AnalysisService>,
}

impl AppState {
    pub fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);
        let client = Arc::new(GeminiClient::new(&config.gemini)?) as Arc<dyn ModelClient>;
        Ok(Self::from_parts(config, client))
    }

    pub fn from_parts(config: Arc<AppConfig>, client: Arc<dyn ModelClient>) -> Self {
        let analysis = Arc::new(AnalysisService::new(
            client,
            config.gemini.model.clone(),
            config.gemini.max_concurrency,
        ));
        Self { config, analysis }
    }

    #[cfg(test)]
    pub fn fake(client: Arc<dyn ModelClient>) -> Self {
        let config = Arc::new(AppConfig {
            host: "127.0.0.1".into(),
            port: 0,
            max_upload_bytes: 1024 * 1024,
            gemini: crate::config::GeminiConfig {
                api_key: "test".into(),
                model: "test-model".into(),
                base_url: "http://gemini.invalid".into(),
                timeout_secs: 5,
                max_concurrency: 4,
            },
        });
        Self::from_parts(config, client)
    }
}
