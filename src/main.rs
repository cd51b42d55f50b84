//! Compose Guard server entry point.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use compose_guard::intent::{CloudModel, LLMProvider, LocalModels, OllamaProvider, OpenAICompatibleProvider};
use compose_guard::server::{run_server, AppState};
use compose_guard::store::SystemClock;
use compose_guard::ComposeConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("compose_guard=info,tower_http=info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ComposeConfig::from_env();

    let local = match OllamaProvider::from_url(&config.ollama_url) {
        Ok(provider) => {
            info!("Local models via {} ({})", config.ollama_url, config.local_model);
            Some(LocalModels {
                provider: Arc::new(provider) as Arc<dyn LLMProvider>,
                primary: config.local_model.clone(),
                backup: config.local_backup_model.clone(),
                timeout: config.local_timeout,
            })
        }
        Err(e) => {
            warn!("Local model rung disabled: {}", e);
            None
        }
    };

    let cloud = config.cloud_url.as_ref().map(|url| {
        info!("Cloud escalation via {} ({})", url, config.cloud_model);
        CloudModel {
            provider: Arc::new(OpenAICompatibleProvider::new(url.clone(), config.cloud_api_key.clone()))
                as Arc<dyn LLMProvider>,
            model: config.cloud_model.clone(),
            timeout: config.cloud_timeout,
        }
    });

    let state = AppState::from_config(&config, Arc::new(SystemClock), local, cloud);
    run_server(state, &config.bind_addr, config.max_body_bytes).await
}
