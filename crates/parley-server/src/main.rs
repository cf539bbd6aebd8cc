use anyhow::Context;
use clap::Parser;
use parley_config::{Config, ConfigManager};
use parley_gateway::{Gateway, GatewayConfig, RelayConfig};
use parley_llm::{GeminiProvider, LLMProvider, ProviderConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

mod logging;

use logging::init_logging;

#[derive(Parser, Debug, Clone)]
#[command(name = "parley-server")]
#[command(about = "Streaming chat relay between WebSocket clients and Gemini")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(long, env = "DEBUG", default_value = "false")]
    debug: bool,

    /// Log level or filter directives (overrides config)
    #[arg(long, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Config file path [default: ~/.parley/config.json]
    #[arg(long, env = "PARLEY_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_manager = load_config(cli.config.as_deref()).await?;
    let config = config_manager.snapshot().await;

    let log_level = cli.log_level.clone().unwrap_or_else(|| {
        if cli.debug {
            "debug".to_string()
        } else {
            config.logging.level.to_string()
        }
    });
    init_logging(&log_level, config.logging.json_format)?;

    info!("Starting Parley relay on {}", config.server.bind_addr());
    info!("  Model: {}", config.llm.model);
    info!("  Max connections: {}", config.server.max_connections);
    debug!("  Config file: {:?}", config_manager.path());
    debug!("  Base URL: {}", config.llm.base_url);

    let provider = GeminiProvider::with_config(provider_config(&config)?)?;
    provider
        .validate()
        .await
        .with_context(|| format!("Set {} to a Gemini API key", config.llm.api_key_env))?;

    let gateway = Gateway::new(gateway_config(&config), Arc::new(provider));

    let server = gateway.clone();
    let mut serving = tokio::spawn(async move { server.run().await });

    tokio::select! {
        result = &mut serving => {
            result.context("Gateway task panicked")??;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Shutting down");
            gateway.shutdown();
            serving.await.context("Gateway task panicked")??;
        }
    }

    Ok(())
}

async fn load_config(path: Option<&str>) -> anyhow::Result<ConfigManager> {
    let Some(path) = path else {
        return ConfigManager::load_default()
            .await
            .context("Failed to load config from the default location");
    };

    let config_path = parley_config::expand_tilde(path).unwrap_or_else(|| PathBuf::from(path));
    ConfigManager::load(&config_path)
        .await
        .with_context(|| format!("Failed to load config from {:?}", config_path))
}

fn provider_config(config: &Config) -> anyhow::Result<ProviderConfig> {
    let api_key = config.llm.api_key().with_context(|| {
        format!(
            "No API key found; set the {} environment variable",
            config.llm.api_key_env
        )
    })?;

    Ok(ProviderConfig::new("gemini", config.llm.base_url.clone())
        .with_model(config.llm.model.clone())
        .with_timeout(Duration::from_secs(config.llm.timeout_seconds))
        .with_api_key(api_key))
}

fn gateway_config(config: &Config) -> GatewayConfig {
    GatewayConfig {
        bind: config.server.bind_addr(),
        max_connections: config.server.max_connections,
        relay: RelayConfig {
            system_prompt: config.relay.system_prompt.clone(),
            options: config.relay.generation.clone(),
            model: String::new(),
            chunk_delay: Duration::from_millis(config.relay.chunk_delay_ms),
        },
    }
}
