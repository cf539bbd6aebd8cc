use crate::config::{Config, ConfigError, ConfigResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

static ENV_VAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern"));

/// 配置管理器
#[derive(Debug, Clone)]
pub struct ConfigManager {
    path: PathBuf,
    config: Arc<RwLock<Config>>,
}

impl ConfigManager {
    /// Load the configuration file, falling back to defaults when it does not exist
    pub async fn load(path: &Path) -> ConfigResult<Self> {
        let config = if path.exists() {
            info!("Loading config from {:?}", path);
            let content = tokio::fs::read_to_string(path).await?;
            let content = Self::expand_env_vars(&content)?;
            serde_json::from_str(&content)?
        } else {
            info!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };

        Self::validate(&config)?;

        Ok(Self {
            path: path.to_path_buf(),
            config: Arc::new(RwLock::new(config)),
        })
    }

    /// 从默认位置加载配置 (~/.parley/config.json)
    pub async fn load_default() -> ConfigResult<Self> {
        let config_path = Self::default_config_path()?;
        Self::load(&config_path).await
    }

    /// Default config path (~/.parley/config.json)
    pub fn default_config_path() -> ConfigResult<PathBuf> {
        crate::default_config_path()
            .ok_or_else(|| ConfigError::InvalidPath("Could not find home directory".to_string()))
    }

    /// Snapshot of the current configuration
    pub async fn snapshot(&self) -> Config {
        self.config.read().await.clone()
    }

    /// 验证配置
    pub fn validate(config: &Config) -> ConfigResult<()> {
        if config.server.port == 0 {
            return Err(ConfigError::Validation("Server port cannot be 0".to_string()));
        }

        if config.server.max_connections == 0 {
            return Err(ConfigError::Validation(
                "Server max_connections must be greater than 0".to_string(),
            ));
        }

        if config.llm.model.trim().is_empty() {
            return Err(ConfigError::Validation("LLM model cannot be empty".to_string()));
        }

        let generation = &config.relay.generation;
        if generation.max_output_tokens == 0 {
            return Err(ConfigError::Validation(
                "max_output_tokens must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&generation.temperature) {
            return Err(ConfigError::Validation(format!(
                "temperature must be within 0.0..=2.0, got {}",
                generation.temperature
            )));
        }
        if !(0.0..=1.0).contains(&generation.top_p) {
            return Err(ConfigError::Validation(format!(
                "top_p must be within 0.0..=1.0, got {}",
                generation.top_p
            )));
        }

        Ok(())
    }

    /// 展开环境变量 ${VAR} 或 ${VAR:-default}
    fn expand_env_vars(content: &str) -> ConfigResult<String> {
        let mut result = content.to_string();

        for cap in ENV_VAR.captures_iter(content) {
            let full_match = &cap[0];
            let var_expr = &cap[1];

            let (var_name, default_value) = match var_expr.split_once(":-") {
                Some((name, default)) => (name, Some(default)),
                None => (var_expr, None),
            };

            let replacement = match (std::env::var(var_name), default_value) {
                (Ok(val), _) => val,
                (Err(_), Some(default)) => default.to_string(),
                (Err(_), None) => return Err(ConfigError::EnvVarNotFound(var_name.to_string())),
            };

            result = result.replace(full_match, &replacement);
        }

        Ok(result)
    }

    /// 获取配置文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }
}
