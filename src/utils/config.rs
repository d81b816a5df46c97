use crate::utils::error::{DirectorError, DirectorResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Top-level configuration for the orchestration service.
///
/// Loading precedence: TOML file -> environment variables -> defaults.
/// All values are consumed at startup; hot reload is not supported.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub director: DirectorSettings,
    pub queue: QueueSettings,
    pub engine: EngineSettings,
    pub throttling: ThrottlingSettings,
    pub monitor: MonitorSettings,
    pub classifier: ClassifierSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file, or ":memory:" for ephemeral storage.
    pub url: String,
    pub pool_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorSettings {
    pub max_concurrent_tasks: usize,
    pub enable_llm_classification: bool,
    pub fallback_department: String,
    pub task_timeout_secs: u64,
    pub enable_auto_retry: bool,
    pub max_retries: u32,
    pub routing_confidence_threshold: f64,
    pub enable_parallel_execution: bool,
    pub max_parallel_agents: usize,
    pub parallel_timeout_secs: u64,
    pub enable_load_balancing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub max_queue_size: usize,
    pub max_concurrent_requests: usize,
    pub request_timeout_secs: u64,
    pub backpressure_threshold: f64,
    pub resume_threshold: f64,
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub max_concurrent_tasks: usize,
    pub max_queue_size: usize,
    pub worker_thread_count: usize,
    pub task_timeout_secs: u64,
    pub backpressure_threshold: f64,
    pub resume_threshold: f64,
    pub cleanup_interval_secs: u64,
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottlingSettings {
    pub enabled: bool,
    pub adjustment_interval_secs: f64,
    pub min_concurrency: usize,
    pub max_concurrency: usize,
    pub default_concurrency: usize,
    pub scale_up_factor: f64,
    pub scale_down_factor: f64,
    pub emergency_scale_down: f64,
    pub low_load_threshold: f64,
    pub normal_load_threshold: f64,
    pub high_load_threshold: f64,
    pub critical_load_threshold: f64,
    pub healthy_threshold: f64,
    pub warning_threshold: f64,
    pub critical_threshold: f64,
    pub enable_predictive_scaling: bool,
    pub smoothing_window: usize,
    pub history_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub sampling_interval_secs: f64,
    pub history_size: usize,
    pub cpu_warning: f64,
    pub cpu_critical: f64,
    pub cpu_emergency: f64,
    pub memory_warning: f64,
    pub memory_critical: f64,
    pub memory_emergency: f64,
    pub disk_warning: f64,
    pub disk_critical: f64,
    pub disk_emergency: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    pub enable_llm: bool,
    pub cache_max_age_hours: i64,
    pub llm_endpoint: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            director: DirectorSettings::default(),
            queue: QueueSettings::default(),
            engine: EngineSettings::default(),
            throttling: ThrottlingSettings::default(),
            monitor: MonitorSettings::default(),
            classifier: ClassifierSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            cors_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "task_director.db".to_string(),
            pool_size: 4,
        }
    }
}

impl Default for DirectorSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 10,
            enable_llm_classification: false,
            fallback_department: "coordination".to_string(),
            task_timeout_secs: 1800,
            enable_auto_retry: true,
            max_retries: 3,
            routing_confidence_threshold: 0.7,
            enable_parallel_execution: true,
            max_parallel_agents: 3,
            parallel_timeout_secs: 120,
            enable_load_balancing: true,
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            max_concurrent_requests: 20,
            request_timeout_secs: 60,
            backpressure_threshold: 0.8,
            resume_threshold: 0.3,
            cleanup_interval_secs: 300,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 10,
            max_queue_size: 1000,
            worker_thread_count: 4,
            task_timeout_secs: 300,
            backpressure_threshold: 0.8,
            resume_threshold: 0.3,
            cleanup_interval_secs: 300,
            shutdown_grace_secs: 30,
        }
    }
}

impl Default for ThrottlingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            adjustment_interval_secs: 5.0,
            min_concurrency: 1,
            max_concurrency: 50,
            default_concurrency: 10,
            scale_up_factor: 1.5,
            scale_down_factor: 0.7,
            emergency_scale_down: 0.3,
            low_load_threshold: 30.0,
            normal_load_threshold: 60.0,
            high_load_threshold: 80.0,
            critical_load_threshold: 95.0,
            healthy_threshold: 70.0,
            warning_threshold: 50.0,
            critical_threshold: 30.0,
            enable_predictive_scaling: true,
            smoothing_window: 3,
            history_size: 100,
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            sampling_interval_secs: 1.0,
            history_size: 300,
            cpu_warning: 70.0,
            cpu_critical: 85.0,
            cpu_emergency: 95.0,
            memory_warning: 75.0,
            memory_critical: 90.0,
            memory_emergency: 98.0,
            disk_warning: 80.0,
            disk_critical: 90.0,
            disk_emergency: 95.0,
        }
    }
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            enable_llm: false,
            cache_max_age_hours: 24,
            llm_endpoint: None,
            llm_api_key: None,
            llm_model: "task-classifier-v1".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> DirectorResult<Self> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| DirectorError::ConfigurationError {
                reason: format!("Failed to read config file: {e}"),
            })?;

        let config: Self =
            toml::from_str(&content).map_err(|e| DirectorError::ConfigurationError {
                reason: format!("Failed to parse config file: {e}"),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration with precedence: file -> environment -> defaults.
    pub fn load() -> DirectorResult<Self> {
        let mut config = if let Ok(path) = env::var("DIRECTOR_CONFIG_FILE") {
            if Path::new(&path).exists() {
                Self::from_file(path)?
            } else {
                Self::default()
            }
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> DirectorResult<()> {
        if let Ok(url) = env::var("DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(host) = env::var("HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("PORT") {
            self.server.port = Self::parse_env("PORT", &port)?;
        }
        if let Ok(v) = env::var("MAX_CONCURRENT_TASKS") {
            let n = Self::parse_env("MAX_CONCURRENT_TASKS", &v)?;
            self.director.max_concurrent_tasks = n;
            self.engine.max_concurrent_tasks = n;
        }
        if let Ok(v) = env::var("MAX_QUEUE_SIZE") {
            let n = Self::parse_env("MAX_QUEUE_SIZE", &v)?;
            self.queue.max_queue_size = n;
            self.engine.max_queue_size = n;
        }
        if let Ok(v) = env::var("WORKER_THREAD_COUNT") {
            self.engine.worker_thread_count = Self::parse_env("WORKER_THREAD_COUNT", &v)?;
        }
        if let Ok(v) = env::var("TASK_TIMEOUT_SECONDS") {
            self.engine.task_timeout_secs = Self::parse_env("TASK_TIMEOUT_SECONDS", &v)?;
        }
        if let Ok(v) = env::var("CLASSIFIER_API_KEY") {
            self.classifier.llm_api_key = Some(v);
        }
        if let Ok(v) = env::var("CLASSIFIER_ENDPOINT") {
            self.classifier.llm_endpoint = Some(v);
        }
        if let Ok(v) = env::var("LOG_LEVEL") {
            self.logging.level = v;
        }
        Ok(())
    }

    fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> DirectorResult<T> {
        value
            .parse()
            .map_err(|_| DirectorError::ConfigurationError {
                reason: format!("Invalid value for {name}: {value}"),
            })
    }

    /// Validate cross-field constraints before the system starts.
    pub fn validate(&self) -> DirectorResult<()> {
        if self.queue.max_queue_size == 0 {
            return Err(DirectorError::ConfigurationError {
                reason: "queue.max_queue_size must be greater than zero".to_string(),
            });
        }
        if self.queue.backpressure_threshold <= self.queue.resume_threshold {
            return Err(DirectorError::ConfigurationError {
                reason: "queue.backpressure_threshold must exceed queue.resume_threshold"
                    .to_string(),
            });
        }
        if self.engine.backpressure_threshold <= self.engine.resume_threshold {
            return Err(DirectorError::ConfigurationError {
                reason: "engine.backpressure_threshold must exceed engine.resume_threshold"
                    .to_string(),
            });
        }
        if self.throttling.min_concurrency > self.throttling.max_concurrency {
            return Err(DirectorError::ConfigurationError {
                reason: "throttling.min_concurrency exceeds throttling.max_concurrency"
                    .to_string(),
            });
        }
        if self.throttling.default_concurrency < self.throttling.min_concurrency
            || self.throttling.default_concurrency > self.throttling.max_concurrency
        {
            return Err(DirectorError::ConfigurationError {
                reason: "throttling.default_concurrency outside [min, max]".to_string(),
            });
        }
        if self.director.routing_confidence_threshold < 0.0
            || self.director.routing_confidence_threshold > 1.0
        {
            return Err(DirectorError::ConfigurationError {
                reason: "director.routing_confidence_threshold must be within [0, 1]".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.director.fallback_department, "coordination");
        assert_eq!(config.queue.backpressure_threshold, 0.8);
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let mut config = OrchestratorConfig::default();
        config.queue.backpressure_threshold = 0.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_toml_fragment() -> Result<(), Box<dyn std::error::Error>> {
        let parsed: OrchestratorConfig = toml::from_str(
            r#"
            [director]
            max_concurrent_tasks = 4
            max_retries = 1

            [queue]
            max_queue_size = 64
            "#,
        )?;
        assert_eq!(parsed.director.max_concurrent_tasks, 4);
        assert_eq!(parsed.director.max_retries, 1);
        assert_eq!(parsed.queue.max_queue_size, 64);
        // Untouched sections keep their defaults.
        assert_eq!(parsed.engine.worker_thread_count, 4);
        Ok(())
    }
}
