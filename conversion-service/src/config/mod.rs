use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// One year. Larger stuck thresholds are almost certainly a unit mistake.
pub const MAX_REAPER_PROCESSING_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct ConversionConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub registry: RegistryConfig,
    pub storage: StorageConfig,
    pub upload: UploadConfig,
    pub worker: WorkerConfig,
    pub reaper: ReaperConfig,
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    pub backend: RegistryBackend,
    pub mongodb_uri: Option<String>,
    pub mongodb_database: String,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    Memory,
    Mongodb,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub local_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub max_bytes: usize,
    /// Lower-case, without the dot.
    pub allowed_extensions: Vec<String>,
}

impl UploadConfig {
    pub fn is_allowed(&self, extension: &str) -> bool {
        self.allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(extension))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub worker_count: usize,
    pub queue_size: usize,
    pub conversion_timeout_secs: u64,
    pub storage_retry_attempts: u32,
}

impl WorkerConfig {
    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_secs(self.conversion_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReaperConfig {
    pub max_processing_secs: u64,
    pub interval_secs: u64,
}

impl ReaperConfig {
    pub fn max_processing(&self) -> Duration {
        Duration::from_secs(self.max_processing_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl CorsConfig {
    pub fn allows_any(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }
}

impl ConversionConfig {
    pub fn load() -> Result<Self, AppError> {
        // Load common config (handles .env and APP__ prefix)
        let common = core_config::Config::load()?;

        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        let backend: RegistryBackend = get_env("REGISTRY_BACKEND", Some("memory"), is_prod)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let mongodb_uri = match backend {
            RegistryBackend::Mongodb => Some(get_env("MONGODB_URI", None, is_prod)?),
            RegistryBackend::Memory => env::var("MONGODB_URI").ok(),
        };

        let config = ConversionConfig {
            common,
            registry: RegistryConfig {
                backend,
                mongodb_uri,
                mongodb_database: get_env("MONGODB_DATABASE", Some("conversion_db"), false)?,
            },
            storage: StorageConfig {
                local_path: get_env("STORAGE_LOCAL_PATH", Some("storage"), is_prod)?,
            },
            upload: UploadConfig {
                max_bytes: parse_env("UPLOAD_MAX_BYTES", 16 * 1024 * 1024)?,
                allowed_extensions: list_env("UPLOAD_ALLOWED_EXTENSIONS", "docx"),
            },
            worker: WorkerConfig {
                enabled: parse_env("WORKER_ENABLED", true)?,
                worker_count: parse_env("WORKER_COUNT", 4)?,
                queue_size: parse_env("WORKER_QUEUE_SIZE", 100)?,
                conversion_timeout_secs: parse_env("WORKER_CONVERSION_TIMEOUT_SECS", 120)?,
                storage_retry_attempts: parse_env("WORKER_STORAGE_RETRY_ATTEMPTS", 3)?,
            },
            reaper: ReaperConfig {
                max_processing_secs: parse_env("REAPER_MAX_PROCESSING_SECS", 600)?,
                interval_secs: parse_env("REAPER_INTERVAL_SECS", 30)?,
            },
            cors: CorsConfig {
                allowed_origins: list_env("CORS_ALLOWED_ORIGINS", "*"),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let invalid = |msg: &str| Err(AppError::ConfigError(anyhow::anyhow!(msg.to_string())));

        if self.worker.worker_count == 0 {
            return invalid("WORKER_COUNT must be at least 1");
        }
        if self.worker.queue_size == 0 {
            return invalid("WORKER_QUEUE_SIZE must be at least 1");
        }
        if self.worker.storage_retry_attempts == 0 {
            return invalid("WORKER_STORAGE_RETRY_ATTEMPTS must be at least 1");
        }
        if self.reaper.max_processing_secs > MAX_REAPER_PROCESSING_SECS {
            return invalid("REAPER_MAX_PROCESSING_SECS must not exceed one year");
        }
        if self.upload.max_bytes == 0 {
            return invalid("UPLOAD_MAX_BYTES must be positive");
        }
        if self.upload.allowed_extensions.is_empty() {
            return invalid("UPLOAD_ALLOWED_EXTENSIONS must list at least one extension");
        }
        if self.registry.backend == RegistryBackend::Mongodb && self.registry.mongodb_uri.is_none()
        {
            return invalid("MONGODB_URI is required for the mongodb registry backend");
        }
        Ok(())
    }
}

impl FromStr for RegistryBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(RegistryBackend::Memory),
            "mongodb" | "mongo" => Ok(RegistryBackend::Mongodb),
            _ => Err(format!("Invalid registry backend: {}", s)),
        }
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value {:?}: {}", key, raw, e))
        }),
        Err(_) => Ok(default),
    }
}

fn list_env(key: &str, default: &str) -> Vec<String> {
    split_list(&env::var(key).unwrap_or_else(|_| default.to_string()))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}
