use crate::core::errors::ConfigError;
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
}

/// Which store implementation backs the pipelines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Supabase,
}

/// External store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub supabase_url: Option<String>,
    pub supabase_service_key: Option<String>,
    /// JSON snapshot of the in-memory analysis cache
    pub snapshot_path: Option<String>,
    pub cache_capacity: usize,
}

/// Vision (label/object/text/colour/web detection) API configuration
#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub api_key: String,
    pub endpoint: String,
}

/// Text-generation API configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Push delivery configuration
#[derive(Debug, Clone)]
pub struct PushConfig {
    pub endpoint: String,
    pub access_token: Option<String>,
}

/// Drink analysis configuration
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub cache_ttl_days: i64,
    pub trial_daily_scans: u32,
    pub paid_daily_scans: u32,
}

/// Reminder dispatch configuration
#[derive(Debug, Clone)]
pub struct ReminderConfig {
    /// A slot is due when |now - slot| is at most this many minutes
    pub window_minutes: u32,
    pub dedup_hours: i64,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub vision: VisionConfig,
    pub llm: LlmConfig,
    pub push: PushConfig,
    pub analysis: AnalysisConfig,
    pub reminders: ReminderConfig,
    pub http_timeout: Duration,
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_env() -> Result<Self, ConfigError> {
        let log_level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        let backend = match env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "memory".to_string())
            .trim()
            .to_lowercase()
            .as_str()
        {
            "memory" => StoreBackend::Memory,
            "supabase" => StoreBackend::Supabase,
            other => return Err(ConfigError::UnknownStoreBackend(other.to_string())),
        };

        Ok(Self {
            server: ServerConfig {
                port: parse_or("SERVER_PORT", 8787),
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                log_level,
            },
            store: StoreConfig {
                backend,
                supabase_url: non_empty("SUPABASE_URL"),
                supabase_service_key: non_empty("SUPABASE_SERVICE_ROLE_KEY"),
                snapshot_path: non_empty("STORE_SNAPSHOT_PATH"),
                cache_capacity: parse_or("STORE_CACHE_CAPACITY", 10_000),
            },
            vision: VisionConfig {
                api_key: env::var("GOOGLE_VISION_API_KEY").unwrap_or_default(),
                endpoint: env::var("VISION_ENDPOINT").unwrap_or_else(|_| {
                    "https://vision.googleapis.com/v1/images:annotate".to_string()
                }),
            },
            llm: LlmConfig {
                api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
                endpoint: env::var("LLM_ENDPOINT").unwrap_or_else(|_| {
                    "https://api.openai.com/v1/chat/completions".to_string()
                }),
                model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                temperature: parse_or("LLM_TEMPERATURE", 0.3),
                max_tokens: parse_or("LLM_MAX_TOKENS", 300),
            },
            push: PushConfig {
                endpoint: env::var("EXPO_PUSH_URL")
                    .unwrap_or_else(|_| "https://exp.host/--/api/v2/push/send".to_string()),
                access_token: non_empty("EXPO_ACCESS_TOKEN"),
            },
            analysis: AnalysisConfig {
                cache_ttl_days: parse_or("CACHE_TTL_DAYS", 7),
                trial_daily_scans: parse_or("TRIAL_DAILY_SCANS", 3),
                paid_daily_scans: parse_or("PAID_DAILY_SCANS", 8),
            },
            reminders: ReminderConfig {
                window_minutes: parse_or("REMINDER_WINDOW_MINUTES", 2),
                dedup_hours: parse_or("REMINDER_DEDUP_HOURS", 24),
            },
            http_timeout: Duration::from_secs(parse_or("HTTP_TIMEOUT_SECONDS", 30)),
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        // Remote API keys are not required at startup: the memory backend
        // is used for local runs where only the reminder pipeline matters.

        if self.store.backend == StoreBackend::Supabase {
            if self.store.supabase_url.is_none() {
                return Err(ConfigError::MissingSupabaseSetting("SUPABASE_URL"));
            }
            if self.store.supabase_service_key.is_none() {
                return Err(ConfigError::MissingSupabaseSetting(
                    "SUPABASE_SERVICE_ROLE_KEY",
                ));
            }
        }

        if self.store.cache_capacity == 0 {
            return Err(ConfigError::InvalidAnalysisConfig(
                "store_cache_capacity must be > 0".to_string(),
            ));
        }

        if let Some(path) = &self.store.snapshot_path {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(ConfigError::InvalidSnapshotPath(format!(
                        "Parent directory does not exist: {}",
                        parent.display()
                    )));
                }
            }
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::InvalidTemperature(self.llm.temperature));
        }

        if self.analysis.cache_ttl_days <= 0 {
            return Err(ConfigError::InvalidAnalysisConfig(format!(
                "cache_ttl_days must be > 0, got {}",
                self.analysis.cache_ttl_days
            )));
        }
        if self.analysis.trial_daily_scans == 0 || self.analysis.paid_daily_scans == 0 {
            return Err(ConfigError::InvalidAnalysisConfig(
                "daily scan limits must be > 0".to_string(),
            ));
        }

        if self.reminders.window_minutes > 30 {
            return Err(ConfigError::InvalidReminderConfig(format!(
                "window_minutes must be <= 30, got {}",
                self.reminders.window_minutes
            )));
        }
        if self.reminders.dedup_hours <= 0 {
            return Err(ConfigError::InvalidReminderConfig(format!(
                "dedup_hours must be > 0, got {}",
                self.reminders.dedup_hours
            )));
        }

        Ok(())
    }

    pub fn server_port(&self) -> u16 {
        self.server.port
    }

    pub fn server_host(&self) -> &str {
        &self.server.host
    }

    pub fn log_level(&self) -> Level {
        self.server.log_level
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.analysis.cache_ttl_days)
    }
}

impl Default for Config {
    /// Defaults used by tests and local runs: memory store, no API keys
    fn default() -> Self {
        Self {
            server: ServerConfig {
                port: 8787,
                host: "127.0.0.1".to_string(),
                log_level: Level::INFO,
            },
            store: StoreConfig {
                backend: StoreBackend::Memory,
                supabase_url: None,
                supabase_service_key: None,
                snapshot_path: None,
                cache_capacity: 10_000,
            },
            vision: VisionConfig {
                api_key: String::new(),
                endpoint: "https://vision.googleapis.com/v1/images:annotate".to_string(),
            },
            llm: LlmConfig {
                api_key: String::new(),
                endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
                model: "gpt-4o-mini".to_string(),
                temperature: 0.3,
                max_tokens: 300,
            },
            push: PushConfig {
                endpoint: "https://exp.host/--/api/v2/push/send".to_string(),
                access_token: None,
            },
            analysis: AnalysisConfig {
                cache_ttl_days: 7,
                trial_daily_scans: 3,
                paid_daily_scans: 8,
            },
            reminders: ReminderConfig {
                window_minutes: 2,
                dedup_hours: 24,
            },
            http_timeout: Duration::from_secs(30),
        }
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache_ttl(), chrono::Duration::days(7));
        assert_eq!(config.analysis.trial_daily_scans, 3);
        assert_eq!(config.analysis.paid_daily_scans, 8);
    }

    #[test]
    fn test_supabase_backend_requires_credentials() {
        let mut config = Config::default();
        config.store.backend = StoreBackend::Supabase;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingSupabaseSetting("SUPABASE_URL"))
        ));

        config.store.supabase_url = Some("https://example.supabase.co".to_string());
        config.store.supabase_service_key = Some("service-key".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_temperature() {
        let mut config = Config::default();
        config.llm.temperature = 3.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTemperature(_))
        ));
    }
}
