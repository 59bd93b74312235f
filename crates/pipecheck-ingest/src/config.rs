//! Configuration management

use serde::{Deserialize, Serialize};

use crate::validate::ValidationMode;

// ============================================================================
// Pipeline Configuration Constants
// ============================================================================

/// Default number of rows committed per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Files smaller than this with at most one non-empty line are header-only.
pub const DEFAULT_HEADER_ONLY_THRESHOLD: usize = 1024;

/// Default prefix length sampled for encoding detection.
pub const DEFAULT_ENCODING_SAMPLE_BYTES: usize = 10_000;

/// Below this detector confidence the fallback encodings are tried.
pub const DEFAULT_ENCODING_CONFIDENCE: f32 = 0.7;

// ============================================================================
// Database Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/pipecheck";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

// ============================================================================
// AI Repair Configuration Constants
// ============================================================================

/// Default OpenAI-compatible endpoint (Groq).
pub const DEFAULT_AI_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Default chat model.
pub const DEFAULT_AI_MODEL: &str = "llama-3.1-8b-instant";

/// Default request budget, matching the Groq free tier.
pub const DEFAULT_AI_REQUESTS_PER_MINUTE: u32 = 25;

/// Default per-request timeout in seconds.
pub const DEFAULT_AI_TIMEOUT_SECS: u64 = 30;

/// Default completion size.
pub const DEFAULT_AI_MAX_TOKENS: u32 = 500;

/// Default sampling temperature.
pub const DEFAULT_AI_TEMPERATURE: f32 = 0.1;

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub validation_mode: ValidationMode,
    pub format: FormatConfig,
    pub database: DatabaseConfig,
    pub ai: AiRepairConfig,
}

/// Format detection thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FormatConfig {
    pub header_only_threshold: usize,
    pub encoding_sample_bytes: usize,
    pub encoding_confidence: f32,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// AI repair client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiRepairConfig {
    /// Repair is disabled when no key is configured
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub requests_per_minute: u32,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl AiRepairConfig {
    pub fn is_enabled(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.trim().is_empty())
    }
}

impl PipelineConfig {
    /// Load configuration from environment and defaults
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = PipelineConfig {
            batch_size: env_parse("PIPECHECK_BATCH_SIZE").unwrap_or(DEFAULT_BATCH_SIZE),
            validation_mode: std::env::var("PIPECHECK_VALIDATION_MODE")
                .ok()
                .map(|s| s.parse())
                .transpose()?
                .unwrap_or_default(),
            format: FormatConfig {
                header_only_threshold: env_parse("PIPECHECK_HEADER_ONLY_THRESHOLD")
                    .unwrap_or(DEFAULT_HEADER_ONLY_THRESHOLD),
                encoding_sample_bytes: env_parse("PIPECHECK_ENCODING_SAMPLE_BYTES")
                    .unwrap_or(DEFAULT_ENCODING_SAMPLE_BYTES),
                encoding_confidence: env_parse("PIPECHECK_ENCODING_CONFIDENCE")
                    .unwrap_or(DEFAULT_ENCODING_CONFIDENCE),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
                min_connections: env_parse("DATABASE_MIN_CONNECTIONS")
                    .unwrap_or(DEFAULT_DATABASE_MIN_CONNECTIONS),
                connect_timeout_secs: env_parse("DATABASE_CONNECT_TIMEOUT")
                    .unwrap_or(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
                idle_timeout_secs: env_parse("DATABASE_IDLE_TIMEOUT")
                    .unwrap_or(DEFAULT_DATABASE_IDLE_TIMEOUT_SECS),
            },
            ai: AiRepairConfig {
                api_key: std::env::var("AI_REPAIR_API_KEY")
                    .or_else(|_| std::env::var("GROQ_API_KEY"))
                    .ok(),
                base_url: std::env::var("AI_REPAIR_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_AI_BASE_URL.to_string()),
                model: std::env::var("AI_REPAIR_MODEL")
                    .unwrap_or_else(|_| DEFAULT_AI_MODEL.to_string()),
                requests_per_minute: env_parse("AI_REPAIR_REQUESTS_PER_MINUTE")
                    .unwrap_or(DEFAULT_AI_REQUESTS_PER_MINUTE),
                timeout_secs: env_parse("AI_REPAIR_TIMEOUT_SECS").unwrap_or(DEFAULT_AI_TIMEOUT_SECS),
                max_tokens: env_parse("AI_REPAIR_MAX_TOKENS").unwrap_or(DEFAULT_AI_MAX_TOKENS),
                temperature: env_parse("AI_REPAIR_TEMPERATURE").unwrap_or(DEFAULT_AI_TEMPERATURE),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            anyhow::bail!("Batch size must be greater than 0");
        }

        if self.format.encoding_sample_bytes == 0 {
            anyhow::bail!("Encoding sample size must be greater than 0");
        }

        if !(0.0..=1.0).contains(&self.format.encoding_confidence) {
            anyhow::bail!(
                "Encoding confidence threshold must be within [0, 1], got {}",
                self.format.encoding_confidence
            );
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.ai.requests_per_minute == 0 {
            anyhow::bail!("AI repair requests_per_minute must be greater than 0");
        }

        if !self.ai.is_enabled() {
            tracing::info!("No AI repair API key configured - AI repair disabled");
        }

        Ok(())
    }
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            header_only_threshold: DEFAULT_HEADER_ONLY_THRESHOLD,
            encoding_sample_bytes: DEFAULT_ENCODING_SAMPLE_BYTES,
            encoding_confidence: DEFAULT_ENCODING_CONFIDENCE,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
        }
    }
}

impl Default for AiRepairConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_AI_BASE_URL.to_string(),
            model: DEFAULT_AI_MODEL.to_string(),
            requests_per_minute: DEFAULT_AI_REQUESTS_PER_MINUTE,
            timeout_secs: DEFAULT_AI_TIMEOUT_SECS,
            max_tokens: DEFAULT_AI_MAX_TOKENS,
            temperature: DEFAULT_AI_TEMPERATURE,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            validation_mode: ValidationMode::default(),
            format: FormatConfig::default(),
            database: DatabaseConfig::default(),
            ai: AiRepairConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.format.header_only_threshold, 1024);
        assert_eq!(config.ai.requests_per_minute, 25);
        assert_eq!(config.validation_mode, ValidationMode::Lenient);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ai_enabled_requires_key() {
        let mut ai = AiRepairConfig::default();
        assert!(!ai.is_enabled());
        ai.api_key = Some("   ".into());
        assert!(!ai.is_enabled());
        ai.api_key = Some("gsk_test".into());
        assert!(ai.is_enabled());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = PipelineConfig::default();
        config.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.format.encoding_confidence = 1.5;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.database.min_connections = 20;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.ai.requests_per_minute = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_key_is_not_serialized() {
        let mut config = PipelineConfig::default();
        config.ai.api_key = Some("gsk_secret".into());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("gsk_secret"));
    }
}
