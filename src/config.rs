use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::filing::segment::DEFAULT_MIN_BODY_CHARS;

/// Bounds on the repair/retry state machine of one extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Local repair passes over an unparsable response (no extra call).
    pub repair_attempts: u8,
    /// Re-issued calls with a strict-format instruction.
    pub reissues: u8,
    /// Extra attempts after a retryable gateway failure.
    pub gateway_retries: u8,
    /// Base delay before a gateway retry, multiplied by the attempt number.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            repair_attempts: 2,
            reissues: 1,
            gateway_retries: 1,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Tunables for one orchestrator.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub concurrency: usize,
    pub timeout: Option<Duration>,
    pub retry: RetryPolicy,
    /// A heading needs at least this many body chars to count as a section.
    pub min_section_chars: usize,
    /// Accepted sections shorter than this are reported as likely mis-segmented.
    pub suspicious_section_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            timeout: Some(Duration::from_secs(300)),
            retry: RetryPolicy::default(),
            min_section_chars: DEFAULT_MIN_BODY_CHARS,
            suspicious_section_chars: 500,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let timeout_secs: u64 = env_or("PIPELINE_TIMEOUT_SECS", 300)?;
        Ok(Self {
            concurrency: env_or("PIPELINE_CONCURRENCY", defaults.concurrency)?,
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            retry: defaults.retry,
            min_section_chars: env_or("PIPELINE_MIN_SECTION_CHARS", defaults.min_section_chars)?,
            suspicious_section_chars: env_or(
                "PIPELINE_SUSPICIOUS_SECTION_CHARS",
                defaults.suspicious_section_chars,
            )?,
        })
    }
}

/// Connection settings for an OpenAI-compatible chat completions gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Send the full JSON schema as `response_format` instead of plain JSON mode.
    pub structured_output: bool,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let base_url = dotenv::var("LLM_BASE_URL")
            .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string());
        let model = dotenv::var("LLM_MODEL")
            .unwrap_or_else(|_| "anthropic/claude-3.5-sonnet".to_string());
        let api_key = dotenv::var("LLM_API_KEY").ok().filter(|k| !k.is_empty());
        let timeout_secs: u64 = env_or("LLM_TIMEOUT_SECS", 120)?;

        Ok(Self {
            base_url,
            model,
            api_key,
            timeout: Duration::from_secs(timeout_secs),
            max_tokens: env_or("LLM_MAX_TOKENS", 2000)?,
            temperature: env_or("LLM_TEMPERATURE", 0.0)?,
            structured_output: env_or("LLM_STRUCTURED_OUTPUT", false)?,
        })
    }
}

/// Settings for the EDGAR filing fetcher.
#[derive(Debug, Clone)]
pub struct EdgarConfig {
    /// SEC requires a descriptive User-Agent with contact details.
    pub user_agent: String,
    pub form_type: String,
    pub timeout: Duration,
}

impl EdgarConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            user_agent: dotenv::var("SEC_USER_AGENT")
                .unwrap_or_else(|_| "filing-extract contact@example.com".to_string()),
            form_type: dotenv::var("SEC_FORM_TYPE").unwrap_or_else(|_| "10-K".to_string()),
            timeout: Duration::from_secs(env_or("SEC_TIMEOUT_SECS", 60)?),
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match dotenv::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        _ => Ok(default),
    }
}
