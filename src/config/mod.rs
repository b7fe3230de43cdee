use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use garde::Validate;
use serde::{Deserialize, Deserializer};

use crate::models::generation::ResolutionTag;
use crate::models::verification::Rubric;
use crate::services::generator::DEFAULT_INSTRUCTION;

#[derive(Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Gemini API key
    #[garde(length(min = 1))]
    pub gemini_api_key: String,

    /// Base URL of the Generative Language API
    #[serde(default = "default_api_base_url")]
    #[garde(length(min = 1))]
    pub api_base_url: String,

    /// Image model used for translation/typesetting
    #[serde(default = "default_generator_model")]
    #[garde(length(min = 1))]
    pub generator_model: String,

    /// Text model used to judge candidates
    #[serde(default = "default_verifier_model")]
    #[garde(length(min = 1))]
    pub verifier_model: String,

    /// Instruction prompt sent with every page
    #[serde(default = "default_instruction_prompt")]
    #[garde(length(min = 1))]
    pub instruction_prompt: String,

    /// off | lenient | strict
    #[serde(default = "default_rubric", deserialize_with = "parse_with_strum")]
    #[garde(skip)]
    pub rubric: Rubric,

    /// 1K | 2K | 4K
    #[serde(default = "default_resolution", deserialize_with = "parse_with_strum")]
    #[garde(skip)]
    pub resolution: ResolutionTag,

    #[serde(default = "default_base_temperature")]
    #[garde(range(min = 0.0, max = 1.0))]
    pub base_temperature: f32,

    /// Verify and retry rejected pages
    #[serde(default = "default_true")]
    #[garde(skip)]
    pub auto_retry: bool,

    #[serde(default = "default_max_retries")]
    #[garde(range(min = 0, max = 5))]
    pub max_retries: u32,

    /// Temperature forced on retries when the base temperature is low
    #[serde(default = "default_escape_temperature")]
    #[garde(range(min = 0.0, max = 1.0))]
    pub escape_temperature: f32,

    /// Base temperatures below this value are escalated on retries
    #[serde(default = "default_escalate_below")]
    #[garde(range(min = 0.0, max = 1.0))]
    pub escalate_below: f32,

    /// Pause between a rejected attempt and the next one
    #[serde(default = "default_retry_delay_ms")]
    #[garde(skip)]
    pub retry_delay_ms: u64,

    /// Pause between work items
    #[serde(default = "default_item_delay_ms")]
    #[garde(skip)]
    pub item_delay_ms: u64,

    /// Treat unusable verifier responses as a pass
    #[serde(default = "default_true")]
    #[garde(skip)]
    pub verifier_fail_open: bool,

    /// Disable category filters irrelevant to manga pages
    #[serde(default = "default_true")]
    #[garde(skip)]
    pub safety_relaxation: bool,

    #[serde(default = "default_request_timeout_secs")]
    #[garde(range(min = 1, max = 600))]
    pub request_timeout_secs: u64,

    /// Low-level retries for rate limits and transport errors
    #[serde(default = "default_transport_retries")]
    #[garde(range(min = 0, max = 3))]
    pub transport_retries: u32,

    #[serde(default = "default_transport_backoff_ms")]
    #[garde(skip)]
    pub transport_backoff_ms: u64,

    /// Directory scanned for source pages
    #[serde(default = "default_input_dir")]
    #[garde(skip)]
    pub input_dir: PathBuf,

    /// Directory receiving translated pages and the batch report
    #[serde(default = "default_output_dir")]
    #[garde(skip)]
    pub output_dir: PathBuf,
}

fn default_api_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_generator_model() -> String {
    "gemini-3-pro-image-preview".to_string()
}

fn default_verifier_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_instruction_prompt() -> String {
    DEFAULT_INSTRUCTION.to_string()
}

fn default_rubric() -> Rubric {
    Rubric::Lenient
}

fn default_resolution() -> ResolutionTag {
    ResolutionTag::FourK
}

fn default_base_temperature() -> f32 {
    0.4
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    2
}

fn default_escape_temperature() -> f32 {
    0.6
}

fn default_escalate_below() -> f32 {
    0.5
}

fn default_retry_delay_ms() -> u64 {
    1200
}

fn default_item_delay_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    180
}

fn default_transport_retries() -> u32 {
    1
}

fn default_transport_backoff_ms() -> u64 {
    2000
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("./pages")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./translated")
}

fn parse_with_strum<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let raw = String::deserialize(deserializer)?;
    raw.trim().parse().map_err(serde::de::Error::custom)
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Whether the verify/retry loop runs at all.
    pub fn verification_enabled(&self) -> bool {
        self.auto_retry && self.rubric != Rubric::Off
    }

    /// Controller settings derived from the environment.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            instruction: self.instruction_prompt.clone(),
            resolution: self.resolution,
            rubric: self.rubric,
            verification_enabled: self.verification_enabled(),
            max_retries: self.max_retries,
            base_temperature: self.base_temperature,
            escape_temperature: self.escape_temperature,
            escalate_below: self.escalate_below,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            verifier_fail_open: self.verifier_fail_open,
        }
    }
}

/// Settings consumed by the retry controller. Opaque to the rest of the system.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub instruction: String,
    pub resolution: ResolutionTag,
    pub rubric: Rubric,
    pub verification_enabled: bool,
    pub max_retries: u32,
    pub base_temperature: f32,
    pub escape_temperature: f32,
    pub escalate_below: f32,
    pub retry_delay: Duration,
    pub verifier_fail_open: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            instruction: default_instruction_prompt(),
            resolution: default_resolution(),
            rubric: default_rubric(),
            verification_enabled: true,
            max_retries: default_max_retries(),
            base_temperature: default_base_temperature(),
            escape_temperature: default_escape_temperature(),
            escalate_below: default_escalate_below(),
            retry_delay: Duration::from_millis(default_retry_delay_ms()),
            verifier_fail_open: true,
        }
    }
}

impl PipelineConfig {
    /// Highest attempt index the controller may reach.
    ///
    /// Zero when verification is off: one generation, never verified.
    pub fn last_attempt(&self) -> u32 {
        if self.verification_enabled {
            self.max_retries
        } else {
            0
        }
    }

    /// Sampling temperature for attempt `attempt`.
    ///
    /// Retries lift a low base temperature to the escape value so the model
    /// stops repeating the rejected output. Non-decreasing in `attempt`.
    pub fn temperature_for_attempt(&self, attempt: u32) -> f32 {
        if attempt > 0 && self.base_temperature < self.escalate_below {
            self.base_temperature.max(self.escape_temperature)
        } else {
            self.base_temperature
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] garde::Report),
}
