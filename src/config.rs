//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Environment variable prefix for all bridge settings.
const ENV_PREFIX: &str = "VOICE_BRIDGE_";

/// How reply text is split into content frames on the outbound stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Role frame, one content frame, stop frame, sent back to back.
    Burst,
    /// One content frame per word, with a fixed delay between frames.
    Paced { delay: Duration },
}

/// Which LLM backend serves open-ended turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackendKind {
    Anthropic,
    OpenAi,
}

/// Bridge configuration, built from `VOICE_BRIDGE_*` environment variables.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// HTTP listen port.
    pub port: u16,
    /// libSQL database file.
    pub db_path: PathBuf,
    /// File holding the "latest active session" pointer.
    pub pointer_path: PathBuf,
    /// Attempts made against the pointer store when no identity carrier is present.
    pub identity_max_retries: u32,
    /// Base delay of the pointer-store backoff; attempt `n` waits `base * 2^n`.
    pub identity_backoff_base: Duration,
    /// Upper bound on an open-ended generation call.
    pub generation_timeout: Duration,
    /// Upper bound on a report generation call.
    pub report_timeout: Duration,
    /// Upper bound on a chunk personalization call.
    pub personalize_timeout: Duration,
    /// How long a repeated single-message turn is treated as a platform retry.
    pub retry_window: Duration,
    /// Value of the `model` field in every outbound frame.
    pub model_label: String,
    pub stream_mode: StreamMode,
    /// Report service endpoint. `None` disables report generation.
    pub report_url: Option<String>,
    /// Optional JSON file of lessons upserted at startup.
    pub lessons_file: Option<PathBuf>,
    pub llm_backend: LlmBackendKind,
    /// LLM model name. `None` picks the backend default.
    pub llm_model: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: PathBuf::from("./data/voice-bridge.db"),
            pointer_path: PathBuf::from("./data/latest-session.json"),
            identity_max_retries: 3,
            identity_backoff_base: Duration::from_millis(100),
            generation_timeout: Duration::from_secs(20),
            report_timeout: Duration::from_secs(15),
            personalize_timeout: Duration::from_secs(10),
            retry_window: Duration::from_secs(5),
            model_label: "voice-bridge".to_string(),
            stream_mode: StreamMode::Burst,
            report_url: None,
            lessons_file: None,
            llm_backend: LlmBackendKind::Anthropic,
            llm_model: None,
        }
    }
}

impl BridgeConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup (used by `from_env` and tests).
    ///
    /// Unset keys fall back to [`BridgeConfig::default`]; set but unparsable
    /// keys are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let port = parse_or(get("PORT"), "PORT", defaults.port)?;
        let db_path = get("DB_PATH").map(PathBuf::from).unwrap_or(defaults.db_path);
        let pointer_path = get("POINTER_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.pointer_path);
        let identity_max_retries = parse_or(
            get("IDENTITY_MAX_RETRIES"),
            "IDENTITY_MAX_RETRIES",
            defaults.identity_max_retries,
        )?;
        let identity_backoff_base = Duration::from_millis(parse_or(
            get("IDENTITY_BACKOFF_MS"),
            "IDENTITY_BACKOFF_MS",
            defaults.identity_backoff_base.as_millis() as u64,
        )?);
        let generation_timeout = Duration::from_secs(parse_or(
            get("GENERATION_TIMEOUT_SECS"),
            "GENERATION_TIMEOUT_SECS",
            defaults.generation_timeout.as_secs(),
        )?);
        let report_timeout = Duration::from_secs(parse_or(
            get("REPORT_TIMEOUT_SECS"),
            "REPORT_TIMEOUT_SECS",
            defaults.report_timeout.as_secs(),
        )?);
        let personalize_timeout = Duration::from_secs(parse_or(
            get("PERSONALIZE_TIMEOUT_SECS"),
            "PERSONALIZE_TIMEOUT_SECS",
            defaults.personalize_timeout.as_secs(),
        )?);
        let retry_window = Duration::from_secs(parse_or(
            get("RETRY_WINDOW_SECS"),
            "RETRY_WINDOW_SECS",
            defaults.retry_window.as_secs(),
        )?);
        let model_label = get("MODEL_LABEL").unwrap_or(defaults.model_label);

        let paced_delay = Duration::from_millis(parse_or(
            get("PACED_DELAY_MS"),
            "PACED_DELAY_MS",
            40u64,
        )?);
        let stream_mode = match get("STREAM_MODE").as_deref() {
            None | Some("burst") => StreamMode::Burst,
            Some("paced") => StreamMode::Paced { delay: paced_delay },
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: format!("{ENV_PREFIX}STREAM_MODE"),
                    message: format!("expected 'burst' or 'paced', got '{other}'"),
                });
            }
        };

        let llm_backend = match get("LLM_BACKEND").as_deref() {
            None | Some("anthropic") => LlmBackendKind::Anthropic,
            Some("openai") => LlmBackendKind::OpenAi,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: format!("{ENV_PREFIX}LLM_BACKEND"),
                    message: format!("expected 'anthropic' or 'openai', got '{other}'"),
                });
            }
        };

        Ok(Self {
            port,
            db_path,
            pointer_path,
            identity_max_retries,
            identity_backoff_base,
            generation_timeout,
            report_timeout,
            personalize_timeout,
            retry_window,
            model_label,
            stream_mode,
            report_url: get("REPORT_URL"),
            lessons_file: get("LESSONS_FILE").map(PathBuf::from),
            llm_backend,
            llm_model: get("MODEL"),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    raw: Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(s) => s.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: format!("{ENV_PREFIX}{name}"),
            message: e.to_string(),
        }),
    }
}
