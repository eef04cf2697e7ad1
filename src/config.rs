//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::platform::DeliveryFailurePolicy;

/// Default pattern for pulling a profile id out of a subject reference:
/// the last non-empty path segment.
pub const DEFAULT_PROFILE_ID_PATTERN: &str = r"([^/?#]+)/?(?:[?#].*)?$";

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the libSQL database file.
    pub db_path: PathBuf,
    /// Port for the HTTP/WebSocket control surface.
    pub port: u16,
    /// Lower bound of the jittered pause between outbound sends.
    pub send_delay_min: Duration,
    /// Upper bound of the jittered pause between outbound sends.
    pub send_delay_max: Duration,
    /// Whether escalation advances when delivery fails.
    pub failure_policy: DeliveryFailurePolicy,
    /// Replies older than this many days no longer count as a response.
    pub response_window_days: i64,
    /// Regex with one capture group extracting a profile id from a subject.
    pub profile_id_pattern: String,
    /// Substituted for `{sender}` in reminder templates.
    pub sender_name: String,
    /// Directory for rolling log files (stderr only when unset).
    pub log_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/cadence.db"),
            port: 8080,
            send_delay_min: Duration::from_secs(45),
            send_delay_max: Duration::from_secs(75),
            failure_policy: DeliveryFailurePolicy::Advance,
            response_window_days: 60,
            profile_id_pattern: DEFAULT_PROFILE_ID_PATTERN.to_string(),
            sender_name: String::new(),
            log_dir: None,
        }
    }
}

impl EngineConfig {
    /// Build from `CADENCE_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let send_delay_min = env_parse::<u64>("CADENCE_SEND_DELAY_MIN_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.send_delay_min);
        let send_delay_max = env_parse::<u64>("CADENCE_SEND_DELAY_MAX_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.send_delay_max);
        if send_delay_min > send_delay_max {
            return Err(ConfigError::InvalidValue {
                key: "CADENCE_SEND_DELAY_MIN_SECS".into(),
                message: format!(
                    "minimum delay {}s exceeds maximum {}s",
                    send_delay_min.as_secs(),
                    send_delay_max.as_secs()
                ),
            });
        }

        let failure_policy = match env_parse::<bool>("CADENCE_ADVANCE_ON_FAILURE")? {
            Some(false) => DeliveryFailurePolicy::Hold,
            Some(true) => DeliveryFailurePolicy::Advance,
            None => defaults.failure_policy,
        };

        let response_window_days = response_window(
            env_parse("CADENCE_RESPONSE_WINDOW_DAYS")?.unwrap_or(defaults.response_window_days),
        )?;

        let profile_id_pattern = std::env::var("CADENCE_PROFILE_ID_PATTERN")
            .unwrap_or(defaults.profile_id_pattern);
        if let Err(e) = regex::Regex::new(&profile_id_pattern) {
            return Err(ConfigError::InvalidValue {
                key: "CADENCE_PROFILE_ID_PATTERN".into(),
                message: e.to_string(),
            });
        }

        Ok(Self {
            db_path: std::env::var("CADENCE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            port: env_parse("CADENCE_PORT")?.unwrap_or(defaults.port),
            send_delay_min,
            send_delay_max,
            failure_policy,
            response_window_days,
            profile_id_pattern,
            sender_name: std::env::var("CADENCE_SENDER_NAME").unwrap_or_default(),
            log_dir: std::env::var("CADENCE_LOG_DIR").ok().map(PathBuf::from),
        })
    }
}

/// Outbound delivery configuration.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Webhook that performs the actual platform send. Dry-run when unset.
    pub webhook_url: Option<String>,
    /// Bearer token sent with each webhook call.
    pub token: Option<SecretString>,
    pub timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            token: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DeliveryConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let timeout = env_parse::<u64>("CADENCE_DELIVERY_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));
        Ok(Self {
            webhook_url: std::env::var("CADENCE_DELIVERY_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            token: std::env::var("CADENCE_DELIVERY_TOKEN")
                .ok()
                .map(SecretString::from),
            timeout,
        })
    }
}

/// A negative window would discard every reply.
fn response_window(days: i64) -> Result<i64, ConfigError> {
    if days < 0 {
        return Err(ConfigError::InvalidValue {
            key: "CADENCE_RESPONSE_WINDOW_DAYS".into(),
            message: format!("window must not be negative, got {days}"),
        });
    }
    Ok(days)
}

/// Read and parse an optional environment variable.
fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
        Err(_) => Ok(None),
    }
}
