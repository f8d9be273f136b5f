//! Pipeline configuration from environment variables

use super::thresholds::{Threshold, ThresholdTable};
use super::types::SignalType;
use std::env;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Configuration for the vitals pipeline runtime
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Path to SQLite database file
    pub db_path: String,

    /// Channel buffer size for sample ingestion
    pub channel_buffer: usize,

    /// Persistence and digest flush interval in milliseconds
    pub flush_interval_ms: u64,

    /// Sampling cadence of the producers
    pub sample_hz: u32,

    /// Seconds of history kept per subject for live display
    pub retention_seconds: u32,

    /// Minimum gap between two alerts for the same (subject, signal, severity)
    pub alert_cooldown_ms: u64,

    /// Bounded notification queue size
    pub dispatch_queue_capacity: usize,

    /// At most one cloud upload per subject per period (0 disables the limit)
    pub upload_rate_limit_ms: u64,

    /// How long the dispatcher consumer waits on an empty queue per poll
    pub dispatch_poll_timeout_ms: u64,

    /// Timeout applied to every single delivery
    pub delivery_timeout_ms: u64,

    /// Recipient of alert and digest emails
    pub doctor_email: Option<String>,

    /// HTTP mail relay endpoint; emails go to the outbox file when unset
    pub mail_relay_url: Option<String>,

    /// Cloud telemetry endpoint; uploads go to the outbox file when unset
    pub cloud_upload_url: Option<String>,

    /// JSONL outbox used when no HTTP endpoint is configured
    pub outbox_path: String,

    /// Subjects driven by the runtime's producers
    pub monitored_subjects: Vec<String>,

    /// Terminal bell alarms and heartbeat tone
    pub enable_audible: bool,

    /// Per-signal overrides of the default thresholds
    pub threshold_overrides: Vec<(SignalType, Threshold)>,
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `VITALFLOW_DB_PATH` (default: vitalflow.db)
    /// - `SAMPLE_CHANNEL_BUFFER` (default: 10000)
    /// - `FLUSH_INTERVAL_MS` (default: 5000)
    /// - `SAMPLE_HZ` (default: 5)
    /// - `RETENTION_SECONDS` (default: 300)
    /// - `ALERT_COOLDOWN_MS` (default: 300000)
    /// - `DISPATCH_QUEUE_CAPACITY` (default: 256)
    /// - `UPLOAD_RATE_LIMIT_MS` (default: 10000)
    /// - `DISPATCH_POLL_TIMEOUT_MS` (default: 500)
    /// - `DELIVERY_TIMEOUT_MS` (default: 5000)
    /// - `DOCTOR_EMAIL`, `MAIL_RELAY_URL`, `CLOUD_UPLOAD_URL` (optional)
    /// - `OUTBOX_PATH` (default: outbox.jsonl)
    /// - `MONITORED_SUBJECTS` (comma-separated, default: patient-1)
    /// - `ENABLE_AUDIBLE` (default: false)
    /// - `THRESHOLD_<SIGNAL>` e.g. `THRESHOLD_HEART_RATE=60,100,40,130`
    ///   as `warn_low,warn_high,urgent_low,urgent_high`
    ///
    /// Malformed numbers fall back to defaults; malformed thresholds are an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut threshold_overrides = Vec::new();
        for signal in SignalType::ALL {
            let var = format!("THRESHOLD_{}", signal.as_str().to_uppercase());
            if let Ok(raw) = env::var(&var) {
                let threshold = parse_threshold(&raw)
                    .map_err(|msg| ConfigError::InvalidValue(format!("{}: {}", var, msg)))?;
                threshold_overrides.push((signal, threshold));
            }
        }

        let monitored_subjects = env::var("MONITORED_SUBJECTS")
            .map(|s| {
                s.split(',')
                    .map(|id| id.trim().to_string())
                    .filter(|id| !id.is_empty())
                    .collect()
            })
            .unwrap_or_else(|_| vec!["patient-1".to_string()]);

        let config = Self {
            db_path: env::var("VITALFLOW_DB_PATH").unwrap_or_else(|_| "vitalflow.db".to_string()),
            channel_buffer: parse_or("SAMPLE_CHANNEL_BUFFER", 10_000),
            flush_interval_ms: parse_or("FLUSH_INTERVAL_MS", 5_000),
            sample_hz: parse_or("SAMPLE_HZ", 5),
            retention_seconds: parse_or("RETENTION_SECONDS", 300),
            alert_cooldown_ms: parse_or("ALERT_COOLDOWN_MS", 300_000),
            dispatch_queue_capacity: parse_or("DISPATCH_QUEUE_CAPACITY", 256),
            upload_rate_limit_ms: parse_or("UPLOAD_RATE_LIMIT_MS", 10_000),
            dispatch_poll_timeout_ms: parse_or("DISPATCH_POLL_TIMEOUT_MS", 500),
            delivery_timeout_ms: parse_or("DELIVERY_TIMEOUT_MS", 5_000),
            doctor_email: non_empty_var("DOCTOR_EMAIL"),
            mail_relay_url: non_empty_var("MAIL_RELAY_URL"),
            cloud_upload_url: non_empty_var("CLOUD_UPLOAD_URL"),
            outbox_path: env::var("OUTBOX_PATH").unwrap_or_else(|_| "outbox.jsonl".to_string()),
            monitored_subjects,
            enable_audible: parse_or("ENABLE_AUDIBLE", false),
            threshold_overrides,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a component unconstructible
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_capacity() == 0 {
            return Err(ConfigError::InvalidValue(
                "RETENTION_SECONDS x SAMPLE_HZ must be greater than zero".to_string(),
            ));
        }
        if self.dispatch_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "DISPATCH_QUEUE_CAPACITY must be greater than zero".to_string(),
            ));
        }
        if self.channel_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "SAMPLE_CHANNEL_BUFFER must be greater than zero".to_string(),
            ));
        }
        if self.flush_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "FLUSH_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }
        for url in [&self.mail_relay_url, &self.cloud_upload_url].into_iter().flatten() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::InvalidValue(format!(
                    "endpoint must start with http:// or https://: {}",
                    url
                )));
            }
        }
        Ok(())
    }

    /// Samples kept per subject buffer
    pub fn buffer_capacity(&self) -> usize {
        self.retention_seconds as usize * self.sample_hz as usize
    }

    /// Default clinical thresholds with any environment overrides applied
    pub fn threshold_table(&self) -> ThresholdTable {
        let table = ThresholdTable::with_defaults();
        for (signal, threshold) in &self.threshold_overrides {
            table.set_threshold(*signal, *threshold);
        }
        table
    }
}

fn parse_or<T: std::str::FromStr>(var: &str, default: T) -> T {
    env::var(var)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn non_empty_var(var: &str) -> Option<String> {
    env::var(var).ok().filter(|s| !s.trim().is_empty())
}

/// Parse `warn_low,warn_high,urgent_low,urgent_high`
fn parse_threshold(raw: &str) -> Result<Threshold, String> {
    let bounds: Vec<f64> = raw
        .split(',')
        .map(|part| part.trim().parse::<f64>().map_err(|e| format!("'{}': {}", part.trim(), e)))
        .collect::<Result<_, _>>()?;

    match bounds.as_slice() {
        [warn_low, warn_high, urgent_low, urgent_high] => {
            if bounds.iter().any(|b| !b.is_finite()) {
                return Err("bounds must be finite".to_string());
            }
            Ok(Threshold::new(*warn_low, *warn_high, *urgent_low, *urgent_high))
        }
        _ => Err(format!("expected 4 comma-separated bounds, got {}", bounds.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests below mutate process-wide environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "VITALFLOW_DB_PATH",
        "SAMPLE_CHANNEL_BUFFER",
        "FLUSH_INTERVAL_MS",
        "SAMPLE_HZ",
        "RETENTION_SECONDS",
        "ALERT_COOLDOWN_MS",
        "DISPATCH_QUEUE_CAPACITY",
        "UPLOAD_RATE_LIMIT_MS",
        "MONITORED_SUBJECTS",
        "MAIL_RELAY_URL",
        "THRESHOLD_HEART_RATE",
        "ENABLE_AUDIBLE",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config() {
        // Test: Default configuration when no env vars set
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();

        let config = PipelineConfig::from_env().unwrap();

        assert_eq!(config.db_path, "vitalflow.db");
        assert_eq!(config.channel_buffer, 10_000);
        assert_eq!(config.flush_interval_ms, 5_000);
        assert_eq!(config.buffer_capacity(), 1_500);
        assert_eq!(config.alert_cooldown_ms, 300_000);
        assert_eq!(config.dispatch_queue_capacity, 256);
        assert_eq!(config.monitored_subjects, vec!["patient-1".to_string()]);
        assert!(!config.enable_audible);
        assert!(config.threshold_overrides.is_empty());
    }

    #[test]
    fn test_custom_config() {
        // Test: Custom configuration from env vars
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        env::set_var("VITALFLOW_DB_PATH", "/tmp/vitals.db");
        env::set_var("SAMPLE_HZ", "10");
        env::set_var("RETENTION_SECONDS", "60");
        env::set_var("MONITORED_SUBJECTS", "bed-1, bed-2,,");
        env::set_var("THRESHOLD_HEART_RATE", "55, 105, 45, 140");
        env::set_var("ENABLE_AUDIBLE", "true");

        let config = PipelineConfig::from_env().unwrap();

        assert_eq!(config.db_path, "/tmp/vitals.db");
        assert_eq!(config.buffer_capacity(), 600);
        assert_eq!(config.monitored_subjects, vec!["bed-1".to_string(), "bed-2".to_string()]);
        assert!(config.enable_audible);

        let table = config.threshold_table();
        assert_eq!(
            table.get_threshold(SignalType::HeartRate),
            Some(Threshold::new(55.0, 105.0, 45.0, 140.0))
        );

        clear_env();
    }

    #[test]
    fn test_zero_capacity_rejected() {
        // Edge case: retention of zero seconds cannot build a buffer
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        env::set_var("RETENTION_SECONDS", "0");

        let result = PipelineConfig::from_env();
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));

        clear_env();
    }

    #[test]
    fn test_malformed_threshold_rejected() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        env::set_var("THRESHOLD_HEART_RATE", "60,100,40");

        let err = PipelineConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("THRESHOLD_HEART_RATE"));

        clear_env();
    }

    #[test]
    fn test_invalid_relay_url_rejected() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        env::set_var("MAIL_RELAY_URL", "smtp.example.org");

        // Every unset variable has a default, so the only failure is a bad value
        let err = PipelineConfig::from_env().unwrap_err();
        let ConfigError::InvalidValue(msg) = &err;
        assert!(msg.contains("MAIL_RELAY_URL"));
        assert!(err.to_string().starts_with("Invalid configuration value"));

        clear_env();
    }

    #[test]
    fn test_parse_threshold() {
        assert_eq!(
            parse_threshold("36.0,37.5,35.0,39.0"),
            Ok(Threshold::new(36.0, 37.5, 35.0, 39.0))
        );
        assert!(parse_threshold("a,b,c,d").is_err());
        assert!(parse_threshold("1,2,3,inf").is_err());
    }
}
