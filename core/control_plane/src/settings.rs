//! Application settings - all values from `CACP_`-prefixed environment
//! variables, with a TOML clinic profile loaded separately.

use std::env;
use std::fs;

use regex::Regex;
use shared_types::ClinicProfile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: String, value: String },

    #[error("failed to read clinic profile {path}: {reason}")]
    ClinicProfile { path: String, reason: String },
}

/// Central configuration for the service and the worker.
#[derive(Debug, Clone)]
pub struct Settings {
    // HMAC signing
    pub hmac_secret: String,

    // GitHub PR creation
    pub github_token: String,
    pub github_owner: String,
    pub github_repo: String,
    pub github_webhook_secret: String,

    // Target environment
    pub environment: String,

    // OPA
    pub opa_url: String,

    // PostgreSQL event store
    pub pg_dsn: String,

    // Redis queue
    pub redis_url: String,

    // Twilio
    pub twilio_auth_token: String,
    pub twilio_account_sid: String,
    pub twilio_from_number: String,

    // HTTP server
    pub bind_addr: String,

    // Worker rails
    pub quiet_hours_start: u32,
    pub quiet_hours_end: u32,
    pub timezone: String,
    pub sms_rate_limit: u64,
    pub sms_rate_window_secs: u64,
    pub dedup_ttl_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_secs: Vec<u64>,

    // Optional clinic profile TOML
    pub clinic_profile_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            hmac_secret: String::new(),
            github_token: String::new(),
            github_owner: String::new(),
            github_repo: "clinic-gitops-config".to_string(),
            github_webhook_secret: String::new(),
            environment: "dev".to_string(),
            opa_url: "http://localhost:8181".to_string(),
            pg_dsn: String::new(),
            redis_url: "redis://localhost:6379/0".to_string(),
            twilio_auth_token: String::new(),
            twilio_account_sid: String::new(),
            twilio_from_number: String::new(),
            bind_addr: "127.0.0.1:8080".to_string(),
            quiet_hours_start: 22,
            quiet_hours_end: 8,
            timezone: "Europe/Madrid".to_string(),
            sms_rate_limit: 3,
            sms_rate_window_secs: 86_400,
            dedup_ttl_secs: 86_400,
            max_retries: 3,
            retry_backoff_secs: vec![60, 300, 900],
            clinic_profile_path: String::new(),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, SettingsError> {
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| SettingsError::Invalid {
            key: key.to_string(),
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

fn env_parse_list(key: &str, default: &[u64]) -> Result<Vec<u64>, SettingsError> {
    match env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(|part| {
                part.trim().parse().map_err(|_| SettingsError::Invalid {
                    key: key.to_string(),
                    value: raw.clone(),
                })
            })
            .collect(),
        Err(_) => Ok(default.to_vec()),
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        let defaults = Settings::default();
        Ok(Self {
            hmac_secret: env_or("CACP_HMAC_SECRET", ""),
            github_token: env_or("CACP_GITHUB_TOKEN", ""),
            github_owner: env_or("CACP_GITHUB_OWNER", ""),
            github_repo: env_or("CACP_GITHUB_REPO", &defaults.github_repo),
            github_webhook_secret: env_or("CACP_GITHUB_WEBHOOK_SECRET", ""),
            environment: env_or("CACP_ENVIRONMENT", &defaults.environment),
            opa_url: env_or("CACP_OPA_URL", &defaults.opa_url),
            pg_dsn: env_or("CACP_PG_DSN", ""),
            redis_url: env_or("CACP_REDIS_URL", &defaults.redis_url),
            twilio_auth_token: env_or("CACP_TWILIO_AUTH_TOKEN", ""),
            twilio_account_sid: env_or("CACP_TWILIO_ACCOUNT_SID", ""),
            twilio_from_number: env_or("CACP_TWILIO_FROM_NUMBER", ""),
            bind_addr: env_or("CACP_BIND_ADDR", &defaults.bind_addr),
            quiet_hours_start: env_parse("CACP_QUIET_HOURS_START", defaults.quiet_hours_start)?,
            quiet_hours_end: env_parse("CACP_QUIET_HOURS_END", defaults.quiet_hours_end)?,
            timezone: env_or("CACP_TIMEZONE", &defaults.timezone),
            sms_rate_limit: env_parse("CACP_SMS_RATE_LIMIT", defaults.sms_rate_limit)?,
            sms_rate_window_secs: env_parse(
                "CACP_SMS_RATE_WINDOW_SECS",
                defaults.sms_rate_window_secs,
            )?,
            dedup_ttl_secs: env_parse("CACP_DEDUP_TTL_SECS", defaults.dedup_ttl_secs)?,
            max_retries: env_parse("CACP_MAX_RETRIES", defaults.max_retries)?,
            retry_backoff_secs: env_parse_list(
                "CACP_RETRY_BACKOFF_SECS",
                &defaults.retry_backoff_secs,
            )?,
            clinic_profile_path: env_or("CACP_CLINIC_PROFILE_PATH", ""),
        })
    }

    /// Load the clinic profile TOML, or fall back to the built-in defaults
    /// when no path is configured.
    pub fn clinic_profile(&self) -> Result<ClinicProfile, SettingsError> {
        if self.clinic_profile_path.is_empty() {
            return Ok(ClinicProfile::default());
        }
        load_clinic_profile(&self.clinic_profile_path)
    }
}

/// Load a clinic profile from TOML, interpolating `{{VAR}}` or `${VAR}`
/// occurrences from the environment.
pub fn load_clinic_profile(path: &str) -> Result<ClinicProfile, SettingsError> {
    let content = fs::read_to_string(path).map_err(|e| SettingsError::ClinicProfile {
        path: path.to_string(),
        reason: e.to_string(),
    })?;

    let re = Regex::new(r"(\{\{|\$\{)([a-zA-Z0-9_]+)(\}\}|\})").map_err(|e| {
        SettingsError::ClinicProfile {
            path: path.to_string(),
            reason: e.to_string(),
        }
    })?;

    let processed = re.replace_all(&content, |caps: &regex::Captures| {
        let var_name = &caps[2];
        env::var(var_name).unwrap_or_default()
    });

    toml::from_str(&processed).map_err(|e| SettingsError::ClinicProfile {
        path: path.to_string(),
        reason: e.to_string(),
    })
}
