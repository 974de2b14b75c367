use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::sync::OnceLock;
use std::time::Duration;

/// Hard ceiling on warnings before the session is forced closed.
pub const MAX_WARNINGS: u32 = 3;
/// Violations at or above this severity capture an evidence clip.
pub const EVIDENCE_MIN_SEVERITY: u8 = 4;
pub const EVIDENCE_CLIP_MAX_SECONDS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub resume_store_dir: String,
    pub max_warnings: u32,
    pub evidence_min_severity: u8,
    pub evidence_clip_max_seconds: u64,
    pub timer_tick_ms: u64,
    pub autosave_interval_secs: u64,
    pub status_poll_secs: u64,
    pub http_timeout_secs: u64,
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let config = Self {
            api_base_url: get_env("EXAM_API_BASE_URL")?,
            api_token: env::var("EXAM_API_TOKEN").ok().filter(|t| !t.trim().is_empty()),
            resume_store_dir: env::var("RESUME_STORE_DIR")
                .unwrap_or_else(|_| ".exam-resume".to_string()),
            max_warnings: get_env_parse_or("MAX_WARNINGS", MAX_WARNINGS)?,
            evidence_min_severity: get_env_parse_or("EVIDENCE_MIN_SEVERITY", EVIDENCE_MIN_SEVERITY)?,
            evidence_clip_max_seconds: get_env_parse_or(
                "EVIDENCE_CLIP_MAX_SECONDS",
                EVIDENCE_CLIP_MAX_SECONDS,
            )?,
            timer_tick_ms: get_env_parse_or("TIMER_TICK_MS", 1000)?,
            autosave_interval_secs: get_env_parse_or("AUTOSAVE_INTERVAL_SECS", 30)?,
            status_poll_secs: get_env_parse_or("STATUS_POLL_SECS", 20)?,
            http_timeout_secs: get_env_parse_or("HTTP_TIMEOUT_SECS", 10)?,
        };

        if config.max_warnings == 0 {
            return Err(Error::Config("MAX_WARNINGS must be at least 1".to_string()));
        }
        if config.timer_tick_ms == 0
            || config.evidence_clip_max_seconds == 0
            || config.autosave_interval_secs == 0
            || config.status_poll_secs == 0
        {
            return Err(Error::Config(
                "TIMER_TICK_MS, EVIDENCE_CLIP_MAX_SECONDS, AUTOSAVE_INTERVAL_SECS and STATUS_POLL_SECS must be positive"
                    .to_string(),
            ));
        }

        Ok(config)
    }

    pub fn policy(&self) -> SessionPolicy {
        SessionPolicy {
            max_warnings: self.max_warnings,
            evidence_min_severity: self.evidence_min_severity,
            clip_max_duration: Duration::from_secs(self.evidence_clip_max_seconds),
            tick_interval: Duration::from_millis(self.timer_tick_ms),
            autosave_interval: Duration::from_secs(self.autosave_interval_secs),
            status_poll_interval: Duration::from_secs(self.status_poll_secs),
        }
    }
}

/// Tunables handed to the session components, so nothing below the binary
/// reads the global config.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub max_warnings: u32,
    pub evidence_min_severity: u8,
    pub clip_max_duration: Duration,
    pub tick_interval: Duration,
    pub autosave_interval: Duration,
    /// How often the backend is asked whether proctoring ended the session.
    pub status_poll_interval: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            max_warnings: MAX_WARNINGS,
            evidence_min_severity: EVIDENCE_MIN_SEVERITY,
            clip_max_duration: Duration::from_secs(EVIDENCE_CLIP_MAX_SECONDS),
            tick_interval: Duration::from_secs(1),
            autosave_interval: Duration::from_secs(30),
            status_poll_interval: Duration::from_secs(20),
        }
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> &'static Config {
    CONFIG
        .get()
        .expect("Configuration has not been initialized")
}
