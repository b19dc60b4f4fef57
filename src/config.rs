//! Runtime configuration
//!
//! Values come from the process environment, optionally seeded from layered
//! env files: a project-local `.env`, then `/etc/support-desk/env`, then the
//! user's `~/.config/support-desk/env`. Only the user file overrides values
//! that are already set.

use crate::delivery::Pacing;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "gpt-5-nano-2025-08-07";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const APP_DIR: &str = "support-desk";

pub const API_KEY_VAR: &str = "OPENAI_API_KEY";
pub const ORGANIZATION_VAR: &str = "OPENAI_ORGANIZATION";
const MODEL_VAR: &str = "SUPPORT_DESK_MODEL";
const BASE_URL_VAR: &str = "SUPPORT_DESK_BASE_URL";
pub const TIMEOUT_VAR: &str = "SUPPORT_DESK_TIMEOUT_SECS";
const FRAGMENT_DELAY_VAR: &str = "SUPPORT_DESK_FRAGMENT_DELAY_MS";
const INITIAL_DELAY_VAR: &str = "SUPPORT_DESK_INITIAL_DELAY_MS";
const DEMO_VAR: &str = "SUPPORT_DESK_DEMO";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    MissingCredential(&'static str),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("Failed to load env file {}: {source}", path.display())]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
}

// ============================================================================
// Credentials
// ============================================================================

/// API key plus optional organization, validated at construction
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    organization: Option<String>,
}

impl Credentials {
    pub fn new(
        api_key: impl Into<String>,
        organization: Option<String>,
    ) -> Result<Self, ConfigError> {
        let api_key = api_key.into().trim().to_string();
        if api_key.is_empty() {
            return Err(ConfigError::MissingCredential(API_KEY_VAR));
        }
        let organization = organization
            .map(|org| org.trim().to_string())
            .filter(|org| !org.is_empty());
        Ok(Self {
            api_key,
            organization,
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn organization(&self) -> Option<&str> {
        self.organization.as_deref()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("organization", &self.organization)
            .finish()
    }
}

// ============================================================================
// Support Config
// ============================================================================

#[derive(Debug, Clone)]
pub struct SupportConfig {
    pub api_key: Option<String>,
    pub organization: Option<String>,
    pub model: String,
    pub base_url: String,
    pub request_timeout: Duration,
    pub pacing: Pacing,
    /// Use the offline scripted client instead of the remote service
    pub demo: bool,
}

impl Default for SupportConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            organization: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            pacing: Pacing::default(),
            demo: false,
        }
    }
}

impl SupportConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any key lookup; blank values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        let request_timeout = match get(TIMEOUT_VAR) {
            Some(value) => match parse_u64(TIMEOUT_VAR, &value)? {
                0 => {
                    return Err(ConfigError::Invalid {
                        key: TIMEOUT_VAR,
                        message: "must be at least 1 second".to_string(),
                    })
                }
                secs => Duration::from_secs(secs),
            },
            None => defaults.request_timeout,
        };

        let initial_delay = get(INITIAL_DELAY_VAR)
            .map(|value| parse_u64(INITIAL_DELAY_VAR, &value).map(Duration::from_millis))
            .transpose()?
            .unwrap_or(defaults.pacing.initial_delay);
        let fragment_delay = get(FRAGMENT_DELAY_VAR)
            .map(|value| parse_u64(FRAGMENT_DELAY_VAR, &value).map(Duration::from_millis))
            .transpose()?
            .unwrap_or(defaults.pacing.fragment_delay);

        Ok(Self {
            api_key: get(API_KEY_VAR),
            organization: get(ORGANIZATION_VAR),
            model: get(MODEL_VAR).unwrap_or(defaults.model),
            base_url: get(BASE_URL_VAR).unwrap_or(defaults.base_url),
            request_timeout,
            pacing: Pacing::new(initial_delay, fragment_delay),
            demo: get(DEMO_VAR).is_some_and(|value| is_truthy(&value)),
        })
    }

    /// Credentials for the remote service; fails fast when the key is absent
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let api_key = self
            .api_key
            .clone()
            .ok_or(ConfigError::MissingCredential(API_KEY_VAR))?;
        Credentials::new(api_key, self.organization.clone())
    }
}

fn parse_u64(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|e| ConfigError::Invalid {
        key,
        message: format!("expected a whole number, got {value:?} ({e})"),
    })
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

// ============================================================================
// Env Files
// ============================================================================

/// One env file in the lookup order
#[derive(Debug, Clone, PartialEq, Eq)]
struct EnvLayer {
    path: PathBuf,
    override_existing: bool,
}

impl EnvLayer {
    /// Load the file into the process environment; `Ok(false)` when it is absent
    fn load(&self) -> Result<bool, ConfigError> {
        if !self.path.is_file() {
            return Ok(false);
        }

        let result = if self.override_existing {
            dotenvy::from_path_override(&self.path)
        } else {
            dotenvy::from_path(&self.path)
        };

        result.map(|()| true).map_err(|source| ConfigError::EnvFile {
            path: self.path.clone(),
            source,
        })
    }
}

fn env_layers(home: Option<&Path>) -> Vec<EnvLayer> {
    let mut layers = vec![
        EnvLayer {
            path: PathBuf::from(".env"),
            override_existing: false,
        },
        EnvLayer {
            path: Path::new("/etc").join(APP_DIR).join("env"),
            override_existing: false,
        },
    ];
    if let Some(home) = home {
        layers.push(EnvLayer {
            path: home.join(".config").join(APP_DIR).join("env"),
            override_existing: true,
        });
    }
    layers
}

/// What happened to each env layer.
///
/// Files are read before tracing is installed, so the outcome is collected
/// here and logged by the caller once a subscriber exists.
#[derive(Debug, Default)]
pub struct EnvReport {
    pub loaded: Vec<PathBuf>,
    pub absent: Vec<PathBuf>,
    pub skipped: Vec<ConfigError>,
}

impl EnvReport {
    pub fn log(&self) {
        for path in &self.absent {
            tracing::debug!(path = %path.display(), "Env file not present");
        }
        for path in &self.loaded {
            tracing::debug!(path = %path.display(), "Env file applied");
        }
        for error in &self.skipped {
            tracing::warn!(error = %error, "Skipping env file");
        }
    }
}

/// Load the layered env files into the process environment
pub fn load_env_files() -> EnvReport {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    load_layers(&env_layers(home.as_deref()))
}

fn load_layers(layers: &[EnvLayer]) -> EnvReport {
    let mut report = EnvReport::default();
    for layer in layers {
        match layer.load() {
            Ok(true) => report.loaded.push(layer.path.clone()),
            Ok(false) => report.absent.push(layer.path.clone()),
            Err(e) => report.skipped.push(e),
        }
    }
    report
}
