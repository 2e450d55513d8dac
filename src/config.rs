use thiserror::Error;

/// Environment variable holding the backend endpoint
pub const URL_VAR: &str = "SUPABASE_URL";

/// Environment variable holding the backend's public (anon) key
pub const KEY_VAR: &str = "SUPABASE_ANON_KEY";

/// Address the web server listens on
pub const BIND_ADDR: &str = "127.0.0.1:3000";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    Missing(&'static str),

    #[error("{0} must be an http(s) URL, got {1:?}")]
    InvalidUrl(&'static str, String),
}

/// Backend connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub supabase_url: String,
    pub supabase_key: String,
}

impl Config {
    pub fn new(supabase_url: impl Into<String>, supabase_key: impl Into<String>) -> Self {
        Self {
            supabase_url: supabase_url.into().trim_end_matches('/').to_string(),
            supabase_key: supabase_key.into(),
        }
    }

    /// Read the settings from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the settings through `lookup`, blank values counting as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |name: &'static str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let url = read(URL_VAR)?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(URL_VAR, url));
        }
        let key = read(KEY_VAR)?;

        Ok(Self::new(url, key))
    }
}
