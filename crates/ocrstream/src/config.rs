use std::time::Duration;

use crate::prelude::*;

/// Analysis service configuration from environment variables
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub base_url: String,
    pub api_token: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables
    /// Uses OCR_BASE_URL (required) and OCR_API_TOKEN (optional)
    pub fn from_env() -> Result<Self, Error> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let base_url = var("OCR_BASE_URL")
            .filter(|url| !url.is_empty())
            .ok_or_else(|| Error::Config("OCR_BASE_URL environment variable not set".into()))?;

        Ok(Self {
            base_url,
            api_token: var("OCR_API_TOKEN").filter(|token| !token.is_empty()),
        })
    }

    /// Apply CLI overrides to the configuration
    pub fn with_overrides(mut self, base_url: Option<String>, api_token: Option<String>) -> Self {
        if let Some(url) = base_url {
            self.base_url = url;
        }
        if let Some(token) = api_token {
            self.api_token = Some(token);
        }
        self
    }

    /// Build from CLI flags, falling back to the environment for anything not given.
    pub fn resolve(base_url: Option<String>, api_token: Option<String>) -> Result<Self, Error> {
        Self::resolve_with(base_url, api_token, |key| std::env::var(key).ok())
    }

    fn resolve_with(
        base_url: Option<String>,
        api_token: Option<String>,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, Error> {
        let config = Self::from_vars(|key| match (key, &base_url) {
            ("OCR_BASE_URL", Some(url)) => Some(url.clone()),
            _ => var(key),
        })?;
        Ok(config.with_overrides(None, api_token))
    }
}

/// Job status polling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 120,
        }
    }
}

impl PollConfig {
    pub fn new(interval: Duration, max_attempts: u32) -> Result<Self, Error> {
        if max_attempts == 0 {
            return Err(Error::Config(
                "poll attempts must be greater than zero".into(),
            ));
        }
        Ok(Self {
            interval,
            max_attempts,
        })
    }
}
