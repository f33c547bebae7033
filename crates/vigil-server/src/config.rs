// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use vigil_core::{Error, Result};

const DEFAULT_GITHUB_BASE_URL: &str = "github.com";
const DEFAULT_GITHUB_API_BASE_URL: &str = "api.github.com";
const DEFAULT_DATA_PATH: &str = "data";
const DEFAULT_MANIFEST_BASE_PATH: &str = "/config";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(20);
const DEFAULT_HTTP_PORT: u16 = 3000;

/// Process-wide configuration loaded from the environment. Missing required
/// keys or an invalid private key are fatal at startup.
#[derive(Debug, Clone)]
pub struct SystemConfig {
    pub datadog_api_key: String,
    pub datadog_app_key: String,
    pub poll_interval: Duration,

    pub data_path: String,
    pub manifest_base_path: String,

    pub github_base_url: String,
    pub github_owner: String,
    pub github_repo: String,
    pub github_integration_id: u64,
    pub github_installation_id: u64,
    pub github_private_key_pem: String,
    pub github_webhook_secret: String,

    pub http_secret: String,
    pub http_port: u16,
    pub slack_token: String,
    pub ignore_known_hosts: bool,
    pub proposal_body_extra: String,

    pub logging_level: String,
    pub logging_json: bool,
}

impl SystemConfig {
    pub fn from_env() -> Result<Self> {
        let cfg = Self {
            datadog_api_key: required("DD_API_KEY")?,
            datadog_app_key: required("DD_APP_KEY")?,
            poll_interval: env_interval("DATADOG_POLLING_INTERVAL", DEFAULT_POLL_INTERVAL)?,
            data_path: env_string("GITHUB_ASSETS_STORE_PATH", DEFAULT_DATA_PATH),
            manifest_base_path: env_string("USER_CONFIG_PATH", DEFAULT_MANIFEST_BASE_PATH),
            github_base_url: env_string("GITHUB_BASE_URL", ""),
            github_owner: required("GITHUB_PROJECT_OWNER")?,
            github_repo: required("GITHUB_REPO")?,
            github_integration_id: required_u64("GITHUB_APP_INTEGRATION_ID")?,
            github_installation_id: required_u64("GITHUB_APP_INSTALLATION_ID")?,
            github_private_key_pem: required("GITHUB_APP_PRIVATE_KEY")?,
            github_webhook_secret: env_string("GITHUB_WEBHOOK_SECRET", ""),
            http_secret: env_string("HTTP_SECRET", ""),
            http_port: env_u64("HTTP_PORT", u64::from(DEFAULT_HTTP_PORT))? as u16,
            slack_token: env_string("SLACK_TOKEN", ""),
            ignore_known_hosts: env_bool("IGNORE_KNOWN_HOSTS", true),
            proposal_body_extra: env_string("PR_BODY_TEMPLATE", ""),
            logging_level: env_string("LOGGING_LEVEL", ""),
            logging_json: env_bool("LOGGING_JSON", false),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        jsonwebtoken::EncodingKey::from_rsa_pem(self.github_private_key_pem.as_bytes())
            .map_err(|err| Error::InvalidConfig(format!("invalid private key, must be RSA PEM: {err}")))?;
        Ok(())
    }

    /// Data root for artifact files, leading slash trimmed.
    #[must_use]
    pub fn data_path(&self) -> &str {
        self.data_path.trim_start_matches('/')
    }

    /// Base path for user manifests, leading slash trimmed.
    #[must_use]
    pub fn manifest_base_path(&self) -> &str {
        self.manifest_base_path.trim_start_matches('/')
    }

    #[must_use]
    pub fn github_base_url(&self) -> &str {
        if self.github_base_url.is_empty() {
            DEFAULT_GITHUB_BASE_URL
        } else {
            &self.github_base_url
        }
    }

    /// SSH URL of the repository storing artifact files and manifests.
    #[must_use]
    pub fn git_url(&self) -> String {
        format!(
            "git@{}:{}/{}.git",
            self.github_base_url(),
            self.github_owner,
            self.github_repo
        )
    }

    /// API endpoint; enterprise hosts serve the API under `/api/v3`.
    #[must_use]
    pub fn github_api_url(&self) -> String {
        let base = self.github_base_url();
        if base == DEFAULT_GITHUB_BASE_URL {
            format!("https://{DEFAULT_GITHUB_API_BASE_URL}")
        } else {
            format!("https://{base}/api/v3")
        }
    }

    /// Identity used for commits and as the proposal author filter.
    #[must_use]
    pub fn git_user(&self) -> &'static str {
        "watchdog[bot]"
    }

    #[must_use]
    pub fn git_email(&self) -> String {
        format!("watchdog[bot]@users.noreply.{}", self.github_base_url())
    }
}

fn required(name: &str) -> Result<String> {
    env::var(name)
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| Error::InvalidConfig(format!("{name} is required")))
}

fn required_u64(name: &str) -> Result<u64> {
    required(name)?
        .parse::<u64>()
        .map_err(|err| Error::InvalidConfig(format!("{name} must be an integer: {err}")))
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).ok().filter(|value| !value.is_empty()).unwrap_or_else(|| default.to_string())
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|value| match value.as_str() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => value
            .parse::<u64>()
            .map_err(|err| Error::InvalidConfig(format!("{name} must be an integer: {err}"))),
        _ => Ok(default),
    }
}

fn env_interval(name: &str, default: Duration) -> Result<Duration> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => parse_interval(&value)
            .ok_or_else(|| Error::InvalidConfig(format!("{name} must be seconds, e.g. `20s`"))),
        _ => Ok(default),
    }
}

/// Parse an interval given as plain seconds (`20`) or with a seconds
/// suffix (`20s`).
fn parse_interval(value: &str) -> Option<Duration> {
    let trimmed = value.trim();
    let digits = trimmed.strip_suffix('s').unwrap_or(trimmed);
    digits.parse::<u64>().ok().filter(|secs| *secs > 0).map(Duration::from_secs)
}
