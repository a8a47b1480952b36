use std::fs::File;

use anyhow::anyhow;
use serde::{
    Deserialize,
    Serialize,
};
use url::Url;

use kz_core::prelude::*;

use crate::mode::Mode;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    #[serde(default)]
    pub drift_detection: DriftDetectionConfig,

    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftDetectionConfig {
    #[serde(default)]
    pub default_mode: Mode,

    /// Ordered; the first matching override wins.
    #[serde(default)]
    pub overrides: Vec<ModeOverride>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeOverride {
    pub api_groups: Vec<String>,
    pub resources: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<metav1::LabelSelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_selector: Option<metav1::LabelSelector>,

    pub mode: Mode,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<String>,

    /// Per-request timeout, seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Sleep between retries, seconds
    #[serde(default = "default_retry_interval")]
    pub retry_interval: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_CALLBACK_TIMEOUT_SECONDS
}

fn default_retry_count() -> u32 {
    DEFAULT_CALLBACK_RETRY_COUNT
}

fn default_retry_interval() -> u64 {
    DEFAULT_CALLBACK_RETRY_INTERVAL_SECONDS
}

impl WebhookConfig {
    pub fn load(filename: &str) -> anyhow::Result<WebhookConfig> {
        let config: WebhookConfig = serde_yaml::from_reader(File::open(filename)?)?;

        // Catch bad backend URLs at startup instead of on the first report
        for backend in &config.backends {
            Url::parse(&backend.url).map_err(|err| anyhow!("invalid backend url {}: {err}", backend.url))?;
        }
        Ok(config)
    }
}
