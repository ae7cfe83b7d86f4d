use crate::{
    error::{ReconError, ReconResult},
    types::DEFAULT_CLIENT_TAG,
};
use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};

/// Where the daily depository exports land and how to recognise them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub base_path: String,
    /// chrono format for the dated folder; `%d-%B-%Y` renders `17-October-2026`.
    #[serde(default = "default_date_folder_format")]
    pub date_folder_format: String,
    #[serde(default = "default_stocks_dir")]
    pub stocks_dir: String,
    pub shortage_pattern: String,
    pub delivery_pattern: String,
}

impl RemoteConfig {
    /// Reject a dated-folder format chrono cannot render.
    pub fn validate(&self) -> ReconResult<()> {
        if StrftimeItems::new(&self.date_folder_format).any(|item| matches!(item, Item::Error)) {
            return Err(ReconError::Config(format!(
                "bad remote.date_folder_format '{}'",
                self.date_folder_format
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_client_tag")]
    pub client_tag: char,
    #[serde(default = "default_true")]
    pub compressed: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            client_tag: default_client_tag(),
            compressed: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub email_route: String,
    pub sms_route: String,
    pub push_route: String,
    pub email_template: String,
    pub email_sender: String,
    pub email_subject: String,
    #[serde(default = "default_email_display_name")]
    pub email_display_name: String,
    pub sms_template: String,
    pub sms_sender: String,
    pub push_template: String,
    #[serde(default)]
    pub push_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub remote: RemoteConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    pub notification: NotificationConfig,
}

impl PipelineConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: PipelineConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        if config.ingest.batch_size == 0 {
            anyhow::bail!("{path}: ingest.batch_size must be positive");
        }
        config
            .remote
            .validate()
            .map_err(|e| anyhow::anyhow!("{path}: {e}"))?;
        Ok(config)
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        Self {
            remote: RemoteConfig {
                base_path: "./remote".into(),
                date_folder_format: default_date_folder_format(),
                stocks_dir: default_stocks_dir(),
                shortage_pattern: r"SHRT_NCL_CM_.*\.csv\.gz".into(),
                delivery_pattern: r"DeliveryDpo_NCL_CM_EquityT1_CM_08756_.*\.csv\.gz".into(),
            },
            database: DatabaseConfig {
                path: ":memory:".into(),
            },
            ingest: IngestConfig::default(),
            notification: NotificationConfig {
                email_route: "notification.email".into(),
                sms_route: "notification.sms".into(),
                push_route: "notification.push".into(),
                email_template: "security_shortage_email".into(),
                email_sender: "alerts@example.com".into(),
                email_subject: "Security Shortage".into(),
                email_display_name: default_email_display_name(),
                sms_template: "security_shortage_sms".into(),
                sms_sender: "SHRTAL".into(),
                push_template: "security_shortage_push".into(),
                push_enabled: false,
            },
        }
    }
}

fn default_date_folder_format() -> String {
    "%d-%B-%Y".into()
}

fn default_stocks_dir() -> String {
    "stocks".into()
}

fn default_batch_size() -> usize {
    500
}

fn default_client_tag() -> char {
    DEFAULT_CLIENT_TAG
}

fn default_true() -> bool {
    true
}

fn default_email_display_name() -> String {
    "Security Shortage".into()
}
