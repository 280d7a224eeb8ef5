use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;

use crate::core_types::UserId;
use crate::lock::LockConfig;
use crate::withdraw::worker::WorkerConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// PostgreSQL connection URL for ledger, locks and counters
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub accounting: AccountingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccountingConfig {
    /// Owner of the bank liability accounts (one per currency)
    pub bank_user_id: UserId,
    /// Name given to lazily created bank liability accounts
    pub bank_account_name: String,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            bank_user_id: 1,
            bank_account_name: "withdraw".to_string(),
            lock: LockConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "accounting.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            postgres_url: None,
            accounting: AccountingConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
log_level: debug
log_dir: ./logs
log_file: accounting.log
use_json: true
rotation: hourly
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.log_level, "debug");
        assert!(config.postgres_url.is_none());
        assert_eq!(config.accounting.bank_user_id, 1);
        assert_eq!(config.accounting.lock.default_ttl(), Duration::from_secs(30));
    }

    #[test]
    fn test_accounting_section() {
        let yaml = r#"
log_level: info
log_dir: ./logs
log_file: accounting.log
use_json: false
rotation: never
postgres_url: postgres://localhost/accounting
accounting:
  bank_user_id: 99
  bank_account_name: liability
  lock:
    default_ttl_ms: 5000
    max_attempts: 4
    backoff_step_ms: 20
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.accounting.bank_user_id, 99);
        assert_eq!(config.accounting.bank_account_name, "liability");
        assert_eq!(config.accounting.lock.max_attempts, 4);
        assert_eq!(config.accounting.lock.default_ttl(), Duration::from_secs(5));
        assert_eq!(config.accounting.worker.batch_size, 100);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(AppConfig::load("does-not-exist").is_err());
    }
}
