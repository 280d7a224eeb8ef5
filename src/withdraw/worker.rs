//! Settlement Worker
//!
//! Background worker that finalizes canceled withdrawals by reverting their
//! reservations.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

use super::service::WithdrawService;
use super::types::WithdrawStatus;
use crate::error::Result;

/// Configuration for the settlement worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Seconds between two scans
    pub scan_interval_secs: u64,
    /// Maximum withdrawals finalized per scan
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 30,
            batch_size: 100,
        }
    }
}

impl WorkerConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }
}

pub struct SettlementWorker {
    service: WithdrawService,
    config: WorkerConfig,
}

impl SettlementWorker {
    pub fn new(service: WithdrawService, config: WorkerConfig) -> Self {
        Self { service, config }
    }

    /// Scan forever. Failures are logged and retried on the next scan.
    pub async fn run(&self) {
        info!(
            scan_interval_secs = self.config.scan_interval().as_secs(),
            batch_size = self.config.batch_size,
            "Starting settlement worker"
        );

        loop {
            if let Err(e) = self.scan_once().await {
                error!(error = %e, "Settlement scan failed");
            }

            tokio::time::sleep(self.config.scan_interval()).await;
        }
    }

    /// Finalize every withdrawal currently in `canceling`, returns how many
    /// reached `canceled`.
    pub async fn scan_once(&self) -> Result<usize> {
        let pending = self
            .service
            .pending(WithdrawStatus::Canceling, self.config.batch_size)
            .await?;

        if pending.is_empty() {
            debug!("No canceling withdrawals");
            return Ok(0);
        }

        info!(count = pending.len(), "Finalizing canceled withdrawals");

        let mut finalized = 0;
        for withdraw_id in pending {
            match self.service.finalize_cancel(withdraw_id).await {
                Ok(_) => finalized += 1,
                Err(e) => {
                    error!(withdraw_id, error = %e, "Failed to finalize withdraw cancel");
                }
            }
        }

        Ok(finalized)
    }
}
