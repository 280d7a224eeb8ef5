//! Accounting Core service
//!
//! ```text
//! ┌──────────┐    ┌────────────┐    ┌─────────────────────┐
//! │  Config  │───▶│ PostgreSQL │───▶│ Accounting services │
//! │  (YAML)  │    │  (schema)  │    │ + settlement worker │
//! └──────────┘    └────────────┘    └─────────────────────┘
//! ```

use anyhow::Context;
use std::time::Duration;

use accounting_core::accounting::Accounting;
use accounting_core::config::AppConfig;
use accounting_core::db::Database;
use accounting_core::lock::PgLockService;
use accounting_core::logging::init_logging;
use accounting_core::withdraw::SettlementWorker;

const LOCK_PURGE_INTERVAL: Duration = Duration::from_secs(60);

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Expired rows are harmless, this only keeps the lock table small
async fn purge_expired_locks(locks: &PgLockService) {
    loop {
        tokio::time::sleep(LOCK_PURGE_INTERVAL).await;
        match locks.purge_expired().await {
            Ok(0) => {}
            Ok(n) => tracing::debug!(purged = n, "Expired locks purged"),
            Err(e) => tracing::warn!(error = %e, "Lock purge failed"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = init_logging(&app_config);

    tracing::info!(
        env = %env,
        version = env!("CARGO_PKG_VERSION"),
        git = env!("GIT_HASH"),
        "Starting accounting core"
    );

    let url = app_config
        .postgres_url
        .as_deref()
        .context("postgres_url is not configured")?;
    let db = Database::connect_and_migrate(url)
        .await
        .context("Failed to initialize PostgreSQL")?;
    db.health_check().await.context("PostgreSQL health check failed")?;

    let core = Accounting::postgres(db.pool().clone(), &app_config.accounting);
    let worker = SettlementWorker::new(
        core.withdraws.clone(),
        app_config.accounting.worker.clone(),
    );
    let locks = PgLockService::new(db.pool().clone());

    tokio::select! {
        _ = worker.run() => {}
        _ = purge_expired_locks(&locks) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
