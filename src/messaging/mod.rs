//! Messaging boundary
//!
//! Maps stable subjects to core operations. Bodies are JSON; the transport
//! that delivers them is not part of this crate.

pub mod types;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::accounting::Accounting;
use crate::error::{AccountingError, Result};
use types::*;

pub mod subjects {
    pub const ACCOUNT_CREATE: &str = "Accounting.Account.Create";
    pub const ACCOUNT_OPERATION: &str = "Accounting.Account.Operation";
    pub const ACCOUNT_HISTORY: &str = "Accounting.Account.History";
    pub const ACCOUNT_BALANCE: &str = "Accounting.Account.Balance";
    pub const ACCOUNT_TRANSFER: &str = "Accounting.Account.Transfer";
    pub const ACCOUNT_TRANSFER_WITHDRAW: &str = "Accounting.Account.TransferWithdraw";
    pub const WITHDRAW_ADD: &str = "Accounting.Withdraw.Add";
    pub const WITHDRAW_CANCEL: &str = "Accounting.Withdraw.Cancel";
    pub const BATCH_WITHDRAW_LIST: &str = "Accounting.BatchWithdraw.List";
    pub const BATCH_WITHDRAW_UPDATE: &str = "Accounting.BatchWithdraw.Update";

    pub const ALL: &[&str] = &[
        ACCOUNT_CREATE,
        ACCOUNT_OPERATION,
        ACCOUNT_HISTORY,
        ACCOUNT_BALANCE,
        ACCOUNT_TRANSFER,
        ACCOUNT_TRANSFER_WITHDRAW,
        WITHDRAW_ADD,
        WITHDRAW_CANCEL,
        BATCH_WITHDRAW_LIST,
        BATCH_WITHDRAW_UPDATE,
    ];
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(payload)?)
}

fn encode<T: Serialize>(value: T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&Reply::success(value))?)
}

#[derive(Clone)]
pub struct Dispatcher {
    core: Accounting,
}

impl Dispatcher {
    pub fn new(core: Accounting) -> Self {
        Self { core }
    }

    /// Handle one request. Always returns an encoded [`Reply`].
    pub async fn handle(&self, subject: &str, payload: &[u8]) -> Vec<u8> {
        match self.route(subject, payload).await {
            Ok(body) => body,
            Err(e) => {
                if e.is_retryable() {
                    warn!(subject = %subject, error = %e, "Request failed, retryable");
                } else {
                    debug!(subject = %subject, code = e.code(), error = %e, "Request failed");
                }
                let reply = Reply::error(e.code(), e.to_string());
                // a reply of two strings always serializes
                serde_json::to_vec(&reply).unwrap_or_default()
            }
        }
    }

    async fn route(&self, subject: &str, payload: &[u8]) -> Result<Vec<u8>> {
        let core = &self.core;
        match subject {
            subjects::ACCOUNT_CREATE => {
                let req: CreateAccountRequest = decode(payload)?;
                encode(
                    core.accounts
                        .create_account(req.user_id, &req.currency, &req.name)
                        .await?,
                )
            }
            subjects::ACCOUNT_OPERATION => {
                let req: OperationRequest = decode(payload)?;
                encode(core.ledger.append_locked(req.operation).await?)
            }
            subjects::ACCOUNT_HISTORY => {
                let req: HistoryRequest = decode(payload)?;
                let operations = core
                    .ledger
                    .get_history(req.account_id, req.from, req.to)
                    .await?;
                encode(HistoryResponse {
                    account_id: req.account_id,
                    operations,
                })
            }
            subjects::ACCOUNT_BALANCE => {
                let req: BalanceRequest = decode(payload)?;
                let state = core.ledger.get_current_balance(req.account_id).await?;
                encode(BalanceResponse::new(req.account_id, state))
            }
            subjects::ACCOUNT_TRANSFER => {
                let req: TransferRequest = decode(payload)?;
                encode(core.transfers.transfer(req.source, req.destination).await?)
            }
            subjects::ACCOUNT_TRANSFER_WITHDRAW => {
                let req: TransferWithdrawRequest = decode(payload)?;
                encode(core.withdraws.request_transfer_withdraw(req.source).await?)
            }
            subjects::WITHDRAW_ADD => {
                let req: AddWithdrawRequest = decode(payload)?;
                encode(
                    core.withdraws
                        .add_withdraw(req.account_id, req.amount, req.target)
                        .await?,
                )
            }
            subjects::WITHDRAW_CANCEL => {
                let req: CancelWithdrawRequest = decode(payload)?;
                encode(core.withdraws.cancel_withdraw(req.withdraw_id).await?)
            }
            subjects::BATCH_WITHDRAW_LIST => {
                let req: ListBatchesRequest = decode(payload)?;
                encode(core.batches.list_batches(req.status, &req.network).await?)
            }
            subjects::BATCH_WITHDRAW_UPDATE => {
                let req: UpdateBatchRequest = decode(payload)?;
                let status = core
                    .batches
                    .update_batch(req.batch_id, req.status, &req.tx_id, req.height)
                    .await?;
                encode(UpdateBatchResponse {
                    batch_id: req.batch_id,
                    status,
                })
            }
            _ => Err(AccountingError::InvalidRequest(format!(
                "unknown subject {}",
                subject
            ))),
        }
    }
}
