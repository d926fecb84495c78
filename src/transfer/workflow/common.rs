//! Steps shared by every chain family

use rust_decimal::Decimal;
use std::future::Future;
use tracing::{debug, info, warn};

use super::{SIGNED_TX, StepContext, StepOutcome};
use crate::chain::{ChainError, ExplorerTransaction, SignedTransaction, with_timeout};
use crate::core_types::{ChainFamily, WalletType};
use crate::transfer::error::TransferError;
use crate::transfer::types::{SystemTxStatus, Transfer, TransferKind};

/// Bounded collaborator call
pub(super) async fn call<T, F>(ctx: &StepContext<'_>, fut: F) -> Result<T, TransferError>
where
    F: Future<Output = Result<T, ChainError>>,
{
    Ok(with_timeout(ctx.adapters.request_timeout, fut).await?)
}

pub(super) fn require<T>(value: Option<T>, what: &str) -> Result<T, TransferError> {
    value.ok_or_else(|| TransferError::SystemError(format!("{} missing from transfer state", what)))
}

/// Checks that hold for every family, plus the family's own constraints.
///
/// Runs at request time and again as the first workflow step.
pub async fn validate_request(transfer: &Transfer, ctx: &StepContext<'_>) -> Result<(), TransferError> {
    if transfer.from_addresses.is_empty() {
        return Err(TransferError::NoSourceAddress);
    }
    if transfer.to_address.trim().is_empty() {
        return Err(TransferError::InvalidAddress(transfer.to_address.clone()));
    }
    if !transfer.whole_amount {
        match transfer.amount {
            Some(amount) if amount > Decimal::ZERO => {}
            _ => return Err(TransferError::InvalidAmount),
        }
    }
    if transfer.max_fee.is_some_and(|f| f.is_sign_negative()) {
        return Err(TransferError::InvalidRequest("max_fee must not be negative".to_string()));
    }

    let chain = transfer.blockchain;
    let sdk_present = match chain.family() {
        ChainFamily::Utxo => ctx.adapters.utxo.is_some(),
        ChainFamily::Evm => ctx.adapters.evm.is_some(),
        ChainFamily::Tron => ctx.adapters.tron.is_some(),
    };
    if !sdk_present {
        return Err(TransferError::UnsupportedBlockchain(chain.to_string()));
    }

    match chain.family() {
        ChainFamily::Utxo => {
            if let Some(token) = transfer.token() {
                return Err(TransferError::UnsupportedAsset(token.to_string()));
            }
        }
        ChainFamily::Evm | ChainFamily::Tron => {
            if transfer.from_addresses.len() != 1 {
                return Err(TransferError::InvalidRequest(
                    "account chains send from exactly one address".to_string(),
                ));
            }
        }
    }
    if transfer.kind == TransferKind::Delegation && chain.family() != ChainFamily::Tron {
        return Err(TransferError::InvalidRequest(format!(
            "resource delegation is not available on {}",
            chain
        )));
    }

    for address in &transfer.from_addresses {
        let owned = ctx.resolver.resolve(chain, address).await?.is_some_and(|m| {
            m.owner_id == transfer.owner_id && matches!(m.wallet_type, WalletType::Hot | WalletType::Processing)
        });
        if !owned {
            return Err(TransferError::UnknownSourceAddress(address.clone()));
        }
    }
    Ok(())
}

pub(super) fn signed_tx(transfer: &Transfer) -> Result<SignedTransaction, TransferError> {
    require(transfer.state_data.get(SIGNED_TX)?, "signed transaction")
}

/// A retried broadcast must not send twice: if the explorer already knows
/// the signed hash, adopt it
pub(super) async fn already_broadcast(
    transfer: &mut Transfer,
    ctx: &StepContext<'_>,
    signed: &SignedTransaction,
) -> Result<bool, TransferError> {
    if transfer.tx_hash.as_deref() == Some(signed.hash.as_str()) {
        return Ok(true);
    }
    let seen = call(ctx, ctx.adapters.explorer.get_transaction_info(transfer.blockchain, &signed.hash)).await?;
    if seen.is_some() {
        info!(
            transfer_id = %transfer.transfer_id,
            hash = %signed.hash,
            "Transaction already on chain, skipping broadcast"
        );
        transfer.tx_hash = Some(signed.hash.clone());
        return Ok(true);
    }
    Ok(false)
}

async fn lookup_sent(transfer: &Transfer, ctx: &StepContext<'_>) -> Result<Option<ExplorerTransaction>, TransferError> {
    let hash = require(transfer.tx_hash.as_deref(), "transaction hash")?;
    call(ctx, ctx.adapters.explorer.get_transaction_info(transfer.blockchain, hash)).await
}

pub(super) async fn wait_mempool(transfer: &mut Transfer, ctx: &StepContext<'_>) -> Result<StepOutcome, TransferError> {
    match lookup_sent(transfer, ctx).await? {
        Some(_) => Ok(StepOutcome::Done),
        None => {
            debug!(transfer_id = %transfer.transfer_id, "Transaction not visible yet");
            Ok(StepOutcome::Snooze(ctx.config.mempool_poll()))
        }
    }
}

pub(super) async fn wait_first_confirmation(
    transfer: &mut Transfer,
    ctx: &StepContext<'_>,
) -> Result<StepOutcome, TransferError> {
    match lookup_sent(transfer, ctx).await? {
        // dropped from the mempool or not yet re-indexed; keep waiting
        None => {
            debug!(transfer_id = %transfer.transfer_id, "Transaction not found, waiting");
            Ok(StepOutcome::Snooze(ctx.config.confirmation_poll()))
        }
        Some(tx) if !tx.success => Err(TransferError::Rejected(format!("transaction {} failed on chain", tx.hash))),
        Some(tx) if tx.confirmations == 0 => Ok(StepOutcome::Snooze(ctx.config.confirmation_poll())),
        Some(_) => Ok(StepOutcome::Done),
    }
}

pub(super) async fn wait_confirmations(
    transfer: &mut Transfer,
    ctx: &StepContext<'_>,
) -> Result<StepOutcome, TransferError> {
    let Some(tx) = lookup_sent(transfer, ctx).await? else {
        warn!(transfer_id = %transfer.transfer_id, "Confirmed transaction disappeared from explorer");
        return Ok(StepOutcome::Snooze(ctx.config.confirmation_poll()));
    };
    if !tx.success {
        return Err(TransferError::Rejected(format!("transaction {} failed on chain", tx.hash)));
    }
    if tx.confirmations < ctx.required_confirmations {
        debug!(
            transfer_id = %transfer.transfer_id,
            confirmations = tx.confirmations,
            required = ctx.required_confirmations,
            "Waiting for confirmations"
        );
        return Ok(StepOutcome::Snooze(ctx.config.confirmation_poll()));
    }
    refresh_system_transactions(transfer, ctx).await?;
    Ok(StepOutcome::Done)
}

/// Update confirmation counts of still-pending system transactions
pub(super) async fn refresh_system_transactions(
    transfer: &mut Transfer,
    ctx: &StepContext<'_>,
) -> Result<(), TransferError> {
    let chain = transfer.blockchain;
    for system_tx in transfer
        .system_transactions
        .iter_mut()
        .filter(|t| t.status == SystemTxStatus::Pending)
    {
        if let Some(info) = call(ctx, ctx.adapters.explorer.get_transaction_info(chain, &system_tx.tx_hash)).await? {
            system_tx.confirmations = info.confirmations;
            if !info.success {
                system_tx.status = SystemTxStatus::Failed;
            } else if info.confirmations > 0 {
                system_tx.status = SystemTxStatus::Confirmed;
            }
        }
    }
    Ok(())
}
