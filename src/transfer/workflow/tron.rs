//! Tron sending with optional energy delegation from the processing wallet

use std::sync::Arc;
use tracing::{debug, info};

use super::common::{already_broadcast, call, require, signed_tx};
use super::{SIGNED_TX, StepContext, StepOutcome};
use crate::chain::{TronDelegation, TronResourceQuote, TronTransferRequest, TronWalletSdk};
use crate::core_types::{from_base_units, to_base_units};
use crate::transfer::error::TransferError;
use crate::transfer::types::{SystemTransaction, SystemTxKind, SystemTxStatus, Transfer};

const QUOTE: &str = "tron_quote";
const AMOUNT: &str = "tron_amount";
const DELEGATION: &str = "tron_delegation";
const DELEGATION_TX: &str = "tron_delegation_tx";
const RECLAIM_TX: &str = "tron_reclaim_tx";

fn sdk(ctx: &StepContext<'_>) -> Result<Arc<dyn TronWalletSdk>, TransferError> {
    ctx.adapters
        .tron
        .clone()
        .ok_or_else(|| TransferError::UnsupportedBlockchain("tron".to_string()))
}

pub(super) async fn estimate_resources(
    transfer: &mut Transfer,
    ctx: &StepContext<'_>,
) -> Result<StepOutcome, TransferError> {
    let sdk = sdk(ctx)?;
    let from = transfer.from_addresses[0].clone();
    let token = transfer.token().map(str::to_string);
    let decimals = match &token {
        Some(contract) => call(ctx, sdk.token_decimals(contract)).await?,
        None => transfer.blockchain.decimals(),
    };
    let balance = call(ctx, sdk.balance(&from, token.as_deref())).await?;

    let requested = if transfer.whole_amount {
        balance
    } else {
        let amount = transfer.amount.ok_or(TransferError::InvalidAmount)?;
        to_base_units(amount, decimals).ok_or(TransferError::InvalidAmount)?
    };
    if requested == 0 || requested > balance {
        return Err(TransferError::InsufficientBalance {
            required: from_base_units(requested, decimals).to_string(),
            available: from_base_units(balance, decimals).to_string(),
        });
    }

    let quote = call(
        ctx,
        sdk.estimate_resources(&from, &transfer.to_address, token.as_deref(), requested),
    )
    .await?;

    // TRX burned for bandwidth comes out of a whole-balance native send
    let amount = if transfer.whole_amount && token.is_none() {
        match balance.checked_sub(quote.burn_fee) {
            Some(rest) if rest > 0 => rest,
            _ => {
                return Err(TransferError::InsufficientBalance {
                    required: from_base_units(quote.burn_fee, decimals).to_string(),
                    available: from_base_units(balance, decimals).to_string(),
                });
            }
        }
    } else {
        requested
    };

    info!(
        transfer_id = %transfer.transfer_id,
        energy_required = quote.energy_required,
        energy_available = quote.energy_available,
        burn_fee = quote.burn_fee,
        "Resources estimated"
    );
    transfer.state_data.set(QUOTE, &quote)?;
    transfer.state_data.set(AMOUNT, &amount)?;
    Ok(StepOutcome::Done)
}

pub(super) async fn delegate_resources(
    transfer: &mut Transfer,
    ctx: &StepContext<'_>,
) -> Result<StepOutcome, TransferError> {
    let quote: TronResourceQuote = require(transfer.state_data.get(QUOTE)?, "resource quote")?;
    let shortfall = quote.energy_shortfall();
    if shortfall == 0 {
        return Ok(StepOutcome::Done);
    }

    if let Some(hash) = transfer.state_data.get::<String>(DELEGATION_TX)? {
        let info = call(ctx, ctx.adapters.explorer.get_transaction_info(transfer.blockchain, &hash)).await?;
        let system_tx = transfer
            .system_transactions
            .iter_mut()
            .find(|t| t.tx_hash == hash);
        return match info {
            Some(tx) if !tx.success => {
                if let Some(system_tx) = system_tx {
                    system_tx.status = SystemTxStatus::Failed;
                }
                Err(TransferError::Rejected(format!("delegation {} failed on chain", hash)))
            }
            Some(tx) if tx.confirmations > 0 => {
                if let Some(system_tx) = system_tx {
                    system_tx.status = SystemTxStatus::Confirmed;
                    system_tx.confirmations = tx.confirmations;
                }
                info!(transfer_id = %transfer.transfer_id, hash = %hash, "Delegation confirmed");
                Ok(StepOutcome::Done)
            }
            _ => {
                debug!(transfer_id = %transfer.transfer_id, hash = %hash, "Delegation pending");
                Ok(StepOutcome::Snooze(ctx.config.delegation_poll()))
            }
        };
    }

    let processing = ctx
        .resolver
        .store()
        .processing_wallet_for_owner(transfer.owner_id, transfer.blockchain)
        .await?
        .ok_or_else(|| TransferError::InvalidRequest("owner has no processing wallet to delegate energy".to_string()))?;

    let delegation = TronDelegation {
        owner_id: transfer.owner_id,
        from: processing.address,
        receiver: transfer.from_addresses[0].clone(),
        energy: shortfall,
    };
    let sdk = sdk(ctx)?;
    let signed = call(ctx, sdk.build_delegation(&delegation)).await?;
    let hash = call(ctx, sdk.broadcast(&signed.raw)).await?;

    info!(
        transfer_id = %transfer.transfer_id,
        hash = %hash,
        energy = shortfall,
        "Energy delegation sent"
    );
    transfer
        .system_transactions
        .push(SystemTransaction::pending(SystemTxKind::Delegate, hash.clone()));
    transfer.state_data.set(DELEGATION, &delegation)?;
    transfer.state_data.set(DELEGATION_TX, &hash)?;
    Ok(StepOutcome::Snooze(ctx.config.delegation_poll()))
}

pub(super) async fn build_and_sign(transfer: &mut Transfer, ctx: &StepContext<'_>) -> Result<StepOutcome, TransferError> {
    let sdk = sdk(ctx)?;
    let decimals = transfer.blockchain.decimals();
    let quote: TronResourceQuote = require(transfer.state_data.get(QUOTE)?, "resource quote")?;
    let amount: u64 = require(transfer.state_data.get(AMOUNT)?, "amount")?;
    let delegated = transfer.state_data.contains(DELEGATION);

    // with delegated energy only bandwidth can still burn TRX
    let expected_burn = if delegated { 0 } else { quote.burn_fee };
    let fee_limit = match transfer.max_fee {
        Some(max_fee) => {
            let cap = to_base_units(max_fee, decimals)
                .ok_or_else(|| TransferError::InvalidRequest(format!("max_fee {} has too many decimals", max_fee)))?;
            if expected_burn > cap {
                return Err(TransferError::FeeTooHigh {
                    fee: from_base_units(expected_burn, decimals).to_string(),
                    max_fee: max_fee.to_string(),
                });
            }
            cap
        }
        None => quote.burn_fee,
    };

    let request = TronTransferRequest {
        owner_id: transfer.owner_id,
        from: transfer.from_addresses[0].clone(),
        to: transfer.to_address.clone(),
        asset: transfer.token().map(str::to_string),
        amount,
        fee_limit,
    };
    let signed = call(ctx, sdk.build_and_sign(&request)).await?;

    info!(transfer_id = %transfer.transfer_id, amount, fee_limit, "Transaction signed");
    transfer.fee = Some(from_base_units(expected_burn, decimals));
    transfer.state_data.set(SIGNED_TX, &signed)?;
    Ok(StepOutcome::Done)
}

pub(super) async fn broadcast(transfer: &mut Transfer, ctx: &StepContext<'_>) -> Result<StepOutcome, TransferError> {
    let signed = signed_tx(transfer)?;
    if already_broadcast(transfer, ctx, &signed).await? {
        return Ok(StepOutcome::Done);
    }
    let sdk = sdk(ctx)?;
    let hash = call(ctx, sdk.broadcast(&signed.raw)).await?;
    info!(transfer_id = %transfer.transfer_id, hash = %hash, "Transaction broadcast");
    transfer.tx_hash = Some(hash);
    Ok(StepOutcome::Done)
}

/// Take delegated energy back once the transfer is final
pub(super) async fn reclaim_resources(
    transfer: &mut Transfer,
    ctx: &StepContext<'_>,
) -> Result<StepOutcome, TransferError> {
    let Some(delegation) = transfer.state_data.get::<TronDelegation>(DELEGATION)? else {
        return Ok(StepOutcome::Done);
    };
    if transfer.state_data.contains(RECLAIM_TX) {
        return Ok(StepOutcome::Done);
    }

    let sdk = sdk(ctx)?;
    let signed = call(ctx, sdk.build_reclaim(&delegation)).await?;
    let hash = call(ctx, sdk.broadcast(&signed.raw)).await?;

    info!(transfer_id = %transfer.transfer_id, hash = %hash, "Delegated energy reclaimed");
    transfer
        .system_transactions
        .push(SystemTransaction::pending(SystemTxKind::Reclaim, hash.clone()));
    transfer.state_data.set(RECLAIM_TX, &hash)?;
    Ok(StepOutcome::Done)
}
