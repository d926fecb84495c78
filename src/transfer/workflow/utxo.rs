//! Bitcoin-like sending: spend every UTXO of the source addresses

use std::sync::Arc;
use tracing::info;

use super::common::{already_broadcast, call, require, signed_tx};
use super::{SIGNED_TX, StepContext, StepOutcome};
use crate::chain::{Utxo, UtxoBuildRequest, UtxoOutput, UtxoWalletSdk};
use crate::core_types::{from_base_units, to_base_units};
use crate::transfer::error::TransferError;
use crate::transfer::types::{REQUESTED_FEE_RATE, Transfer};

const INPUTS: &str = "utxo_inputs";

fn sdk(ctx: &StepContext<'_>, transfer: &Transfer) -> Result<Arc<dyn UtxoWalletSdk>, TransferError> {
    ctx.adapters
        .utxo
        .clone()
        .ok_or_else(|| TransferError::UnsupportedBlockchain(transfer.blockchain.to_string()))
}

pub(super) async fn select_inputs(transfer: &mut Transfer, ctx: &StepContext<'_>) -> Result<StepOutcome, TransferError> {
    let mut inputs: Vec<Utxo> = Vec::new();
    for address in &transfer.from_addresses {
        let utxos = call(ctx, ctx.adapters.explorer.get_utxo(transfer.blockchain, address)).await?;
        inputs.extend(utxos);
    }
    if inputs.is_empty() {
        return Err(TransferError::InsufficientBalance {
            required: transfer.amount.map(|a| a.to_string()).unwrap_or_else(|| "any".to_string()),
            available: "0".to_string(),
        });
    }

    let total: u64 = inputs.iter().map(|u| u.value).sum();
    info!(
        transfer_id = %transfer.transfer_id,
        inputs = inputs.len(),
        total_sats = total,
        "Selected inputs"
    );
    transfer.state_data.set(INPUTS, &inputs)?;
    Ok(StepOutcome::Done)
}

/// Outputs for a given fee: the destination output, plus change back to the
/// first source address when it is above the dust limit
fn plan_outputs(
    transfer: &Transfer,
    total: u64,
    target: Option<u64>,
    fee: u64,
    dust: u64,
) -> Result<Vec<UtxoOutput>, TransferError> {
    let decimals = transfer.blockchain.decimals();
    let insufficient = |required: u64| TransferError::InsufficientBalance {
        required: from_base_units(required, decimals).to_string(),
        available: from_base_units(total, decimals).to_string(),
    };

    let Some(target) = target else {
        let send = total.checked_sub(fee).ok_or_else(|| insufficient(fee))?;
        if send < dust {
            return Err(TransferError::BelowDust);
        }
        return Ok(vec![UtxoOutput {
            address: transfer.to_address.clone(),
            value: send,
        }]);
    };

    if target < dust {
        return Err(TransferError::BelowDust);
    }
    let needed = target.checked_add(fee).ok_or(TransferError::InvalidAmount)?;
    let change = total.checked_sub(needed).ok_or_else(|| insufficient(needed))?;
    let mut outputs = vec![UtxoOutput {
        address: transfer.to_address.clone(),
        value: target,
    }];
    if change >= dust {
        outputs.push(UtxoOutput {
            address: transfer.from_addresses[0].clone(),
            value: change,
        });
    }
    Ok(outputs)
}

pub(super) async fn build_and_sign(transfer: &mut Transfer, ctx: &StepContext<'_>) -> Result<StepOutcome, TransferError> {
    let sdk = sdk(ctx, transfer)?;
    let chain = transfer.blockchain;
    let decimals = chain.decimals();
    let inputs: Vec<Utxo> = require(transfer.state_data.get(INPUTS)?, "inputs")?;
    let total: u64 = inputs.iter().map(|u| u.value).sum();

    let rate = transfer
        .state_data
        .get::<u64>(REQUESTED_FEE_RATE)?
        .unwrap_or_else(|| ctx.config.fee_rate(chain));
    let target = if transfer.whole_amount {
        None
    } else {
        let amount = transfer.amount.ok_or(TransferError::InvalidAmount)?;
        Some(to_base_units(amount, decimals).ok_or(TransferError::InvalidAmount)?)
    };
    let max_fee = transfer
        .max_fee
        .map(|f| {
            to_base_units(f, decimals)
                .ok_or_else(|| TransferError::InvalidRequest(format!("max_fee {} has too many decimals", f)))
        })
        .transpose()?;
    let dust = ctx.config.dust_limit_sats;

    let mut request = UtxoBuildRequest {
        chain,
        owner_id: transfer.owner_id,
        inputs,
        outputs: plan_outputs(transfer, total, target, 0, dust)?,
    };

    // first signature only measures the size
    let draft = call(ctx, sdk.build_and_sign(&request)).await?;
    let fee = draft.vsize.saturating_mul(rate);
    if let Some(max_fee) = max_fee
        && fee > max_fee
    {
        return Err(TransferError::FeeTooHigh {
            fee: from_base_units(fee, decimals).to_string(),
            max_fee: from_base_units(max_fee, decimals).to_string(),
        });
    }

    request.outputs = plan_outputs(transfer, total, target, fee, dust)?;
    let signed = call(ctx, sdk.build_and_sign(&request)).await?;

    info!(
        transfer_id = %transfer.transfer_id,
        vsize = draft.vsize,
        fee_rate = rate,
        fee_sats = fee,
        outputs = request.outputs.len(),
        "Transaction signed"
    );
    transfer.fee = Some(from_base_units(fee, decimals));
    transfer.state_data.set(SIGNED_TX, &signed)?;
    Ok(StepOutcome::Done)
}

pub(super) async fn broadcast(transfer: &mut Transfer, ctx: &StepContext<'_>) -> Result<StepOutcome, TransferError> {
    let signed = signed_tx(transfer)?;
    if already_broadcast(transfer, ctx, &signed).await? {
        return Ok(StepOutcome::Done);
    }
    let sdk = sdk(ctx, transfer)?;
    let hash = call(ctx, sdk.broadcast(transfer.blockchain, &signed.raw)).await?;
    info!(transfer_id = %transfer.transfer_id, hash = %hash, "Transaction broadcast");
    transfer.tx_hash = Some(hash);
    Ok(StepOutcome::Done)
}
