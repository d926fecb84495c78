//! EVM sending: one account, gas paid in the native coin

use num_bigint::BigUint;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::common::{already_broadcast, call, require, signed_tx};
use super::{SIGNED_TX, StepContext, StepOutcome};
use crate::chain::{EvmTransferRequest, EvmWalletSdk};
use crate::transfer::error::TransferError;
use crate::transfer::types::Transfer;

const FEE_PLAN: &str = "evm_fee_plan";
const SENT_AMOUNT: &str = "sent_amount";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FeePlan {
    gas_limit: u64,
    gas_price: BigUint,
}

impl FeePlan {
    fn fee(&self) -> BigUint {
        &self.gas_price * BigUint::from(self.gas_limit)
    }
}

/// `Decimal` amount to integer base units; `None` when negative or finer
/// than `decimals`
pub fn decimal_to_units(amount: Decimal, decimals: u32) -> Option<BigUint> {
    if amount.is_sign_negative() {
        return None;
    }
    let normalized = amount.normalize();
    let scale = normalized.scale();
    if scale > decimals {
        return None;
    }
    let mantissa = u128::try_from(normalized.mantissa()).ok()?;
    Some(BigUint::from(mantissa) * BigUint::from(10u32).pow(decimals - scale))
}

/// `None` when the value does not fit a `Decimal`
pub fn units_to_decimal(units: &BigUint, decimals: u32) -> Option<Decimal> {
    let mantissa = i128::try_from(units).ok()?;
    Decimal::try_from_i128_with_scale(mantissa, decimals)
        .ok()
        .map(|d| d.normalize())
}

fn display_units(units: &BigUint, decimals: u32) -> String {
    units_to_decimal(units, decimals)
        .map(|d| d.to_string())
        .unwrap_or_else(|| format!("{} base units", units))
}

fn sdk(ctx: &StepContext<'_>, transfer: &Transfer) -> Result<Arc<dyn EvmWalletSdk>, TransferError> {
    ctx.adapters
        .evm
        .clone()
        .ok_or_else(|| TransferError::UnsupportedBlockchain(transfer.blockchain.to_string()))
}

pub(super) async fn estimate_fee(transfer: &mut Transfer, ctx: &StepContext<'_>) -> Result<StepOutcome, TransferError> {
    let sdk = sdk(ctx, transfer)?;
    let chain = transfer.blockchain;
    let native_decimals = chain.decimals();

    let quote = call(
        ctx,
        sdk.estimate_fee(chain, &transfer.from_addresses[0], &transfer.to_address, transfer.token()),
    )
    .await?;
    let plan = FeePlan {
        gas_limit: quote.gas_limit,
        gas_price: quote.gas_price,
    };
    let fee = plan.fee();

    if let Some(max_fee) = transfer.max_fee {
        let cap = decimal_to_units(max_fee, native_decimals)
            .ok_or_else(|| TransferError::InvalidRequest(format!("max_fee {} has too many decimals", max_fee)))?;
        if fee > cap {
            return Err(TransferError::FeeTooHigh {
                fee: display_units(&fee, native_decimals),
                max_fee: max_fee.to_string(),
            });
        }
    }

    info!(
        transfer_id = %transfer.transfer_id,
        gas_limit = plan.gas_limit,
        gas_price = %plan.gas_price,
        "Fee estimated"
    );
    transfer.fee = units_to_decimal(&fee, native_decimals);
    transfer.state_data.set(FEE_PLAN, &plan)?;
    Ok(StepOutcome::Done)
}

pub(super) async fn build_and_sign(transfer: &mut Transfer, ctx: &StepContext<'_>) -> Result<StepOutcome, TransferError> {
    let sdk = sdk(ctx, transfer)?;
    let chain = transfer.blockchain;
    let from = transfer.from_addresses[0].clone();
    let token = transfer.token().map(str::to_string);
    let plan: FeePlan = require(transfer.state_data.get(FEE_PLAN)?, "fee plan")?;
    let fee = plan.fee();

    let decimals = match &token {
        Some(contract) => call(ctx, sdk.token_decimals(chain, contract)).await?,
        None => chain.decimals(),
    };
    let balance = call(ctx, sdk.balance(chain, &from, token.as_deref())).await?;
    let insufficient = |required: &BigUint, available: &BigUint| TransferError::InsufficientBalance {
        required: display_units(required, decimals),
        available: display_units(available, decimals),
    };

    let requested = if transfer.whole_amount {
        None
    } else {
        let amount = transfer.amount.ok_or(TransferError::InvalidAmount)?;
        Some(decimal_to_units(amount, decimals).ok_or(TransferError::InvalidAmount)?)
    };

    let amount = match (&token, requested) {
        // native coin pays its own gas
        (None, None) => {
            if balance <= fee {
                return Err(insufficient(&fee, &balance));
            }
            &balance - &fee
        }
        (None, Some(amount)) => {
            let needed = &amount + &fee;
            if balance < needed {
                return Err(insufficient(&needed, &balance));
            }
            amount
        }
        (Some(_), requested) => {
            let amount = requested.unwrap_or_else(|| balance.clone());
            if amount == BigUint::default() || balance < amount {
                return Err(insufficient(&amount, &balance));
            }
            let native = call(ctx, sdk.balance(chain, &from, None)).await?;
            if native < fee {
                return Err(TransferError::InsufficientBalance {
                    required: display_units(&fee, chain.decimals()),
                    available: display_units(&native, chain.decimals()),
                });
            }
            amount
        }
    };

    let request = EvmTransferRequest {
        chain,
        owner_id: transfer.owner_id,
        from,
        to: transfer.to_address.clone(),
        asset: token,
        amount: amount.clone(),
        gas_limit: plan.gas_limit,
        gas_price: plan.gas_price,
    };
    let signed = call(ctx, sdk.build_and_sign(&request)).await?;

    info!(
        transfer_id = %transfer.transfer_id,
        amount = %display_units(&amount, decimals),
        "Transaction signed"
    );
    if let Some(sent) = units_to_decimal(&amount, decimals) {
        transfer.state_data.set(SENT_AMOUNT, &sent)?;
    }
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
