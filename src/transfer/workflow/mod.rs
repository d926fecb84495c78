//! Per-family step tables and step implementations
//!
//! ```text
//! before_sending: validate_request
//! sending:        utxo  select_inputs, build_and_sign, broadcast
//!                 evm   estimate_fee, build_and_sign, broadcast
//!                 tron  estimate_resources, delegate_resources, build_and_sign, broadcast
//! after_sending:  wait_mempool, wait_first_confirmation, wait_confirmations,
//!                 [tron: reclaim_resources], notify_success
//! ```

mod common;
mod evm;
mod tron;
mod utxo;

use std::time::Duration;

use super::error::TransferError;
use super::snapshot::{Stage, StepId};
use super::types::Transfer;
use crate::chain::ChainAdapters;
use crate::config::TransferConfig;
use crate::core_types::{Blockchain, ChainFamily};
use crate::wallet::WalletResolver;

pub use common::validate_request;
pub use evm::{decimal_to_units, units_to_decimal};

/// `state_data` key of the signed, not yet confirmed transaction
pub const SIGNED_TX: &str = "signed_tx";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    /// Not ready; run the same step again after the delay
    Snooze(Duration),
}

/// Collaborators a step may use
pub struct StepContext<'a> {
    pub adapters: &'a ChainAdapters,
    pub resolver: &'a WalletResolver,
    pub config: &'a TransferConfig,
    pub required_confirmations: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainWorkflow {
    Utxo,
    Evm,
    Tron,
}

const BEFORE_SENDING: &[StepId] = &[StepId::ValidateRequest];

const UTXO_SENDING: &[StepId] = &[StepId::SelectInputs, StepId::BuildAndSign, StepId::Broadcast];
const EVM_SENDING: &[StepId] = &[StepId::EstimateFee, StepId::BuildAndSign, StepId::Broadcast];
const TRON_SENDING: &[StepId] = &[
    StepId::EstimateResources,
    StepId::DelegateResources,
    StepId::BuildAndSign,
    StepId::Broadcast,
];

const AFTER_SENDING: &[StepId] = &[
    StepId::WaitMempool,
    StepId::WaitFirstConfirmation,
    StepId::WaitConfirmations,
    StepId::NotifySuccess,
];
const TRON_AFTER_SENDING: &[StepId] = &[
    StepId::WaitMempool,
    StepId::WaitFirstConfirmation,
    StepId::WaitConfirmations,
    StepId::ReclaimResources,
    StepId::NotifySuccess,
];

impl ChainWorkflow {
    pub fn for_blockchain(chain: Blockchain) -> Self {
        match chain.family() {
            ChainFamily::Utxo => ChainWorkflow::Utxo,
            ChainFamily::Evm => ChainWorkflow::Evm,
            ChainFamily::Tron => ChainWorkflow::Tron,
        }
    }

    pub fn steps(&self, stage: Stage) -> &'static [StepId] {
        match (stage, self) {
            (Stage::BeforeSending, _) => BEFORE_SENDING,
            (Stage::Sending, ChainWorkflow::Utxo) => UTXO_SENDING,
            (Stage::Sending, ChainWorkflow::Evm) => EVM_SENDING,
            (Stage::Sending, ChainWorkflow::Tron) => TRON_SENDING,
            (Stage::AfterSending, ChainWorkflow::Tron) => TRON_AFTER_SENDING,
            (Stage::AfterSending, _) => AFTER_SENDING,
        }
    }

    pub async fn execute(
        &self,
        step: StepId,
        transfer: &mut Transfer,
        ctx: &StepContext<'_>,
    ) -> Result<StepOutcome, TransferError> {
        match step {
            StepId::ValidateRequest => {
                validate_request(transfer, ctx).await?;
                Ok(StepOutcome::Done)
            }
            StepId::SelectInputs => utxo::select_inputs(transfer, ctx).await,
            StepId::EstimateFee => evm::estimate_fee(transfer, ctx).await,
            StepId::EstimateResources => tron::estimate_resources(transfer, ctx).await,
            StepId::DelegateResources => tron::delegate_resources(transfer, ctx).await,
            StepId::BuildAndSign => match self {
                ChainWorkflow::Utxo => utxo::build_and_sign(transfer, ctx).await,
                ChainWorkflow::Evm => evm::build_and_sign(transfer, ctx).await,
                ChainWorkflow::Tron => tron::build_and_sign(transfer, ctx).await,
            },
            StepId::Broadcast => match self {
                ChainWorkflow::Utxo => utxo::broadcast(transfer, ctx).await,
                ChainWorkflow::Evm => evm::broadcast(transfer, ctx).await,
                ChainWorkflow::Tron => tron::broadcast(transfer, ctx).await,
            },
            StepId::WaitMempool => common::wait_mempool(transfer, ctx).await,
            StepId::WaitFirstConfirmation => common::wait_first_confirmation(transfer, ctx).await,
            StepId::WaitConfirmations => common::wait_confirmations(transfer, ctx).await,
            StepId::ReclaimResources => tron::reclaim_resources(transfer, ctx).await,
            StepId::NotifySuccess => Ok(StepOutcome::Done),
        }
    }
}
