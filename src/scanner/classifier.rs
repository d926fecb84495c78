//! Deciding which transaction events concern our wallets

use rust_decimal::Decimal;
use std::sync::Arc;

use crate::chain::{ExplorerTransaction, TransactionEvent};
use crate::core_types::{Blockchain, WalletType};
use crate::wallet::{WalletError, WalletMatch, WalletResolver};
use crate::webhook::{EventStatus, TransactionEventPayload, WebhookKind};

/// Which end of the event matched one of our wallets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Incoming,
    Outgoing,
}

/// One notification-worthy match
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedEvent {
    pub blockchain: Blockchain,
    pub hash: String,
    pub event: TransactionEvent,
    pub from_addresses: Vec<String>,
    pub confirmations: u64,
    pub side: Side,
    pub wallet: WalletMatch,
    pub kind: WebhookKind,
    /// Both ends belong to us
    pub is_system: bool,
}

impl ClassifiedEvent {
    pub fn payload(&self) -> TransactionEventPayload {
        TransactionEventPayload {
            kind: self.kind,
            is_system: self.is_system,
            blockchain: self.blockchain,
            hash: self.hash.clone(),
            from_addresses: self.from_addresses.clone(),
            to_address: self.event.to.clone().unwrap_or_default(),
            amount: self.event.amount,
            asset: self.event.asset.clone(),
            status: EventStatus::WaitingConfirmations,
            confirmations: self.confirmations,
            wallet_type: self.wallet.wallet_type,
            request_id: None,
        }
    }
}

/// Successful and either moves value or is a zero-value call not sent to self
pub fn is_relevant(success: bool, event: &TransactionEvent) -> bool {
    if !success {
        return false;
    }
    if event.amount > Decimal::ZERO {
        return true;
    }
    event.amount == Decimal::ZERO && event.from != event.to
}

pub struct EventClassifier {
    resolver: Arc<WalletResolver>,
}

impl EventClassifier {
    pub fn new(resolver: Arc<WalletResolver>) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &Arc<WalletResolver> {
        &self.resolver
    }

    /// Zero, one or two matches: the receiving and/or sending wallet
    pub async fn classify_event(
        &self,
        chain: Blockchain,
        tx: &ExplorerTransaction,
        event: &TransactionEvent,
    ) -> Result<Vec<ClassifiedEvent>, WalletError> {
        if !is_relevant(tx.success, event) {
            return Ok(Vec::new());
        }

        let to_match = match &event.to {
            Some(to) => self.resolver.resolve(chain, to).await?,
            None => None,
        };
        let from_match = match &event.from {
            Some(from) => self.resolver.resolve(chain, from).await?,
            None => None,
        };
        let is_system = to_match.is_some() && from_match.is_some();

        let mut out = Vec::with_capacity(2);
        let mut push = |wallet: WalletMatch, side: Side| {
            let kind = if side == Side::Incoming && wallet.wallet_type == WalletType::Hot {
                WebhookKind::Deposit
            } else {
                WebhookKind::Transfer
            };
            out.push(ClassifiedEvent {
                blockchain: chain,
                hash: tx.hash.clone(),
                event: event.clone(),
                from_addresses: tx.from_addresses(),
                confirmations: tx.confirmations,
                side,
                wallet,
                kind,
                is_system,
            });
        };
        if let Some(wallet) = to_match {
            push(wallet, Side::Incoming);
        }
        if let Some(wallet) = from_match {
            push(wallet, Side::Outgoing);
        }
        Ok(out)
    }

    /// All events of a transaction, in event order
    pub async fn classify_transaction(
        &self,
        chain: Blockchain,
        tx: &ExplorerTransaction,
    ) -> Result<Vec<ClassifiedEvent>, WalletError> {
        let mut out = Vec::new();
        for event in &tx.events {
            out.extend(self.classify_event(chain, tx, event).await?);
        }
        Ok(out)
    }
}
