//! Wallet flag changes committed together with a block

use crate::core_types::WalletType;
use crate::wallet::WalletUpdate;

use super::classifier::{ClassifiedEvent, Side};

pub trait PreCommitHook: Send + Sync {
    fn name(&self) -> &'static str;

    fn updates(&self, event: &ClassifiedEvent) -> Vec<WalletUpdate>;
}

/// Funds landed on a hot wallet: it needs consolidating
pub struct DirtyMarkingHook;

impl PreCommitHook for DirtyMarkingHook {
    fn name(&self) -> &'static str {
        "mark_dirty"
    }

    fn updates(&self, event: &ClassifiedEvent) -> Vec<WalletUpdate> {
        if event.side == Side::Incoming && event.wallet.wallet_type == WalletType::Hot {
            vec![WalletUpdate::MarkDirty {
                blockchain: event.blockchain,
                address: event.wallet.address.clone(),
            }]
        } else {
            Vec::new()
        }
    }
}

/// First value received by a hot wallet on a chain that needs activation
pub struct ActivationHook;

impl PreCommitHook for ActivationHook {
    fn name(&self) -> &'static str {
        "mark_activated"
    }

    fn updates(&self, event: &ClassifiedEvent) -> Vec<WalletUpdate> {
        let needs_activation = event.blockchain.requires_activation()
            && event.side == Side::Incoming
            && event.wallet.wallet_type == WalletType::Hot
            && event.wallet.activated == Some(false)
            && event.event.amount > rust_decimal::Decimal::ZERO;
        if needs_activation {
            vec![WalletUpdate::MarkActivated {
                blockchain: event.blockchain,
                address: event.wallet.address.clone(),
            }]
        } else {
            Vec::new()
        }
    }
}

pub fn default_hooks() -> Vec<Box<dyn PreCommitHook>> {
    vec![Box::new(DirtyMarkingHook), Box::new(ActivationHook)]
}

/// Run every hook over every event, dropping repeated updates
pub fn collect_updates(hooks: &[Box<dyn PreCommitHook>], events: &[ClassifiedEvent]) -> Vec<WalletUpdate> {
    let mut out: Vec<WalletUpdate> = Vec::new();
    for event in events {
        for hook in hooks {
            for update in hook.updates(event) {
                if !out.contains(&update) {
                    out.push(update);
                }
            }
        }
    }
    out
}
