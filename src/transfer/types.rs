//! Transfer records and requests

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::snapshot::WorkflowSnapshot;
use super::state::TransferStatus;
use crate::core_types::{Blockchain, OwnerId, TransferId};
use crate::webhook::SystemTransactionPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    /// Hot wallet to an external address
    Withdrawal,
    /// Hot wallets swept into the owner's cold storage
    Consolidation,
    /// Resource delegation requested by the owner
    Delegation,
}

impl TransferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::Withdrawal => "withdrawal",
            TransferKind::Consolidation => "consolidation",
            TransferKind::Delegation => "delegation",
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "withdrawal" => Ok(TransferKind::Withdrawal),
            "consolidation" => Ok(TransferKind::Consolidation),
            "delegation" => Ok(TransferKind::Delegation),
            _ => Err(format!("Invalid transfer kind: {}", s)),
        }
    }
}

/// Incoming transfer request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub owner_id: OwnerId,
    pub blockchain: Blockchain,
    #[serde(default = "default_kind")]
    pub kind: TransferKind,
    pub from_addresses: Vec<String>,
    pub to_address: String,
    /// Token contract, `None` for the native coin
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    /// Send everything the source addresses hold, minus fees
    #[serde(default)]
    pub whole_amount: bool,
    #[serde(default)]
    pub max_fee: Option<Decimal>,
    /// sat/vB override for UTXO chains
    #[serde(default)]
    pub fee_rate: Option<u64>,
    #[serde(default)]
    pub request_id: Option<String>,
}

fn default_kind() -> TransferKind {
    TransferKind::Withdrawal
}

/// Free-form per-transfer state written by workflow steps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateData(serde_json::Map<String, serde_json::Value>);

impl StateData {
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, serde_json::Error> {
        self.0
            .get(key)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), serde_json::Error> {
        self.0.insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) {
        self.0.remove(key);
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::Value::Object(self.0.clone())
    }

    pub fn from_value(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemTxKind {
    Delegate,
    Reclaim,
    BurnForActivation,
    AccountActivation,
    Transfer,
}

impl SystemTxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemTxKind::Delegate => "delegate",
            SystemTxKind::Reclaim => "reclaim",
            SystemTxKind::BurnForActivation => "burn_for_activation",
            SystemTxKind::AccountActivation => "account_activation",
            SystemTxKind::Transfer => "transfer",
        }
    }
}

impl FromStr for SystemTxKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delegate" => Ok(SystemTxKind::Delegate),
            "reclaim" => Ok(SystemTxKind::Reclaim),
            "burn_for_activation" => Ok(SystemTxKind::BurnForActivation),
            "account_activation" => Ok(SystemTxKind::AccountActivation),
            "transfer" => Ok(SystemTxKind::Transfer),
            _ => Err(format!("Invalid system transaction kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemTxStatus {
    Pending,
    Confirmed,
    Failed,
}

impl SystemTxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemTxStatus::Pending => "pending",
            SystemTxStatus::Confirmed => "confirmed",
            SystemTxStatus::Failed => "failed",
        }
    }
}

impl FromStr for SystemTxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SystemTxStatus::Pending),
            "confirmed" => Ok(SystemTxStatus::Confirmed),
            "failed" => Ok(SystemTxStatus::Failed),
            _ => Err(format!("Invalid system transaction status: {}", s)),
        }
    }
}

/// Auxiliary on-chain transaction sent on behalf of a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemTransaction {
    pub id: Uuid,
    pub kind: SystemTxKind,
    pub tx_hash: String,
    pub status: SystemTxStatus,
    pub confirmations: u64,
}

impl SystemTransaction {
    pub fn pending(kind: SystemTxKind, tx_hash: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            tx_hash,
            status: SystemTxStatus::Pending,
            confirmations: 0,
        }
    }

    pub fn to_payload(&self) -> SystemTransactionPayload {
        SystemTransactionPayload {
            kind: self.kind.as_str().to_string(),
            hash: self.tx_hash.clone(),
            status: self.status.as_str().to_string(),
            confirmations: self.confirmations,
        }
    }
}

/// Transfer as persisted in `transfers_tb`
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub transfer_id: TransferId,
    pub owner_id: OwnerId,
    pub blockchain: Blockchain,
    pub kind: TransferKind,
    pub status: TransferStatus,
    pub from_addresses: Vec<String>,
    pub to_address: String,
    pub asset: Option<String>,
    pub amount: Option<Decimal>,
    pub fee: Option<Decimal>,
    pub max_fee: Option<Decimal>,
    pub whole_amount: bool,
    pub tx_hash: Option<String>,
    pub snapshot: WorkflowSnapshot,
    pub state_data: StateData,
    pub request_id: Option<String>,
    pub error_message: Option<String>,
    pub system_transactions: Vec<SystemTransaction>,
    /// Row version this copy was loaded at; bumped by every save
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `state_data` key holding a per-request UTXO fee rate
pub const REQUESTED_FEE_RATE: &str = "requested_fee_rate";

impl Transfer {
    pub fn from_request(request: &TransferRequest) -> Result<Self, serde_json::Error> {
        let now = Utc::now();
        let mut state_data = StateData::default();
        if let Some(rate) = request.fee_rate {
            state_data.set(REQUESTED_FEE_RATE, &rate)?;
        }
        Ok(Self {
            transfer_id: Uuid::new_v4(),
            owner_id: request.owner_id,
            blockchain: request.blockchain,
            kind: request.kind,
            status: TransferStatus::New,
            from_addresses: request.from_addresses.clone(),
            to_address: request.to_address.clone(),
            asset: request.asset.clone(),
            amount: request.amount,
            fee: None,
            max_fee: request.max_fee,
            whole_amount: request.whole_amount,
            tx_hash: None,
            snapshot: WorkflowSnapshot::default(),
            state_data,
            request_id: request.request_id.clone(),
            error_message: None,
            system_transactions: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// `None` for the native coin, whatever ticker the caller used for it
    pub fn token(&self) -> Option<&str> {
        self.asset
            .as_deref()
            .filter(|a| !a.eq_ignore_ascii_case(self.blockchain.native_asset()))
    }

    pub fn system_payloads(&self) -> Vec<SystemTransactionPayload> {
        self.system_transactions.iter().map(SystemTransaction::to_payload).collect()
    }
}
