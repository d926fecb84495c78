//! Transfer status values
//!
//! Stored as lowercase TEXT and sent as-is in `transfer_status` webhooks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Transfer lifecycle.
///
/// `new → processing → in_mempool → unconfirmed → completed`, with `failed`
/// reachable from any non-terminal status. `frozen` is set by operators only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    New,
    Processing,
    InMempool,
    Unconfirmed,
    Completed,
    Failed,
    Frozen,
}

impl TransferStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Failed)
    }

    /// The workflow engine does not touch these
    #[inline]
    pub fn is_halted(&self) -> bool {
        self.is_terminal() || *self == TransferStatus::Frozen
    }

    fn rank(&self) -> u8 {
        match self {
            TransferStatus::New => 0,
            TransferStatus::Processing => 1,
            TransferStatus::InMempool => 2,
            TransferStatus::Unconfirmed => 3,
            TransferStatus::Completed => 4,
            TransferStatus::Failed | TransferStatus::Frozen => u8::MAX,
        }
    }

    /// Forward moves along the happy path (skips allowed), `failed` or
    /// `frozen` from any non-terminal status
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        if self.is_terminal() || *self == TransferStatus::Frozen {
            return false;
        }
        match next {
            TransferStatus::Failed | TransferStatus::Frozen => true,
            _ => next.rank() > self.rank(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::New => "new",
            TransferStatus::Processing => "processing",
            TransferStatus::InMempool => "in_mempool",
            TransferStatus::Unconfirmed => "unconfirmed",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
            TransferStatus::Frozen => "frozen",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(TransferStatus::New),
            "processing" => Ok(TransferStatus::Processing),
            "in_mempool" => Ok(TransferStatus::InMempool),
            "unconfirmed" => Ok(TransferStatus::Unconfirmed),
            "completed" => Ok(TransferStatus::Completed),
            "failed" => Ok(TransferStatus::Failed),
            "frozen" => Ok(TransferStatus::Frozen),
            _ => Err(format!("Invalid transfer status: {}", s)),
        }
    }
}
