//! Wallet persistence
//!
//! Hot and processing wallets are never deleted. Cold wallets are replaced
//! as a set per (owner, blockchain).

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};

use super::error::WalletError;
use super::types::{ColdWallet, HotWallet, ProcessingWallet, WalletUpdate};
use crate::core_types::{Blockchain, OwnerId, WalletType};
use crate::db::RowExt;

#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn list_hot(&self) -> Result<Vec<HotWallet>, WalletError>;
    async fn list_processing(&self) -> Result<Vec<ProcessingWallet>, WalletError>;
    async fn list_cold(&self) -> Result<Vec<ColdWallet>, WalletError>;

    async fn find_hot(&self, chain: Blockchain, address: &str) -> Result<Option<HotWallet>, WalletError>;
    async fn find_processing(
        &self,
        chain: Blockchain,
        address: &str,
    ) -> Result<Option<ProcessingWallet>, WalletError>;
    async fn find_cold(&self, chain: Blockchain, address: &str) -> Result<Option<ColdWallet>, WalletError>;

    async fn find_hot_by_external_id(
        &self,
        owner_id: OwnerId,
        chain: Blockchain,
        external_id: &str,
    ) -> Result<Option<HotWallet>, WalletError>;

    /// Any EVM-family hot wallet of this owner with the external id
    async fn find_evm_hot_by_external_id(
        &self,
        owner_id: OwnerId,
        external_id: &str,
    ) -> Result<Option<HotWallet>, WalletError>;

    async fn processing_wallet_for_owner(
        &self,
        owner_id: OwnerId,
        chain: Blockchain,
    ) -> Result<Option<ProcessingWallet>, WalletError>;

    /// Atomically hand out the next derivation sequence (starting at 0)
    async fn reserve_sequence(
        &self,
        owner_id: OwnerId,
        scope: &str,
        wallet_type: WalletType,
    ) -> Result<i32, WalletError>;

    /// Insert or return the existing row for (owner, chain, external id)
    async fn insert_hot(&self, wallet: &HotWallet) -> Result<HotWallet, WalletError>;

    /// Insert or return the owner's existing processing wallet
    async fn insert_processing(&self, wallet: &ProcessingWallet) -> Result<ProcessingWallet, WalletError>;

    /// Replace all cold wallets of (owner, chain); returns the removed set
    async fn replace_cold(
        &self,
        owner_id: OwnerId,
        chain: Blockchain,
        addresses: &[String],
    ) -> Result<Vec<ColdWallet>, WalletError>;

    /// Returns `false` when no hot wallet matched
    async fn apply_update(&self, update: &WalletUpdate) -> Result<bool, WalletError>;

    async fn set_dirty(&self, chain: Blockchain, address: &str, dirty: bool) -> Result<bool, WalletError>;
}

pub struct PgWalletStore {
    pool: PgPool,
}

const HOT_COLUMNS: &str = "blockchain, address, owner_id, external_id, sequence, is_dirty, is_activated";

impl PgWalletStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_hot(row: &PgRow) -> Result<HotWallet, sqlx::Error> {
        Ok(HotWallet {
            blockchain: row.get_parsed("blockchain")?,
            address: row.try_get("address")?,
            owner_id: row.try_get("owner_id")?,
            external_id: row.try_get("external_id")?,
            sequence: row.try_get("sequence")?,
            is_dirty: row.try_get("is_dirty")?,
            is_activated: row.try_get("is_activated")?,
        })
    }

    fn row_to_processing(row: &PgRow) -> Result<ProcessingWallet, sqlx::Error> {
        Ok(ProcessingWallet {
            blockchain: row.get_parsed("blockchain")?,
            address: row.try_get("address")?,
            owner_id: row.try_get("owner_id")?,
            sequence: row.try_get("sequence")?,
        })
    }

    fn row_to_cold(row: &PgRow) -> Result<ColdWallet, sqlx::Error> {
        Ok(ColdWallet {
            blockchain: row.get_parsed("blockchain")?,
            address: row.try_get("address")?,
            owner_id: row.try_get("owner_id")?,
        })
    }
}

/// Apply a flag update on an open connection (used inside block commits)
pub(crate) async fn apply_update_on(conn: &mut PgConnection, update: &WalletUpdate) -> Result<bool, sqlx::Error> {
    let sql = match update {
        WalletUpdate::MarkDirty { .. } => {
            "UPDATE hot_wallets_tb SET is_dirty = TRUE WHERE blockchain = $1 AND address = $2"
        }
        WalletUpdate::MarkActivated { .. } => {
            "UPDATE hot_wallets_tb SET is_activated = TRUE WHERE blockchain = $1 AND address = $2"
        }
    };
    let result = sqlx::query(sql)
        .bind(update.blockchain().as_str())
        .bind(update.address())
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[async_trait]
impl WalletStore for PgWalletStore {
    async fn list_hot(&self) -> Result<Vec<HotWallet>, WalletError> {
        let rows = sqlx::query(&format!("SELECT {} FROM hot_wallets_tb", HOT_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::row_to_hot).collect::<Result<_, _>>()?)
    }

    async fn list_processing(&self) -> Result<Vec<ProcessingWallet>, WalletError> {
        let rows = sqlx::query("SELECT blockchain, address, owner_id, sequence FROM processing_wallets_tb")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::row_to_processing).collect::<Result<_, _>>()?)
    }

    async fn list_cold(&self) -> Result<Vec<ColdWallet>, WalletError> {
        let rows = sqlx::query("SELECT blockchain, address, owner_id FROM cold_wallets_tb")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::row_to_cold).collect::<Result<_, _>>()?)
    }

    async fn find_hot(&self, chain: Blockchain, address: &str) -> Result<Option<HotWallet>, WalletError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM hot_wallets_tb WHERE blockchain = $1 AND address = $2",
            HOT_COLUMNS
        ))
        .bind(chain.as_str())
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(Self::row_to_hot).transpose()?)
    }

    async fn find_processing(
        &self,
        chain: Blockchain,
        address: &str,
    ) -> Result<Option<ProcessingWallet>, WalletError> {
        let row = sqlx::query(
            "SELECT blockchain, address, owner_id, sequence FROM processing_wallets_tb
             WHERE blockchain = $1 AND address = $2",
        )
        .bind(chain.as_str())
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(Self::row_to_processing).transpose()?)
    }

    async fn find_cold(&self, chain: Blockchain, address: &str) -> Result<Option<ColdWallet>, WalletError> {
        let row = sqlx::query(
            "SELECT blockchain, address, owner_id FROM cold_wallets_tb WHERE blockchain = $1 AND address = $2",
        )
        .bind(chain.as_str())
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(Self::row_to_cold).transpose()?)
    }

    async fn find_hot_by_external_id(
        &self,
        owner_id: OwnerId,
        chain: Blockchain,
        external_id: &str,
    ) -> Result<Option<HotWallet>, WalletError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM hot_wallets_tb WHERE owner_id = $1 AND blockchain = $2 AND external_id = $3",
            HOT_COLUMNS
        ))
        .bind(owner_id)
        .bind(chain.as_str())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(Self::row_to_hot).transpose()?)
    }

    async fn find_evm_hot_by_external_id(
        &self,
        owner_id: OwnerId,
        external_id: &str,
    ) -> Result<Option<HotWallet>, WalletError> {
        let evm_chains: Vec<&str> = Blockchain::ALL
            .iter()
            .filter(|c| c.is_evm())
            .map(|c| c.as_str())
            .collect();
        let row = sqlx::query(&format!(
            "SELECT {} FROM hot_wallets_tb
             WHERE owner_id = $1 AND external_id = $2 AND blockchain = ANY($3)
             ORDER BY created_at LIMIT 1",
            HOT_COLUMNS
        ))
        .bind(owner_id)
        .bind(external_id)
        .bind(&evm_chains)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(Self::row_to_hot).transpose()?)
    }

    async fn processing_wallet_for_owner(
        &self,
        owner_id: OwnerId,
        chain: Blockchain,
    ) -> Result<Option<ProcessingWallet>, WalletError> {
        let row = sqlx::query(
            "SELECT blockchain, address, owner_id, sequence FROM processing_wallets_tb
             WHERE owner_id = $1 AND blockchain = $2",
        )
        .bind(owner_id)
        .bind(chain.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(Self::row_to_processing).transpose()?)
    }

    async fn reserve_sequence(
        &self,
        owner_id: OwnerId,
        scope: &str,
        wallet_type: WalletType,
    ) -> Result<i32, WalletError> {
        let sequence = sqlx::query_scalar::<_, i32>(
            r#"
            INSERT INTO wallet_sequences_tb (owner_id, scope, wallet_type, next_seq)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (owner_id, scope, wallet_type)
            DO UPDATE SET next_seq = wallet_sequences_tb.next_seq + 1
            RETURNING next_seq - 1
            "#,
        )
        .bind(owner_id)
        .bind(scope)
        .bind(wallet_type.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(sequence)
    }

    async fn insert_hot(&self, wallet: &HotWallet) -> Result<HotWallet, WalletError> {
        sqlx::query(
            r#"
            INSERT INTO hot_wallets_tb
                (blockchain, address, owner_id, external_id, sequence, is_dirty, is_activated)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (owner_id, blockchain, external_id) DO NOTHING
            "#,
        )
        .bind(wallet.blockchain.as_str())
        .bind(&wallet.address)
        .bind(wallet.owner_id)
        .bind(&wallet.external_id)
        .bind(wallet.sequence)
        .bind(wallet.is_dirty)
        .bind(wallet.is_activated)
        .execute(&self.pool)
        .await?;

        self.find_hot_by_external_id(wallet.owner_id, wallet.blockchain, &wallet.external_id)
            .await?
            .ok_or_else(|| WalletError::NotFound {
                chain: wallet.blockchain,
                address: wallet.address.clone(),
            })
    }

    async fn insert_processing(&self, wallet: &ProcessingWallet) -> Result<ProcessingWallet, WalletError> {
        sqlx::query(
            r#"
            INSERT INTO processing_wallets_tb (blockchain, address, owner_id, sequence)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (owner_id, blockchain) DO NOTHING
            "#,
        )
        .bind(wallet.blockchain.as_str())
        .bind(&wallet.address)
        .bind(wallet.owner_id)
        .bind(wallet.sequence)
        .execute(&self.pool)
        .await?;

        self.processing_wallet_for_owner(wallet.owner_id, wallet.blockchain)
            .await?
            .ok_or_else(|| WalletError::NotFound {
                chain: wallet.blockchain,
                address: wallet.address.clone(),
            })
    }

    async fn replace_cold(
        &self,
        owner_id: OwnerId,
        chain: Blockchain,
        addresses: &[String],
    ) -> Result<Vec<ColdWallet>, WalletError> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query(
            "DELETE FROM cold_wallets_tb WHERE owner_id = $1 AND blockchain = $2
             RETURNING blockchain, address, owner_id",
        )
        .bind(owner_id)
        .bind(chain.as_str())
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(Self::row_to_cold)
        .collect::<Result<Vec<_>, _>>()?;

        for address in addresses {
            sqlx::query(
                "INSERT INTO cold_wallets_tb (blockchain, address, owner_id) VALUES ($1, $2, $3)
                 ON CONFLICT (blockchain, address) DO NOTHING",
            )
            .bind(chain.as_str())
            .bind(address)
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(removed)
    }

    async fn apply_update(&self, update: &WalletUpdate) -> Result<bool, WalletError> {
        let mut conn = self.pool.acquire().await?;
        Ok(apply_update_on(&mut *conn, update).await?)
    }

    async fn set_dirty(&self, chain: Blockchain, address: &str, dirty: bool) -> Result<bool, WalletError> {
        let result = sqlx::query("UPDATE hot_wallets_tb SET is_dirty = $3 WHERE blockchain = $1 AND address = $2")
            .bind(chain.as_str())
            .bind(address)
            .bind(dirty)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
