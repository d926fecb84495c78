//! Database connection management

pub mod schema;

use crate::config::DatabaseConfig;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use std::str::FromStr;
use std::time::Duration;

/// PostgreSQL database connection pool
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
            .connect(&config.url)
            .await?;

        tracing::info!(
            max_connections = config.max_connections,
            "PostgreSQL connection pool established"
        );
        Ok(Self { pool })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Extension trait for columns stored as TEXT but typed as enums in Rust
pub trait RowExt {
    fn get_parsed<T>(&self, column: &str) -> Result<T, sqlx::Error>
    where
        T: FromStr,
        T::Err: std::fmt::Display;
}

impl RowExt for PgRow {
    fn get_parsed<T>(&self, column: &str) -> Result<T, sqlx::Error>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw: String = self.try_get(column)?;
        raw.parse::<T>().map_err(|e| {
            tracing::error!(column, value = %raw, "Failed to parse column: {}", e);
            sqlx::Error::ColumnDecode {
                index: column.to_string(),
                source: e.to_string().into(),
            }
        })
    }
}
