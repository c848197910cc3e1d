/// Database state layer for the audit ledger.
///
/// Manages PostgreSQL connections and provides typed access to:
/// - Audit events and their hash/status lifecycle
/// - Merkle batches (sealed membership, anchoring state)
/// - Anchor records (on-chain references)
pub mod models;
pub mod repository;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::Result;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                crate::error::AuditError::Serialization(format!("migration failed: {e}"))
            })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
