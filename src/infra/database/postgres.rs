//! PostgreSQL balance store implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, postgres::PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

use crate::domain::{AppError, BalanceKey, BalanceRecord, BalanceStore, DatabaseError};

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

const UPDATE_ROW_SQL: &str = r#"
UPDATE token_balances
SET raw_amount = $1,
    ui_amount = $2,
    decimals = $3,
    slot = $4,
    observed_at = $5,
    updated_at = NOW()
WHERE owner_address = $6 AND mint_address = $7
"#;

/// Balance store backed by PostgreSQL with connection pooling.
pub struct PostgresBalanceStore {
    pool: PgPool,
}

impl PostgresBalanceStore {
    /// Connect with custom pool configuration.
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Connect with default pool configuration.
    pub async fn with_defaults(database_url: &str) -> Result<Self, AppError> {
        Self::new(database_url, PostgresConfig::default()).await
    }

    /// Run database migrations using sqlx migrate
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Migration(e.to_string())))?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying connection pool (for testing)
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> BalanceRecord {
        BalanceRecord {
            owner: row.get("owner_address"),
            mint: row.get("mint_address"),
            raw_amount: u64::try_from(row.get::<i64, _>("raw_amount")).unwrap_or_default(),
            ui_amount: row.get("ui_amount"),
            decimals: u8::try_from(row.get::<i16, _>("decimals")).unwrap_or_default(),
            slot: u64::try_from(row.get::<i64, _>("slot")).unwrap_or_default(),
            observed_at: row.get("observed_at"),
        }
    }

    fn bind_record<'a>(
        builder: &mut sqlx::query_builder::Separated<'_, 'a, Postgres, &'static str>,
        record: &'a BalanceRecord,
    ) {
        builder
            .push_bind(&record.owner)
            .push_bind(&record.mint)
            .push_bind(record.raw_amount as i64)
            .push_bind(record.ui_amount)
            .push_bind(i16::from(record.decimals))
            .push_bind(record.slot as i64)
            .push_bind(record.observed_at)
            .push_bind(Utc::now());
    }
}

#[async_trait]
impl BalanceStore for PostgresBalanceStore {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self, records), fields(count = records.len()))]
    async fn upsert_batch(&self, records: &[BalanceRecord]) -> Result<(), AppError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO token_balances \
             (owner_address, mint_address, raw_amount, ui_amount, decimals, slot, \
              observed_at, updated_at) ",
        );
        builder.push_values(records, |mut b, record| {
            Self::bind_record(&mut b, record);
        });
        builder.push(
            " ON CONFLICT (owner_address, mint_address) DO UPDATE SET \
             raw_amount = EXCLUDED.raw_amount, \
             ui_amount = EXCLUDED.ui_amount, \
             decimals = EXCLUDED.decimals, \
             slot = EXCLUDED.slot, \
             observed_at = EXCLUDED.observed_at, \
             updated_at = NOW()",
        );

        builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::from(e)))?;
        Ok(())
    }

    #[instrument(skip(self, keys), fields(count = keys.len()))]
    async fn fetch_existing(&self, keys: &[BalanceKey]) -> Result<Vec<BalanceKey>, AppError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Postgres>::new(
            "SELECT owner_address, mint_address FROM token_balances \
             WHERE (owner_address, mint_address) IN ",
        );
        builder.push_tuples(keys, |mut b, key| {
            b.push_bind(&key.owner).push_bind(&key.mint);
        });

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Ok(rows
            .iter()
            .map(|row| {
                BalanceKey::new(
                    row.get::<String, _>("owner_address"),
                    row.get::<String, _>("mint_address"),
                )
            })
            .collect())
    }

    #[instrument(skip(self, records), fields(count = records.len()))]
    async fn insert_batch(&self, records: &[BalanceRecord]) -> Result<(), AppError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO token_balances \
             (owner_address, mint_address, raw_amount, ui_amount, decimals, slot, \
              observed_at, updated_at) ",
        );
        builder.push_values(records, |mut b, record| {
            Self::bind_record(&mut b, record);
        });

        builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::from(e)))?;
        Ok(())
    }

    #[instrument(skip(self, records), fields(count = records.len()))]
    async fn update_chunk(&self, records: &[BalanceRecord]) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Transaction(e.to_string())))?;

        // Updates apply individually; any failure returns early and the
        // dropped transaction rolls the whole chunk back.
        for record in records {
            sqlx::query(UPDATE_ROW_SQL)
                .bind(record.raw_amount as i64)
                .bind(record.ui_amount)
                .bind(i16::from(record.decimals))
                .bind(record.slot as i64)
                .bind(record.observed_at)
                .bind(&record.owner)
                .bind(&record.mint)
                .execute(&mut *tx)
                .await
                .map_err(|e| AppError::Database(DatabaseError::from(e)))?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Transaction(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &BalanceKey) -> Result<Option<BalanceRecord>, AppError> {
        let row = sqlx::query(
            "SELECT owner_address, mint_address, raw_amount, ui_amount, decimals, slot, \
             observed_at FROM token_balances WHERE owner_address = $1 AND mint_address = $2",
        )
        .bind(&key.owner)
        .bind(&key.mint)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Ok(row.as_ref().map(Self::row_to_record))
    }

    #[instrument(skip(self, record))]
    async fn insert_one(&self, record: &BalanceRecord) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO token_balances \
             (owner_address, mint_address, raw_amount, ui_amount, decimals, slot, \
              observed_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())",
        )
        .bind(&record.owner)
        .bind(&record.mint)
        .bind(record.raw_amount as i64)
        .bind(record.ui_amount)
        .bind(i16::from(record.decimals))
        .bind(record.slot as i64)
        .bind(record.observed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;
        Ok(())
    }

    #[instrument(skip(self, record))]
    async fn update_one(&self, record: &BalanceRecord) -> Result<(), AppError> {
        sqlx::query(UPDATE_ROW_SQL)
            .bind(record.raw_amount as i64)
            .bind(record.ui_amount)
            .bind(i16::from(record.decimals))
            .bind(record.slot as i64)
            .bind(record.observed_at)
            .bind(&record.owner)
            .bind(&record.mint)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::from(e)))?;
        Ok(())
    }
}
