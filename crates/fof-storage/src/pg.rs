//! Postgres-backed store. Expects an existing table:
//!
//! ```sql
//! CREATE TABLE opportunities (
//!     id UUID PRIMARY KEY,
//!     name TEXT NOT NULL UNIQUE,
//!     record JSONB NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fof_core::{Opportunity, StoredOpportunity};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use uuid::Uuid;

use crate::store::{OpportunityStore, StoreError};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    fn row_to_stored(row: &PgRow) -> Result<StoredOpportunity, StoreError> {
        let id: Uuid = row.try_get("id")?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
        let Json(record): Json<Opportunity> = row.try_get("record")?;
        Ok(StoredOpportunity {
            id,
            created_at,
            updated_at,
            record,
        })
    }
}

#[async_trait]
impl OpportunityStore for PgStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<StoredOpportunity>, StoreError> {
        let row = sqlx::query(
            "SELECT id, record, created_at, updated_at FROM opportunities WHERE name = $1 LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_stored).transpose()
    }

    async fn insert(&self, record: &Opportunity) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO opportunities (id, name, record, created_at, updated_at) VALUES ($1, $2, $3, $4, $4)",
        )
        .bind(id)
        .bind(&record.name)
        .bind(Json(record))
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn update(&self, id: Uuid, record: &Opportunity) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE opportunities SET name = $2, record = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(id)
        .bind(&record.name)
        .bind(Json(record))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<StoredOpportunity>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, record, created_at, updated_at FROM opportunities ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_stored).collect()
    }
}
