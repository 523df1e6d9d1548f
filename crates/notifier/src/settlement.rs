//! Write-back to the business row once its notification has gone out.
//!
//! The update is conditional on the timestamp column still being NULL, so a
//! repeated settlement (late success, manual re-run) changes nothing.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::Mutex;

use relay_common::config::SettlementTarget;
use relay_common::types::SourceRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Applied,
    /// The row was already marked, or does not exist.
    Unchanged,
}

#[async_trait]
pub trait Settlement: Send + Sync {
    async fn settle(
        &self,
        target: &SettlementTarget,
        source: &SourceRef,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Settled>;
}

pub struct PgSettlement {
    pool: PgPool,
}

impl PgSettlement {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Settlement for PgSettlement {
    async fn settle(
        &self,
        target: &SettlementTarget,
        source: &SourceRef,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Settled> {
        target.validate()?;

        let sql = format!(
            r#"UPDATE "{table}" SET "{status}" = $1, "{ts}" = $2 WHERE id::text = $3 AND "{ts}" IS NULL"#,
            table = target.table,
            status = target.status_column,
            ts = target.timestamp_column,
        );

        let result = sqlx::query(&sql)
            .bind(&target.status_value)
            .bind(at)
            .bind(&source.id)
            .execute(&self.pool)
            .await?;

        Ok(if result.rows_affected() > 0 {
            Settled::Applied
        } else {
            Settled::Unchanged
        })
    }
}

/// A settled source row as seen by [`MemorySettlement`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledRow {
    pub status: String,
    pub notified_at: DateTime<Utc>,
}

/// In-process settlement used by tests and single-node setups.
#[derive(Default)]
pub struct MemorySettlement {
    rows: Mutex<HashMap<(String, String), SettledRow>>,
}

impl MemorySettlement {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn row(&self, table: &str, id: &str) -> Option<SettledRow> {
        self.rows
            .lock()
            .await
            .get(&(table.to_string(), id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl Settlement for MemorySettlement {
    async fn settle(
        &self,
        target: &SettlementTarget,
        source: &SourceRef,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Settled> {
        let mut rows = self.rows.lock().await;
        let key = (target.table.clone(), source.id.clone());
        if rows.contains_key(&key) {
            return Ok(Settled::Unchanged);
        }
        rows.insert(
            key,
            SettledRow {
                status: target.status_value.clone(),
                notified_at: at,
            },
        );
        Ok(Settled::Applied)
    }
}
