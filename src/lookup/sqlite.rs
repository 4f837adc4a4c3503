// src/lookup/sqlite.rs
// sqlx-backed implementation of the lookup collaborator

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;

use super::{Bill, Contract, LegislativeLookup};
use crate::error::ChatError;

pub struct SqliteLookup {
    pool: SqlitePool,
}

impl SqliteLookup {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bills (
                code TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                status TEXT NOT NULL,
                summary TEXT NOT NULL,
                committee TEXT,
                last_action_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contracts (
                id TEXT PRIMARY KEY,
                vendor TEXT NOT NULL,
                department TEXT NOT NULL,
                description TEXT NOT NULL,
                amount REAL NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(SqliteLookup { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl LegislativeLookup for SqliteLookup {
    async fn bills_by_codes(&self, codes: &[String]) -> Result<Vec<Bill>, ChatError> {
        if codes.is_empty() {
            return Ok(Vec::new());
        }
        // sqlite has no array binds; build the placeholder list by hand
        let placeholders = vec!["?"; codes.len()].join(", ");
        let sql = format!(
            "SELECT code, title, status, summary, committee, last_action_at \
             FROM bills WHERE UPPER(code) IN ({})",
            placeholders
        );
        let mut query = sqlx::query_as::<_, Bill>(&sql);
        for code in codes {
            query = query.bind(code.to_uppercase());
        }
        query.fetch_all(&self.pool).await.map_err(ChatError::lookup)
    }

    async fn bills_by_committee(
        &self,
        committee: &str,
        exclude_code: &str,
        limit: usize,
    ) -> Result<Vec<Bill>, ChatError> {
        sqlx::query_as::<_, Bill>(
            "SELECT code, title, status, summary, committee, last_action_at \
             FROM bills WHERE committee = ? AND UPPER(code) != ? \
             ORDER BY last_action_at DESC LIMIT ?",
        )
        .bind(committee)
        .bind(exclude_code.to_uppercase())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(ChatError::lookup)
    }

    async fn contract_by_id(&self, id: &str) -> Result<Option<Contract>, ChatError> {
        sqlx::query_as::<_, Contract>(
            "SELECT id, vendor, department, description, amount FROM contracts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ChatError::lookup)
    }

    async fn contracts_by_vendor(
        &self,
        vendor: &str,
        limit: usize,
    ) -> Result<Vec<Contract>, ChatError> {
        sqlx::query_as::<_, Contract>(
            "SELECT id, vendor, department, description, amount \
             FROM contracts WHERE vendor = ? LIMIT ?",
        )
        .bind(vendor)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(ChatError::lookup)
    }

    async fn contracts_by_department(
        &self,
        department: &str,
        limit: usize,
    ) -> Result<Vec<Contract>, ChatError> {
        sqlx::query_as::<_, Contract>(
            "SELECT id, vendor, department, description, amount \
             FROM contracts WHERE department = ? LIMIT ?",
        )
        .bind(department)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(ChatError::lookup)
    }
}
