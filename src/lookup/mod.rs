// src/lookup/mod.rs
// Read-only lookup collaborator for legislative records

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

pub mod sqlite;

pub use sqlite::SqliteLookup;

/// A piece of legislation as stored in the Bills table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Bill {
    pub code: String,
    pub title: String,
    pub status: String,
    pub summary: String,
    pub committee: Option<String>,
    pub last_action_at: DateTime<Utc>,
}

/// A state contract row, used only for side-channel context assembly.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Contract {
    pub id: String,
    pub vendor: String,
    pub department: String,
    pub description: String,
    pub amount: f64,
}

/// Read-only queries the chat pipeline issues against the hosted store.
///
/// Implementations are best-effort collaborators: failures surface as
/// `ChatError::Lookup`, which callers treat as "no data" and keep the
/// conversation moving.
#[async_trait]
pub trait LegislativeLookup: Send + Sync {
    /// Batched fetch by exact code list (primary citation resolution).
    async fn bills_by_codes(&self, codes: &[String]) -> Result<Vec<Bill>, ChatError>;

    /// Bills sharing a committee, excluding one code, most recent action first
    /// (related-entity resolution).
    async fn bills_by_committee(
        &self,
        committee: &str,
        exclude_code: &str,
        limit: usize,
    ) -> Result<Vec<Bill>, ChatError>;

    /// Single-row contract fetch (side-channel context assembly).
    async fn contract_by_id(&self, id: &str) -> Result<Option<Contract>, ChatError>;

    /// Sibling contracts by vendor.
    async fn contracts_by_vendor(
        &self,
        vendor: &str,
        limit: usize,
    ) -> Result<Vec<Contract>, ChatError>;

    /// Sibling contracts by department.
    async fn contracts_by_department(
        &self,
        department: &str,
        limit: usize,
    ) -> Result<Vec<Contract>, ChatError>;
}
