//! Inventory scope ("system") model. Read-only to the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Target inventory scope for an import.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct System {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}
