//! Inventoried host/component model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// An inventoried host within one system scope.
///
/// `host_key` is the matching identity used by the provisioner (IP, hostname,
/// or asset tag — in that precedence) and carries the
/// `UNIQUE (system_id, host_key)` constraint that makes concurrent
/// provisioning race-safe.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Asset {
    pub id: Uuid,
    pub system_id: Uuid,
    pub host_key: String,
    pub ip_address: Option<String>,
    pub hostname: Option<String>,
    pub asset_tag: Option<String>,
    pub operating_system: Option<String>,
    pub created_from_job_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
