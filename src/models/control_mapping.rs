//! Vulnerability-signature to compliance-control lookup. Read-only to the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One signature-to-control association.
///
/// `signature` is either a CVE id (`CVE-2024-1234`) or a scanner check id in
/// the `plugin:<id>` form; a signature may map to several controls via
/// multiple rows.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ControlMapping {
    pub id: Uuid,
    pub signature: String,
    pub control_id: String,
    pub created_at: DateTime<Utc>,
}
