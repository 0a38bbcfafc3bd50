//! Remediation plan queries for the read-side endpoints.

use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::pagination::{ListQuery, Paged};
use crate::models::remediation_plan::{PlanStatus, RemediationPlan, RemediationPlanDetail};

/// Filters for the plan listing endpoint.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct PlanFilters {
    pub system_id: Option<Uuid>,
    pub status: Option<PlanStatus>,
}

/// List plans with optional system/status filters, newest first.
pub async fn list(
    pool: &PgPool,
    filters: &PlanFilters,
    query: &ListQuery,
) -> Result<Paged<RemediationPlan>, AppError> {
    let mut conditions: Vec<String> = Vec::new();
    let mut bind_idx: u32 = 1;

    if filters.system_id.is_some() {
        conditions.push(format!("system_id = ${bind_idx}"));
        bind_idx += 1;
    }
    if filters.status.is_some() {
        conditions.push(format!("status = ${bind_idx}"));
        bind_idx += 1;
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM remediation_plans {where_clause}");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(system_id) = filters.system_id {
        count_query = count_query.bind(system_id);
    }
    if let Some(status) = filters.status {
        count_query = count_query.bind(status);
    }
    let total = count_query.fetch_one(pool).await?;

    let list_sql = format!(
        "SELECT * FROM remediation_plans \
         {where_clause} \
         ORDER BY created_at DESC \
         LIMIT ${bind_idx} OFFSET ${}",
        bind_idx + 1,
    );

    let mut list_query = sqlx::query_as::<_, RemediationPlan>(&list_sql);
    if let Some(system_id) = filters.system_id {
        list_query = list_query.bind(system_id);
    }
    if let Some(status) = filters.status {
        list_query = list_query.bind(status);
    }
    let plans = list_query
        .bind(query.limit())
        .bind(query.offset())
        .fetch_all(pool)
        .await?;

    Ok(Paged::new(plans, total, query))
}

/// Get one plan with its linked finding and asset ids.
pub async fn get_detail(pool: &PgPool, id: Uuid) -> Result<RemediationPlanDetail, AppError> {
    let plan = sqlx::query_as::<_, RemediationPlan>(
        "SELECT * FROM remediation_plans WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Remediation plan not found".to_string()))?;

    let finding_ids = sqlx::query_scalar::<_, Uuid>(
        "SELECT finding_id FROM remediation_plan_findings WHERE plan_id = $1 ORDER BY finding_id",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let asset_ids = sqlx::query_scalar::<_, Uuid>(
        "SELECT DISTINCT f.asset_id \
         FROM remediation_plan_findings pf \
         JOIN findings f ON f.id = pf.finding_id \
         WHERE pf.plan_id = $1 AND f.asset_id IS NOT NULL \
         ORDER BY f.asset_id",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    Ok(RemediationPlanDetail {
        plan,
        finding_ids,
        asset_ids,
    })
}
