//! Remediation plan routes: generation and read access.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::errors::{ApiResponse, AppError};
use crate::models::pagination::{ListQuery, Paged};
use crate::models::remediation_plan::{RemediationPlan, RemediationPlanDetail};
use crate::services::generator::{self, GenerateRequest, GenerateResult};
use crate::services::plans::{self, PlanFilters};
use crate::AppState;

/// POST /api/v1/remediation-plans/generate — group a completed job's findings
/// into remediation plans. Idempotent under identical options.
pub async fn generate(
    State(state): State<AppState>,
    Json(body): Json<GenerateRequest>,
) -> Result<Json<ApiResponse<GenerateResult>>, AppError> {
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    let result = generator::generate(&state.db, &body).await?;
    Ok(ApiResponse::success(result))
}

/// GET /api/v1/remediation-plans — list plans.
pub async fn list(
    State(state): State<AppState>,
    Query(pagination): Query<ListQuery>,
    Query(filters): Query<PlanFilters>,
) -> Result<Json<ApiResponse<Paged<RemediationPlan>>>, AppError> {
    let result = plans::list(&state.db, &filters, &pagination).await?;
    Ok(ApiResponse::success(result))
}

/// GET /api/v1/remediation-plans/:id — plan detail with linked ids.
pub async fn get_plan(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<RemediationPlanDetail>>, AppError> {
    let detail = plans::get_detail(&state.db, id).await?;
    Ok(ApiResponse::success(detail))
}
