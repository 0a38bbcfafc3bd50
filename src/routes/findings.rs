//! Finding routes: operator disposition transitions.

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::errors::{ApiResponse, AppError};
use crate::models::finding::{DispositionUpdateRequest, Finding};
use crate::services::dispositions;
use crate::AppState;

/// PATCH /api/v1/findings/:id/disposition — operator disposition change.
pub async fn update_disposition(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<DispositionUpdateRequest>,
) -> Result<Json<ApiResponse<Finding>>, AppError> {
    let finding = dispositions::transition(
        &state.db,
        id,
        body.disposition,
        body.justification.as_deref(),
    )
    .await?;
    Ok(ApiResponse::success(finding))
}
