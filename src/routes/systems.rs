//! Inventory scope routes: system listing and per-system asset inventory.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use crate::errors::{ApiResponse, AppError};
use crate::models::asset::Asset;
use crate::models::pagination::{ListQuery, Paged};
use crate::models::system::System;
use crate::AppState;

/// GET /api/v1/systems — list inventory scopes.
pub async fn list(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<System>>>, AppError> {
    let systems = sqlx::query_as::<_, System>(
        "SELECT id, name, description, created_at FROM systems ORDER BY name",
    )
    .fetch_all(&state.db)
    .await?;
    Ok(ApiResponse::success(systems))
}

/// GET /api/v1/systems/:id — get one inventory scope.
pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<System>>, AppError> {
    let system = sqlx::query_as::<_, System>(
        "SELECT id, name, description, created_at FROM systems WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound("System not found".to_string()))?;
    Ok(ApiResponse::success(system))
}

/// GET /api/v1/systems/:id/assets — paged asset inventory for one scope.
pub async fn list_assets(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(pagination): Query<ListQuery>,
) -> Result<Json<ApiResponse<Paged<Asset>>>, AppError> {
    let total = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM assets WHERE system_id = $1",
    )
    .bind(id)
    .fetch_one(&state.db)
    .await?;

    let assets = sqlx::query_as::<_, Asset>(
        "SELECT * FROM assets WHERE system_id = $1 \
         ORDER BY host_key \
         LIMIT $2 OFFSET $3",
    )
    .bind(id)
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(&state.db)
    .await?;

    Ok(ApiResponse::success(Paged::new(assets, total, &pagination)))
}
