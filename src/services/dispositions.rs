//! Operator-driven finding disposition transitions.
//!
//! Dispositions are owned by the server: the pipeline never writes them, and
//! every transition is validated against the graph before it lands. A
//! non-open disposition requires a justification.

use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::finding::{Disposition, Finding};

/// Validate a requested transition, returning an error a client can act on.
pub fn validate_transition(
    from: Disposition,
    to: Disposition,
    justification: Option<&str>,
) -> Result<(), AppError> {
    if !from.can_transition_to(&to) {
        return Err(AppError::InvalidTransition(format!(
            "Cannot transition disposition from {from:?} to {to:?}"
        )));
    }

    if to != Disposition::Open && justification.map_or(true, |j| j.trim().is_empty()) {
        return Err(AppError::Validation(
            "A non-open disposition requires a justification".to_string(),
        ));
    }

    Ok(())
}

/// Apply an operator disposition transition to a finding.
pub async fn transition(
    pool: &PgPool,
    finding_id: Uuid,
    to: Disposition,
    justification: Option<&str>,
) -> Result<Finding, AppError> {
    let current = sqlx::query_scalar::<_, Disposition>(
        "SELECT disposition FROM findings WHERE id = $1",
    )
    .bind(finding_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Finding not found".to_string()))?;

    validate_transition(current, to, justification)?;

    let finding = sqlx::query_as::<_, Finding>(
        "UPDATE findings SET disposition = $2, updated_at = NOW() \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(finding_id)
    .bind(to)
    .fetch_one(pool)
    .await?;

    tracing::info!(
        finding_id = %finding_id,
        from = ?current,
        to = ?to,
        "Finding disposition changed"
    );

    Ok(finding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_to_resolved_requires_justification() {
        let err =
            validate_transition(Disposition::Open, Disposition::Resolved, None).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = validate_transition(Disposition::Open, Disposition::Resolved, Some("  "))
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        validate_transition(
            Disposition::Open,
            Disposition::Resolved,
            Some("Patched in maintenance window"),
        )
        .unwrap();
    }

    #[test]
    fn reopening_needs_no_justification() {
        validate_transition(Disposition::FalsePositive, Disposition::Open, None).unwrap();
    }

    #[test]
    fn lateral_non_open_transitions_rejected() {
        let err = validate_transition(
            Disposition::AcceptedRisk,
            Disposition::FalsePositive,
            Some("nope"),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
    }

    #[test]
    fn self_transition_rejected() {
        let err =
            validate_transition(Disposition::Open, Disposition::Open, None).unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
    }
}
