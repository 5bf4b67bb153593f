use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::entities::{amendment::AmendmentStatus, contract::ContractStatus};

/// Error body handed to the HTTP layer.
///
/// `details` carries the structured fields of domain errors so that callers
/// can render a precise message without parsing `message`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g. "Unprocessable Entity")
    pub error: String,
    /// Stable machine-readable code (e.g. "quantity_unavailable")
    pub code: String,
    /// Human-readable error description
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// RFC 3339 timestamp when the error was rendered
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Requested quantity {requested} is not available (available: {available})")]
    QuantityUnavailable { requested: i32, available: i32 },

    #[error(
        "Cannot reduce {asset_name} by {requested}: only {allocated} currently allocated"
    )]
    ReductionExceedsQuantity {
        asset_name: String,
        requested: i32,
        allocated: i32,
    },

    #[error("Contract has no line for {asset_name}; cannot reduce by {requested}")]
    InvalidReduction {
        asset_name: String,
        requested: i32,
        allocated: i32,
    },

    #[error("New end date {new_end_date} must be after current end date {current_end_date}")]
    InvalidExtension {
        current_end_date: NaiveDate,
        new_end_date: NaiveDate,
    },

    #[error("Amendment {id} is {status} and can no longer be modified")]
    AmendmentImmutable { id: Uuid, status: AmendmentStatus },

    #[error("Amendment {id} is {status} and cannot be canceled")]
    AmendmentNotCancelable { id: Uuid, status: AmendmentStatus },

    #[error("Contract {code} is {status} and cannot be activated")]
    ContractNotActivatable { code: String, status: ContractStatus },

    #[error("Contract {code} is {status} and can no longer be edited")]
    ContractNotEditable { code: String, status: ContractStatus },

    #[error("Contract {code} is {status}; amendments require an active contract")]
    ContractNotActive { code: String, status: ContractStatus },

    #[error("Contract {code} is {status} and cannot be closed this way")]
    ContractNotClosable { code: String, status: ContractStatus },

    #[error("Lot {lot_code} still has active allocations")]
    LotHasActiveAllocations { lot_code: String },

    #[error("Lot {lot_code} has {allocated} units allocated; total cannot drop to {requested_total}")]
    LotQuantityBelowAllocated {
        lot_code: String,
        requested_total: i32,
        allocated: i32,
    },

    #[error(
        "Amendment {amendment_id} cannot be reverted: {requested} units needed, {available} available"
    )]
    ReversalUnavailable {
        amendment_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("Released {released} of {requested} units for line item {item_id}")]
    ReleaseShortfall {
        item_id: Uuid,
        requested: i32,
        released: i32,
    },

    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::InvalidOperation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::QuantityUnavailable { .. }
            | Self::ReductionExceedsQuantity { .. }
            | Self::InvalidReduction { .. }
            | Self::InvalidExtension { .. }
            | Self::AmendmentImmutable { .. }
            | Self::AmendmentNotCancelable { .. }
            | Self::ContractNotActivatable { .. }
            | Self::ContractNotEditable { .. }
            | Self::ContractNotActive { .. }
            | Self::ContractNotClosable { .. }
            | Self::LotHasActiveAllocations { .. }
            | Self::LotQuantityBelowAllocated { .. }
            | Self::ReversalUnavailable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::DatabaseError(_)
            | Self::InternalError(_)
            | Self::ReleaseShortfall { .. }
            | Self::ConsistencyViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::InvalidOperation(_) => "invalid_operation",
            Self::Conflict(_) => "conflict",
            Self::InternalError(_) => "internal_error",
            Self::QuantityUnavailable { .. } => "quantity_unavailable",
            Self::ReductionExceedsQuantity { .. } => "reduction_exceeds_quantity",
            Self::InvalidReduction { .. } => "invalid_reduction",
            Self::InvalidExtension { .. } => "invalid_extension",
            Self::AmendmentImmutable { .. } => "amendment_immutable",
            Self::AmendmentNotCancelable { .. } => "amendment_not_cancelable",
            Self::ContractNotActivatable { .. } => "contract_not_activatable",
            Self::ContractNotEditable { .. } => "contract_not_editable",
            Self::ContractNotActive { .. } => "contract_not_active",
            Self::ContractNotClosable { .. } => "contract_not_closable",
            Self::LotHasActiveAllocations { .. } => "lot_has_active_allocations",
            Self::LotQuantityBelowAllocated { .. } => "lot_quantity_below_allocated",
            Self::ReversalUnavailable { .. } => "reversal_unavailable",
            Self::ReleaseShortfall { .. } => "release_shortfall",
            Self::ConsistencyViolation(_) => "consistency_violation",
        }
    }

    /// Structured fields carried by domain errors.
    pub fn details(&self) -> Option<Value> {
        let details = match self {
            Self::QuantityUnavailable {
                requested,
                available,
            } => json!({ "requested": requested, "available": available }),
            Self::ReductionExceedsQuantity {
                asset_name,
                requested,
                allocated,
            }
            | Self::InvalidReduction {
                asset_name,
                requested,
                allocated,
            } => json!({
                "asset_name": asset_name,
                "requested": requested,
                "allocated": allocated,
            }),
            Self::InvalidExtension {
                current_end_date,
                new_end_date,
            } => json!({
                "current_end_date": current_end_date,
                "new_end_date": new_end_date,
            }),
            Self::AmendmentImmutable { id, status } | Self::AmendmentNotCancelable { id, status } => {
                json!({ "id": id, "status": status })
            }
            Self::ContractNotActivatable { code, status }
            | Self::ContractNotEditable { code, status }
            | Self::ContractNotActive { code, status }
            | Self::ContractNotClosable { code, status } => {
                json!({ "code": code, "status": status })
            }
            Self::LotHasActiveAllocations { lot_code } => json!({ "lot_code": lot_code }),
            Self::LotQuantityBelowAllocated {
                lot_code,
                requested_total,
                allocated,
            } => json!({
                "lot_code": lot_code,
                "requested_total": requested_total,
                "allocated": allocated,
            }),
            Self::ReversalUnavailable {
                amendment_id,
                requested,
                available,
            } => json!({
                "amendment_id": amendment_id,
                "requested": requested,
                "available": available,
            }),
            _ => return None,
        };
        Some(details)
    }

    /// Errors that mean the allocation ledger no longer adds up. These must
    /// not be handled by ordinary business flows.
    pub fn is_consistency_failure(&self) -> bool {
        matches!(
            self,
            Self::ReleaseShortfall { .. } | Self::ConsistencyViolation(_)
        )
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::ReleaseShortfall { .. } | Self::ConsistencyViolation(_) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.error_code().to_string(),
            message: self.response_message(),
            details: self.details(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn quantity_unavailable_renders_structured_422() {
        let response = ServiceError::QuantityUnavailable {
            requested: 30,
            available: 22,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.code, "quantity_unavailable");
        assert_eq!(
            payload.details,
            Some(json!({ "requested": 30, "available": 22 }))
        );
    }

    #[tokio::test]
    async fn database_errors_hide_details() {
        let response = ServiceError::DatabaseError(DbErr::Custom("secret dsn".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.message, "Database error");
        assert!(payload.details.is_none());
    }

    #[test]
    fn reduction_error_carries_asset_and_quantities() {
        let err = ServiceError::ReductionExceedsQuantity {
            asset_name: "Scaffold frame".into(),
            requested: 20,
            allocated: 15,
        };
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            err.details(),
            Some(json!({ "asset_name": "Scaffold frame", "requested": 20, "allocated": 15 }))
        );
        assert_eq!(
            err.to_string(),
            "Cannot reduce Scaffold frame by 20: only 15 currently allocated"
        );
    }

    #[test]
    fn state_machine_errors_serialize_status() {
        let id = Uuid::nil();
        let err = ServiceError::AmendmentImmutable {
            id,
            status: AmendmentStatus::Active,
        };
        assert_eq!(err.details(), Some(json!({ "id": id, "status": "active" })));
        assert_eq!(
            err.to_string(),
            format!("Amendment {} is active and can no longer be modified", id)
        );
    }

    #[test]
    fn consistency_failures_are_flagged() {
        assert!(ServiceError::ConsistencyViolation("missing lot".into()).is_consistency_failure());
        assert!(ServiceError::ReleaseShortfall {
            item_id: Uuid::nil(),
            requested: 5,
            released: 3
        }
        .is_consistency_failure());
        assert!(!ServiceError::QuantityUnavailable {
            requested: 1,
            available: 0
        }
        .is_consistency_failure());
    }
}
