use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::domain::{CompanyId, EntityKind, StudentId};
use super::eligibility::IneligibilityReason;
use super::repository::RepositoryError;
use super::validation::FieldViolation;

/// Machine-readable code carried in every error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidInput,
    Duplicate,
    InvalidCredentials,
    UnableToPerform,
}

impl ErrorCode {
    pub const fn value(self) -> u16 {
        match self {
            ErrorCode::InvalidInput => 1001,
            ErrorCode::Duplicate => 1002,
            ErrorCode::InvalidCredentials => 1003,
            ErrorCode::UnableToPerform => 1004,
        }
    }
}

/// Error raised by registry operations.
#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    #[error("invalid input ({} violation(s))", .0.len())]
    InvalidInput(Vec<FieldViolation>),
    #[error("no such {kind} exists: {id}")]
    NotFound { kind: EntityKind, id: String },
    #[error(
        "student {student_id} does not meet the requirements of company {company_id}: {}",
        join_reasons(.reasons)
    )]
    Ineligible {
        student_id: StudentId,
        company_id: CompanyId,
        reasons: Vec<IneligibilityReason>,
    },
    #[error("no registration exists for student {student_id} at company {company_id}")]
    NoRegistrationFound {
        student_id: StudentId,
        company_id: CompanyId,
    },
    #[error("student {student_id} is already registered with company {company_id}")]
    AlreadyRegistered {
        student_id: StudentId,
        company_id: CompanyId,
    },
    #[error("failed to persist {kind} {id}: {source}")]
    UpdateFailed {
        kind: EntityKind,
        id: String,
        #[source]
        source: RepositoryError,
    },
    #[error("unable to perform at this time: {0}")]
    Internal(#[from] RepositoryError),
}

fn join_reasons(reasons: &[IneligibilityReason]) -> String {
    reasons
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl PlacementError {
    pub fn not_found(kind: EntityKind, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn update_failed(kind: EntityKind, id: impl ToString, source: RepositoryError) -> Self {
        Self::UpdateFailed {
            kind,
            id: id.to_string(),
            source,
        }
    }

    /// Short label used as the `error` field of response bodies.
    pub fn label(&self) -> &'static str {
        match self {
            PlacementError::InvalidInput(_) => "Invalid Attributes",
            PlacementError::NotFound { .. } => "Not found",
            PlacementError::Ineligible { .. } => "Ineligible",
            PlacementError::NoRegistrationFound { .. } => "No Registration found",
            PlacementError::AlreadyRegistered { .. } => "Already registered",
            PlacementError::UpdateFailed { .. } => "Update Failed",
            PlacementError::Internal(_) => "Internal Error",
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            PlacementError::InvalidInput(_)
            | PlacementError::NotFound { .. }
            | PlacementError::Ineligible { .. }
            | PlacementError::NoRegistrationFound { .. } => ErrorCode::InvalidInput,
            PlacementError::AlreadyRegistered { .. } => ErrorCode::Duplicate,
            PlacementError::UpdateFailed { .. } | PlacementError::Internal(_) => {
                ErrorCode::UnableToPerform
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            PlacementError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            PlacementError::NotFound { .. } | PlacementError::NoRegistrationFound { .. } => {
                StatusCode::NOT_FOUND
            }
            PlacementError::AlreadyRegistered { .. } => StatusCode::CONFLICT,
            PlacementError::Ineligible { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            PlacementError::UpdateFailed { .. } | PlacementError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<Vec<FieldViolation>> for PlacementError {
    fn from(value: Vec<FieldViolation>) -> Self {
        Self::InvalidInput(value)
    }
}

impl IntoResponse for PlacementError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = json!({
            "error": self.label(),
            "message": self.to_string(),
            "errorCode": self.error_code().value(),
        });
        match &self {
            PlacementError::InvalidInput(violations) => {
                body["violations"] = json!(violations);
            }
            PlacementError::Ineligible { reasons, .. } => {
                body["reasons"] = json!(reasons);
            }
            _ => {}
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_input_body_lists_violations() {
        let error = PlacementError::InvalidInput(vec![FieldViolation::new("email", "is required")]);
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), 4096)
            .await
            .expect("read body");
        let body: serde_json::Value = serde_json::from_slice(&bytes).expect("json body");
        assert_eq!(body["errorCode"], 1001);
        assert_eq!(body["violations"][0]["field"], "email");
    }

    #[test]
    fn not_found_and_internal_use_distinct_statuses() {
        let missing = PlacementError::not_found(EntityKind::Company, "cmp-000001");
        let internal = PlacementError::Internal(RepositoryError::Unavailable("down".to_string()));

        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(missing.error_code().value(), 1001);
        assert_eq!(internal.error_code().value(), 1004);
        assert_eq!(missing.to_string(), "no such company exists: cmp-000001");
    }

    #[test]
    fn duplicate_registration_maps_to_conflict() {
        let error = PlacementError::AlreadyRegistered {
            student_id: StudentId("stu-1".to_string()),
            company_id: CompanyId("cmp-1".to_string()),
        };
        assert_eq!(error.status(), StatusCode::CONFLICT);
        assert_eq!(error.error_code(), ErrorCode::Duplicate);
    }
}
