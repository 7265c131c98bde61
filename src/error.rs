use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// The single error taxonomy shared by both protocol adapters.
///
/// REST maps each variant through `IntoResponse`; gRPC maps the same
/// variant through `From<&HephaestusError> for tonic::Status`.
#[derive(Debug, Error)]
pub enum HephaestusError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("principal {principal} is missing required role '{role}'")]
    Authorization { principal: String, role: String },
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("operation timed out: {0}")]
    Timeout(String),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("integrity check failed: {0}")]
    Integrity(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl HephaestusError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HephaestusError::Authentication(_) => StatusCode::UNAUTHORIZED,
            HephaestusError::Authorization { .. } => StatusCode::FORBIDDEN,
            HephaestusError::Validation(_) => StatusCode::BAD_REQUEST,
            HephaestusError::NotFound(_) => StatusCode::NOT_FOUND,
            HephaestusError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            HephaestusError::Execution(_) | HephaestusError::Integrity(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            HephaestusError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Audit status this error corresponds to, or `None` when the failure
    /// never reaches the point where it would be audited (pure validation).
    pub fn audit_status(&self) -> Option<&'static str> {
        match self {
            HephaestusError::Authentication(_) | HephaestusError::Authorization { .. } => {
                Some("denied")
            }
            HephaestusError::Validation(_) => None,
            _ => Some("failed"),
        }
    }
}

impl IntoResponse for HephaestusError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

impl From<&HephaestusError> for tonic::Status {
    fn from(err: &HephaestusError) -> Self {
        match err {
            HephaestusError::Authentication(msg) => tonic::Status::unauthenticated(msg.clone()),
            HephaestusError::Authorization { .. } => {
                tonic::Status::permission_denied(err.to_string())
            }
            HephaestusError::Validation(msg) => tonic::Status::invalid_argument(msg.clone()),
            HephaestusError::NotFound(msg) => tonic::Status::not_found(msg.clone()),
            HephaestusError::Timeout(msg) => tonic::Status::deadline_exceeded(msg.clone()),
            HephaestusError::Execution(msg) | HephaestusError::Integrity(msg) => {
                tonic::Status::internal(msg.clone())
            }
            HephaestusError::Internal(msg) => tonic::Status::internal(msg.clone()),
        }
    }
}

impl From<HephaestusError> for tonic::Status {
    fn from(err: HephaestusError) -> Self {
        tonic::Status::from(&err)
    }
}

pub type HephaestusResult<T> = Result<T, HephaestusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_failure_maps_to_forbidden_and_denied() {
        let err = HephaestusError::Authorization {
            principal: "svc-a".into(),
            role: "cleanup".into(),
        };
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(err.audit_status(), Some("denied"));
    }

    #[test]
    fn validation_failure_is_never_audited() {
        let err = HephaestusError::Validation("bad strategy".into());
        assert_eq!(err.audit_status(), None);
    }
}
