use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::balance::BalanceError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("a valid Telegram login is required")]
    Unauthorized,
    #[error("you are not a member of group {0}")]
    Forbidden(String),
    #[error("couldn't find group {0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Balance(#[from] BalanceError),
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Expenses already in the store that the calculator refuses.
    #[error("stored expenses are inconsistent: {0}")]
    StoredData(BalanceError),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) | ApiError::Store(StoreError::GroupNotFound(_)) => "not_found",
            ApiError::Validation(_) => "validation_error",
            ApiError::Balance(BalanceError::InvalidExpense { .. }) => "invalid_expense",
            ApiError::Balance(BalanceError::UnknownMember { .. }) => "unknown_member",
            ApiError::Store(_) => "store_error",
            ApiError::StoredData(_) => "inconsistent_data",
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) | ApiError::Store(StoreError::GroupNotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Validation(_) | ApiError::Balance(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Store(_) | ApiError::StoredData(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::InvalidReason;

    #[test]
    fn statuses_follow_the_error_kind() {
        assert_eq!(ApiError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::Store(StoreError::GroupNotFound("g".to_string())).status_code(),
            StatusCode::NOT_FOUND
        );
        let invalid = ApiError::from(BalanceError::InvalidExpense {
            expense_id: "e".to_string(),
            reason: InvalidReason::NoParticipants,
        });
        assert_eq!(invalid.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(invalid.code(), "invalid_expense");
        assert_eq!(invalid.to_string(), "expense e is invalid: it has no participants");
    }

    #[test]
    fn bad_stored_data_is_a_server_error() {
        let stored = ApiError::StoredData(BalanceError::UnknownMember {
            expense_id: "e".to_string(),
            member_id: "ghost".to_string(),
        });
        assert_eq!(stored.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(stored.code(), "inconsistent_data");
    }
}
