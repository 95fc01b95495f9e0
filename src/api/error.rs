//! Error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::ShopError;

impl ShopError {
    pub fn status(&self) -> StatusCode {
        match self {
            ShopError::ProductNotFound(_) | ShopError::OrderNotFound(_) | ShopError::NotInBasket(_) | ShopError::AccountNotFound => StatusCode::NOT_FOUND,
            ShopError::InsufficientStock { .. } | ShopError::Conflict(_) => StatusCode::CONFLICT,
            ShopError::InvalidQuantity | ShopError::Validation(_) => StatusCode::BAD_REQUEST,
            ShopError::InvalidCredentials | ShopError::Unauthorized => StatusCode::UNAUTHORIZED,
            ShopError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ShopError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, %status, "request rejected");
        }
        // storage details stay in the log
        let message = match self {
            ShopError::Storage(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ShopError::ProductNotFound(1).status(), StatusCode::NOT_FOUND);
        assert_eq!(ShopError::InsufficientStock { product: 1, available: 0, requested: 1 }.status(), StatusCode::CONFLICT);
        assert_eq!(ShopError::InvalidQuantity.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ShopError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ShopError::Storage("boom".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
