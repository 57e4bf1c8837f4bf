use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::dashboard::HistoryError;
use crate::session::AuthError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("A test is already running")]
    RunActive,

    #[error("No test is running")]
    NotRunning,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    History(#[from] HistoryError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::RunActive | ApiError::NotRunning => StatusCode::CONFLICT,
            ApiError::Auth(e) => match e {
                AuthError::InvalidCredentials | AuthError::NotSignedIn => StatusCode::UNAUTHORIZED,
                AuthError::EmailTaken => StatusCode::CONFLICT,
                AuthError::InvalidEmail | AuthError::WeakPassword { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                AuthError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::History(e) => match e {
                HistoryError::SignInRequired => StatusCode::UNAUTHORIZED,
                HistoryError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
