//! Rendering denials and middleware errors for axum.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tower::BoxError;
use tracing::{error, warn};

use crate::error::StoreError;
use crate::ratelimit::Denial;

impl IntoResponse for Denial {
    fn into_response(self) -> Response {
        self.into_http_response()
    }
}

/// Error handler for axum's `HandleErrorLayer`.
///
/// Renders a thrown [`Denial`] with its status, headers and body. A counter
/// store failure becomes `503 Service Unavailable`; anything else is a 500.
pub async fn handle_error(err: BoxError) -> Response {
    let err = match err.downcast::<Denial>() {
        Ok(denial) => return denial.into_response(),
        Err(err) => err,
    };

    match err.downcast::<StoreError>() {
        Ok(store_error) => {
            warn!(error = %store_error, "Rate limit store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Rate limit store unavailable",
            )
                .into_response()
        }
        Err(err) => {
            error!(error = %err, "Unhandled middleware error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal error: {}", err),
            )
                .into_response()
        }
    }
}
