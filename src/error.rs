use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Everything that can go wrong serving a comparison. Each variant maps to
/// the status the client sees; the body is always `{"error": ...}`.
#[derive(Debug, Error)]
pub enum CompareError {
    #[error("the face model on the server is not initialized")]
    NotReady,
    #[error("image file not found in request")]
    MissingImage,
    #[error("could not read the uploaded image: {0}")]
    InvalidUpload(String),
    #[error("failed to save the uploaded image")]
    Storage(#[source] std::io::Error),
    #[error("no face could be detected in your image")]
    NoFace,
    #[error("an error occurred while analysing the image: {0}")]
    Analysis(String),
}

impl CompareError {
    pub fn status(&self) -> StatusCode {
        match self {
            CompareError::NotReady | CompareError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CompareError::MissingImage
            | CompareError::InvalidUpload(_)
            | CompareError::NoFace
            | CompareError::Analysis(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for CompareError {
    fn into_response(self) -> Response {
        let status = self.status();
        match std::error::Error::source(&self) {
            Some(source) => log::error!("compare failed: {}: {}", self, source),
            None if status.is_server_error() => log::error!("compare failed: {}", self),
            None => log::warn!("compare rejected: {}", self),
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses() {
        assert_eq!(CompareError::NotReady.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            CompareError::Storage(std::io::Error::other("disk full")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(CompareError::MissingImage.status(), StatusCode::BAD_REQUEST);
        assert_eq!(CompareError::NoFace.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            CompareError::Analysis("boom".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn body_is_error_json() {
        let response = CompareError::NoFace.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "no face could be detected in your image");
    }
}
