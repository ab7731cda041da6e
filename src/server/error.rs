//! Request errors and their plain-text responses

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use crate::store::StoreError;

/// Errors that end a request early
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
  #[error("invalid request")]
  InvalidRequest,

  #[error("invalid cred")]
  InvalidCred,

  #[error("missing key")]
  MissingKey,

  #[error("invalid method")]
  InvalidMethod,

  #[error("no such key in store")]
  NoSuchKey,

  #[error("key cannot be empty space")]
  EmptyKey,

  #[error("invalid utf-8 in request")]
  InvalidEncoding,

  #[error("internal error")]
  Store(#[from] StoreError),
}

impl ApiError {
  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::InvalidRequest
      | ApiError::InvalidEncoding
      | ApiError::MissingKey
      | ApiError::EmptyKey => StatusCode::BAD_REQUEST,
      ApiError::InvalidCred => StatusCode::UNAUTHORIZED,
      ApiError::InvalidMethod => StatusCode::METHOD_NOT_ALLOWED,
      ApiError::NoSuchKey => StatusCode::NOT_FOUND,
      ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    if let ApiError::Store(err) = &self {
      error!(error = %err, "Store failure");
    }

    // Error bodies end with a newline, success bodies do not.
    (self.status(), format!("{}\n", self)).into_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_codes() {
    assert_eq!(ApiError::InvalidRequest.status(), StatusCode::BAD_REQUEST);
    assert_eq!(ApiError::InvalidCred.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(ApiError::MissingKey.status(), StatusCode::BAD_REQUEST);
    assert_eq!(ApiError::InvalidMethod.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(ApiError::NoSuchKey.status(), StatusCode::NOT_FOUND);
    assert_eq!(ApiError::EmptyKey.status(), StatusCode::BAD_REQUEST);
    assert_eq!(ApiError::InvalidEncoding.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
      ApiError::Store(StoreError::LockPoisoned).status(),
      StatusCode::INTERNAL_SERVER_ERROR
    );
  }

  #[test]
  fn test_into_response() {
    let response = ApiError::InvalidCred.into_response();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
      response.headers()["content-type"],
      "text/plain; charset=utf-8"
    );
  }
}
