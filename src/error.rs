use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

/// Core error taxonomy. Raw `std::io::Error` / `serde_json::Error` never cross a
/// public boundary: each store operation logs the underlying failure once and
/// maps it to one of these kinds.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("not found")] NotFound,
    #[error("already exists")] AlreadyExists,
    #[error("store unavailable")] Unavailable,
    #[error("io failure: {0}")] Io(String),
    #[error("malformed secrets file: {0}")] Parse(String),
    #[error("malformed secret encoding")] SecretFormat,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("service unavailable")] Unavailable,
    #[error("unauthorized")] Unauthorized,
    #[error("too many requests")] RateLimited,
    #[error("{0}")] BadRequest(String),
    #[error("internal error")] Internal,
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::NotFound,
            StoreError::AlreadyExists => ApiError::Conflict,
            StoreError::Unavailable => ApiError::Unavailable,
            StoreError::Io(_) | StoreError::Parse(_) | StoreError::SecretFormat => ApiError::Internal,
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;
        let status = match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        HttpResponse::build(status).json(ApiErrorBody { error: self.to_string() })
    }
}
