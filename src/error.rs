use std::collections::HashMap;

use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::repo::RepoError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("validation failed")]
    Validation(HashMap<String, String>),
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("bad request")]
    BadRequest,
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("too many failed attempts")]
    Locked { retry_after_secs: u64 },
    #[error("internal error")]
    Internal,
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound,
            RepoError::Conflict => ApiError::Conflict,
            RepoError::Invalid { field, message } => {
                ApiError::Validation(HashMap::from([(field, message)]))
            }
            RepoError::Unavailable(msg) => {
                log::error!("store unavailable: {msg}");
                ApiError::Internal
            }
            RepoError::Internal(msg) => {
                log::error!("store error: {msg}");
                ApiError::Internal
            }
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;
        let status = match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::BadRequest => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Locked { .. } => StatusCode::LOCKED,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let fields = match self {
            ApiError::Validation(map) => Some(map.clone()),
            _ => None,
        };
        let retry_after_secs = match self {
            ApiError::Locked { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };
        HttpResponse::build(status).json(ApiErrorBody {
            error: self.to_string(),
            fields,
            retry_after_secs,
        })
    }
}
