// src/error.rs

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use log::error;
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// When false, upstream failures are reported to clients without detail.
static EXPOSE_INTERNAL_DETAIL: AtomicBool = AtomicBool::new(false);

pub fn set_expose_internal_detail(expose: bool) {
    EXPOSE_INTERNAL_DETAIL.store(expose, Ordering::Relaxed);
}

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(pub Vec<FieldError>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Ok when nothing was collected, otherwise a validation error.
    pub fn into_result(self) -> Result<(), MarketplaceError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(MarketplaceError::Validation(self))
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

#[derive(Debug, Error)]
pub enum MarketplaceError {
    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} cannot move from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Upstream failure: {0}")]
    Upstream(#[from] StoreError),
}

impl MarketplaceError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.push(field, message);
        MarketplaceError::Validation(errors)
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        MarketplaceError::NotFound {
            entity,
            id: id.into(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            MarketplaceError::Validation(_) => "validation",
            MarketplaceError::NotFound { .. } => "not_found",
            MarketplaceError::InvalidTransition { .. } => "invalid_transition",
            MarketplaceError::Unauthorized(_) => "unauthorized",
            MarketplaceError::Forbidden(_) => "forbidden",
            MarketplaceError::Upstream(_) => "internal",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<&'a FieldErrors>,
}

impl ResponseError for MarketplaceError {
    fn status_code(&self) -> StatusCode {
        match self {
            MarketplaceError::Validation(_) => StatusCode::BAD_REQUEST,
            MarketplaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            MarketplaceError::InvalidTransition { .. } => StatusCode::CONFLICT,
            MarketplaceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            MarketplaceError::Forbidden(_) => StatusCode::FORBIDDEN,
            MarketplaceError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            MarketplaceError::Upstream(e) => {
                error!("Upstream failure while handling request: {}", e);
                if EXPOSE_INTERNAL_DETAIL.load(Ordering::Relaxed) {
                    e.to_string()
                } else {
                    "Internal server error".to_string()
                }
            }
            MarketplaceError::Validation(_) => "Validation failed".to_string(),
            other => other.to_string(),
        };
        let fields = match self {
            MarketplaceError::Validation(fields) => Some(fields),
            _ => None,
        };
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.kind(),
            message,
            fields,
        })
    }
}

pub type MarketplaceResult<T> = Result<T, MarketplaceError>;
