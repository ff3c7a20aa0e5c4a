// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! User-facing error responses for the HTTP surface.
//!
//! Backend failures are turned into structured JSON bodies carrying a
//! friendly message and a reference code. The full, sanitized details go to
//! the log under the same reference so an operator can match them up.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use rand::Rng;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use crate::jackett::SearchError;
use crate::qbit::BackendError;

// =============================================================================
// ERROR REFERENCE CODE GENERATION
// =============================================================================

/// Generate a unique error reference code.
/// Format: ERR-YYYYMMDD-XXXXXX (e.g., ERR-20240115-A3F8K2)
pub fn generate_reference_code() -> String {
    let date = Utc::now().format("%Y%m%d");
    let mut rng = rand::thread_rng();
    let chars: Vec<char> = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789".chars().collect();
    let random: String = (0..6)
        .map(|_| chars[rng.gen_range(0..chars.len())])
        .collect();
    format!("ERR-{}-{}", date, random)
}

// =============================================================================
// USER-FACING ERROR TYPES
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "error_type", rename_all = "snake_case")]
pub enum UserError {
    /// Invalid request from client (400)
    InvalidRequest {
        message: String,
        reference: String,
        field: Option<String>,
    },

    /// Backend unreachable or answered with an error (502)
    BadGateway { message: String, reference: String },

    /// Backend did not answer in time (504)
    GatewayTimeout { message: String, reference: String },

    /// Backend keeps rejecting our session (503)
    ServiceUnavailable {
        message: String,
        reference: String,
        retry_after_secs: Option<u64>,
    },

    /// Internal server error (500)
    InternalError { message: String, reference: String },
}

impl UserError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            UserError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            UserError::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            UserError::GatewayTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            UserError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            UserError::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// User-facing error response structure (JSON format).
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: UserError,
    pub status: u16,
}

impl IntoResponse for UserError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let response = ErrorResponse {
            status: status.as_u16(),
            error: self,
        };

        let body = serde_json::to_string(&response).unwrap_or_else(|_| {
            r#"{"error":{"error_type":"internal_error","message":"An unexpected error occurred","reference":"ERR-FALLBACK"},"status":500}"#.to_string()
        });

        (status, [("content-type", "application/json")], body).into_response()
    }
}

// =============================================================================
// ERROR CONSTRUCTORS (WITH LOGGING)
// =============================================================================

impl UserError {
    /// A missing or malformed request field.
    pub fn invalid_request(user_message: &str, field: Option<&str>) -> Self {
        let reference = generate_reference_code();

        tracing::debug!(
            reference = %reference,
            field = ?field,
            "Invalid request"
        );

        Self::InvalidRequest {
            message: user_message.to_string(),
            reference,
            field: field.map(|s| s.to_string()),
        }
    }

    pub fn bad_gateway(service: &str, internal_details: &str) -> Self {
        let reference = generate_reference_code();
        let sanitized = sanitize_error_details(internal_details);

        tracing::error!(
            reference = %reference,
            service,
            internal_details = %sanitized,
            "Bad gateway"
        );

        Self::BadGateway {
            message: format!("The {} did not accept the request. Please try again later.", service),
            reference,
        }
    }

    pub fn gateway_timeout(service: &str, internal_details: &str) -> Self {
        let reference = generate_reference_code();
        let sanitized = sanitize_error_details(internal_details);

        tracing::error!(
            reference = %reference,
            service,
            internal_details = %sanitized,
            "Gateway timeout"
        );

        Self::GatewayTimeout {
            message: format!("The {} did not respond in time. Please try again.", service),
            reference,
        }
    }

    pub fn service_unavailable(service: &str, internal_details: &str) -> Self {
        let reference = generate_reference_code();
        let sanitized = sanitize_error_details(internal_details);

        tracing::error!(
            reference = %reference,
            service,
            internal_details = %sanitized,
            "Service unavailable"
        );

        Self::ServiceUnavailable {
            message: format!("The {} is temporarily unavailable. Please try again later.", service),
            reference,
            retry_after_secs: Some(60),
        }
    }

    /// Never exposes `internal_error` to the caller.
    pub fn internal_error(internal_error: &str) -> Self {
        let reference = generate_reference_code();
        let sanitized = sanitize_error_details(internal_error);

        tracing::error!(
            reference = %reference,
            internal_error = %sanitized,
            "Internal server error"
        );

        Self::InternalError {
            message: format!("An internal error occurred. Reference: {}", reference),
            reference,
        }
    }
}

// =============================================================================
// ERROR SANITIZATION
// =============================================================================

/// Patterns for sanitizing secrets out of logged error details.
static SANITIZE_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        // Credentials that travel in query strings, forms and cookies
        (Regex::new(r"(?i)apikey=[^\s&;]+").expect("API key param regex"), "apikey=[REDACTED]"),
        (Regex::new(r"SID=[^\s&;]+").expect("SID cookie regex"), "SID=[REDACTED]"),
        (Regex::new(r"(?i)password=[^\s&;]+").expect("Password regex"), "password=[REDACTED]"),
        (Regex::new(r"(?i)(?:user|username)=[^\s&;]+").expect("Username regex"), "username=[REDACTED]"),
        (Regex::new(r"Bearer [a-zA-Z0-9-._~+/]+=*").expect("Bearer token regex"), "Bearer [TOKEN_REDACTED]"),

        // Host file paths
        (Regex::new(r"/(?:home|usr|var|etc|opt|tmp|root)/[^\s]+").expect("Unix path regex"), "[PATH_REDACTED]"),

        // Panics and source locations
        (Regex::new(r"thread '[^']+' panicked at").expect("Panic regex"), "[PANIC_REDACTED]"),
        (Regex::new(r"at [^\s]+\.rs:\d+:\d+").expect("Rust location regex"), "[LOCATION_REDACTED]"),

        // Generic long alphanumeric strings (potential secrets)
        (Regex::new(r"\b[A-Za-z0-9]{32,}\b").expect("Long secret regex"), "[SECRET_REDACTED]"),
    ]
});

/// Remove credentials and host details from an error string before logging.
pub fn sanitize_error_details(error: &str) -> String {
    let mut result = error.to_string();

    for (pattern, replacement) in SANITIZE_PATTERNS.iter() {
        result = pattern.replace_all(&result, *replacement).to_string();
    }

    result
}

// =============================================================================
// ERROR MAPPING FROM INTERNAL ERRORS
// =============================================================================

const DOWNLOAD_CLIENT: &str = "download client";
const SEARCH_SERVICE: &str = "search service";

impl From<&BackendError> for UserError {
    fn from(error: &BackendError) -> Self {
        let details = error.to_string();
        match error {
            BackendError::Timeout { .. } => UserError::gateway_timeout(DOWNLOAD_CLIENT, &details),
            BackendError::Unauthorized { .. } | BackendError::ReauthExhausted { .. } => {
                UserError::service_unavailable(DOWNLOAD_CLIENT, &details)
            }
            BackendError::Connect { .. }
            | BackendError::Request { .. }
            | BackendError::Status { .. }
            | BackendError::Decode { .. } => UserError::bad_gateway(DOWNLOAD_CLIENT, &details),
        }
    }
}

impl From<BackendError> for UserError {
    fn from(error: BackendError) -> Self {
        UserError::from(&error)
    }
}

impl From<SearchError> for UserError {
    fn from(error: SearchError) -> Self {
        let details = error.to_string();
        match error {
            SearchError::Timeout => UserError::gateway_timeout(SEARCH_SERVICE, &details),
            _ => UserError::bad_gateway(SEARCH_SERVICE, &details),
        }
    }
}

// =============================================================================
// RESULT TYPE ALIAS
// =============================================================================

/// Result type that uses UserError for the error variant.
pub type ApiResult<T> = Result<T, UserError>;

// =============================================================================
// TESTS
// =============================================================================
