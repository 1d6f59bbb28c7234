use axum::http::{header, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use ocmt_api::data::{headers, ErrorResponse, RateLimitInfo};
use thiserror::Error;

/// Every wire-visible failure of the relay. Each variant maps to exactly one
/// status code and `error` slug; anything unexpected collapses to
/// `internal_error` without leaking its cause to the caller.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Schema or semantic validation failure
    #[error("{0}")]
    InvalidRequest(String),

    /// Missing or invalid gateway token, or missing container id header
    #[error("Missing or invalid credentials")]
    Unauthorized,

    /// The authenticated container is suspended
    #[error("Container is suspended")]
    Suspended,

    /// Capability malformed, unsigned, expired, or revoked; deliberately
    /// indistinct
    #[error("Invalid capability")]
    InvalidCapability,

    /// Unknown container, message or snapshot
    #[error("Not found")]
    NotFound,

    /// Payload field over the 1 MiB cap
    #[error("Payload too large")]
    PayloadTooLarge,

    /// Fixed-window rate limit exceeded
    #[error("Rate limit exceeded")]
    RateLimited {
        retry_after_seconds: u64,
        info: RateLimitInfo,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RelayError {
    fn status(&self) -> StatusCode {
        match self {
            RelayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::Unauthorized => StatusCode::UNAUTHORIZED,
            RelayError::Suspended | RelayError::InvalidCapability => StatusCode::FORBIDDEN,
            RelayError::NotFound => StatusCode::NOT_FOUND,
            RelayError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn slug(&self) -> &'static str {
        match self {
            RelayError::InvalidRequest(_) => "invalid_request",
            RelayError::Unauthorized => "unauthorized",
            RelayError::Suspended => "suspended",
            RelayError::InvalidCapability => "invalid_capability",
            RelayError::NotFound => "not_found",
            RelayError::PayloadTooLarge => "payload_too_large",
            RelayError::RateLimited { .. } => "rate_limited",
            RelayError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let details = match &self {
            RelayError::InvalidRequest(details) => Some(details.clone()),
            RelayError::Internal(error) => {
                error!("Internal relay error: {:?}", error);
                None
            }
            _ => None,
        };

        let body = Json(ErrorResponse {
            error: self.slug().to_string(),
            details,
        });

        let mut response = (status, body).into_response();

        if let RelayError::RateLimited {
            retry_after_seconds,
            info,
        } = self
        {
            let headers_mut = response.headers_mut();
            if let Ok(value) = HeaderValue::from_str(&retry_after_seconds.to_string()) {
                headers_mut.insert(header::RETRY_AFTER, value);
            }
            insert_rate_limit_headers(headers_mut, &info);
        }

        response
    }
}

/// Stamp the `RateLimit-*` header triple onto a response
pub fn insert_rate_limit_headers(headers_mut: &mut axum::http::HeaderMap, info: &RateLimitInfo) {
    for (name, value) in [
        (headers::RATE_LIMIT_LIMIT, info.limit),
        (headers::RATE_LIMIT_REMAINING, info.remaining),
        (headers::RATE_LIMIT_RESET, info.reset),
    ] {
        if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
            headers_mut.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_responses_carry_retry_headers() {
        let response = RelayError::RateLimited {
            retry_after_seconds: 12,
            info: RateLimitInfo {
                limit: 100,
                remaining: 0,
                reset: 1_700_000_000,
            },
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "12");
        assert_eq!(response.headers().get(headers::RATE_LIMIT_REMAINING).unwrap(), "0");
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let response = RelayError::Internal(anyhow::anyhow!("sled exploded")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
