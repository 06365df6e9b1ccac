/// Request-boundary error type.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    InvalidRequest(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Upstream error: {0}")]
    Transport(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category for status code selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Authentication,
    Permission,
    NotFound,
    RateLimit,
    BadGateway,
    ServerError,
}

/// Map an upstream HTTP status code to an error category.
#[must_use]
pub fn category_from_upstream_status(status: u16) -> ErrorCategory {
    match status {
        401 => ErrorCategory::Authentication,
        403 => ErrorCategory::Permission,
        404 => ErrorCategory::NotFound,
        429 => ErrorCategory::RateLimit,
        400..=499 => ErrorCategory::InvalidRequest,
        _ => ErrorCategory::ServerError,
    }
}

impl ProxyError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProxyError::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            ProxyError::Auth(_) => ErrorCategory::Authentication,
            ProxyError::Transport(_) => ErrorCategory::BadGateway,
            ProxyError::Config(_) | ProxyError::Internal(_) => ErrorCategory::ServerError,
            ProxyError::Upstream { status, .. } => category_from_upstream_status(*status),
        }
    }

    /// HTTP status returned to the client.
    ///
    /// Upstream failures keep their own status when it is a 4xx/5xx code.
    #[must_use]
    pub fn status(&self) -> http::StatusCode {
        if let ProxyError::Upstream { status, .. } = self {
            if let Ok(code) = http::StatusCode::from_u16(*status) {
                if code.is_client_error() || code.is_server_error() {
                    return code;
                }
            }
            return http::StatusCode::BAD_GATEWAY;
        }
        http_status_for_category(self.category())
    }
}

fn http_status_for_category(cat: ErrorCategory) -> http::StatusCode {
    match cat {
        ErrorCategory::InvalidRequest => http::StatusCode::BAD_REQUEST,
        ErrorCategory::Authentication => http::StatusCode::UNAUTHORIZED,
        ErrorCategory::Permission => http::StatusCode::FORBIDDEN,
        ErrorCategory::NotFound => http::StatusCode::NOT_FOUND,
        ErrorCategory::RateLimit => http::StatusCode::TOO_MANY_REQUESTS,
        ErrorCategory::BadGateway => http::StatusCode::BAD_GATEWAY,
        ErrorCategory::ServerError => http::StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn openai_error_type(cat: ErrorCategory) -> &'static str {
    match cat {
        ErrorCategory::InvalidRequest | ErrorCategory::NotFound => "invalid_request_error",
        ErrorCategory::Authentication => "authentication_error",
        ErrorCategory::Permission => "permission_error",
        ErrorCategory::RateLimit => "rate_limit_error",
        ErrorCategory::BadGateway | ErrorCategory::ServerError => "server_error",
    }
}

fn openai_error_code(cat: ErrorCategory) -> &'static str {
    match cat {
        ErrorCategory::InvalidRequest => "invalid_request",
        ErrorCategory::Authentication => "invalid_api_key",
        ErrorCategory::Permission => "permission_denied",
        ErrorCategory::NotFound => "not_found",
        ErrorCategory::RateLimit => "rate_limit_exceeded",
        ErrorCategory::BadGateway => "upstream_error",
        ErrorCategory::ServerError => "server_error",
    }
}

/// `OpenAI` error envelope.
#[must_use]
pub fn openai_error_payload(cat: ErrorCategory, message: &str) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "message": message,
            "type": openai_error_type(cat),
            "code": openai_error_code(cat),
            "param": null,
        }
    })
}

/// Format an error as (`status_code`, JSON body).
#[must_use]
pub fn format_error(err: &ProxyError) -> (http::StatusCode, serde_json::Value) {
    let status = err.status();
    let body = openai_error_payload(err.category(), &err.to_string());
    (status, body)
}

impl axum::response::IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = format_error(&self);
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ProxyError::Auth("Unauthorized".into()).status(),
            http::StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ProxyError::InvalidRequest("Invalid request".into()).status(),
            http::StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::Transport("connection refused".into()).status(),
            http::StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::Internal("boom".into()).status(),
            http::StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_upstream_status_passthrough() {
        let err = ProxyError::Upstream {
            status: 429,
            message: "slow down".into(),
        };
        assert_eq!(err.status(), http::StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.category(), ErrorCategory::RateLimit);

        let odd = ProxyError::Upstream {
            status: 302,
            message: "moved".into(),
        };
        assert_eq!(odd.status(), http::StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_error_envelope_shape() {
        let (status, body) = format_error(&ProxyError::Auth("invalid token".into()));
        assert_eq!(status, http::StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["message"], "invalid token");
        assert_eq!(body["error"]["type"], "authentication_error");
        assert_eq!(body["error"]["code"], "invalid_api_key");
        assert!(body["error"]["param"].is_null());
    }
}
