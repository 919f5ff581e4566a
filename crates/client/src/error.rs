//! Client error types and HTTP status classification.

/// Categories for non-2xx API responses.
///
/// Server-side categories (5xx and the CDN range) are eligible for
/// retry; client-side categories never are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorKind {
    BadRequest,
    Unauthorized,
    PaymentRequired,
    Forbidden,
    NotFound,
    Conflict,
    InternalServerError,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
    /// 520-530, returned by edge/CDN providers in front of the API.
    EdgeProvider,
    /// Any other 4xx/5xx status.
    Other,
}

impl HttpErrorKind {
    /// Maps an HTTP status code to its category.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            402 => Self::PaymentRequired,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            409 => Self::Conflict,
            500 => Self::InternalServerError,
            502 => Self::BadGateway,
            503 => Self::ServiceUnavailable,
            504 => Self::GatewayTimeout,
            520..=530 => Self::EdgeProvider,
            _ => Self::Other,
        }
    }

    /// Whether a response in this category may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InternalServerError
                | Self::BadGateway
                | Self::ServiceUnavailable
                | Self::GatewayTimeout
                | Self::EdgeProvider
        )
    }
}

/// Errors from the Snapgate API client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request timed out: {method} {url}")]
    Timeout { method: &'static str, url: String },

    #[error("connection failed: {method} {url}: {source}")]
    ConnectionFailed {
        method: &'static str,
        url: String,
        source: reqwest::Error,
    },

    #[error("API error {status}: {method} {url}: {body}")]
    Api {
        kind: HttpErrorKind,
        status: u16,
        method: &'static str,
        url: String,
        body: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid access token")]
    InvalidToken,
}

impl ClientError {
    /// Whether another attempt at the same request could succeed.
    ///
    /// Timeouts and connection failures are transient by nature.
    /// Mapped server-side statuses retry after a short delay; everything
    /// else surfaces immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::ConnectionFailed { .. } => true,
            Self::Api { kind, .. } => kind.is_retryable(),
            _ => false,
        }
    }
}
