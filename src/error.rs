// =============================================================================
// Error taxonomy for the analysis pipeline
// =============================================================================
//
// Five categories, mirrored in the wire-level error codes:
//
//   validation  — bad input; never trips a circuit breaker
//   timeout     — request or dependency deadline exceeded; trips breaker
//   unavailable — breaker open / too many critical layers missing; no trip
//   rate_limit  — upstream throttled; trips breaker
//   internal    — everything else; trips breaker

use serde::Serialize;

/// Coarse error category used for breaker accounting and wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Timeout,
    ServiceUnavailable,
    RateLimit,
    Internal,
}

impl ErrorCategory {
    /// Whether a failure of this category counts against the circuit breaker.
    pub fn trips_breaker(self) -> bool {
        matches!(self, Self::Timeout | Self::RateLimit | Self::Internal)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Validation => "validation_error",
            Self::Timeout => "timeout_error",
            Self::ServiceUnavailable => "service_unavailable",
            Self::RateLimit => "rate_limit_error",
            Self::Internal => "internal_error",
        };
        write!(f, "{s}")
    }
}

/// Typed error raised by the per-pair analyzer and the request surface.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AnalysisError {
    /// The request itself was malformed (empty symbol list, bad options).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// More symbols than the screener accepts.
    #[error("too many symbols: {0} (max {1})")]
    TooManySymbols(usize, usize),

    /// Input failed pair/timeframe/option validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The request or an upstream dependency exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Circuit breaker open or too many critical layers unavailable.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Upstream provider throttled us.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Unclassified failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AnalysisError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidRequest(_) | Self::TooManySymbols(..) | Self::Validation(_) => {
                ErrorCategory::Validation
            }
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Unavailable(_) => ErrorCategory::ServiceUnavailable,
            Self::RateLimited(_) => ErrorCategory::RateLimit,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Wire-level error code for the response envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::TooManySymbols(..) => "TOO_MANY_SYMBOLS",
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::Timeout(_) => "TIMEOUT",
            Self::Unavailable(_) => "SERVICE_UNAVAILABLE",
            Self::RateLimited(_) => "RATE_LIMIT",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn trips_breaker(&self) -> bool {
        self.category().trips_breaker()
    }
}
