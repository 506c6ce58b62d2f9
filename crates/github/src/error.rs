use thiserror::Error;

/// Typed error for the GitHub REST transport. Any HTTP status >= 400 maps to
/// `Status`, carrying the code for classification by callers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("GitHub API returned {code}: {message}")]
    Status { code: u16, message: String },
    #[error("GitHub API request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("{0}")]
    Validation(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool { self.status_code() == Some(404) }

    /// Rate limits, 5xx responses, and connection failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { code, .. } => *code == 429 || *code >= 500,
            Self::Network(_) => true,
            Self::Validation(_) => false,
        }
    }
}

/// Stable error shape surfaced to end users when results cannot be produced.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserError {
    pub error_code: &'static str,
    pub message: String,
    pub retryable: bool,
}

/// Map an orchestration error to the stable caller-facing code. Typed
/// transport errors classify by status; anything else is a gateway failure.
pub fn classify_error(err: &anyhow::Error) -> UserError {
    if let Some(api_err) = err.downcast_ref::<ApiError>() {
        let (error_code, message) = match api_err.status_code() {
            Some(401) => ("GITHUB_TOKEN_INVALID", "The configured GitHub token was rejected."),
            Some(403) => ("GITHUB_PERMISSION_DENIED", "GitHub denied access to the repository."),
            Some(404) => ("GITHUB_NOT_FOUND", "The requested GitHub resource was not found."),
            Some(429) => ("GITHUB_RATE_LIMITED", "GitHub rate limit exceeded; try again shortly."),
            _ => ("GITHUB_UNAVAILABLE", "GitHub could not be reached; try again shortly."),
        };
        UserError { error_code, message: message.to_string(), retryable: api_err.is_retryable() }
    } else {
        UserError {
            error_code: "GITHUB_UNAVAILABLE",
            message: "GitHub could not be reached; try again shortly.".to_string(),
            retryable: true,
        }
    }
}
