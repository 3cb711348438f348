//! Typed error taxonomy for the replacement pipeline.
//!
//! Service errors carry a short, stable label (their `Display`) which ends
//! up in the run summary, plus the service's own message in `detail` for
//! logging. Everything a single marker can hit is folded into
//! [`MarkerError`]; only [`FatalError`] ends a run early.

use thiserror::Error;

/// Failure of one image-generation call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerateError {
    #[error("rate limited")]
    RateLimited { detail: String },

    #[error("invalid prompt")]
    InvalidPrompt { detail: String },

    #[error("service unavailable")]
    ServiceUnavailable { detail: String },

    #[error("timeout")]
    Timeout { detail: String },

    /// The service rejected the API key. Fatal for the whole run.
    #[error("unauthorized")]
    Unauthorized { detail: String },
}

impl GenerateError {
    pub fn detail(&self) -> &str {
        match self {
            GenerateError::RateLimited { detail }
            | GenerateError::InvalidPrompt { detail }
            | GenerateError::ServiceUnavailable { detail }
            | GenerateError::Timeout { detail }
            | GenerateError::Unauthorized { detail } => detail,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerateError::RateLimited { .. }
                | GenerateError::ServiceUnavailable { .. }
                | GenerateError::Timeout { .. }
        )
    }
}

/// Failure of one asset upload.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    /// Credentials rejected. Fatal for the whole run.
    #[error("auth error")]
    AuthError { detail: String },

    #[error("quota exceeded")]
    QuotaExceeded { detail: String },

    #[error("upload timeout")]
    UploadTimeout { detail: String },

    #[error("store unavailable")]
    Unavailable { detail: String },

    #[error("upload rejected")]
    Rejected { detail: String },
}

impl UploadError {
    pub fn detail(&self) -> &str {
        match self {
            UploadError::AuthError { detail }
            | UploadError::QuotaExceeded { detail }
            | UploadError::UploadTimeout { detail }
            | UploadError::Unavailable { detail }
            | UploadError::Rejected { detail } => detail,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UploadError::QuotaExceeded { .. }
                | UploadError::UploadTimeout { .. }
                | UploadError::Unavailable { .. }
        )
    }
}

/// Why a single marker ended in `Failed`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MarkerError {
    #[error("{0}")]
    Generate(GenerateError),

    #[error("{error}, retries exhausted")]
    GenerateExhausted { error: GenerateError, attempts: u32 },

    #[error("{0}")]
    Upload(UploadError),

    #[error("{error}, retries exhausted")]
    UploadExhausted { error: UploadError, attempts: u32 },

    #[error("read failed")]
    Read { detail: String },

    #[error("write failed")]
    Write { detail: String },
}

impl MarkerError {
    pub fn detail(&self) -> &str {
        match self {
            MarkerError::Generate(e) | MarkerError::GenerateExhausted { error: e, .. } => {
                e.detail()
            }
            MarkerError::Upload(e) | MarkerError::UploadExhausted { error: e, .. } => e.detail(),
            MarkerError::Read { detail } | MarkerError::Write { detail } => detail,
        }
    }
}

/// Conditions that abort the entire run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FatalError {
    #[error("generation service rejected credentials: {0}")]
    GeneratorAuth(String),

    #[error("asset store rejected credentials: {0}")]
    StoreAuth(String),
}

/// A document the scanner could not turn into markers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("not valid UTF-8")]
    InvalidUtf8,

    #[error("front matter is not closed")]
    UnclosedFrontMatter,

    #[error("malformed front matter: {0}")]
    FrontMatter(String),

    #[error("read error: {0}")]
    Io(String),
}

/// Errors from applying or committing rewrites.
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("span {start}..{end} is outside the document or splits a character")]
    OutOfBounds { start: usize, end: usize },

    #[error("span starting at {start} overlaps a later replacement")]
    Overlap { start: usize },

    #[error("document changed on disk since it was scanned: {path}")]
    Conflict { path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_generation_errors() {
        let d = || "x".to_string();
        assert!(GenerateError::RateLimited { detail: d() }.is_retryable());
        assert!(GenerateError::ServiceUnavailable { detail: d() }.is_retryable());
        assert!(GenerateError::Timeout { detail: d() }.is_retryable());
        assert!(!GenerateError::InvalidPrompt { detail: d() }.is_retryable());
        assert!(!GenerateError::Unauthorized { detail: d() }.is_retryable());
    }

    #[test]
    fn test_exhausted_label_reads_naturally() {
        let err = MarkerError::GenerateExhausted {
            error: GenerateError::RateLimited {
                detail: "429 Too Many Requests".to_string(),
            },
            attempts: 6,
        };
        assert_eq!(err.to_string(), "rate limited, retries exhausted");
        assert_eq!(err.detail(), "429 Too Many Requests");
    }
}
