pub mod diagnostic;

pub use diagnostic::Diagnostic;

use crate::model::ParseStatus;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fatal errors raised while loading guidelines, routing, scenarios or ground truth.
///
/// `origin` names the file (or reader label) the offending record came from.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {origin}: {source}")]
    Io {
        origin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{origin}:{line}: invalid record: {message}")]
    InvalidRecord {
        origin: String,
        line: usize,
        message: String,
    },

    #[error("{origin}:{line}: duplicate guideline id '{id}' (first defined at line {first_line})")]
    DuplicateId {
        origin: String,
        line: usize,
        id: String,
        first_line: usize,
    },

    #[error("{origin}:{line}: guideline '{id}' assertion #{index}: {reason}")]
    MalformedAssertion {
        origin: String,
        line: usize,
        id: String,
        index: usize,
        reason: String,
    },

    #[error("{origin}: {message}")]
    InvalidDocument { origin: String, message: String },

    #[error("{origin}: duplicate test case id '{case_id}'")]
    DuplicateCase { origin: String, case_id: String },

    #[error("scenario {scenario_id}: test case '{case_id}' has no ground truth record")]
    MissingGroundTruth {
        origin: String,
        scenario_id: String,
        case_id: String,
    },

    #[error("scenario {scenario_id}: ground truth for '{case_id}' uses unregistered label '{label}'")]
    UnregisteredLabel {
        origin: String,
        scenario_id: String,
        case_id: String,
        label: String,
    },

    #[error("unknown guideline id '{id}' referenced by {context}")]
    UnknownGuideline {
        origin: String,
        id: String,
        context: String,
    },

    #[error("routing config {origin}: {message}")]
    Routing { origin: String, message: String },
}

impl LoadError {
    pub fn origin(&self) -> &str {
        match self {
            Self::Io { origin, .. }
            | Self::InvalidRecord { origin, .. }
            | Self::DuplicateId { origin, .. }
            | Self::MalformedAssertion { origin, .. }
            | Self::InvalidDocument { origin, .. }
            | Self::DuplicateCase { origin, .. }
            | Self::MissingGroundTruth { origin, .. }
            | Self::UnregisteredLabel { origin, .. }
            | Self::UnknownGuideline { origin, .. }
            | Self::Routing { origin, .. } => origin,
        }
    }

    pub(crate) fn io(origin: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            origin: origin.into(),
            source,
        }
    }

    pub(crate) fn document(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidDocument {
            origin: origin.into(),
            message: message.into(),
        }
    }
}

/// Errors from a completion service call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompletionError {
    /// Credential rejected by the service.
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    /// Rate limit exceeded.
    #[error("rate limited: retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    /// Service-side failure (5xx).
    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// Request rejected by the service (4xx other than 401/429).
    #[error("request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Call exceeded the configured timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Connection-level failure.
    #[error("network error: {message}")]
    Network { message: String },

    /// Service answered but the body was not a completion.
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },

    /// Replay provider has no recording for the case.
    #[error("no recorded response for {scenario_id}/{case_id}")]
    NotRecorded {
        scenario_id: String,
        case_id: String,
    },
}

impl CompletionError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::Server { .. }
                | Self::Timeout(_)
                | Self::Network { .. }
        )
    }

    /// Server-provided wait hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for CompletionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not expose the configured value here
            Self::Timeout(Duration::ZERO)
        } else if err.is_decode() {
            Self::InvalidResponse {
                message: err.to_string(),
            }
        } else {
            Self::Network {
                message: err.to_string(),
            }
        }
    }
}

/// Case-level failure recorded in the report. Never aborts a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaseFailure {
    CompletionFailure {
        message: String,
    },
    ParseFailure {
        status: ParseStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    UnknownDecisionLabel {
        raw: String,
    },
    Cancelled,
}

impl CaseFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::CompletionFailure { .. } => FailureKind::CompletionFailure,
            Self::ParseFailure { .. } => FailureKind::ParseFailure,
            Self::UnknownDecisionLabel { .. } => FailureKind::UnknownDecisionLabel,
            Self::Cancelled => FailureKind::Cancelled,
        }
    }
}

impl std::fmt::Display for CaseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CompletionFailure { message } => write!(f, "completion failed: {}", message),
            Self::ParseFailure { status, reason } => match reason {
                Some(r) => write!(f, "response {}: {}", status, r),
                None => write!(f, "response {}", status),
            },
            Self::UnknownDecisionLabel { raw } => {
                write!(f, "unregistered decision label '{}'", raw)
            }
            Self::Cancelled => write!(f, "cancelled before start"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    CompletionFailure,
    ParseFailure,
    UnknownDecisionLabel,
    Cancelled,
}
