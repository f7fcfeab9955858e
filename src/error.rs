//! User-visible failure categories
//!
//! Every module keeps its own error enum. This module only decides how a failure
//! is presented: which short prefix the user sees and which HTTP status the API
//! answers with.

use serde::Serialize;

/// Coarse classification of a failure, shared by the CLI and the HTTP API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Blueprint or file endpoints did not answer in time
    TargetUnreachable,
    /// The completion call failed or returned nothing usable
    ModelUnusable,
    /// Accept/reject on a change that is no longer pending
    AlreadyDecided,
    /// The target file moved on since the snapshot was taken
    Conflict,
    NotFound,
    Invalid,
    Internal,
}

impl FailureKind {
    /// Short actionable prefix shown before the detailed message
    pub fn headline(self) -> &'static str {
        match self {
            FailureKind::TargetUnreachable => "Could not reach target project",
            FailureKind::ModelUnusable => "Model did not return a usable result",
            FailureKind::AlreadyDecided => "This change was already decided",
            FailureKind::Conflict => "Target file changed since the proposal was made",
            FailureKind::NotFound => "Not found",
            FailureKind::Invalid => "Invalid request",
            FailureKind::Internal => "Internal error",
        }
    }

    pub fn http_status(self) -> u16 {
        match self {
            FailureKind::TargetUnreachable => 503,
            FailureKind::ModelUnusable => 502,
            FailureKind::AlreadyDecided | FailureKind::Conflict => 409,
            FailureKind::NotFound => 404,
            FailureKind::Invalid => 400,
            FailureKind::Internal => 500,
        }
    }

    /// True when retrying the same operation later can succeed
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::TargetUnreachable | FailureKind::ModelUnusable | FailureKind::Conflict
        )
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.headline())
    }
}

/// Implemented by every error that can reach a user.
pub trait Classify: std::fmt::Display {
    fn kind(&self) -> FailureKind;

    /// "<headline>: <detail>"
    fn user_message(&self) -> String {
        format!("{}: {}", self.kind().headline(), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statuses_distinguish_categories() {
        assert_eq!(FailureKind::TargetUnreachable.http_status(), 503);
        assert_eq!(FailureKind::ModelUnusable.http_status(), 502);
        assert_eq!(FailureKind::AlreadyDecided.http_status(), 409);
        assert_eq!(FailureKind::NotFound.http_status(), 404);
    }

    #[test]
    fn test_retryable() {
        assert!(FailureKind::Conflict.is_retryable());
        assert!(!FailureKind::AlreadyDecided.is_retryable());
        assert!(!FailureKind::Invalid.is_retryable());
    }

    #[test]
    fn test_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::AlreadyDecided).unwrap();
        assert_eq!(json, "\"already_decided\"");
    }
}
