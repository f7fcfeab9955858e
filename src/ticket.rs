//! Ticket vocabulary
//!
//! Categories, priorities and statuses are stored as text; these enums are the
//! only way values get in, so the stored strings always parse back.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error for an unrecognized enum string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} '{value}' (expected one of: {expected})")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
    pub expected: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Bug,
    Feature,
    Task,
    Improvement,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Bug => "bug",
            Category::Feature => "feature",
            Category::Task => "task",
            Category::Improvement => "improvement",
        }
    }
}

impl FromStr for Category {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bug" => Ok(Category::Bug),
            "feature" => Ok(Category::Feature),
            "task" => Ok(Category::Task),
            "improvement" => Ok(Category::Improvement),
            _ => Err(ParseEnumError {
                kind: "category",
                value: s.to_string(),
                expected: "bug, feature, task, improvement",
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl FromStr for Priority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            _ => Err(ParseEnumError {
                kind: "priority",
                value: s.to_string(),
                expected: "low, medium, high, critical",
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    #[default]
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
        }
    }
}

impl FromStr for TicketStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "open" => Ok(TicketStatus::Open),
            "in_progress" => Ok(TicketStatus::InProgress),
            "resolved" => Ok(TicketStatus::Resolved),
            "closed" => Ok(TicketStatus::Closed),
            _ => Err(ParseEnumError {
                kind: "status",
                value: s.to_string(),
                expected: "open, in_progress, resolved, closed",
            }),
        }
    }
}

/// Review state shared by proposed changes and a ticket's AI suggestion.
///
/// `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Accepted,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Accepted => "accepted",
            ReviewStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ReviewStatus::Pending)
    }
}

impl FromStr for ReviewStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ReviewStatus::Pending),
            "accepted" => Ok(ReviewStatus::Accepted),
            "rejected" => Ok(ReviewStatus::Rejected),
            _ => Err(ParseEnumError {
                kind: "review status",
                value: s.to_string(),
                expected: "pending, accepted, rejected",
            }),
        }
    }
}

/// What a saved finding records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    Summary,
    #[default]
    Finding,
    Recommendation,
    Note,
}

impl FindingKind {
    pub const ALL: [FindingKind; 4] = [
        FindingKind::Summary,
        FindingKind::Finding,
        FindingKind::Recommendation,
        FindingKind::Note,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FindingKind::Summary => "summary",
            FindingKind::Finding => "finding",
            FindingKind::Recommendation => "recommendation",
            FindingKind::Note => "note",
        }
    }

    /// Section heading used in the markdown export
    pub fn heading(self) -> &'static str {
        match self {
            FindingKind::Summary => "Summaries",
            FindingKind::Finding => "Findings",
            FindingKind::Recommendation => "Recommendations",
            FindingKind::Note => "Notes",
        }
    }
}

impl FromStr for FindingKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "summary" => Ok(FindingKind::Summary),
            "finding" => Ok(FindingKind::Finding),
            "recommendation" => Ok(FindingKind::Recommendation),
            "note" => Ok(FindingKind::Note),
            _ => Err(ParseEnumError {
                kind: "finding type",
                value: s.to_string(),
                expected: "summary, finding, recommendation, note",
            }),
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(Category, Priority, TicketStatus, ReviewStatus, FindingKind);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("BUG".parse::<Category>().unwrap(), Category::Bug);
        assert_eq!(" High ".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!("in-progress".parse::<TicketStatus>().unwrap(), TicketStatus::InProgress);
    }

    #[test]
    fn test_parse_rejects_unknown() {
        let err = "urgent".parse::<Priority>().unwrap_err();
        assert_eq!(err.kind, "priority");
        assert!(err.to_string().contains("low, medium, high, critical"));
    }

    #[test]
    fn test_round_trip_through_text() {
        for status in [ReviewStatus::Pending, ReviewStatus::Accepted, ReviewStatus::Rejected] {
            assert_eq!(status.as_str().parse::<ReviewStatus>().unwrap(), status);
        }
        assert_eq!(TicketStatus::InProgress.to_string(), "in_progress");
    }

    #[test]
    fn test_only_pending_is_open() {
        assert!(!ReviewStatus::Pending.is_terminal());
        assert!(ReviewStatus::Accepted.is_terminal());
        assert!(ReviewStatus::Rejected.is_terminal());
    }

    #[test]
    fn test_finding_kind_defaults_to_finding() {
        assert_eq!(FindingKind::default(), FindingKind::Finding);
        assert_eq!("Recommendation".parse::<FindingKind>().unwrap(), FindingKind::Recommendation);
        assert!("idea".parse::<FindingKind>().is_err());
    }
}
