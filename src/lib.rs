//! Patchdesk - ticket desk with a self-healing assistant
//!
//! Tickets describe problems in a target project. The assistant picks the
//! files that matter, reads them within a budget, asks a model for a fix and
//! stores one proposed change per file. Nothing touches the target until a
//! reviewer accepts a change.
//!
//! # Pipeline
//!
//! | Stage | Module |
//! |-------|--------|
//! | pick relevant files from a listing | [`selector`] |
//! | read files inside the target root | [`gateway`] |
//! | pack blueprint and files into one prompt | [`context`] |
//! | ask for a full replacement of one file | [`proposer`] |
//! | pending, accepted, rejected | [`lifecycle`] |
//! | probe and chat threads | [`conversation`] |
//! | saved analyses and notes | [`db`] findings |
//!
//! # Quick Start
//!
//! ```no_run
//! use patchdesk::{Category, Database, Priority};
//!
//! let db = Database::open_at("patchdesk.db").unwrap();
//! let id = db
//!     .create_ticket("Login returns 500", Category::Bug, Priority::High, None, None)
//!     .unwrap();
//! let ticket = db.get_ticket(id).unwrap().unwrap();
//! println!("#{} {}", ticket.id, ticket.status);
//! ```

pub mod assistant;
pub mod blueprint;
pub mod completion;
pub mod config;
pub mod context;
pub mod conversation;
pub mod db;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod proposer;
pub mod schema;
pub mod selector;
pub mod serve;
pub mod ticket;

pub use assistant::{Assistant, BlueprintView, ResolveError, ResolveReport, SetupError, StatusReport, TaskReport};
pub use blueprint::Blueprint;
pub use completion::{AnthropicClient, Completer, CompletionError, CompletionRequest, Message, Role, ScriptedCompleter};
pub use config::Config;
pub use context::{build_context, AssembledContext, ContextBudget};
pub use conversation::{ConversationStore, Scope};
pub use db::{ChangeRecord, Database, DbError, DbSummary, Finding, ProposedChange, Ticket, CURRENT_SCHEMA};
pub use error::{Classify, FailureKind};
pub use gateway::{FileEntry, GatewayError, ProjectGateway, TargetProject};
pub use lifecycle::{compute_checksum, Decision, LifecycleError, ProposalManager, ProposalOutcome, TicketDecision};
pub use proposer::{ChangeProposer, FileInstruction, ProposalDraft};
pub use selector::{RelevanceSelector, Selection};
pub use ticket::{Category, FindingKind, Priority, ReviewStatus, TicketStatus};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        assert!(CURRENT_SCHEMA.has_feature("tickets"));
        assert!(CURRENT_SCHEMA.has_feature("findings"));
        assert_eq!(Scope::General.key(), "general");
    }
}
