//! Proposed change lifecycle
//!
//! A change is born `pending` and ends `accepted` or `rejected`, once. Status
//! moves only through [`Database::transition_change_status`], a conditional
//! update, so when two reviewers race exactly one of them wins. Accept also
//! checks that the target file still matches the snapshot the proposal was
//! built from.

use crate::completion::{Completer, CompletionError, CompletionRequest, Message};
use crate::config::Config;
use crate::conversation::{ConversationStore, Scope};
use crate::db::{Database, DbError, ProposedChange};
use crate::error::{Classify, FailureKind};
use crate::gateway::{GatewayError, ProjectGateway};
use crate::proposer::{ChangeProposer, FileInstruction, ProposalError};
use crate::ticket::ReviewStatus;
use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{error, info, warn};

/// SHA-256 of file content, hex encoded
pub fn compute_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("proposed change #{0} not found")]
    NotFound(i32),
    #[error("ticket #{0} not found")]
    TicketNotFound(i32),
    #[error("change #{id} is already {status}")]
    AlreadyResolved { id: i32, status: ReviewStatus },
    #[error("{path} no longer matches the content the proposal was based on; propose again")]
    Conflict { path: String },
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Proposal(#[from] ProposalError),
    #[error(transparent)]
    Model(#[from] CompletionError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("{0}")]
    Invalid(String),
}

impl Classify for LifecycleError {
    fn kind(&self) -> FailureKind {
        match self {
            LifecycleError::NotFound(_) | LifecycleError::TicketNotFound(_) => FailureKind::NotFound,
            LifecycleError::AlreadyResolved { .. } => FailureKind::AlreadyDecided,
            LifecycleError::Conflict { .. } => FailureKind::Conflict,
            LifecycleError::Gateway(e) => e.kind(),
            LifecycleError::Proposal(_) | LifecycleError::Model(_) => FailureKind::ModelUnusable,
            LifecycleError::Db(e) => e.kind(),
            LifecycleError::Invalid(_) => FailureKind::Invalid,
        }
    }
}

/// Result of proposing one file in a batch
#[derive(Debug)]
pub struct ProposalOutcome {
    pub path: String,
    pub result: Result<ProposedChange, LifecycleError>,
}

impl ProposalOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

impl Serialize for ProposalOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Row<'a> {
            path: &'a str,
            ok: bool,
            #[serde(skip_serializing_if = "Option::is_none")]
            change: Option<&'a ProposedChange>,
            #[serde(skip_serializing_if = "Option::is_none")]
            error: Option<String>,
            #[serde(skip_serializing_if = "Option::is_none")]
            kind: Option<FailureKind>,
        }

        let row = match &self.result {
            Ok(change) => Row {
                path: &self.path,
                ok: true,
                change: Some(change),
                error: None,
                kind: None,
            },
            Err(e) => Row {
                path: &self.path,
                ok: false,
                change: None,
                error: Some(e.user_message()),
                kind: Some(e.kind()),
            },
        };
        row.serialize(serializer)
    }
}

/// Reviewer verdict on a whole ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accept,
    Reject,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionFailure {
    pub change_id: i32,
    pub path: String,
    pub error: String,
    pub kind: FailureKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketDecision {
    pub ticket_id: i32,
    pub decision: Decision,
    /// Change ids moved to the decided status
    pub decided: Vec<i32>,
    pub failed: Vec<DecisionFailure>,
    /// True when the ticket itself moved to `resolved`
    pub resolved: bool,
}

pub struct ProposalManager<'a> {
    db: &'a Database,
    gateway: &'a dyn ProjectGateway,
    completer: &'a dyn Completer,
    config: &'a Config,
}

impl<'a> ProposalManager<'a> {
    pub fn new(
        db: &'a Database,
        gateway: &'a dyn ProjectGateway,
        completer: &'a dyn Completer,
        config: &'a Config,
    ) -> Self {
        Self {
            db,
            gateway,
            completer,
            config,
        }
    }

    /// Snapshot `path`, ask for a replacement and store it as `pending`.
    ///
    /// The snapshot is read right before the model call; its checksum guards
    /// the later accept.
    pub fn propose(
        &self,
        ticket_id: Option<i32>,
        ticket_context: &str,
        path: &str,
        instruction: &str,
    ) -> Result<ProposedChange, LifecycleError> {
        if let Some(id) = ticket_id {
            if self.db.get_ticket(id)?.is_none() {
                return Err(LifecycleError::TicketNotFound(id));
            }
        }
        if instruction.trim().is_empty() {
            return Err(LifecycleError::Invalid("instruction cannot be empty".to_string()));
        }

        let original = self.gateway.read_file(path)?;
        let proposer = ChangeProposer::new(self.completer, self.config.model.proposal_max_tokens);
        let draft = proposer.propose(ticket_context, path, &original, instruction)?;

        let id = self.db.create_proposed_change(
            ticket_id,
            path,
            &original,
            &compute_checksum(&original),
            &draft.proposed_content,
            &draft.description,
        )?;
        info!(change = id, path = %path, "created proposed change");

        self.db.get_proposed_change(id)?.ok_or(LifecycleError::NotFound(id))
    }

    /// Propose each file in order. A failure is recorded for its path and the
    /// rest still run.
    pub fn propose_many(
        &self,
        ticket_id: Option<i32>,
        ticket_context: &str,
        files: &[FileInstruction],
    ) -> Vec<ProposalOutcome> {
        files
            .iter()
            .map(|file| {
                let result = self.propose(ticket_id, ticket_context, &file.path, &file.instruction);
                if let Err(e) = &result {
                    warn!(path = %file.path, error = %e, "proposal failed");
                }
                ProposalOutcome {
                    path: file.path.clone(),
                    result,
                }
            })
            .collect()
    }

    fn current_status(&self, id: i32) -> Result<ReviewStatus, LifecycleError> {
        Ok(self
            .db
            .get_proposed_change(id)?
            .ok_or(LifecycleError::NotFound(id))?
            .review_status())
    }

    /// Apply a pending change to the target project.
    pub fn accept(&self, id: i32) -> Result<ProposedChange, LifecycleError> {
        let change = self.db.get_proposed_change(id)?.ok_or(LifecycleError::NotFound(id))?;
        let status = change.review_status();
        if status != ReviewStatus::Pending {
            return Err(LifecycleError::AlreadyResolved { id, status });
        }

        let current = match self.gateway.read_file(&change.file_path) {
            Ok(content) => Some(content),
            Err(GatewayError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        if current.as_deref().map(compute_checksum).as_deref() != Some(change.original_checksum.as_str()) {
            // A concurrent accept may have written the file already
            let status = self.current_status(id)?;
            if status != ReviewStatus::Pending {
                return Err(LifecycleError::AlreadyResolved { id, status });
            }
            warn!(change = id, path = %change.file_path, "target changed since proposal");
            return Err(LifecycleError::Conflict {
                path: change.file_path,
            });
        }

        if !self
            .db
            .transition_change_status(id, ReviewStatus::Pending, ReviewStatus::Accepted)?
        {
            let status = self.current_status(id)?;
            return Err(LifecycleError::AlreadyResolved { id, status });
        }

        if let Err(e) = self.gateway.write_file(&change.file_path, &change.proposed_content) {
            warn!(change = id, error = %e, "write failed, releasing claim");
            if let Err(release) = self
                .db
                .transition_change_status(id, ReviewStatus::Accepted, ReviewStatus::Pending)
            {
                error!(change = id, error = %release, "could not release claim");
            }
            return Err(e.into());
        }

        if let Some(ticket_id) = change.ticket_id {
            self.db.set_ai_status(ticket_id, ReviewStatus::Accepted, false)?;
        }
        self.db.record_change(
            change.ticket_id,
            std::slice::from_ref(&change.file_path),
            "modify",
            &change.change_description,
            None,
        )?;
        info!(change = id, path = %change.file_path, "applied proposed change");

        self.db.get_proposed_change(id)?.ok_or(LifecycleError::NotFound(id))
    }

    /// Mark a pending change rejected. Nothing is written to the target.
    pub fn reject(&self, id: i32) -> Result<ProposedChange, LifecycleError> {
        if self.db.get_proposed_change(id)?.is_none() {
            return Err(LifecycleError::NotFound(id));
        }
        if !self
            .db
            .transition_change_status(id, ReviewStatus::Pending, ReviewStatus::Rejected)?
        {
            let status = self.current_status(id)?;
            return Err(LifecycleError::AlreadyResolved { id, status });
        }
        info!(change = id, "rejected proposed change");
        self.db.get_proposed_change(id)?.ok_or(LifecycleError::NotFound(id))
    }

    /// Ask a follow-up question about a ticket's suggestion. No status changes.
    pub fn probe(&self, ticket_id: i32, message: &str) -> Result<String, LifecycleError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(LifecycleError::Invalid("message cannot be empty".to_string()));
        }
        let ticket = self
            .db
            .get_ticket(ticket_id)?
            .ok_or(LifecycleError::TicketNotFound(ticket_id))?;

        let pending: Vec<String> = self
            .db
            .proposed_changes_for_ticket(ticket_id)?
            .into_iter()
            .filter(|c| c.review_status() == ReviewStatus::Pending)
            .map(|c| format!("- #{} {}: {}", c.id, c.file_path, c.change_description))
            .collect();

        let system = format!(
            "You are discussing a proposed resolution for ticket #{id} \"{title}\" ({category}, {priority}).\n\
             Description: {description}\n\n\
             PREVIOUS SUGGESTION:\n{suggestion}\n\n\
             PENDING CHANGES:\n{pending}\n\n\
             Answer the reviewer's questions about this suggestion. Do not claim to have applied anything.",
            id = ticket.id,
            title = ticket.title,
            category = ticket.category,
            priority = ticket.priority,
            description = ticket.description.as_deref().unwrap_or("No description provided"),
            suggestion = ticket.ai_suggestion.as_deref().unwrap_or("(no suggestion yet)"),
            pending = if pending.is_empty() { "(none)".to_string() } else { pending.join("\n") },
        );

        let store = ConversationStore::new(self.db, self.config.conversation.max_turns);
        let scope = Scope::Ticket(ticket_id);
        let mut messages = store.history(scope)?;
        messages.push(Message::user(message));

        let request = CompletionRequest {
            system: Some(system),
            messages,
            max_tokens: self.config.model.chat_max_tokens,
        };
        let reply = self.completer.complete(&request)?;

        store.append_exchange(scope, message, &reply)?;
        Ok(reply)
    }

    /// Accept or reject every pending change of a ticket.
    ///
    /// Accept resolves the ticket only when all of them applied.
    pub fn decide_ticket(&self, ticket_id: i32, decision: Decision) -> Result<TicketDecision, LifecycleError> {
        if self.db.get_ticket(ticket_id)?.is_none() {
            return Err(LifecycleError::TicketNotFound(ticket_id));
        }

        let pending: Vec<ProposedChange> = self
            .db
            .proposed_changes_for_ticket(ticket_id)?
            .into_iter()
            .filter(|c| c.review_status() == ReviewStatus::Pending)
            .collect();

        let mut outcome = TicketDecision {
            ticket_id,
            decision,
            decided: Vec::new(),
            failed: Vec::new(),
            resolved: false,
        };

        for change in pending {
            let result = match decision {
                Decision::Accept => self.accept(change.id),
                Decision::Reject => self.reject(change.id),
            };
            match result {
                Ok(_) => outcome.decided.push(change.id),
                Err(e) => outcome.failed.push(DecisionFailure {
                    change_id: change.id,
                    path: change.file_path,
                    error: e.user_message(),
                    kind: e.kind(),
                }),
            }
        }

        match decision {
            Decision::Accept if outcome.failed.is_empty() => {
                self.db.set_ai_status(ticket_id, ReviewStatus::Accepted, true)?;
                outcome.resolved = true;
            }
            Decision::Accept => {
                warn!(ticket = ticket_id, failed = outcome.failed.len(), "ticket left open");
            }
            Decision::Reject => {
                self.db.set_ai_status(ticket_id, ReviewStatus::Rejected, false)?;
            }
        }
        info!(ticket = ticket_id, ?decision, decided = outcome.decided.len(), "ticket decision recorded");
        Ok(outcome)
    }
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accept" => Ok(Decision::Accept),
            "reject" => Ok(Decision::Reject),
            other => Err(format!("unknown decision '{}' (expected accept or reject)", other)),
        }
    }
}
