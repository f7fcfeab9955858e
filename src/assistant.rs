//! Ticket resolution pipeline
//!
//! [`Assistant`] owns the pieces (config, database, gateway, completer) and
//! runs them in order for a ticket: blueprint, listing, selection, scoped read,
//! context assembly, analysis, then one proposal per file the analysis names.
//! A free-form task runs the same steps up to the analysis and stops there.
//! Every analysis is also kept as a finding.

use crate::blueprint::Blueprint;
use crate::completion::{AnthropicClient, Completer, CompletionError, CompletionRequest, Message};
use crate::config::Config;
use crate::context::{build_context, render_blueprint, AssembledContext, ContextBudget};
use crate::conversation::{ConversationStore, Scope};
use crate::db::{Database, DbError, DbSummary, ProposedChange, Ticket, CURRENT_SCHEMA};
use crate::ticket::FindingKind;
use crate::error::{Classify, FailureKind};
use crate::gateway::{FileEntry, GatewayError, ProjectGateway, TargetProject};
use crate::lifecycle::{LifecycleError, ProposalManager, ProposalOutcome};
use crate::proposer::{parse_files_to_modify, FileInstruction};
use crate::selector::{RelevanceSelector, Selection};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

const ANALYSIS_SYSTEM: &str = "You are a senior engineer resolving support tickets for a software \
project. You only see the files you are given; you cannot read or write anything yourself. \
Be concrete: name files, functions and endpoints.";

const CHAT_SYSTEM: &str = "You are patchdesk, a ticketing assistant for a separate target project.\n\
\n\
What you can do:\n\
- Analyze a ticket: pick the relevant files of the target, read them and explain a fix\n\
- Propose changes: draft a full replacement for a file, kept pending until a reviewer decides\n\
- Apply or reject proposed changes after review\n\
- Answer follow-up questions about a ticket's suggestion\n\
\n\
HTTP API:\n\
- GET/POST /api/tickets, GET /api/tickets/<id>\n\
- POST /api/tickets/<id>/ai-resolve (run the analysis)\n\
- POST /api/tickets/<id>/ai-action with action accept, reject or probe\n\
- GET /api/proposed-changes, POST /api/proposed-changes/<id>/accept or /reject\n\
- GET /api/files, GET /api/target/blueprint, GET /api/changes\n\
- POST /api/task (analyze a request without a ticket)\n\
- GET/POST /api/context, POST /api/context/export (saved findings)\n\
\n\
If users ask what you can do, refer to these capabilities. If they ask about routes or \
APIs, use the routes information provided.";

const ROUTE_KEYWORDS: &[&str] = &["route", "endpoint", "api", "url", "path", "navigate"];

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("ticket #{0} not found")]
    TicketNotFound(i32),
    #[error("task description required")]
    EmptyTask,
    #[error("no relevant files found for this request")]
    NoRelevantFiles,
    #[error("could not read any of the relevant files")]
    NoReadableFiles,
    #[error("file selection failed: {0}")]
    Selection(CompletionError),
    #[error("analysis failed: {0}")]
    Analysis(CompletionError),
    #[error(transparent)]
    Db(#[from] DbError),
}

impl Classify for ResolveError {
    fn kind(&self) -> FailureKind {
        match self {
            ResolveError::TicketNotFound(_) => FailureKind::NotFound,
            ResolveError::EmptyTask => FailureKind::Invalid,
            ResolveError::NoRelevantFiles | ResolveError::Selection(_) | ResolveError::Analysis(_) => {
                FailureKind::ModelUnusable
            }
            ResolveError::NoReadableFiles => FailureKind::TargetUnreachable,
            ResolveError::Db(e) => e.kind(),
        }
    }
}

/// Errors building an [`Assistant`] from configuration
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("target project: {0}")]
    Target(#[from] GatewayError),
    #[error("model client: {0}")]
    Model(#[from] CompletionError),
}

impl Classify for SetupError {
    fn kind(&self) -> FailureKind {
        match self {
            SetupError::Target(e) => e.kind(),
            SetupError::Model(e) => e.kind(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ResolveReport {
    pub ticket_id: i32,
    pub suggestion: String,
    /// Files whose content reached the analysis prompt
    pub files_analyzed: Vec<String>,
    pub files_truncated: Vec<String>,
    pub files_dropped: Vec<String>,
    /// Paths the model named that were not in the listing
    pub rejected_paths: Vec<String>,
    pub warnings: Vec<String>,
    pub proposals: Vec<ProposalOutcome>,
    pub finding_id: i32,
}

/// Result of a ticketless analysis
#[derive(Debug, Serialize)]
pub struct TaskReport {
    pub task: String,
    pub response: String,
    pub files_analyzed: Vec<String>,
    pub files_truncated: Vec<String>,
    pub files_dropped: Vec<String>,
    pub rejected_paths: Vec<String>,
    /// Files the model picked, before reading
    pub total_files: usize,
    pub total_chars: usize,
    pub warnings: Vec<String>,
    pub finding_id: i32,
}

/// Output of the shared select, read, analyze steps
struct Analysis {
    response: String,
    context: AssembledContext,
    selection: Selection,
    warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub version: &'static str,
    pub schema: String,
    pub target_root: String,
    pub target_url: Option<String>,
    pub model: String,
    pub api_key_configured: bool,
    pub max_context_chars: usize,
    pub max_selected_files: usize,
    pub database: DbSummary,
}

#[derive(Debug, Serialize)]
pub struct BlueprintView {
    pub blueprint: Blueprint,
    /// The blueprint as it appears in analysis prompts
    pub context: String,
}

pub struct Assistant {
    config: Config,
    db: Database,
    gateway: Box<dyn ProjectGateway>,
    completer: Box<dyn Completer>,
}

impl Assistant {
    pub fn new(config: Config, db: Database, gateway: Box<dyn ProjectGateway>, completer: Box<dyn Completer>) -> Self {
        Self {
            config,
            db,
            gateway,
            completer,
        }
    }

    /// Filesystem gateway plus the HTTP completion client
    pub fn from_config(config: Config, db: Database) -> Result<Self, SetupError> {
        let gateway = TargetProject::new(&config.target)?;
        let completer = AnthropicClient::new(&config.model, config.api_key())?;
        Ok(Self::new(config, db, Box::new(gateway), Box::new(completer)))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn gateway(&self) -> &dyn ProjectGateway {
        self.gateway.as_ref()
    }

    pub fn proposals(&self) -> ProposalManager<'_> {
        ProposalManager::new(&self.db, self.gateway.as_ref(), self.completer.as_ref(), &self.config)
    }

    pub fn conversations(&self) -> ConversationStore<'_> {
        ConversationStore::new(&self.db, self.config.conversation.max_turns)
    }

    pub fn list_files(&self, dir: &str) -> Result<Vec<FileEntry>, GatewayError> {
        self.gateway.list_files(dir)
    }

    pub fn blueprint(&self) -> Result<BlueprintView, GatewayError> {
        let blueprint = self.gateway.fetch_blueprint()?;
        let context = render_blueprint(&blueprint);
        Ok(BlueprintView { blueprint, context })
    }

    pub fn status(&self) -> Result<StatusReport, DbError> {
        Ok(StatusReport {
            version: env!("CARGO_PKG_VERSION"),
            schema: CURRENT_SCHEMA.to_string(),
            target_root: self.config.target.root.display().to_string(),
            target_url: self.config.target.base_url.clone(),
            model: self.config.model.model.clone(),
            api_key_configured: self.config.api_key().is_some(),
            max_context_chars: self.config.context.max_chars,
            max_selected_files: self.config.context.max_selected_files,
            database: self.db.summary()?,
        })
    }

    /// Blueprint, listing, selection, scoped read, context, analysis.
    ///
    /// Blueprint and listing failures become warnings; the rest abort.
    fn analyze(&self, task: &str) -> Result<Analysis, ResolveError> {
        let mut warnings = Vec::new();

        info!("fetching target blueprint");
        let blueprint = match self.gateway.fetch_blueprint() {
            Ok(blueprint) => blueprint,
            Err(e) => {
                warn!(error = %e, "continuing without blueprint");
                warnings.push(format!("Target API context unavailable: {}", e));
                Blueprint::default()
            }
        };

        let listing = match self.gateway.list_files("") {
            Ok(listing) => listing,
            Err(e) => {
                warn!(error = %e, "file listing failed");
                warnings.push(format!("Could not list target files: {}", e));
                Vec::new()
            }
        };

        info!(files = listing.len(), "selecting relevant files");
        let selector = RelevanceSelector::new(
            self.completer.as_ref(),
            self.config.context.max_selected_files,
            self.config.model.selection_max_tokens,
        );
        let selection = selector.select(task, &listing).map_err(ResolveError::Selection)?;
        if selection.is_empty() {
            return Err(ResolveError::NoRelevantFiles);
        }

        let mut files = Vec::new();
        for path in &selection.paths {
            match self.gateway.read_file(path) {
                Ok(content) => files.push((path.clone(), content)),
                Err(e) => {
                    warn!(path = %path, error = %e, "skipping unreadable file");
                    warnings.push(format!("Could not read {}: {}", path, e));
                }
            }
        }
        if files.is_empty() {
            return Err(ResolveError::NoReadableFiles);
        }

        let budget = ContextBudget {
            max_chars: self.config.context.max_chars,
        };
        let context = build_context(task, &blueprint, &files, budget);
        if !context.dropped.is_empty() {
            warnings.push(format!(
                "Left out of the analysis to fit the context budget: {}",
                context.dropped.join(", ")
            ));
        }

        info!(files = context.included.len(), chars = context.char_count(), "running analysis");
        let request = CompletionRequest::prompt(context.prompt.clone(), self.config.model.analysis_max_tokens)
            .with_system(ANALYSIS_SYSTEM);
        let response = self.completer.complete(&request).map_err(ResolveError::Analysis)?;

        Ok(Analysis {
            response,
            context,
            selection,
            warnings,
        })
    }

    /// Run the full pipeline for one ticket.
    ///
    /// The suggestion is stored before any proposal is attempted, so a failing
    /// proposal never loses the analysis.
    pub fn resolve_ticket(&self, ticket_id: i32) -> Result<ResolveReport, ResolveError> {
        let ticket = self
            .db
            .get_ticket(ticket_id)?
            .ok_or(ResolveError::TicketNotFound(ticket_id))?;

        info!(ticket = ticket_id, "resolving ticket");
        let Analysis {
            response: suggestion,
            context,
            selection,
            warnings,
        } = self.analyze(&task_text(&ticket))?;

        self.db.set_ai_suggestion(ticket_id, &suggestion, &context.included)?;
        self.db.record_change(
            Some(ticket_id),
            &context.included,
            "analyze",
            &clip(&ticket.title, 200),
            Some(&clip(&suggestion, 1000)),
        )?;
        let finding_id = self.db.save_finding(
            FindingKind::Finding,
            Some(&format!("Analysis: {}", clip(&ticket.title, 50))),
            &suggestion,
            &["auto-generated".to_string(), "ticket-analysis".to_string()],
            Some(ticket_id),
        )?;

        let targets: Vec<FileInstruction> = parse_files_to_modify(&suggestion)
            .into_iter()
            .filter(|f| context.included.contains(&f.path))
            .map(|f| FileInstruction {
                instruction: if f.instruction.is_empty() {
                    format!("Apply fix for: {}", ticket.title)
                } else {
                    format!("{}: {}", ticket.title, f.instruction)
                },
                path: f.path,
            })
            .collect();

        info!(ticket = ticket_id, files = targets.len(), "proposing changes");
        let proposals = self
            .proposals()
            .propose_many(Some(ticket_id), &ticket_context(&ticket), &targets);

        Ok(ResolveReport {
            ticket_id,
            suggestion,
            files_analyzed: context.included,
            files_truncated: context.truncated,
            files_dropped: context.dropped,
            rejected_paths: selection.rejected,
            warnings,
            proposals,
            finding_id,
        })
    }

    /// Analyze a free-form request against the target without a ticket.
    ///
    /// Nothing is proposed; the analysis lands in the change history and the
    /// findings store.
    pub fn process_task(&self, task: &str) -> Result<TaskReport, ResolveError> {
        let task = task.trim();
        if task.is_empty() {
            return Err(ResolveError::EmptyTask);
        }

        info!(chars = task.chars().count(), "processing task");
        let Analysis {
            response,
            context,
            selection,
            warnings,
        } = self.analyze(&task_prompt(task))?;

        self.db.record_change(
            None,
            &context.included,
            "analyze",
            &clip(task, 200),
            Some(&clip(&response, 1000)),
        )?;
        let finding_id = self.db.save_finding(
            FindingKind::Finding,
            Some(&format!("Analysis: {}", clip(task, 50))),
            &response,
            &["auto-generated".to_string(), "task-analysis".to_string()],
            None,
        )?;

        Ok(TaskReport {
            task: task.to_string(),
            response,
            total_files: selection.paths.len(),
            total_chars: context.char_count(),
            files_analyzed: context.included,
            files_truncated: context.truncated,
            files_dropped: context.dropped,
            rejected_paths: selection.rejected,
            warnings,
            finding_id,
        })
    }

    /// Propose one file outside the resolve pipeline, optionally tied to a ticket
    pub fn propose_change(
        &self,
        ticket_id: Option<i32>,
        path: &str,
        instruction: &str,
    ) -> Result<ProposedChange, LifecycleError> {
        let context = match ticket_id {
            Some(id) => {
                let ticket = self.db.get_ticket(id)?.ok_or(LifecycleError::TicketNotFound(id))?;
                ticket_context(&ticket)
            }
            None => "Ad-hoc change request (no ticket).".to_string(),
        };
        self.proposals().propose(ticket_id, &context, path, instruction)
    }

    /// General-purpose chat, kept in its own conversation scope.
    pub fn chat(&self, message: &str) -> Result<String, LifecycleError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(LifecycleError::Invalid("message cannot be empty".to_string()));
        }

        let mut system = CHAT_SYSTEM.to_string();
        if mentions_routes(message) {
            match self.gateway.fetch_blueprint() {
                Ok(blueprint) => {
                    system.push_str("\n\nTarget Project Routes:\n");
                    system.push_str(&render_blueprint(&blueprint));
                }
                Err(e) => system.push_str(&format!("\n\n[Target API context unavailable: {}]", e)),
            }
        }

        let store = self.conversations();
        let mut messages = store.history(Scope::General)?;
        messages.push(Message::user(message));
        let request = CompletionRequest {
            system: Some(system),
            messages,
            max_tokens: self.config.model.chat_max_tokens,
        };
        let reply = self.completer.complete(&request)?;
        store.append_exchange(Scope::General, message, &reply)?;
        Ok(reply)
    }
}

fn mentions_routes(message: &str) -> bool {
    let lower = message.to_lowercase();
    ROUTE_KEYWORDS.iter().any(|k| lower.contains(k))
}

fn clip(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn ticket_context(ticket: &Ticket) -> String {
    format!(
        "Ticket #{}: {}\nCategory: {}\nPriority: {}\nDescription: {}",
        ticket.id,
        ticket.title,
        ticket.category,
        ticket.priority,
        ticket.description.as_deref().unwrap_or("No description provided"),
    )
}

fn task_prompt(task: &str) -> String {
    format!(
        "Task: {}\n\n\
         Answer using the files below. Reference specific files, functions and \
         API endpoints where they matter.",
        task
    )
}

/// Task text used for both the selection and the analysis prompt
fn task_text(ticket: &Ticket) -> String {
    format!(
        "Analyze and resolve this ticket:\n\n\
         Title: {title}\n\
         Category: {category}\n\
         Priority: {priority}\n\
         Description: {description}\n\n\
         Please:\n\
         1. Analyze the issue (use the API blueprint info if relevant)\n\
         2. Provide a detailed resolution or implementation plan\n\
         3. If it's a bug, explain the root cause and fix\n\
         4. If it's a feature or task, provide implementation steps\n\
         5. Reference specific API endpoints if the issue involves the API\n\
         6. IMPORTANT: At the end, list the files that need to be modified in this format:\n\
         FILES_TO_MODIFY:\n\
         - path/to/file1.py: description of changes needed\n\
         - path/to/file2.js: description of changes needed",
        title = ticket.title,
        category = ticket.category,
        priority = ticket.priority,
        description = ticket.description.as_deref().unwrap_or("No description provided"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_keywords() {
        assert!(mentions_routes("Which API handles checkout?"));
        assert!(mentions_routes("what's the login URL"));
        assert!(!mentions_routes("hello there"));
    }

    #[test]
    fn test_clip_counts_chars() {
        assert_eq!(clip("héllo", 2), "hé");
        assert_eq!(clip("ab", 10), "ab");
    }
}
