use clap::{ArgGroup, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use patchdesk::{
    serve, Assistant, Category, Classify, Config, Database, Decision, FileEntry, Finding, FindingKind, Priority,
    ProposedChange, Scope, Ticket, TicketStatus,
};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "patchdesk")]
#[command(author, version, about = "Ticket desk with an assistant that proposes reviewed fixes to a target project")]
struct Cli {
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP API
    Serve {
        /// Port to listen on (default from config, 8080)
        #[arg(short, long)]
        port: Option<u16>,

        /// Worker threads
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Create, list and update tickets
    Ticket {
        #[command(subcommand)]
        action: TicketAction,
    },

    /// Analyze a ticket against the target project and propose changes
    Resolve {
        /// Ticket ID
        id: i32,
    },

    /// Analyze a free-form request against the target project (no ticket, no proposals)
    Task {
        /// What to look into
        task: String,
    },

    /// Saved analyses, findings and notes
    Findings {
        #[command(subcommand)]
        action: FindingsAction,
    },

    /// Propose a change to one file
    Propose {
        /// Path relative to the target root
        path: String,

        /// What to change
        #[arg(short, long)]
        instruction: String,

        /// Attach the proposal to a ticket
        #[arg(short, long)]
        ticket: Option<i32>,
    },

    /// List proposed changes (pending ones unless --ticket is given)
    Changes {
        #[arg(short, long)]
        ticket: Option<i32>,
    },

    /// Show one proposed change
    ShowChange {
        id: i32,

        /// Print original and proposed content
        #[arg(long)]
        content: bool,
    },

    /// Apply a proposed change, or every pending change of a ticket
    #[command(group(ArgGroup::new("target").required(true).args(["id", "ticket"])))]
    Accept {
        id: Option<i32>,

        #[arg(short, long)]
        ticket: Option<i32>,
    },

    /// Reject a proposed change, or every pending change of a ticket
    #[command(group(ArgGroup::new("target").required(true).args(["id", "ticket"])))]
    Reject {
        id: Option<i32>,

        #[arg(short, long)]
        ticket: Option<i32>,
    },

    /// Ask a follow-up question about a ticket's suggestion
    Probe {
        /// Ticket ID
        ticket: i32,

        message: String,
    },

    /// General chat with the assistant
    Chat { message: String },

    /// Clear conversation history (general chat unless --ticket is given)
    Forget {
        #[arg(short, long)]
        ticket: Option<i32>,
    },

    /// List files the assistant can see in the target project
    Files {
        #[arg(default_value = "")]
        directory: String,
    },

    /// Fetch and render the target project's blueprint
    Blueprint,

    /// Show analysis and change history
    History {
        #[arg(short = 'n', long, default_value = "20")]
        limit: i64,
    },

    /// Generate shell completions
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
enum TicketAction {
    /// Create a ticket
    Add {
        title: String,

        /// bug, feature, task or improvement
        #[arg(short, long)]
        category: Category,

        /// low, medium, high or critical
        #[arg(short, long, default_value = "medium")]
        priority: Priority,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(long)]
        creator: Option<String>,

        #[arg(long)]
        assignee: Option<String>,
    },

    /// List tickets, newest first
    List {
        /// open, in_progress, resolved or closed
        #[arg(short, long)]
        status: Option<TicketStatus>,
    },

    /// Show a ticket with its suggestion and proposed changes
    Show { id: i32 },

    /// Change a ticket's status
    Status { id: i32, status: TicketStatus },
}

#[derive(Subcommand, Debug)]
enum FindingsAction {
    /// List findings, newest first
    List {
        /// summary, finding, recommendation or note
        #[arg(short = 'k', long = "type")]
        kind: Option<FindingKind>,

        #[arg(short, long)]
        ticket: Option<i32>,
    },

    /// Save a finding
    Add {
        content: String,

        /// summary, finding, recommendation or note
        #[arg(short = 'k', long = "type", default_value = "finding")]
        kind: FindingKind,

        #[arg(long)]
        title: Option<String>,

        /// Repeat for several tags
        #[arg(long = "tag")]
        tags: Vec<String>,

        #[arg(short, long)]
        ticket: Option<i32>,
    },

    /// Render findings as markdown
    Export {
        /// Write here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(short, long)]
        ticket: Option<i32>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("patchdesk=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("{} {}", "Error:".red().bold(), message);
    process::exit(1);
}

fn fail_with<E: Classify>(err: E) -> ! {
    fail(err.user_message())
}

fn open_db() -> Database {
    Database::open().unwrap_or_else(|e| fail_with(e))
}

fn open_assistant() -> Assistant {
    let config = Config::load();
    Assistant::from_config(config, open_db()).unwrap_or_else(|e| fail_with(e))
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => fail(e),
    }
}

fn colored_status(status: &str) -> colored::ColoredString {
    match status {
        "open" | "pending" => status.yellow(),
        "in_progress" => status.cyan(),
        "resolved" | "accepted" => status.green(),
        "rejected" | "closed" => status.dimmed(),
        other => other.normal(),
    }
}

fn print_ticket_row(t: &Ticket) {
    println!(
        "[{}] {} {} {} {}",
        t.id.to_string().bold(),
        colored_status(&t.status),
        t.category.cyan(),
        t.priority,
        t.title
    );
}

fn print_change_row(c: &ProposedChange) {
    let ticket = c.ticket_id.map(|t| format!("ticket #{}", t)).unwrap_or_else(|| "ad-hoc".to_string());
    println!(
        "[{}] {} {} ({}) {}",
        c.id.to_string().bold(),
        colored_status(&c.status),
        c.file_path.cyan(),
        ticket,
        c.change_description
    );
}

fn print_finding_row(f: &Finding) {
    let ticket = f.ticket_id.map(|t| format!(" #{}", t)).unwrap_or_default();
    println!(
        "[{}] {}{} {} {}",
        f.id.to_string().bold(),
        f.kind.cyan(),
        ticket,
        f.title.as_deref().unwrap_or("Untitled").bold(),
        f.created_at.dimmed()
    );
    println!("   {}", f.content.lines().next().unwrap_or_default());
    let tags = f.tag_list();
    if !tags.is_empty() {
        println!("   tags: {}", tags.join(", "));
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing();
    let json = cli.json;

    match cli.command {
        Command::Serve { port, workers } => {
            let assistant = open_assistant();
            let port = port.unwrap_or(assistant.config().server.port);
            let workers = workers.unwrap_or(assistant.config().server.workers);
            if let Err(e) = serve::start_server(&assistant, port, workers) {
                fail(format!("server error: {}", e));
            }
        }

        Command::Ticket { action } => run_ticket(action, json),

        Command::Resolve { id } => {
            let assistant = open_assistant();
            let report = assistant.resolve_ticket(id).unwrap_or_else(|e| fail_with(e));
            if json {
                return print_json(&report);
            }
            for warning in &report.warnings {
                println!("{} {}", "warning:".yellow(), warning);
            }
            println!("{} {}", "Analyzed:".green().bold(), report.files_analyzed.join(", "));
            if !report.files_truncated.is_empty() {
                println!("{} {}", "Truncated:".yellow(), report.files_truncated.join(", "));
            }
            if !report.rejected_paths.is_empty() {
                println!("{} {}", "Ignored unknown paths:".yellow(), report.rejected_paths.join(", "));
            }
            println!("\n{}\n", report.suggestion);
            for outcome in &report.proposals {
                match &outcome.result {
                    Ok(change) => println!("{} #{} {}", "Proposed".green(), change.id, outcome.path),
                    Err(e) => println!("{} {}: {}", "Failed".red(), outcome.path, e.user_message()),
                }
            }
        }

        Command::Task { task } => {
            let assistant = open_assistant();
            let report = assistant.process_task(&task).unwrap_or_else(|e| fail_with(e));
            if json {
                return print_json(&report);
            }
            for warning in &report.warnings {
                println!("{} {}", "warning:".yellow(), warning);
            }
            println!(
                "{} {} of {} selected file(s), {} chars",
                "Analyzed:".green().bold(),
                report.files_analyzed.len(),
                report.total_files,
                report.total_chars
            );
            println!("\n{}\n", report.response);
            println!("Saved as finding {}", report.finding_id);
        }

        Command::Findings { action } => run_findings(action, json),

        Command::Propose {
            path,
            instruction,
            ticket,
        } => {
            let assistant = open_assistant();
            let change = assistant
                .propose_change(ticket, &path, &instruction)
                .unwrap_or_else(|e| fail_with(e));
            if json {
                return print_json(&change);
            }
            println!("{} proposed change {} for {}", "Created".green(), change.id, change.file_path);
        }

        Command::Changes { ticket } => {
            let db = open_db();
            let changes = match ticket {
                Some(id) => db.proposed_changes_for_ticket(id),
                None => db.pending_proposed_changes(),
            }
            .unwrap_or_else(|e| fail_with(e));
            if json {
                return print_json(&changes);
            }
            if changes.is_empty() {
                println!("No proposed changes.");
            }
            for change in &changes {
                print_change_row(change);
            }
        }

        Command::ShowChange { id, content } => {
            let db = open_db();
            let change = match db.get_proposed_change(id) {
                Ok(Some(change)) => change,
                Ok(None) => fail(format!("Not found: proposed change #{}", id)),
                Err(e) => fail_with(e),
            };
            if json {
                return print_json(&change);
            }
            print_change_row(&change);
            println!("   created {}", change.created_at);
            if let Some(resolved) = &change.resolved_at {
                println!("   resolved {}", resolved);
            }
            if content {
                println!("\n{}", "--- original".red());
                println!("{}", change.original_content);
                println!("{}", "+++ proposed".green());
                println!("{}", change.proposed_content);
            }
        }

        Command::Accept { id, ticket } => decide(id, ticket, Decision::Accept, json),
        Command::Reject { id, ticket } => decide(id, ticket, Decision::Reject, json),

        Command::Probe { ticket, message } => {
            let assistant = open_assistant();
            let reply = assistant
                .proposals()
                .probe(ticket, &message)
                .unwrap_or_else(|e| fail_with(e));
            println!("{}", reply);
        }

        Command::Chat { message } => {
            let assistant = open_assistant();
            let reply = assistant.chat(&message).unwrap_or_else(|e| fail_with(e));
            println!("{}", reply);
        }

        Command::Forget { ticket } => {
            let assistant = open_assistant();
            let scope = ticket.map(Scope::Ticket).unwrap_or(Scope::General);
            let cleared = assistant.conversations().clear(scope).unwrap_or_else(|e| fail_with(e));
            println!("Cleared {} turns from {}", cleared, scope);
        }

        Command::Files { directory } => {
            let assistant = open_assistant();
            let files = assistant.list_files(&directory).unwrap_or_else(|e| fail_with(e));
            if json {
                return print_json(&files);
            }
            for entry in &files {
                match entry {
                    FileEntry::File { path, size, .. } => println!("{} ({} bytes)", path, size),
                    FileEntry::Directory { path } => println!("{}/", path.blue()),
                }
            }
        }

        Command::Blueprint => {
            let assistant = open_assistant();
            let view = assistant.blueprint().unwrap_or_else(|e| fail_with(e));
            if json {
                return print_json(&view);
            }
            print!("{}", view.context);
        }

        Command::History { limit } => {
            let db = open_db();
            let records = db.change_history(limit.max(1)).unwrap_or_else(|e| fail_with(e));
            if json {
                return print_json(&records);
            }
            for record in &records {
                let ticket = record.ticket_id.map(|t| format!("#{}", t)).unwrap_or_default();
                println!(
                    "{} {} {} {} {}",
                    record.created_at.dimmed(),
                    record.change_type.cyan(),
                    ticket,
                    record.files().join(", "),
                    record.summary
                );
            }
        }

        Command::Completion { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "patchdesk", &mut std::io::stdout());
        }
    }
}

fn run_ticket(action: TicketAction, json: bool) {
    let db = open_db();
    match action {
        TicketAction::Add {
            title,
            category,
            priority,
            description,
            creator,
            assignee,
        } => {
            let id = db
                .create_ticket(&title, category, priority, description.as_deref(), creator.as_deref())
                .unwrap_or_else(|e| fail_with(e));
            if let Some(assignee) = assignee.as_deref() {
                db.assign_ticket(id, Some(assignee)).unwrap_or_else(|e| fail_with(e));
            }
            println!("{} ticket {}: {}", "Created".green(), id, title);
        }

        TicketAction::List { status } => {
            let tickets = db.list_tickets(status).unwrap_or_else(|e| fail_with(e));
            if json {
                return print_json(&tickets);
            }
            if tickets.is_empty() {
                println!("No tickets.");
            }
            for ticket in &tickets {
                print_ticket_row(ticket);
            }
        }

        TicketAction::Show { id } => {
            let ticket = match db.get_ticket(id) {
                Ok(Some(ticket)) => ticket,
                Ok(None) => fail(format!("Not found: ticket #{}", id)),
                Err(e) => fail_with(e),
            };
            let changes = db.proposed_changes_for_ticket(id).unwrap_or_else(|e| fail_with(e));
            if json {
                return print_json(&serde_json::json!({ "ticket": ticket, "proposed_changes": changes }));
            }
            print_ticket_row(&ticket);
            if let Some(description) = &ticket.description {
                println!("   {}", description);
            }
            if let Some(assignee) = &ticket.assignee {
                println!("   assignee: {}", assignee);
            }
            if let Some(suggestion) = &ticket.ai_suggestion {
                let status = ticket.ai_status.as_deref().unwrap_or("pending");
                println!("\n{} ({})", "AI suggestion".bold(), colored_status(status));
                println!("{}", suggestion);
                let files = ticket.files_analyzed();
                if !files.is_empty() {
                    println!("   files analyzed: {}", files.join(", "));
                }
            }
            if !changes.is_empty() {
                println!("\n{}", "Proposed changes".bold());
                for change in &changes {
                    print_change_row(change);
                }
            }
        }

        TicketAction::Status { id, status } => match db.update_ticket_status(id, status) {
            Ok(true) => println!("Ticket {} is now {}", id, colored_status(status.as_str())),
            Ok(false) => fail(format!("Not found: ticket #{}", id)),
            Err(e) => fail_with(e),
        },
    }
}

fn run_findings(action: FindingsAction, json: bool) {
    let db = open_db();
    match action {
        FindingsAction::List { kind, ticket } => {
            let findings = db.list_findings(kind, ticket).unwrap_or_else(|e| fail_with(e));
            if json {
                return print_json(&findings);
            }
            if findings.is_empty() {
                println!("No findings.");
            }
            for finding in &findings {
                print_finding_row(finding);
            }
        }

        FindingsAction::Add {
            content,
            kind,
            title,
            tags,
            ticket,
        } => {
            if let Some(id) = ticket {
                match db.get_ticket(id) {
                    Ok(Some(_)) => {}
                    Ok(None) => fail(format!("Not found: ticket #{}", id)),
                    Err(e) => fail_with(e),
                }
            }
            let id = db
                .save_finding(kind, title.as_deref(), &content, &tags, ticket)
                .unwrap_or_else(|e| fail_with(e));
            println!("{} {} {}", "Saved".green(), kind, id);
        }

        FindingsAction::Export { output, ticket } => {
            let (markdown, count) = db.findings_markdown(ticket).unwrap_or_else(|e| fail_with(e));
            match output {
                Some(path) => {
                    if let Err(e) = std::fs::write(&path, &markdown) {
                        fail(format!("could not write {}: {}", path.display(), e));
                    }
                    println!("Exported {} finding(s) to {}", count, path.display());
                }
                None => print!("{}", markdown),
            }
        }
    }
}

fn decide(id: Option<i32>, ticket: Option<i32>, decision: Decision, json: bool) {
    let assistant = open_assistant();
    let proposals = assistant.proposals();

    if let Some(ticket_id) = ticket {
        let outcome = proposals
            .decide_ticket(ticket_id, decision)
            .unwrap_or_else(|e| fail_with(e));
        if json {
            return print_json(&outcome);
        }
        println!("Ticket {}: {} change(s) decided", ticket_id, outcome.decided.len());
        for failure in &outcome.failed {
            println!("{} #{} {}: {}", "Failed".red(), failure.change_id, failure.path, failure.error);
        }
        if outcome.resolved {
            println!("Ticket {} {}", ticket_id, "resolved".green());
        }
        if !outcome.failed.is_empty() {
            process::exit(1);
        }
        return;
    }

    let Some(id) = id else {
        fail("give a change id or --ticket");
    };
    let change = match decision {
        Decision::Accept => proposals.accept(id),
        Decision::Reject => proposals.reject(id),
    }
    .unwrap_or_else(|e| fail_with(e));
    if json {
        return print_json(&change);
    }
    match decision {
        Decision::Accept => println!("{} change {} to {}", "Applied".green(), change.id, change.file_path),
        Decision::Reject => println!("{} change {}", "Rejected".yellow(), change.id),
    }
}
