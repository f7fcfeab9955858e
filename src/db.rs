//! SQLite database with Diesel ORM
//!
//! Stores tickets, proposed changes, conversation turns, change history and
//! saved findings.
//! Tables are created on open; proposal status moves only through conditional
//! updates so concurrent reviewers cannot both win.

use crate::error::{Classify, FailureKind};
use crate::schema::*;
use crate::ticket::{Category, FindingKind, Priority, ReviewStatus, TicketStatus};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use serde::Serializer;
use std::path::Path;
use thiserror::Error;

/// Walk up directory tree to find .patchdesk folder (like git finds .git)
/// Can be overridden with PATCHDESK_DB_PATH env var
fn get_db_path() -> std::path::PathBuf {
    // Check env var first - always takes priority
    if let Ok(path) = std::env::var("PATCHDESK_DB_PATH") {
        return std::path::PathBuf::from(path);
    }

    if let Ok(current_dir) = std::env::current_dir() {
        let mut dir = current_dir.as_path();
        loop {
            let patchdesk_dir = dir.join(".patchdesk");
            if patchdesk_dir.is_dir() {
                return patchdesk_dir.join("patchdesk.db");
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
    }

    std::path::PathBuf::from(".patchdesk/patchdesk.db")
}

/// Current schema version for patchdesk
pub const CURRENT_SCHEMA: DeskSchema = DeskSchema {
    major: 1,
    minor: 2,
    patch: 0,
    name: "ticket-desk",
    features: &[
        "tickets",
        "proposed_changes",
        "original_checksum",
        "conversation_turns",
        "change_history",
        "findings",
    ],
};

/// Describes the version and capabilities of the schema
#[derive(Debug, Clone)]
pub struct DeskSchema {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub name: &'static str,
    pub features: &'static [&'static str],
}

impl DeskSchema {
    pub fn version_string(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(&feature)
    }
}

impl std::fmt::Display for DeskSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{} ({})", self.version_string(), self.name)
    }
}

/// Serialize a JSON-array text column as a real array
fn serialize_json_list<S: Serializer>(value: &Option<String>, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.collect_seq(parse_json_list(value.as_deref()))
}

fn serialize_json_list_text<S: Serializer>(value: &str, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.collect_seq(parse_json_list(Some(value)))
}

fn parse_json_list(value: Option<&str>) -> Vec<String> {
    value
        .and_then(|v| serde_json::from_str::<Vec<String>>(v).ok())
        .unwrap_or_default()
}

// ============================================================================
// Diesel Models
// ============================================================================

/// Insertable schema version
#[derive(Insertable)]
#[diesel(table_name = schema_versions)]
pub struct NewSchemaVersion<'a> {
    pub version: &'a str,
    pub name: &'a str,
    pub features: &'a str,
    pub introduced_at: &'a str,
}

/// Insertable ticket
#[derive(Insertable)]
#[diesel(table_name = tickets)]
pub struct NewTicket<'a> {
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub category: &'a str,
    pub priority: &'a str,
    pub status: &'a str,
    pub creator: Option<&'a str>,
    pub assignee: Option<&'a str>,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Queryable ticket
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = tickets)]
pub struct Ticket {
    pub id: i32,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub priority: String,
    pub status: String,
    pub creator: Option<String>,
    pub assignee: Option<String>,
    pub ai_suggestion: Option<String>,
    pub ai_status: Option<String>,
    #[serde(serialize_with = "serialize_json_list")]
    pub ai_files_analyzed: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Ticket {
    /// Paths the last analysis actually read
    pub fn files_analyzed(&self) -> Vec<String> {
        parse_json_list(self.ai_files_analyzed.as_deref())
    }

    pub fn review_status(&self) -> Option<ReviewStatus> {
        self.ai_status.as_deref().and_then(|s| s.parse().ok())
    }
}

/// Insertable proposed change
#[derive(Insertable)]
#[diesel(table_name = proposed_changes)]
pub struct NewProposedChange<'a> {
    pub ticket_id: Option<i32>,
    pub file_path: &'a str,
    pub original_content: &'a str,
    pub original_checksum: &'a str,
    pub proposed_content: &'a str,
    pub change_description: &'a str,
    pub status: &'a str,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Queryable proposed change
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = proposed_changes)]
pub struct ProposedChange {
    pub id: i32,
    pub ticket_id: Option<i32>,
    pub file_path: String,
    pub original_content: String,
    pub original_checksum: String,
    pub proposed_content: String,
    pub change_description: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
    pub resolved_at: Option<String>,
}

impl ProposedChange {
    pub fn review_status(&self) -> ReviewStatus {
        // Only ReviewStatus::as_str ever writes this column
        self.status.parse().unwrap_or(ReviewStatus::Pending)
    }
}

/// Insertable conversation turn
#[derive(Insertable)]
#[diesel(table_name = conversation_turns)]
pub struct NewConversationTurn<'a> {
    pub scope: &'a str,
    pub role: &'a str,
    pub content: &'a str,
    pub created_at: &'a str,
}

/// Queryable conversation turn
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = conversation_turns)]
pub struct ConversationTurnRow {
    pub id: i32,
    pub scope: String,
    pub role: String,
    pub content: String,
    pub created_at: String,
}

/// Insertable change record
#[derive(Insertable)]
#[diesel(table_name = change_history)]
pub struct NewChangeRecord<'a> {
    pub ticket_id: Option<i32>,
    pub files_affected: &'a str,
    pub change_type: &'a str,
    pub summary: &'a str,
    pub ai_response: Option<&'a str>,
    pub created_at: &'a str,
}

/// Queryable change record
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = change_history)]
pub struct ChangeRecord {
    pub id: i32,
    pub ticket_id: Option<i32>,
    #[serde(serialize_with = "serialize_json_list_text")]
    pub files_affected: String,
    pub change_type: String,
    pub summary: String,
    pub ai_response: Option<String>,
    pub created_at: String,
}

impl ChangeRecord {
    pub fn files(&self) -> Vec<String> {
        parse_json_list(Some(&self.files_affected))
    }
}

/// Insertable finding
#[derive(Insertable)]
#[diesel(table_name = findings)]
pub struct NewFinding<'a> {
    pub ticket_id: Option<i32>,
    pub kind: &'a str,
    pub title: Option<&'a str>,
    pub content: &'a str,
    pub tags: &'a str,
    pub created_at: &'a str,
}

/// Queryable finding
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = findings)]
pub struct Finding {
    pub id: i32,
    pub ticket_id: Option<i32>,
    pub kind: String,
    pub title: Option<String>,
    pub content: String,
    #[serde(serialize_with = "serialize_json_list_text")]
    pub tags: String,
    pub created_at: String,
}

impl Finding {
    pub fn tag_list(&self) -> Vec<String> {
        parse_json_list(Some(&self.tags))
    }
}

/// Render findings as a markdown report, one section per kind.
///
/// Kinds appear in `FindingKind::ALL` order and keep the order they were given
/// in within a section. Kinds with no findings get no section.
pub fn render_findings_markdown(entries: &[Finding], generated_at: &str) -> String {
    let mut out = format!("# Patchdesk Findings\nGenerated: {}\n\n", generated_at);
    for kind in FindingKind::ALL {
        let section: Vec<&Finding> = entries.iter().filter(|f| f.kind == kind.as_str()).collect();
        if section.is_empty() {
            continue;
        }
        out.push_str(&format!("## {}\n\n", kind.heading()));
        for finding in section {
            out.push_str(&format!(
                "### {}\n*{}*\n\n{}\n\n",
                finding.title.as_deref().unwrap_or("Untitled"),
                finding.created_at,
                finding.content
            ));
            let tags = finding.tag_list();
            if !tags.is_empty() {
                out.push_str(&format!("Tags: {}\n\n", tags.join(", ")));
            }
            out.push_str("---\n\n");
        }
    }
    out
}

// ============================================================================
// Database Connection
// ============================================================================

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Applied to every pooled connection: wait on locks instead of failing
#[derive(Debug)]
struct SqlitePragmas;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
        conn.batch_execute("PRAGMA busy_timeout = 5000; PRAGMA foreign_keys = ON;")
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Database connection wrapper with connection pool
pub struct Database {
    pool: DbPool,
}

/// Error type for database operations
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Query error: {0}")]
    Query(#[from] diesel::result::Error),
    #[error("Pool error: {0}")]
    Pool(#[from] diesel::r2d2::Error),
    #[error("{0}")]
    Validation(String),
}

impl Classify for DbError {
    fn kind(&self) -> FailureKind {
        match self {
            DbError::Validation(_) => FailureKind::Invalid,
            _ => FailureKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl Database {
    /// Get the database path that will be used
    pub fn db_path() -> std::path::PathBuf {
        get_db_path()
    }

    /// Open database at default path (respects PATCHDESK_DB_PATH env var)
    pub fn open() -> Result<Self> {
        let path = get_db_path();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| DbError::Connection(e.to_string()))?;
            }
        }
        Self::open_at(&path)
    }

    /// Open database at specified path
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(&path_str);
        let pool = Pool::builder()
            .max_size(5)
            .connection_customizer(Box::new(SqlitePragmas))
            .build(manager)
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    fn get_conn(&self) -> Result<DbConn> {
        self.pool.get().map_err(|e| DbError::Connection(e.to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let mut conn = self.get_conn()?;

        conn.batch_execute(
            r#"
            CREATE TABLE IF NOT EXISTS schema_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                version TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                features TEXT NOT NULL,
                introduced_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tickets (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                category TEXT NOT NULL CHECK(category IN ('bug', 'feature', 'task', 'improvement')),
                priority TEXT NOT NULL DEFAULT 'medium' CHECK(priority IN ('low', 'medium', 'high', 'critical')),
                status TEXT NOT NULL DEFAULT 'open' CHECK(status IN ('open', 'in_progress', 'resolved', 'closed')),
                creator TEXT,
                assignee TEXT,
                ai_suggestion TEXT,
                ai_status TEXT CHECK(ai_status IN ('pending', 'accepted', 'rejected')),
                ai_files_analyzed TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS proposed_changes (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                ticket_id INTEGER,
                file_path TEXT NOT NULL,
                original_content TEXT NOT NULL,
                original_checksum TEXT NOT NULL,
                proposed_content TEXT NOT NULL,
                change_description TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending', 'accepted', 'rejected')),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                resolved_at TEXT,
                FOREIGN KEY (ticket_id) REFERENCES tickets(id)
            );

            CREATE TABLE IF NOT EXISTS conversation_turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                scope TEXT NOT NULL,
                role TEXT NOT NULL CHECK(role IN ('user', 'assistant')),
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS change_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                ticket_id INTEGER,
                files_affected TEXT NOT NULL,
                change_type TEXT NOT NULL CHECK(change_type IN ('analyze', 'modify')),
                summary TEXT NOT NULL,
                ai_response TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (ticket_id) REFERENCES tickets(id)
            );

            CREATE TABLE IF NOT EXISTS findings (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                ticket_id INTEGER,
                kind TEXT NOT NULL CHECK(kind IN ('summary', 'finding', 'recommendation', 'note')),
                title TEXT,
                content TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                FOREIGN KEY (ticket_id) REFERENCES tickets(id)
            );

            CREATE INDEX IF NOT EXISTS idx_tickets_status ON tickets(status);
            CREATE INDEX IF NOT EXISTS idx_changes_ticket ON proposed_changes(ticket_id);
            CREATE INDEX IF NOT EXISTS idx_changes_status ON proposed_changes(status);
            CREATE INDEX IF NOT EXISTS idx_turns_scope ON conversation_turns(scope);
            CREATE INDEX IF NOT EXISTS idx_history_created ON change_history(created_at);
            CREATE INDEX IF NOT EXISTS idx_findings_kind ON findings(kind);
            "#,
        )?;

        self.register_schema(&CURRENT_SCHEMA)?;
        Ok(())
    }

    fn register_schema(&self, schema: &DeskSchema) -> Result<()> {
        let mut conn = self.get_conn()?;
        let now = chrono::Local::now().to_rfc3339();
        let features_json = serde_json::to_string(&schema.features).unwrap_or_default();

        let new_schema = NewSchemaVersion {
            version: &schema.version_string(),
            name: schema.name,
            features: &features_json,
            introduced_at: &now,
        };

        diesel::insert_or_ignore_into(schema_versions::table)
            .values(&new_schema)
            .execute(&mut conn)?;

        Ok(())
    }

    fn last_insert_id(conn: &mut SqliteConnection) -> Result<i32> {
        let id: i32 = diesel::select(diesel::dsl::sql::<diesel::sql_types::Integer>("last_insert_rowid()"))
            .first(conn)?;
        Ok(id)
    }

    // ========================================================================
    // Ticket Operations
    // ========================================================================

    /// Create a ticket in `open` status
    pub fn create_ticket(
        &self,
        title: &str,
        category: Category,
        priority: Priority,
        description: Option<&str>,
        creator: Option<&str>,
    ) -> Result<i32> {
        let title = title.trim();
        if title.is_empty() {
            return Err(DbError::Validation("Ticket title cannot be empty".to_string()));
        }

        let mut conn = self.get_conn()?;
        let now = chrono::Local::now().to_rfc3339();

        let new_ticket = NewTicket {
            title,
            description: description.map(str::trim).filter(|d| !d.is_empty()),
            category: category.as_str(),
            priority: priority.as_str(),
            status: TicketStatus::Open.as_str(),
            creator,
            assignee: None,
            created_at: &now,
            updated_at: &now,
        };

        diesel::insert_into(tickets::table)
            .values(&new_ticket)
            .execute(&mut conn)?;

        Self::last_insert_id(&mut conn)
    }

    pub fn get_ticket(&self, ticket_id: i32) -> Result<Option<Ticket>> {
        let mut conn = self.get_conn()?;
        let ticket = tickets::table
            .filter(tickets::id.eq(ticket_id))
            .select(Ticket::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(ticket)
    }

    /// Newest first, optionally filtered by status
    pub fn list_tickets(&self, status: Option<TicketStatus>) -> Result<Vec<Ticket>> {
        let mut conn = self.get_conn()?;
        let mut query = tickets::table.select(Ticket::as_select()).into_boxed();
        if let Some(status) = status {
            query = query.filter(tickets::status.eq(status.as_str()));
        }
        let tickets = query.order(tickets::id.desc()).load(&mut conn)?;
        Ok(tickets)
    }

    /// Returns false when the ticket does not exist
    pub fn update_ticket_status(&self, ticket_id: i32, status: TicketStatus) -> Result<bool> {
        let mut conn = self.get_conn()?;
        let now = chrono::Local::now().to_rfc3339();

        let updated = diesel::update(tickets::table.filter(tickets::id.eq(ticket_id)))
            .set((tickets::status.eq(status.as_str()), tickets::updated_at.eq(&now)))
            .execute(&mut conn)?;

        Ok(updated > 0)
    }

    pub fn assign_ticket(&self, ticket_id: i32, assignee: Option<&str>) -> Result<bool> {
        let mut conn = self.get_conn()?;
        let now = chrono::Local::now().to_rfc3339();

        let updated = diesel::update(tickets::table.filter(tickets::id.eq(ticket_id)))
            .set((tickets::assignee.eq(assignee), tickets::updated_at.eq(&now)))
            .execute(&mut conn)?;

        Ok(updated > 0)
    }

    /// Store a fresh AI suggestion; its review status restarts at `pending`
    pub fn set_ai_suggestion(&self, ticket_id: i32, suggestion: &str, files_analyzed: &[String]) -> Result<bool> {
        let mut conn = self.get_conn()?;
        let now = chrono::Local::now().to_rfc3339();
        let files_json = serde_json::to_string(files_analyzed).unwrap_or_else(|_| "[]".to_string());

        let updated = diesel::update(tickets::table.filter(tickets::id.eq(ticket_id)))
            .set((
                tickets::ai_suggestion.eq(Some(suggestion)),
                tickets::ai_files_analyzed.eq(Some(&files_json)),
                tickets::ai_status.eq(Some(ReviewStatus::Pending.as_str())),
                tickets::updated_at.eq(&now),
            ))
            .execute(&mut conn)?;

        Ok(updated > 0)
    }

    /// Record the reviewer's verdict on the AI suggestion.
    /// With `resolve` the ticket itself moves to `resolved`.
    pub fn set_ai_status(&self, ticket_id: i32, status: ReviewStatus, resolve: bool) -> Result<bool> {
        let mut conn = self.get_conn()?;
        let now = chrono::Local::now().to_rfc3339();
        let target = tickets::table.filter(tickets::id.eq(ticket_id));

        let updated = if resolve {
            diesel::update(target)
                .set((
                    tickets::ai_status.eq(Some(status.as_str())),
                    tickets::status.eq(TicketStatus::Resolved.as_str()),
                    tickets::updated_at.eq(&now),
                ))
                .execute(&mut conn)?
        } else {
            diesel::update(target)
                .set((tickets::ai_status.eq(Some(status.as_str())), tickets::updated_at.eq(&now)))
                .execute(&mut conn)?
        };

        Ok(updated > 0)
    }

    // ========================================================================
    // Proposed Change Operations
    // ========================================================================

    /// Insert a change in `pending`. Content columns are never updated afterwards.
    pub fn create_proposed_change(
        &self,
        ticket_id: Option<i32>,
        file_path: &str,
        original_content: &str,
        original_checksum: &str,
        proposed_content: &str,
        change_description: &str,
    ) -> Result<i32> {
        let mut conn = self.get_conn()?;
        let now = chrono::Local::now().to_rfc3339();

        let new_change = NewProposedChange {
            ticket_id,
            file_path,
            original_content,
            original_checksum,
            proposed_content,
            change_description,
            status: ReviewStatus::Pending.as_str(),
            created_at: &now,
            updated_at: &now,
        };

        diesel::insert_into(proposed_changes::table)
            .values(&new_change)
            .execute(&mut conn)?;

        Self::last_insert_id(&mut conn)
    }

    pub fn get_proposed_change(&self, change_id: i32) -> Result<Option<ProposedChange>> {
        let mut conn = self.get_conn()?;
        let change = proposed_changes::table
            .filter(proposed_changes::id.eq(change_id))
            .select(ProposedChange::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(change)
    }

    /// All changes of a ticket in proposal order
    pub fn proposed_changes_for_ticket(&self, ticket_id: i32) -> Result<Vec<ProposedChange>> {
        let mut conn = self.get_conn()?;
        let changes = proposed_changes::table
            .filter(proposed_changes::ticket_id.eq(ticket_id))
            .order(proposed_changes::id.asc())
            .select(ProposedChange::as_select())
            .load(&mut conn)?;
        Ok(changes)
    }

    pub fn pending_proposed_changes(&self) -> Result<Vec<ProposedChange>> {
        let mut conn = self.get_conn()?;
        let changes = proposed_changes::table
            .filter(proposed_changes::status.eq(ReviewStatus::Pending.as_str()))
            .order(proposed_changes::id.desc())
            .select(ProposedChange::as_select())
            .load(&mut conn)?;
        Ok(changes)
    }

    /// Compare-and-set on status: a single `UPDATE ... WHERE status = from`.
    ///
    /// Returns true only for the caller whose update matched the row.
    pub fn transition_change_status(&self, change_id: i32, from: ReviewStatus, to: ReviewStatus) -> Result<bool> {
        let mut conn = self.get_conn()?;
        let now = chrono::Local::now().to_rfc3339();
        let resolved_at = if to.is_terminal() { Some(now.as_str()) } else { None };

        let updated = diesel::update(
            proposed_changes::table
                .filter(proposed_changes::id.eq(change_id))
                .filter(proposed_changes::status.eq(from.as_str())),
        )
        .set((
            proposed_changes::status.eq(to.as_str()),
            proposed_changes::updated_at.eq(&now),
            proposed_changes::resolved_at.eq(resolved_at),
        ))
        .execute(&mut conn)?;

        Ok(updated == 1)
    }

    // ========================================================================
    // Conversation Operations
    // ========================================================================

    /// Append a turn and drop the oldest turns beyond `max_turns` for that scope
    pub fn append_turn(&self, scope: &str, role: &str, content: &str, max_turns: usize) -> Result<i32> {
        let mut conn = self.get_conn()?;
        let now = chrono::Local::now().to_rfc3339();

        conn.transaction::<i32, DbError, _>(|conn| {
            diesel::insert_into(conversation_turns::table)
                .values(&NewConversationTurn {
                    scope,
                    role,
                    content,
                    created_at: &now,
                })
                .execute(conn)?;
            let id = Self::last_insert_id(conn)?;

            let ids: Vec<i32> = conversation_turns::table
                .filter(conversation_turns::scope.eq(scope))
                .order(conversation_turns::id.desc())
                .select(conversation_turns::id)
                .load(conn)?;
            let stale: Vec<i32> = ids.into_iter().skip(max_turns).collect();
            if !stale.is_empty() {
                diesel::delete(conversation_turns::table.filter(conversation_turns::id.eq_any(stale)))
                    .execute(conn)?;
            }

            Ok(id)
        })
    }

    /// Turns of one scope, oldest first
    pub fn turns(&self, scope: &str) -> Result<Vec<ConversationTurnRow>> {
        let mut conn = self.get_conn()?;
        let turns = conversation_turns::table
            .filter(conversation_turns::scope.eq(scope))
            .order(conversation_turns::id.asc())
            .select(ConversationTurnRow::as_select())
            .load(&mut conn)?;
        Ok(turns)
    }

    pub fn clear_turns(&self, scope: &str) -> Result<usize> {
        let mut conn = self.get_conn()?;
        let deleted = diesel::delete(conversation_turns::table.filter(conversation_turns::scope.eq(scope)))
            .execute(&mut conn)?;
        Ok(deleted)
    }

    // ========================================================================
    // Change History Operations
    // ========================================================================

    pub fn record_change(
        &self,
        ticket_id: Option<i32>,
        files_affected: &[String],
        change_type: &str,
        summary: &str,
        ai_response: Option<&str>,
    ) -> Result<i32> {
        let mut conn = self.get_conn()?;
        let now = chrono::Local::now().to_rfc3339();
        let files_json = serde_json::to_string(files_affected).unwrap_or_else(|_| "[]".to_string());

        diesel::insert_into(change_history::table)
            .values(&NewChangeRecord {
                ticket_id,
                files_affected: &files_json,
                change_type,
                summary,
                ai_response,
                created_at: &now,
            })
            .execute(&mut conn)?;

        Self::last_insert_id(&mut conn)
    }

    /// Most recent history entries first
    pub fn change_history(&self, limit: i64) -> Result<Vec<ChangeRecord>> {
        let mut conn = self.get_conn()?;
        let records = change_history::table
            .order(change_history::id.desc())
            .limit(limit)
            .select(ChangeRecord::as_select())
            .load(&mut conn)?;
        Ok(records)
    }

    // ========================================================================
    // Finding Operations
    // ========================================================================

    /// Save a finding; blank content is rejected, blank title and tags are dropped
    pub fn save_finding(
        &self,
        kind: FindingKind,
        title: Option<&str>,
        content: &str,
        tags: &[String],
        ticket_id: Option<i32>,
    ) -> Result<i32> {
        if content.trim().is_empty() {
            return Err(DbError::Validation("Finding content cannot be empty".to_string()));
        }
        let tags: Vec<&str> = tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()).collect();
        let tags_json = serde_json::to_string(&tags).unwrap_or_else(|_| "[]".to_string());

        let mut conn = self.get_conn()?;
        let now = chrono::Local::now().to_rfc3339();

        diesel::insert_into(findings::table)
            .values(&NewFinding {
                ticket_id,
                kind: kind.as_str(),
                title: title.map(str::trim).filter(|t| !t.is_empty()),
                content,
                tags: &tags_json,
                created_at: &now,
            })
            .execute(&mut conn)?;

        Self::last_insert_id(&mut conn)
    }

    /// Newest first, optionally narrowed to one kind and/or one ticket
    pub fn list_findings(&self, kind: Option<FindingKind>, ticket_id: Option<i32>) -> Result<Vec<Finding>> {
        let mut conn = self.get_conn()?;
        let mut query = findings::table.select(Finding::as_select()).into_boxed();
        if let Some(kind) = kind {
            query = query.filter(findings::kind.eq(kind.as_str()));
        }
        if let Some(ticket_id) = ticket_id {
            query = query.filter(findings::ticket_id.eq(ticket_id));
        }
        let rows = query.order(findings::id.desc()).load(&mut conn)?;
        Ok(rows)
    }

    /// All findings (or one ticket's) as a markdown report
    pub fn findings_markdown(&self, ticket_id: Option<i32>) -> Result<(String, usize)> {
        let entries = self.list_findings(None, ticket_id)?;
        let generated_at = chrono::Local::now().to_rfc3339();
        Ok((render_findings_markdown(&entries, &generated_at), entries.len()))
    }

    /// Summary counts for status displays
    pub fn summary(&self) -> Result<DbSummary> {
        let mut conn = self.get_conn()?;
        let total_tickets: i64 = tickets::table.count().get_result(&mut conn)?;
        let open_tickets: i64 = tickets::table
            .filter(tickets::status.eq(TicketStatus::Open.as_str()))
            .count()
            .get_result(&mut conn)?;
        let pending_changes: i64 = proposed_changes::table
            .filter(proposed_changes::status.eq(ReviewStatus::Pending.as_str()))
            .count()
            .get_result(&mut conn)?;
        Ok(DbSummary {
            total_tickets,
            open_tickets,
            pending_changes,
        })
    }
}

// ============================================================================
// Additional Types
// ============================================================================

/// Summary statistics from the database
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbSummary {
    pub total_tickets: i64,
    pub open_tickets: i64,
    pub pending_changes: i64,
}
