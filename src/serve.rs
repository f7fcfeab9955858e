//! HTTP API for tickets and proposed changes
//!
//! `patchdesk serve` → JSON API on a fixed pool of worker threads, each pulling
//! from the same `tiny_http::Server`. Every response uses the same envelope.

use crate::assistant::Assistant;
use crate::error::{Classify, FailureKind};
use crate::lifecycle::Decision;
use crate::ticket::{Category, FindingKind, Priority, TicketStatus};
use serde::{Deserialize, Serialize};
use tiny_http::{Header, Method, Request, Response, Server};
use tracing::{debug, info, warn};

#[derive(Serialize)]
struct ApiResponse<T> {
    ok: bool,
    data: Option<T>,
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<FailureKind>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            kind: None,
        }
    }
}

impl ApiResponse<()> {
    fn failure(kind: FailureKind, error: String) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error),
            kind: Some(kind),
        }
    }
}

/// Status code and serialized envelope
#[derive(Debug)]
struct Reply {
    status: u16,
    body: String,
}

fn ok<T: Serialize>(data: T) -> Reply {
    envelope(200, &ApiResponse::success(data))
}

fn fail<E: Classify>(err: &E) -> Reply {
    let kind = err.kind();
    if kind == FailureKind::Internal {
        warn!(error = %err, "request failed");
    }
    envelope(kind.http_status(), &ApiResponse::failure(kind, err.user_message()))
}

fn invalid(message: impl Into<String>) -> Reply {
    let message = message.into();
    envelope(
        400,
        &ApiResponse::failure(
            FailureKind::Invalid,
            format!("{}: {}", FailureKind::Invalid.headline(), message),
        ),
    )
}

fn not_found(what: &str) -> Reply {
    envelope(
        404,
        &ApiResponse::failure(FailureKind::NotFound, format!("{}: {}", FailureKind::NotFound.headline(), what)),
    )
}

fn envelope<T: Serialize>(status: u16, response: &ApiResponse<T>) -> Reply {
    match serde_json::to_string(response) {
        Ok(body) => Reply { status, body },
        Err(e) => Reply {
            status: 500,
            body: format!(
                "{{\"ok\":false,\"data\":null,\"error\":\"serialization failed: {}\",\"kind\":\"internal\"}}",
                e.to_string().replace('"', "'")
            ),
        },
    }
}

fn json_header() -> Option<Header> {
    Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).ok()
}

// ============================================================================
// Request bodies and queries
// ============================================================================

#[derive(Deserialize)]
struct CreateTicketBody {
    title: String,
    #[serde(default)]
    description: Option<String>,
    category: String,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    creator: Option<String>,
    #[serde(default)]
    assignee: Option<String>,
}

#[derive(Deserialize)]
struct StatusBody {
    status: String,
}

#[derive(Deserialize)]
struct ActionBody {
    action: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct MessageBody {
    message: String,
}

#[derive(Deserialize)]
struct ProposeBody {
    file_path: String,
    instruction: String,
}

#[derive(Deserialize)]
struct TaskBody {
    #[serde(default)]
    task: String,
}

#[derive(Deserialize)]
struct FindingBody {
    #[serde(default)]
    content: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    ticket_id: Option<i32>,
}

#[derive(Deserialize, Default)]
struct ExportBody {
    #[serde(default)]
    ticket_id: Option<i32>,
}

#[derive(Deserialize, Default)]
struct FindingsQuery {
    #[serde(rename = "type")]
    kind: Option<String>,
    ticket_id: Option<i32>,
}

#[derive(Deserialize, Default)]
struct TicketsQuery {
    status: Option<String>,
}

#[derive(Deserialize, Default)]
struct FilesQuery {
    directory: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChangesQuery {
    limit: Option<i64>,
}

#[derive(Serialize)]
struct ChatReply {
    response: String,
}

#[derive(Serialize)]
struct Saved {
    id: i32,
}

#[derive(Serialize)]
struct Exported {
    count: usize,
    markdown: String,
}

#[derive(Serialize)]
struct Cleared {
    cleared: usize,
}

fn parse_body<T: for<'de> Deserialize<'de>>(body: &str) -> Result<T, Reply> {
    serde_json::from_str(body).map_err(|e| invalid(format!("invalid JSON body: {}", e)))
}

fn parse_query<T: for<'de> Deserialize<'de> + Default>(query: &str) -> Result<T, Reply> {
    if query.is_empty() {
        return Ok(T::default());
    }
    serde_urlencoded::from_str(query).map_err(|e| invalid(format!("invalid query: {}", e)))
}

fn parse_id(raw: &str) -> Result<i32, Reply> {
    raw.parse::<i32>()
        .map_err(|_| invalid(format!("'{}' is not a valid id", raw)))
}

// ============================================================================
// Server
// ============================================================================

/// Bind and serve until the process exits
pub fn start_server(assistant: &Assistant, port: u16, workers: usize) -> std::io::Result<()> {
    let addr = format!("127.0.0.1:{}", port);
    let server =
        Server::http(&addr).map_err(|e| std::io::Error::other(e.to_string()))?;

    info!(addr = %addr, workers, "patchdesk API listening");
    eprintln!("\n\x1b[1;32mpatchdesk\x1b[0m");
    eprintln!("   API: http://localhost:{}/api/status", port);
    eprintln!("   Press Ctrl+C to stop\n");

    serve_on(&server, assistant, workers);
    Ok(())
}

/// Run `workers` threads answering requests from `server`
pub fn serve_on(server: &Server, assistant: &Assistant, workers: usize) {
    std::thread::scope(|scope| {
        for _ in 0..workers.max(1) {
            scope.spawn(|| {
                for request in server.incoming_requests() {
                    if let Err(e) = handle_request(assistant, request) {
                        warn!(error = %e, "failed to send response");
                    }
                }
            });
        }
    });
}

fn handle_request(assistant: &Assistant, mut request: Request) -> std::io::Result<()> {
    let url = request.url().to_string();
    let (path, query) = url.split_once('?').unwrap_or((url.as_str(), ""));
    let method = request.method().clone();

    let mut body = String::new();
    let reply = match request.as_reader().read_to_string(&mut body) {
        Ok(_) => route(assistant, &method, path, query, &body),
        Err(e) => invalid(format!("failed to read body: {}", e)),
    };
    debug!(method = %method, path = %path, status = reply.status, "handled request");

    let mut response = Response::from_string(reply.body).with_status_code(reply.status);
    if let Some(header) = json_header() {
        response = response.with_header(header);
    }
    request.respond(response)
}

fn route(assistant: &Assistant, method: &Method, path: &str, query: &str, body: &str) -> Reply {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let result = match (method, segments.as_slice()) {
        (Method::Get, ["api", "status"]) => Ok(match assistant.status() {
            Ok(status) => ok(status),
            Err(e) => fail(&e),
        }),

        (Method::Get, ["api", "tickets"]) => list_tickets(assistant, query),
        (Method::Post, ["api", "tickets"]) => create_ticket(assistant, body),
        (Method::Get, ["api", "tickets", id]) => parse_id(id).map(|id| get_ticket(assistant, id)),
        (Method::Put, ["api", "tickets", id, "status"]) => {
            parse_id(id).and_then(|id| update_status(assistant, id, body))
        }
        (Method::Post, ["api", "tickets", id, "ai-resolve"]) => parse_id(id).map(|id| {
            match assistant.resolve_ticket(id) {
                Ok(report) => ok(report),
                Err(e) => fail(&e),
            }
        }),
        (Method::Post, ["api", "tickets", id, "ai-action"]) => {
            parse_id(id).and_then(|id| ai_action(assistant, id, body))
        }
        (Method::Post, ["api", "tickets", id, "chat"]) => parse_id(id).and_then(|id| {
            let req: MessageBody = parse_body(body)?;
            Ok(match assistant.proposals().probe(id, &req.message) {
                Ok(response) => ok(ChatReply { response }),
                Err(e) => fail(&e),
            })
        }),
        (Method::Delete, ["api", "tickets", id, "conversation"]) => parse_id(id).map(|id| {
            match assistant.conversations().clear(crate::conversation::Scope::Ticket(id)) {
                Ok(cleared) => ok(Cleared { cleared }),
                Err(e) => fail(&e),
            }
        }),
        (Method::Get, ["api", "tickets", id, "proposed-changes"]) => parse_id(id).map(|id| {
            match assistant.db().get_ticket(id) {
                Ok(Some(_)) => match assistant.db().proposed_changes_for_ticket(id) {
                    Ok(changes) => ok(changes),
                    Err(e) => fail(&e),
                },
                Ok(None) => not_found(&format!("ticket #{}", id)),
                Err(e) => fail(&e),
            }
        }),
        (Method::Post, ["api", "tickets", id, "propose-change"]) => parse_id(id).and_then(|id| {
            let req: ProposeBody = parse_body(body)?;
            Ok(match assistant.propose_change(Some(id), &req.file_path, &req.instruction) {
                Ok(change) => ok(change),
                Err(e) => fail(&e),
            })
        }),

        (Method::Get, ["api", "proposed-changes"]) => Ok(match assistant.db().pending_proposed_changes() {
            Ok(changes) => ok(changes),
            Err(e) => fail(&e),
        }),
        (Method::Get, ["api", "proposed-changes", id]) => parse_id(id).map(|id| {
            match assistant.db().get_proposed_change(id) {
                Ok(Some(change)) => ok(change),
                Ok(None) => not_found(&format!("proposed change #{}", id)),
                Err(e) => fail(&e),
            }
        }),
        (Method::Post, ["api", "proposed-changes", id, "accept"]) => parse_id(id).map(|id| {
            match assistant.proposals().accept(id) {
                Ok(change) => ok(change),
                Err(e) => fail(&e),
            }
        }),
        (Method::Post, ["api", "proposed-changes", id, "reject"]) => parse_id(id).map(|id| {
            match assistant.proposals().reject(id) {
                Ok(change) => ok(change),
                Err(e) => fail(&e),
            }
        }),

        (Method::Post, ["api", "chat"]) => parse_body::<MessageBody>(body).map(|req| {
            match assistant.chat(&req.message) {
                Ok(response) => ok(ChatReply { response }),
                Err(e) => fail(&e),
            }
        }),
        (Method::Post, ["api", "history", "clear"]) => Ok(
            match assistant.conversations().clear(crate::conversation::Scope::General) {
                Ok(cleared) => ok(Cleared { cleared }),
                Err(e) => fail(&e),
            },
        ),
        (Method::Get, ["api", "files"]) => parse_query::<FilesQuery>(query).map(|q| {
            match assistant.list_files(q.directory.as_deref().unwrap_or("")) {
                Ok(files) => ok(files),
                Err(e) => fail(&e),
            }
        }),
        (Method::Get, ["api", "target", "blueprint"]) => Ok(match assistant.blueprint() {
            Ok(view) => ok(view),
            Err(e) => fail(&e),
        }),
        (Method::Get, ["api", "changes"]) => parse_query::<ChangesQuery>(query).map(|q| {
            match assistant.db().change_history(q.limit.unwrap_or(20).clamp(1, 500)) {
                Ok(records) => ok(records),
                Err(e) => fail(&e),
            }
        }),

        (Method::Post, ["api", "task"]) => run_task(assistant, body),
        (Method::Get, ["api", "context"]) => list_findings(assistant, query),
        (Method::Post, ["api", "context"]) => save_finding(assistant, body),
        (Method::Post, ["api", "context", "export"]) => export_findings(assistant, body),

        _ => Ok(not_found(&format!("no route for {} /{}", method, segments.join("/")))),
    };

    result.unwrap_or_else(|reply| reply)
}

fn list_tickets(assistant: &Assistant, query: &str) -> Result<Reply, Reply> {
    let q: TicketsQuery = parse_query(query)?;
    let status = match q.status.as_deref().filter(|s| !s.is_empty() && *s != "all") {
        Some(s) => Some(s.parse::<TicketStatus>().map_err(|e| invalid(e.to_string()))?),
        None => None,
    };
    Ok(match assistant.db().list_tickets(status) {
        Ok(tickets) => ok(tickets),
        Err(e) => fail(&e),
    })
}

fn create_ticket(assistant: &Assistant, body: &str) -> Result<Reply, Reply> {
    let req: CreateTicketBody = parse_body(body)?;
    let category: Category = req.category.parse().map_err(|e: crate::ticket::ParseEnumError| invalid(e.to_string()))?;
    let priority: Priority = match req.priority.as_deref() {
        Some(p) => p.parse().map_err(|e: crate::ticket::ParseEnumError| invalid(e.to_string()))?,
        None => Priority::default(),
    };

    let db = assistant.db();
    let id = match db.create_ticket(
        &req.title,
        category,
        priority,
        req.description.as_deref(),
        req.creator.as_deref(),
    ) {
        Ok(id) => id,
        Err(e) => return Ok(fail(&e)),
    };
    if let Some(assignee) = req.assignee.as_deref().filter(|a| !a.trim().is_empty()) {
        if let Err(e) = db.assign_ticket(id, Some(assignee)) {
            return Ok(fail(&e));
        }
    }
    Ok(get_ticket(assistant, id))
}

fn get_ticket(assistant: &Assistant, id: i32) -> Reply {
    match assistant.db().get_ticket(id) {
        Ok(Some(ticket)) => ok(ticket),
        Ok(None) => not_found(&format!("ticket #{}", id)),
        Err(e) => fail(&e),
    }
}

fn update_status(assistant: &Assistant, id: i32, body: &str) -> Result<Reply, Reply> {
    let req: StatusBody = parse_body(body)?;
    let status: TicketStatus = req.status.parse().map_err(|e: crate::ticket::ParseEnumError| invalid(e.to_string()))?;
    Ok(match assistant.db().update_ticket_status(id, status) {
        Ok(true) => get_ticket(assistant, id),
        Ok(false) => not_found(&format!("ticket #{}", id)),
        Err(e) => fail(&e),
    })
}

fn run_task(assistant: &Assistant, body: &str) -> Result<Reply, Reply> {
    let req: TaskBody = parse_body(body)?;
    if req.task.trim().is_empty() {
        return Err(invalid("task description required"));
    }
    Ok(match assistant.process_task(&req.task) {
        Ok(report) => ok(report),
        Err(e) => fail(&e),
    })
}

fn list_findings(assistant: &Assistant, query: &str) -> Result<Reply, Reply> {
    let q: FindingsQuery = parse_query(query)?;
    let kind = match q.kind.as_deref().filter(|k| !k.is_empty()) {
        Some(k) => Some(k.parse::<FindingKind>().map_err(|e| invalid(e.to_string()))?),
        None => None,
    };
    Ok(match assistant.db().list_findings(kind, q.ticket_id) {
        Ok(findings) => ok(findings),
        Err(e) => fail(&e),
    })
}

fn save_finding(assistant: &Assistant, body: &str) -> Result<Reply, Reply> {
    let req: FindingBody = parse_body(body)?;
    let kind: FindingKind = match req.kind.as_deref() {
        Some(k) => k.parse().map_err(|e: crate::ticket::ParseEnumError| invalid(e.to_string()))?,
        None => FindingKind::default(),
    };
    let db = assistant.db();
    if let Some(ticket_id) = req.ticket_id {
        match db.get_ticket(ticket_id) {
            Ok(Some(_)) => {}
            Ok(None) => return Ok(not_found(&format!("ticket #{}", ticket_id))),
            Err(e) => return Ok(fail(&e)),
        }
    }
    Ok(
        match db.save_finding(kind, req.title.as_deref(), &req.content, &req.tags, req.ticket_id) {
            Ok(id) => ok(Saved { id }),
            Err(e) => fail(&e),
        },
    )
}

fn export_findings(assistant: &Assistant, body: &str) -> Result<Reply, Reply> {
    let req: ExportBody = if body.trim().is_empty() {
        ExportBody::default()
    } else {
        parse_body(body)?
    };
    Ok(match assistant.db().findings_markdown(req.ticket_id) {
        Ok((markdown, count)) => ok(Exported { count, markdown }),
        Err(e) => fail(&e),
    })
}

fn ai_action(assistant: &Assistant, id: i32, body: &str) -> Result<Reply, Reply> {
    let req: ActionBody = parse_body(body)?;
    let proposals = assistant.proposals();
    let reply = match req.action.trim().to_ascii_lowercase().as_str() {
        "probe" => {
            let message = req.message.unwrap_or_default();
            match proposals.probe(id, &message) {
                Ok(response) => ok(ChatReply { response }),
                Err(e) => fail(&e),
            }
        }
        other => {
            let decision: Decision = other.parse().map_err(|_| {
                invalid(format!("unknown action '{}' (expected accept, reject or probe)", other))
            })?;
            match proposals.decide_ticket(id, decision) {
                Ok(outcome) => ok(outcome),
                Err(e) => fail(&e),
            }
        }
    };
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::ScriptedCompleter;
    use crate::config::{Config, TargetConfig};
    use crate::db::Database;
    use crate::gateway::TargetProject;
    use serde_json::Value;
    use tempfile::TempDir;

    struct Harness {
        _db_dir: TempDir,
        target: TempDir,
        assistant: Assistant,
    }

    fn harness(replies: &[&str]) -> Harness {
        let db_dir = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        std::fs::write(target.path().join("app.py"), "x = 1\n").unwrap();
        let config = Config {
            target: TargetConfig {
                root: target.path().to_path_buf(),
                ..TargetConfig::default()
            },
            ..Config::default()
        };
        let db = Database::open_at(db_dir.path().join("api.db")).unwrap();
        let gateway = TargetProject::new(&config.target).unwrap();
        let completer = ScriptedCompleter::new(replies.iter().copied());
        let assistant = Assistant::new(config, db, Box::new(gateway), Box::new(completer));
        Harness {
            _db_dir: db_dir,
            target,
            assistant,
        }
    }

    fn call(h: &Harness, method: Method, path: &str, body: &str) -> (u16, Value) {
        let (path, query) = path.split_once('?').unwrap_or((path, ""));
        let reply = route(&h.assistant, &method, path, query, body);
        (reply.status, serde_json::from_str(&reply.body).unwrap())
    }

    #[test]
    fn test_api_response_serializes_to_json() {
        let response = ApiResponse::success("test".to_string());
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"ok\":true"));
        assert!(json.contains("\"data\":\"test\""));
        assert!(json.contains("\"error\":null"));
        assert!(!json.contains("\"kind\""));
    }

    #[test]
    fn test_ticket_crud() {
        let h = harness(&[]);
        let (status, json) = call(
            &h,
            Method::Post,
            "/api/tickets",
            r#"{"title":"Cart total wrong","category":"bug","priority":"high","assignee":"sam"}"#,
        );
        assert_eq!(status, 200);
        assert_eq!(json["data"]["status"], "open");
        assert_eq!(json["data"]["assignee"], "sam");
        let id = json["data"]["id"].as_i64().unwrap();

        let (status, json) = call(&h, Method::Put, &format!("/api/tickets/{}/status", id), r#"{"status":"in_progress"}"#);
        assert_eq!(status, 200);
        assert_eq!(json["data"]["status"], "in_progress");

        let (_, json) = call(&h, Method::Get, "/api/tickets?status=in_progress", "");
        assert_eq!(json["data"].as_array().unwrap().len(), 1);
        let (_, json) = call(&h, Method::Get, "/api/tickets?status=open", "");
        assert!(json["data"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_inputs() {
        let h = harness(&[]);
        let (status, json) = call(&h, Method::Post, "/api/tickets", r#"{"title":"x","category":"rant"}"#);
        assert_eq!(status, 400);
        assert_eq!(json["kind"], "invalid");

        let (status, _) = call(&h, Method::Get, "/api/tickets/abc", "");
        assert_eq!(status, 400);

        let (status, json) = call(&h, Method::Get, "/api/tickets/99", "");
        assert_eq!(status, 404);
        assert_eq!(json["ok"], false);

        let (status, _) = call(&h, Method::Get, "/api/nowhere", "");
        assert_eq!(status, 404);
    }

    #[test]
    fn test_propose_accept_and_double_accept() {
        let h = harness(&["DESCRIPTION: bump\n---BEGIN FILE---\nx = 2\n---END FILE---"]);
        let (_, json) = call(&h, Method::Post, "/api/tickets", r#"{"title":"Bump x","category":"task"}"#);
        let id = json["data"]["id"].as_i64().unwrap();

        let (status, json) = call(
            &h,
            Method::Post,
            &format!("/api/tickets/{}/propose-change", id),
            r#"{"file_path":"app.py","instruction":"set x to 2"}"#,
        );
        assert_eq!(status, 200, "{}", json);
        let change_id = json["data"]["id"].as_i64().unwrap();

        let (_, json) = call(&h, Method::Get, "/api/proposed-changes", "");
        assert_eq!(json["data"].as_array().unwrap().len(), 1);

        let (status, _) = call(&h, Method::Post, &format!("/api/proposed-changes/{}/accept", change_id), "");
        assert_eq!(status, 200);
        assert_eq!(std::fs::read_to_string(h.target.path().join("app.py")).unwrap(), "x = 2\n");

        let (status, json) = call(&h, Method::Post, &format!("/api/proposed-changes/{}/accept", change_id), "");
        assert_eq!(status, 409);
        assert_eq!(json["kind"], "already_decided");
        assert!(json["error"].as_str().unwrap().starts_with("This change was already decided"));
    }

    #[test]
    fn test_unknown_ai_action() {
        let h = harness(&[]);
        let (_, json) = call(&h, Method::Post, "/api/tickets", r#"{"title":"T","category":"task"}"#);
        let id = json["data"]["id"].as_i64().unwrap();
        let (status, _) = call(&h, Method::Post, &format!("/api/tickets/{}/ai-action", id), r#"{"action":"merge"}"#);
        assert_eq!(status, 400);
    }

    #[test]
    fn test_blueprint_unreachable_is_503() {
        let h = harness(&[]);
        let (status, json) = call(&h, Method::Get, "/api/target/blueprint", "");
        assert_eq!(status, 503);
        assert_eq!(json["kind"], "target_unreachable");
    }

    #[test]
    fn test_files_listing() {
        let h = harness(&[]);
        let (status, json) = call(&h, Method::Get, "/api/files?directory=.", "");
        assert_eq!(status, 200);
        assert_eq!(json["data"][0]["path"], "app.py");
        assert_eq!(json["data"][0]["kind"], "file");
    }

    #[test]
    fn test_served_over_http() {
        let h = harness(&[]);
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                let request = server.recv().unwrap();
                handle_request(&h.assistant, request).unwrap();
            });
            let response = reqwest::blocking::get(format!("http://{}/api/status", addr)).unwrap();
            assert_eq!(response.status().as_u16(), 200);
            let json: Value = response.json().unwrap();
            assert_eq!(json["ok"], true);
            assert_eq!(json["data"]["database"]["total_tickets"], 0);
        });
    }

    #[test]
    fn test_findings_save_list_export() {
        let h = harness(&[]);
        let (status, json) = call(
            &h,
            Method::Post,
            "/api/context",
            r#"{"content":"Sessions expire early","type":"note","title":"Auth","tags":["auth"]}"#,
        );
        assert_eq!(status, 200, "{}", json);
        assert!(json["data"]["id"].as_i64().is_some());

        let (status, _) = call(&h, Method::Post, "/api/context", r#"{"content":"Cache the catalog"}"#);
        assert_eq!(status, 200);

        let (_, json) = call(&h, Method::Get, "/api/context?type=note", "");
        let notes = json["data"].as_array().unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0]["tags"], serde_json::json!(["auth"]));

        let (_, json) = call(&h, Method::Get, "/api/context", "");
        assert_eq!(json["data"].as_array().unwrap().len(), 2);
        assert_eq!(json["data"][0]["kind"], "finding");

        let (status, json) = call(&h, Method::Post, "/api/context/export", "");
        assert_eq!(status, 200);
        assert_eq!(json["data"]["count"], 2);
        let markdown = json["data"]["markdown"].as_str().unwrap();
        assert!(markdown.contains("## Notes"));
        assert!(markdown.contains("### Auth"));
        assert!(markdown.contains("Cache the catalog"));
    }

    #[test]
    fn test_finding_validation() {
        let h = harness(&[]);
        let (status, json) = call(&h, Method::Post, "/api/context", r#"{"content":"  "}"#);
        assert_eq!(status, 400);
        assert_eq!(json["kind"], "invalid");

        let (status, _) = call(&h, Method::Post, "/api/context", r#"{"content":"x","type":"rumor"}"#);
        assert_eq!(status, 400);

        let (status, _) = call(&h, Method::Post, "/api/context", r#"{"content":"x","ticket_id":7}"#);
        assert_eq!(status, 404);

        let (status, _) = call(&h, Method::Get, "/api/context?type=rumor", "");
        assert_eq!(status, 400);
    }

    #[test]
    fn test_task_requires_description() {
        let h = harness(&[]);
        let (status, json) = call(&h, Method::Post, "/api/task", r#"{"task":"   "}"#);
        assert_eq!(status, 400);
        assert!(json["error"].as_str().unwrap().contains("task description required"));

        let (status, _) = call(&h, Method::Post, "/api/task", "{}");
        assert_eq!(status, 400);
    }

    #[test]
    fn test_task_returns_analysis() {
        let h = harness(&[r#"["app.py"]"#, "x is a module constant."]);
        let (status, json) = call(&h, Method::Post, "/api/task", r#"{"task":"What is x?"}"#);
        assert_eq!(status, 200, "{}", json);
        assert_eq!(json["data"]["response"], "x is a module constant.");
        assert_eq!(json["data"]["files_analyzed"], serde_json::json!(["app.py"]));

        let (_, json) = call(&h, Method::Get, "/api/context?type=finding", "");
        assert_eq!(json["data"][0]["content"], "x is a module constant.");
    }
}
