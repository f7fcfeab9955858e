//! Integration tests for the patchdesk CLI
//!
//! These tests exercise the full CLI workflow using a temporary database and a
//! temporary target project. No command here reaches a model.

use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

/// Helper to run patchdesk with a private database and target directory
fn run_patchdesk(args: &[&str], dir: &Path) -> std::process::Output {
    let target = dir.join("target");
    std::fs::create_dir_all(&target).expect("Failed to create target dir");
    Command::new(env!("CARGO_BIN_EXE_patchdesk"))
        .args(args)
        .current_dir(dir)
        .env("PATCHDESK_DB_PATH", dir.join("patchdesk.db"))
        .env("PATCHDESK_TARGET_DIR", &target)
        .env_remove("PATCHDESK_TARGET_URL")
        .env_remove("ANTHROPIC_API_KEY")
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to execute patchdesk")
}

/// Helper to get stdout as string
fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Helper to get stderr as string
fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn add_ticket(dir: &Path, title: &str) {
    let output = run_patchdesk(&["ticket", "add", title, "-c", "bug"], dir);
    assert!(output.status.success(), "ticket add failed: {}", stderr(&output));
}

// =============================================================================
// Basic Command Tests
// =============================================================================

#[test]
fn test_help_command() {
    let output = Command::new(env!("CARGO_BIN_EXE_patchdesk"))
        .arg("--help")
        .output()
        .expect("Failed to execute");

    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("patchdesk"));
    assert!(out.contains("resolve"));
    assert!(out.contains("accept"));
}

#[test]
fn test_version_command() {
    let output = Command::new(env!("CARGO_BIN_EXE_patchdesk"))
        .arg("--version")
        .output()
        .expect("Failed to execute");

    assert!(output.status.success());
    assert!(stdout(&output).contains("patchdesk"));
}

// =============================================================================
// Shell Completion Tests
// =============================================================================

#[test]
fn test_completion_zsh() {
    let output = Command::new(env!("CARGO_BIN_EXE_patchdesk"))
        .args(["completion", "zsh"])
        .output()
        .expect("Failed to execute");

    assert!(output.status.success(), "completion zsh failed: {}", stderr(&output));
    assert!(stdout(&output).contains("#compdef patchdesk"));
}

#[test]
fn test_completion_bash() {
    let output = Command::new(env!("CARGO_BIN_EXE_patchdesk"))
        .args(["completion", "bash"])
        .output()
        .expect("Failed to execute");

    assert!(output.status.success(), "completion bash failed: {}", stderr(&output));
    assert!(stdout(&output).contains("_patchdesk"));
}

#[test]
fn test_completion_fish() {
    let output = Command::new(env!("CARGO_BIN_EXE_patchdesk"))
        .args(["completion", "fish"])
        .output()
        .expect("Failed to execute");

    assert!(output.status.success(), "completion fish failed: {}", stderr(&output));
    assert!(stdout(&output).contains("complete -c patchdesk"));
}

// =============================================================================
// Ticket Tests
// =============================================================================

#[test]
fn test_add_and_list_tickets() {
    let tmp = TempDir::new().unwrap();

    let output = run_patchdesk(
        &["ticket", "add", "Login returns 500", "-c", "bug", "-p", "high"],
        tmp.path(),
    );
    assert!(output.status.success(), "ticket add failed: {}", stderr(&output));
    assert!(stdout(&output).contains("ticket 1"));

    let output = run_patchdesk(&["ticket", "list"], tmp.path());
    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("Login returns 500"));
    assert!(out.contains("open"));
    assert!(out.contains("bug"));
}

#[test]
fn test_ticket_list_json() {
    let tmp = TempDir::new().unwrap();
    add_ticket(tmp.path(), "first");
    add_ticket(tmp.path(), "second");

    let output = run_patchdesk(&["--json", "ticket", "list"], tmp.path());
    assert!(output.status.success(), "list failed: {}", stderr(&output));

    let tickets: serde_json::Value = serde_json::from_str(&stdout(&output)).expect("valid JSON");
    let tickets = tickets.as_array().expect("array");
    assert_eq!(tickets.len(), 2);
    // newest first
    assert_eq!(tickets[0]["title"], "second");
    assert_eq!(tickets[1]["ai_files_analyzed"], serde_json::json!([]));
}

#[test]
fn test_ticket_status_and_filter() {
    let tmp = TempDir::new().unwrap();
    add_ticket(tmp.path(), "stays open");
    add_ticket(tmp.path(), "gets closed");

    let output = run_patchdesk(&["ticket", "status", "2", "closed"], tmp.path());
    assert!(output.status.success(), "status failed: {}", stderr(&output));

    let output = run_patchdesk(&["ticket", "list", "--status", "open"], tmp.path());
    let out = stdout(&output);
    assert!(out.contains("stays open"));
    assert!(!out.contains("gets closed"));
}

#[test]
fn test_ticket_show_with_details() {
    let tmp = TempDir::new().unwrap();
    let output = run_patchdesk(
        &[
            "ticket",
            "add",
            "Dark mode",
            "-c",
            "feature",
            "-d",
            "Add a theme toggle",
            "--assignee",
            "sam",
        ],
        tmp.path(),
    );
    assert!(output.status.success(), "ticket add failed: {}", stderr(&output));

    let output = run_patchdesk(&["ticket", "show", "1"], tmp.path());
    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("Dark mode"));
    assert!(out.contains("Add a theme toggle"));
    assert!(out.contains("assignee: sam"));
}

#[test]
fn test_invalid_category() {
    let tmp = TempDir::new().unwrap();
    let output = run_patchdesk(&["ticket", "add", "Nope", "-c", "chore"], tmp.path());
    assert!(!output.status.success(), "unknown category should fail");
    assert!(stderr(&output).contains("chore"));
}

#[test]
fn test_empty_title_rejected() {
    let tmp = TempDir::new().unwrap();
    let output = run_patchdesk(&["ticket", "add", "   ", "-c", "bug"], tmp.path());
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Invalid request"));
}

#[test]
fn test_show_missing_ticket() {
    let tmp = TempDir::new().unwrap();
    let output = run_patchdesk(&["ticket", "show", "42"], tmp.path());
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Not found"));
}

// =============================================================================
// Proposed Change Tests
// =============================================================================

#[test]
fn test_changes_empty() {
    let tmp = TempDir::new().unwrap();
    let output = run_patchdesk(&["changes"], tmp.path());
    assert!(output.status.success(), "changes failed: {}", stderr(&output));
    assert!(stdout(&output).contains("No proposed changes"));
}

#[test]
fn test_accept_unknown_change() {
    let tmp = TempDir::new().unwrap();
    let output = run_patchdesk(&["accept", "99"], tmp.path());
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Not found"));
}

#[test]
fn test_accept_requires_target() {
    let tmp = TempDir::new().unwrap();
    let output = run_patchdesk(&["accept"], tmp.path());
    assert!(!output.status.success(), "accept with no id or ticket should fail");
}

#[test]
fn test_resolve_without_api_key() {
    let tmp = TempDir::new().unwrap();
    add_ticket(tmp.path(), "Broken header");
    std::fs::write(tmp.path().join("target").join("app.py"), "print('hi')\n").unwrap();

    let output = run_patchdesk(&["resolve", "1"], tmp.path());
    assert!(!output.status.success());
    let err = stderr(&output);
    assert!(err.contains("Model did not return a usable result"), "got: {}", err);
    assert!(err.contains("ANTHROPIC_API_KEY"));
}

// =============================================================================
// Target Project Tests
// =============================================================================

#[test]
fn test_files_listing() {
    let tmp = TempDir::new().unwrap();
    let target = tmp.path().join("target");
    std::fs::create_dir_all(target.join("src")).unwrap();
    std::fs::write(target.join("src").join("app.py"), "x = 1\n").unwrap();
    std::fs::write(target.join("README.md"), "# demo\n").unwrap();

    let output = run_patchdesk(&["files"], tmp.path());
    assert!(output.status.success(), "files failed: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("README.md"));
    assert!(out.contains("src/app.py"));
}

#[test]
fn test_files_rejects_traversal() {
    let tmp = TempDir::new().unwrap();
    let output = run_patchdesk(&["files", "../.."], tmp.path());
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Invalid request"));
}

#[test]
fn test_blueprint_without_url() {
    let tmp = TempDir::new().unwrap();
    let output = run_patchdesk(&["blueprint"], tmp.path());
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Could not reach target project"));
}

// =============================================================================
// Findings Tests
// =============================================================================

#[test]
fn test_findings_add_and_list() {
    let tmp = TempDir::new().unwrap();
    let output = run_patchdesk(
        &[
            "findings",
            "add",
            "Orders table has no index on user_id",
            "--type",
            "recommendation",
            "--title",
            "Orders index",
            "--tag",
            "db",
            "--tag",
            "perf",
        ],
        tmp.path(),
    );
    assert!(output.status.success(), "findings add failed: {}", stderr(&output));
    assert!(stdout(&output).contains("Saved recommendation 1"));

    let output = run_patchdesk(&["findings", "add", "Ops will rotate keys monthly", "-k", "note"], tmp.path());
    assert!(output.status.success());

    let output = run_patchdesk(&["findings", "list", "--type", "recommendation"], tmp.path());
    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("Orders index"));
    assert!(out.contains("tags: db, perf"));
    assert!(!out.contains("rotate keys"));

    let output = run_patchdesk(&["--json", "findings", "list"], tmp.path());
    let findings: serde_json::Value = serde_json::from_str(&stdout(&output)).expect("valid JSON");
    assert_eq!(findings.as_array().unwrap().len(), 2);
    assert_eq!(findings[0]["kind"], "note");
    assert_eq!(findings[1]["tags"], serde_json::json!(["db", "perf"]));
}

#[test]
fn test_findings_add_rejects_blank_and_unknown_ticket() {
    let tmp = TempDir::new().unwrap();
    let output = run_patchdesk(&["findings", "add", "  "], tmp.path());
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Invalid request"));

    let output = run_patchdesk(&["findings", "add", "orphan", "--ticket", "9"], tmp.path());
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Not found"));
}

#[test]
fn test_findings_export_to_file() {
    let tmp = TempDir::new().unwrap();
    add_ticket(tmp.path(), "Slow checkout");
    let output = run_patchdesk(
        &["findings", "add", "Cart recalculates on every render", "--ticket", "1", "--title", "Cart"],
        tmp.path(),
    );
    assert!(output.status.success(), "findings add failed: {}", stderr(&output));

    let report = tmp.path().join("findings.md");
    let output = run_patchdesk(&["findings", "export", "-o", report.to_str().unwrap()], tmp.path());
    assert!(output.status.success(), "export failed: {}", stderr(&output));
    assert!(stdout(&output).contains("Exported 1 finding(s)"));

    let markdown = std::fs::read_to_string(&report).unwrap();
    assert!(markdown.starts_with("# Patchdesk Findings"));
    assert!(markdown.contains("## Findings"));
    assert!(markdown.contains("### Cart"));
    assert!(markdown.contains("Cart recalculates on every render"));
}

#[test]
fn test_task_without_api_key() {
    let tmp = TempDir::new().unwrap();
    std::fs::create_dir_all(tmp.path().join("target")).unwrap();
    std::fs::write(tmp.path().join("target").join("app.py"), "print('hi')\n").unwrap();
    let output = run_patchdesk(&["task", "Where is the greeting printed?"], tmp.path());
    assert!(!output.status.success());
    assert!(stderr(&output).contains("ANTHROPIC_API_KEY"));
}

// =============================================================================
// Conversation Tests
// =============================================================================

#[test]
fn test_forget_empty_history() {
    let tmp = TempDir::new().unwrap();
    let output = run_patchdesk(&["forget"], tmp.path());
    assert!(output.status.success(), "forget failed: {}", stderr(&output));
    assert!(stdout(&output).contains("Cleared 0 turns from general"));
}
