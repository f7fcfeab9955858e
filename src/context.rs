//! Context assembly for the analysis call
//!
//! Sections go in a fixed order: task, blueprint, then the selected files in
//! selection order. The prompt never exceeds the budget; when space runs out the
//! later (less relevant) files are truncated or dropped first.

use crate::blueprint::Blueprint;
use serde::Serialize;
use tracing::debug;

/// Smallest slice of a file worth sending once it has to be truncated
const MIN_SLICE_CHARS: usize = 200;
const TRUNCATION_MARKER: &str = "\n[... file truncated to fit context budget ...]\n";
const BLUEPRINT_MARKER: &str = "\n[... blueprint truncated ...]\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBudget {
    /// Hard ceiling on the prompt, in characters
    pub max_chars: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AssembledContext {
    pub prompt: String,
    /// Files present in the prompt (whole or truncated), selection order
    pub included: Vec<String>,
    /// Subset of `included` that was cut short
    pub truncated: Vec<String>,
    /// Files that did not fit at all
    pub dropped: Vec<String>,
}

impl AssembledContext {
    pub fn char_count(&self) -> usize {
        self.prompt.chars().count()
    }
}

/// First `n` characters of `s`
fn take_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Append as much of `text` as the remaining budget allows
fn push(prompt: &mut String, remaining: &mut usize, text: &str) {
    let text = take_chars(text, *remaining);
    *remaining -= text.chars().count();
    prompt.push_str(text);
}

/// Compact, prefix-grouped listing of a blueprint. Empty string for an empty blueprint.
pub fn render_blueprint(blueprint: &Blueprint) -> String {
    if blueprint.is_empty() {
        return String::new();
    }

    let mut out = String::from("=== TARGET PROJECT API BLUEPRINT ===\n");
    if !blueprint.groups.is_empty() {
        out.push_str(&format!("Total Route Groups: {}\n\n", blueprint.groups.len()));
    }
    for group in &blueprint.groups {
        out.push_str(&format!("## {} ({})\n", group.name.to_uppercase(), group.prefix));
        if let Some(file) = &group.file {
            out.push_str(&format!("   File: {}\n", file));
        }
        for endpoint in &group.endpoints {
            out.push_str(&format!("   - {}\n", endpoint));
        }
        out.push('\n');
    }

    if !blueprint.credentials.is_empty() {
        out.push_str("## TEST CREDENTIALS\n");
        for cred in &blueprint.credentials {
            if cred.password.is_empty() {
                out.push_str(&format!("   - {}: {}\n", cred.role, cred.email));
            } else {
                out.push_str(&format!("   - {}: {} / {}\n", cred.role, cred.email, cred.password));
            }
        }
        out.push('\n');
    }

    if let Some(info) = &blueprint.project_info {
        out.push_str("## PROJECT INFO\n");
        out.push_str(&format!("   Frontend: {}\n", info.frontend_url.as_deref().unwrap_or("N/A")));
        out.push_str(&format!("   Backend: {}\n\n", info.backend_url.as_deref().unwrap_or("N/A")));
    }

    if !blueprint.routes.is_empty() {
        out.push_str(&format!("Total Routes: {}\n", blueprint.routes.len()));
        for route in &blueprint.routes {
            out.push_str(&format!("[{}] {}\n", route.methods.join("/"), route.path));
        }
        out.push('\n');
    }

    if let Some(raw) = &blueprint.raw {
        out.push_str(&serde_json::to_string_pretty(raw).unwrap_or_else(|_| raw.to_string()));
        out.push('\n');
    }

    out.push_str("=== END API BLUEPRINT ===\n");
    out
}

/// Assemble the analysis prompt from the task, blueprint and `(path, content)` pairs.
pub fn build_context(
    task: &str,
    blueprint: &Blueprint,
    files: &[(String, String)],
    budget: ContextBudget,
) -> AssembledContext {
    let mut ctx = AssembledContext::default();
    let mut remaining = budget.max_chars;

    push(&mut ctx.prompt, &mut remaining, task.trim_end());
    push(&mut ctx.prompt, &mut remaining, "\n\n");

    let rendered = render_blueprint(blueprint);
    if !rendered.is_empty() {
        let half = budget.max_chars / 2;
        let len = rendered.chars().count();
        if len > half {
            let keep = half.saturating_sub(BLUEPRINT_MARKER.chars().count());
            let cut = format!("{}{}", take_chars(&rendered, keep), BLUEPRINT_MARKER);
            debug!(from = len, to = cut.chars().count(), "blueprint cut to half the budget");
            push(&mut ctx.prompt, &mut remaining, &cut);
        } else {
            push(&mut ctx.prompt, &mut remaining, &rendered);
        }
        push(&mut ctx.prompt, &mut remaining, "\n");
    }

    if !files.is_empty() {
        push(&mut ctx.prompt, &mut remaining, "PROJECT FILES:\n\n");
    }

    let marker_len = TRUNCATION_MARKER.chars().count();
    for (path, content) in files {
        let header = format!("=== {} ===\n", path);
        let overhead = header.chars().count() + 2;
        let len = content.chars().count();

        if overhead + len <= remaining {
            push(&mut ctx.prompt, &mut remaining, &header);
            push(&mut ctx.prompt, &mut remaining, content);
            push(&mut ctx.prompt, &mut remaining, "\n\n");
            ctx.included.push(path.clone());
        } else if remaining >= overhead + marker_len + MIN_SLICE_CHARS {
            let keep = remaining - overhead - marker_len;
            push(&mut ctx.prompt, &mut remaining, &header);
            push(&mut ctx.prompt, &mut remaining, take_chars(content, keep));
            push(&mut ctx.prompt, &mut remaining, TRUNCATION_MARKER);
            push(&mut ctx.prompt, &mut remaining, "\n\n");
            ctx.included.push(path.clone());
            ctx.truncated.push(path.clone());
        } else {
            ctx.dropped.push(path.clone());
        }
    }

    debug!(
        chars = budget.max_chars - remaining,
        included = ctx.included.len(),
        truncated = ctx.truncated.len(),
        dropped = ctx.dropped.len(),
        "context assembled"
    );
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::{Credential, RouteGroup};

    fn blueprint() -> Blueprint {
        Blueprint {
            groups: vec![RouteGroup {
                name: "auth".to_string(),
                prefix: "/api/auth".to_string(),
                file: Some("routes/auth.py".to_string()),
                endpoints: vec!["POST /login".to_string()],
            }],
            credentials: vec![Credential {
                role: "admin".to_string(),
                email: "admin@shop.test".to_string(),
                password: "pw".to_string(),
            }],
            ..Blueprint::default()
        }
    }

    #[test]
    fn test_render_groups_by_prefix() {
        let text = render_blueprint(&blueprint());
        assert!(text.contains("## AUTH (/api/auth)"));
        assert!(text.contains("   File: routes/auth.py"));
        assert!(text.contains("   - POST /login"));
        assert!(text.contains("   - admin: admin@shop.test / pw"));
        assert_eq!(render_blueprint(&Blueprint::default()), "");
    }

    #[test]
    fn test_sections_in_order() {
        let files = vec![
            ("a.py".to_string(), "print(1)".to_string()),
            ("b.py".to_string(), "print(2)".to_string()),
        ];
        let ctx = build_context("TASK", &blueprint(), &files, ContextBudget { max_chars: 10_000 });
        let task_at = ctx.prompt.find("TASK").unwrap();
        let bp_at = ctx.prompt.find("## AUTH").unwrap();
        let a_at = ctx.prompt.find("=== a.py ===").unwrap();
        let b_at = ctx.prompt.find("=== b.py ===").unwrap();
        assert!(task_at < bp_at && bp_at < a_at && a_at < b_at);
        assert_eq!(ctx.included, vec!["a.py", "b.py"]);
        assert!(ctx.truncated.is_empty() && ctx.dropped.is_empty());
    }

    #[test]
    fn test_two_megabytes_fit_the_ceiling() {
        let files: Vec<(String, String)> = (0..5)
            .map(|i| (format!("big{}.py", i), "x".repeat(400_000)))
            .collect();
        let budget = ContextBudget { max_chars: 120_000 };
        let ctx = build_context("Fix the thing", &Blueprint::default(), &files, budget);

        assert!(ctx.char_count() <= budget.max_chars);
        assert_eq!(ctx.included, vec!["big0.py"]);
        assert_eq!(ctx.truncated, vec!["big0.py"]);
        assert_eq!(ctx.dropped.len(), 4);
    }

    #[test]
    fn test_later_files_dropped_first() {
        let files = vec![
            ("first.py".to_string(), "a".repeat(600)),
            ("second.py".to_string(), "b".repeat(600)),
        ];
        let ctx = build_context("t", &Blueprint::default(), &files, ContextBudget { max_chars: 1_000 });
        assert_eq!(ctx.included, vec!["first.py", "second.py"]);
        assert_eq!(ctx.truncated, vec!["second.py"]);
        assert!(ctx.char_count() <= 1_000);

        let ctx = build_context("t", &Blueprint::default(), &files, ContextBudget { max_chars: 700 });
        assert_eq!(ctx.included, vec!["first.py"]);
        assert_eq!(ctx.dropped, vec!["second.py"]);
    }

    #[test]
    fn test_large_blueprint_cut_to_half() {
        let mut bp = blueprint();
        bp.groups[0].endpoints = (0..500).map(|i| format!("GET /item/{}", i)).collect();
        let budget = ContextBudget { max_chars: 2_000 };
        let ctx = build_context("t", &bp, &[], budget);
        assert!(ctx.prompt.contains("[... blueprint truncated ...]"));
        assert!(ctx.char_count() <= budget.max_chars / 2 + 10);
    }

    #[test]
    fn test_multibyte_content_respects_boundaries() {
        let files = vec![("i18n.json".to_string(), "é".repeat(5_000))];
        let ctx = build_context("t", &Blueprint::default(), &files, ContextBudget { max_chars: 1_000 });
        assert!(ctx.char_count() <= 1_000);
        assert_eq!(ctx.truncated, vec!["i18n.json"]);
    }
}
