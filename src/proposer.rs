//! Per-file change proposals
//!
//! One completion call per file. The model returns the complete new file; no
//! diffing or syntax checking happens here.

use crate::completion::{Completer, CompletionError, CompletionRequest};
use crate::error::{Classify, FailureKind};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

const BEGIN_FILE: &str = "---BEGIN FILE---";
const END_FILE: &str = "---END FILE---";

const PROPOSER_SYSTEM: &str = "You are a code assistant. You receive one file from a project \
and an instruction. Reply with a single DESCRIPTION: line summarizing the change, then the \
complete modified file between ---BEGIN FILE--- and ---END FILE--- markers. Nothing else.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProposalDraft {
    pub proposed_content: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProposalError {
    #[error("model call failed: {0}")]
    Model(#[from] CompletionError),
    #[error("model returned no file content")]
    EmptyResponse,
    #[error("model reply ended before the closing file marker")]
    Truncated,
}

impl Classify for ProposalError {
    fn kind(&self) -> FailureKind {
        FailureKind::ModelUnusable
    }
}

pub struct ChangeProposer<'a> {
    completer: &'a dyn Completer,
    max_tokens: u32,
}

impl<'a> ChangeProposer<'a> {
    pub fn new(completer: &'a dyn Completer, max_tokens: u32) -> Self {
        Self {
            completer,
            max_tokens,
        }
    }

    /// Ask for a full replacement of `path`.
    pub fn propose(
        &self,
        ticket_context: &str,
        path: &str,
        original: &str,
        instruction: &str,
    ) -> Result<ProposalDraft, ProposalError> {
        let prompt = format!(
            "{context}\n\nFILE: {path}\nINSTRUCTION: {instruction}\n\n\
             CURRENT CONTENT:\n{BEGIN_FILE}\n{original}\n{END_FILE}\n\n\
             Return the DESCRIPTION: line and the complete modified file.",
            context = ticket_context.trim(),
            path = path,
            instruction = instruction.trim(),
            original = original,
        );
        let request = CompletionRequest::prompt(prompt, self.max_tokens).with_system(PROPOSER_SYSTEM);

        let reply = self.completer.complete(&request)?;
        let draft = parse_reply(&reply, instruction)?;
        debug!(path = %path, bytes = draft.proposed_content.len(), "proposal drafted");
        Ok(draft)
    }
}

/// Split a reply into description and file body.
///
/// Without markers the whole reply (minus code fences) is the file and the
/// instruction doubles as the description. An opening marker with no closing
/// one after it means the reply was cut off.
fn parse_reply(reply: &str, instruction: &str) -> Result<ProposalDraft, ProposalError> {
    let description = reply
        .lines()
        .find_map(|l| l.trim().strip_prefix("DESCRIPTION:"))
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| instruction.trim().to_string());

    let content = match (reply.find(BEGIN_FILE), reply.rfind(END_FILE)) {
        (Some(start), Some(end)) if end > start => {
            let body = &reply[start + BEGIN_FILE.len()..end];
            let body = body.strip_prefix("\r\n").or_else(|| body.strip_prefix('\n')).unwrap_or(body);
            let body = body.strip_suffix('\n').unwrap_or(body);
            body.strip_suffix('\r').unwrap_or(body).to_string()
        }
        (Some(_), _) => return Err(ProposalError::Truncated),
        _ => {
            let stripped = reply
                .lines()
                .filter(|l| !l.trim().starts_with("DESCRIPTION:"))
                .collect::<Vec<_>>()
                .join("\n");
            strip_code_fences(&stripped)
        }
    };

    if content.trim().is_empty() {
        return Err(ProposalError::EmptyResponse);
    }
    // Files conventionally end with a newline; markers swallow it
    let proposed_content = if content.ends_with('\n') {
        content
    } else {
        format!("{}\n", content)
    };
    Ok(ProposalDraft {
        proposed_content,
        description,
    })
}

fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return format!("{}\n", trimmed);
    };
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
    let body = body.trim_end();
    let body = body.strip_suffix("```").unwrap_or(body);
    body.to_string()
}

/// One `- path: instruction` line from an analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInstruction {
    pub path: String,
    pub instruction: String,
}

/// Read the `FILES_TO_MODIFY:` list at the end of an analysis.
///
/// Stops at the first non-list line after the list has started. Paths may be
/// wrapped in backticks.
pub fn parse_files_to_modify(analysis: &str) -> Vec<FileInstruction> {
    let Some((_, tail)) = analysis.rsplit_once("FILES_TO_MODIFY:") else {
        return Vec::new();
    };

    let mut out: Vec<FileInstruction> = Vec::new();
    for line in tail.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(item) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) else {
            if out.is_empty() {
                continue;
            }
            break;
        };
        let (path, instruction) = match item.split_once(':') {
            Some((p, i)) => (p, i.trim()),
            None => (item, ""),
        };
        let path = path.trim().trim_matches('`').trim().trim_start_matches("./");
        if path.is_empty() || out.iter().any(|f| f.path == path) {
            continue;
        }
        out.push(FileInstruction {
            path: path.to_string(),
            instruction: instruction.to_string(),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::ScriptedCompleter;

    #[test]
    fn test_marker_reply() {
        let reply = "DESCRIPTION: Return 401 on bad password\n---BEGIN FILE---\ndef login():\n    return 401\n---END FILE---\n";
        let completer = ScriptedCompleter::new([reply]);
        let proposer = ChangeProposer::new(&completer, 4096);
        let draft = proposer
            .propose("Ticket: login", "auth.py", "def login():\n    pass\n", "fix status")
            .unwrap();
        assert_eq!(draft.description, "Return 401 on bad password");
        assert_eq!(draft.proposed_content, "def login():\n    return 401\n");

        let request = &completer.requests()[0];
        assert_eq!(request.max_tokens, 4096);
        assert!(request.messages[0].content.contains("INSTRUCTION: fix status"));
        assert!(request.messages[0].content.contains("def login():\n    pass"));
    }

    #[test]
    fn test_fenced_reply_falls_back_to_instruction() {
        let draft = parse_reply("```python\nx = 2\n```", "bump x").unwrap();
        assert_eq!(draft.proposed_content, "x = 2\n");
        assert_eq!(draft.description, "bump x");
    }

    #[test]
    fn test_plain_reply_is_whole_file() {
        let draft = parse_reply("x = 3", "bump").unwrap();
        assert_eq!(draft.proposed_content, "x = 3\n");
    }

    #[test]
    fn test_empty_reply_is_error() {
        let completer = ScriptedCompleter::new(["DESCRIPTION: nothing\n---BEGIN FILE---\n---END FILE---"]);
        let proposer = ChangeProposer::new(&completer, 100);
        assert_eq!(
            proposer.propose("", "a.py", "x", "y"),
            Err(ProposalError::EmptyResponse)
        );
    }

    #[test]
    fn test_unterminated_file_is_truncated() {
        let err = parse_reply("DESCRIPTION: fix\n---BEGIN FILE---\ndef login():\n    return 4", "fix").unwrap_err();
        assert_eq!(err, ProposalError::Truncated);
        assert_eq!(err.kind(), FailureKind::ModelUnusable);

        // a stray closing marker before the opening one does not count
        let reply = "---END FILE---\n---BEGIN FILE---\nx = 1";
        assert_eq!(parse_reply(reply, "fix"), Err(ProposalError::Truncated));
    }

    #[test]
    fn test_truncated_reply_is_not_stored_as_file() {
        let completer = ScriptedCompleter::new(["DESCRIPTION: long\n---BEGIN FILE---\nline 1\nline 2"]);
        let proposer = ChangeProposer::new(&completer, 100);
        assert_eq!(
            proposer.propose("", "a.py", "x", "y"),
            Err(ProposalError::Truncated)
        );
    }

    #[test]
    fn test_model_failure_surfaces() {
        let completer = ScriptedCompleter::default();
        let proposer = ChangeProposer::new(&completer, 100);
        let err = proposer.propose("", "a.py", "x", "y").unwrap_err();
        assert_eq!(err, ProposalError::Model(CompletionError::Empty));
        assert_eq!(err.kind(), FailureKind::ModelUnusable);
    }

    #[test]
    fn test_parse_files_to_modify() {
        let analysis = "Root cause: missing check.\n\nFILES_TO_MODIFY:\n\
            - routes/auth.py: validate the password\n\
            - `templates/login.html`: show the error\n\
            - routes/auth.py: duplicate\n\
            \nThat's all.";
        let files = parse_files_to_modify(analysis);
        assert_eq!(
            files,
            vec![
                FileInstruction {
                    path: "routes/auth.py".to_string(),
                    instruction: "validate the password".to_string(),
                },
                FileInstruction {
                    path: "templates/login.html".to_string(),
                    instruction: "show the error".to_string(),
                },
            ]
        );
        assert!(parse_files_to_modify("no list here").is_empty());
    }
}
