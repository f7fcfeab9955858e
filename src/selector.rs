//! Relevance selection
//!
//! First half of the two-step pipeline: the model sees only file names and
//! sizes and names the few files worth reading. Whatever it answers is checked
//! against the listing, so a hallucinated path can never reach the gateway.

use crate::completion::{Completer, CompletionError, CompletionRequest};
use crate::gateway::FileEntry;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

lazy_static! {
    /// Where a JSON array of strings may begin
    static ref ARRAY_START: Regex = Regex::new(r#"\[\s*""#).unwrap();
}

/// Outcome of a selection call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Selection {
    /// Listing members, most relevant first, at most K
    pub paths: Vec<String>,
    /// Paths the model named that are not in the listing
    pub rejected: Vec<String>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

pub struct RelevanceSelector<'a> {
    completer: &'a dyn Completer,
    max_files: usize,
    max_tokens: u32,
}

impl<'a> RelevanceSelector<'a> {
    pub fn new(completer: &'a dyn Completer, max_files: usize, max_tokens: u32) -> Self {
        Self {
            completer,
            max_files,
            max_tokens,
        }
    }

    /// Ask the model which files matter for `task`.
    ///
    /// An unparseable answer yields an empty selection; only a failed
    /// completion call is an error.
    pub fn select(&self, task: &str, listing: &[FileEntry]) -> Result<Selection, CompletionError> {
        let files: Vec<(&str, u64)> = listing
            .iter()
            .filter_map(|e| match e {
                FileEntry::File { path, size, .. } => Some((path.as_str(), *size)),
                FileEntry::Directory { .. } => None,
            })
            .collect();
        if files.is_empty() || self.max_files == 0 {
            return Ok(Selection::default());
        }

        let prompt = selection_prompt(task, &files, self.max_files);
        debug!(files = files.len(), prompt_chars = prompt.len(), "selection prompt built");

        let reply = self
            .completer
            .complete(&CompletionRequest::prompt(prompt, self.max_tokens))?;

        let Some(named) = parse_path_list(&reply) else {
            warn!("selection reply contained no JSON array of paths");
            return Ok(Selection::default());
        };

        let members: HashSet<&str> = files.iter().map(|(p, _)| *p).collect();
        let selection = filter_to_listing(named, &members, self.max_files);
        if !selection.rejected.is_empty() {
            warn!(rejected = ?selection.rejected, "model named files outside the listing");
        }
        info!(selected = selection.paths.len(), "relevant files selected");
        Ok(selection)
    }
}

fn selection_prompt(task: &str, files: &[(&str, u64)], max_files: usize) -> String {
    let listing: Vec<String> = files
        .iter()
        .map(|(path, size)| format!("- {} ({} bytes)", path, size))
        .collect();

    format!(
        "You are helping resolve a ticket in a software project.\n\n\
         TICKET:\n{task}\n\n\
         PROJECT FILES:\n{listing}\n\n\
         Which files are most likely relevant to this ticket? Choose at most {max_files}, \
         most relevant first. Only use paths exactly as listed above.\n\
         Respond with ONLY a JSON array of file paths, for example:\n\
         [\"path/to/file1.py\", \"path/to/file2.js\"]",
        task = task.trim(),
        listing = listing.join("\n"),
        max_files = max_files,
    )
}

/// Pull a list of strings out of a reply: whole-body JSON first, then the
/// first embedded array that parses. Code fences are tolerated.
///
/// Embedded arrays are read with a streaming deserializer from each candidate
/// opening bracket, so brackets inside paths (`app/[id]/page.tsx`) are fine.
pub fn parse_path_list(reply: &str) -> Option<Vec<String>> {
    let trimmed = strip_fences(reply.trim());
    if let Ok(list) = serde_json::from_str::<Vec<String>>(trimmed) {
        return Some(list);
    }
    ARRAY_START.find_iter(reply).find_map(|m| {
        serde_json::Deserializer::from_str(&reply[m.start()..])
            .into_iter::<Vec<String>>()
            .next()
            .and_then(Result::ok)
    })
}

fn strip_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // drop the language tag line
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn normalize(path: &str) -> &str {
    let mut p = path.trim();
    while let Some(rest) = p.strip_prefix("./") {
        p = rest;
    }
    p
}

fn filter_to_listing(named: Vec<String>, members: &HashSet<&str>, max_files: usize) -> Selection {
    let mut selection = Selection::default();
    let mut seen = HashSet::new();

    for raw in named {
        let path = normalize(&raw);
        if members.contains(path) {
            if seen.insert(path.to_string()) && selection.paths.len() < max_files {
                selection.paths.push(path.to_string());
            }
        } else if !path.is_empty() {
            selection.rejected.push(raw);
        }
    }
    selection
}
