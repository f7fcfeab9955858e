//! Conversation history, one bounded thread per scope
//!
//! A ticket's probe thread and the general chat never see each other: every
//! read and write names its scope, and there is no API that spans scopes.

use crate::completion::{Message, Role};
use crate::db::{Database, DbError};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Ticket(i32),
    General,
}

impl Scope {
    /// Storage key: `general` or `ticket:<id>`
    pub fn key(&self) -> String {
        match self {
            Scope::Ticket(id) => format!("ticket:{}", id),
            Scope::General => "general".to_string(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

pub struct ConversationStore<'a> {
    db: &'a Database,
    max_turns: usize,
}

impl<'a> ConversationStore<'a> {
    pub fn new(db: &'a Database, max_turns: usize) -> Self {
        Self { db, max_turns }
    }

    /// Turns in insertion order, ready to send as messages.
    ///
    /// Always starts with a user turn; trimming can leave an assistant reply
    /// at the front, which is skipped.
    pub fn history(&self, scope: Scope) -> Result<Vec<Message>, DbError> {
        let turns = self.db.turns(&scope.key())?;
        Ok(turns
            .into_iter()
            .filter_map(|t| {
                let role = t.role.parse::<Role>().ok()?;
                Some(Message {
                    role,
                    content: t.content,
                })
            })
            .skip_while(|m| m.role == Role::Assistant)
            .collect())
    }

    pub fn append(&self, scope: Scope, role: Role, content: &str) -> Result<(), DbError> {
        self.db
            .append_turn(&scope.key(), role.as_str(), content, self.max_turns.max(1))?;
        Ok(())
    }

    /// Record a completed exchange
    pub fn append_exchange(&self, scope: Scope, user: &str, assistant: &str) -> Result<(), DbError> {
        self.append(scope, Role::User, user)?;
        self.append(scope, Role::Assistant, assistant)
    }

    /// Returns the number of turns removed
    pub fn clear(&self, scope: Scope) -> Result<usize, DbError> {
        self.db.clear_turns(&scope.key())
    }
}
