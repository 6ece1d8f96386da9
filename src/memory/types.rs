//! Core memory type definitions.
//!
//! Defines [`Role`] (who produced a turn), [`Turn`] (one conversation log
//! entry), [`Fact`] (a unit of long-term knowledge) and [`ScoredFact`] (a
//! search hit).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    /// Tool output. Stored for the record, never replayed to the model.
    Tool,
}

impl Role {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool" => Ok(Self::Tool),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

/// A conversation turn, matching the `turns` table. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Globally unique, assigned by the store.
    pub id: i64,
    pub conversation_id: String,
    /// 1-based position within the conversation.
    pub seq: i64,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// A stored fact, matching the `facts` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    /// UUID v7 (time-sortable) primary key.
    pub id: String,
    pub content: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    /// Model that produced `embedding`; only same-model vectors are compared.
    pub embedding_model: String,
    pub created_at: DateTime<Utc>,
    /// Turn the fact was extracted from, if any. Not enforced as a foreign key.
    pub source_turn_id: Option<i64>,
}

/// A fact with its similarity to a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredFact {
    #[serde(flatten)]
    pub fact: Fact,
    pub score: f32,
}
