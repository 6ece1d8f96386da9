//! Background fact extraction.
//!
//! After each response the orchestrator enqueues the latest turns as an
//! [`ExtractionJob`]. A single worker task drains the queue, asks the cheaper
//! extraction model for durable facts, and writes each candidate to the
//! knowledge store. Nothing here is ever awaited on the response path, and
//! every failure ends in a log line.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ExtractionError;
use crate::memory::knowledge::KnowledgeStore;
use crate::memory::types::{Role, Turn};
use crate::model::retry::complete_once;
use crate::model::{ChatMessage, Completion, ModelClient};

/// Transcripts shorter than this carry nothing worth extracting.
const MIN_TRANSCRIPT_CHARS: usize = 20;

const EXTRACTION_PROMPT: &str = r#"Analyze this conversation and extract durable facts about the user that will still matter in future conversations. Skip small talk, greetings and routine exchanges.

Look for:
- preferences: things the user likes, dislikes or prefers
- identity: name, location, job, family, pets
- people: who the user mentions and how they relate
- events: things that happened or will happen, with dates when given
- habits: routines and recurring activities

Write each fact as one standalone statement, e.g. "The user's dog is named Max".
Return ONLY a JSON array of strings. If there is nothing worth keeping, return [].

Conversation:
{conversation}

Facts (JSON array only):"#;

/// Turns the extraction model's reply into candidate facts.
pub struct FactExtractor {
    model: Arc<dyn ModelClient>,
    timeout: Duration,
}

impl FactExtractor {
    pub fn new(model: Arc<dyn ModelClient>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    /// Candidate facts from a transcript. Short transcripts yield nothing
    /// without calling the model.
    pub async fn extract(&self, turns: &[Turn]) -> Result<Vec<String>, ExtractionError> {
        let transcript = format_transcript(turns);
        if transcript.chars().count() < MIN_TRANSCRIPT_CHARS {
            debug!(chars = transcript.len(), "transcript too short, skipping extraction");
            return Ok(Vec::new());
        }

        let prompt = EXTRACTION_PROMPT.replace("{conversation}", &transcript);
        let completion =
            complete_once(self.model.as_ref(), self.timeout, &[ChatMessage::user(prompt)], &[]).await?;

        match completion {
            Completion::Text(raw) => Ok(parse_extraction_response(&raw)),
            Completion::ToolCalls(_) => {
                warn!("extraction model asked for tools, ignoring reply");
                Ok(Vec::new())
            }
        }
    }
}

/// `User:` / `Apex:` transcript. Tool turns and blank turns are left out.
pub fn format_transcript(turns: &[Turn]) -> String {
    turns
        .iter()
        .filter(|t| !t.content.trim().is_empty())
        .filter_map(|t| match t.role {
            Role::User => Some(format!("User: {}", t.content)),
            Role::Assistant => Some(format!("Apex: {}", t.content)),
            Role::Tool => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse the model's reply into fact strings.
///
/// Tolerates fenced code blocks and prose around the array. Items may be
/// plain strings, `{"content": ...}` objects, or `{"key": ..., "value": ...}`
/// objects (rendered as `key: value`). Anything unparseable yields an empty list.
pub fn parse_extraction_response(text: &str) -> Vec<String> {
    let trimmed = text.trim();

    let json_str = if trimmed.starts_with("```") {
        trimmed
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
    } else {
        trimmed
    };

    let json_str = match (json_str.find('['), json_str.rfind(']')) {
        (Some(start), Some(end)) if start < end => &json_str[start..=end],
        _ => {
            warn!("no JSON array in extraction response");
            return Vec::new();
        }
    };

    let items: Vec<serde_json::Value> = match serde_json::from_str(json_str) {
        Ok(items) => items,
        Err(e) => {
            warn!(error = %e, "failed to parse extraction response");
            return Vec::new();
        }
    };

    items
        .iter()
        .filter_map(|item| match item {
            serde_json::Value::String(s) => Some(s.trim().to_string()),
            serde_json::Value::Object(obj) => {
                if let Some(content) = obj.get("content").and_then(|v| v.as_str()) {
                    return Some(content.trim().to_string());
                }
                let key = obj.get("key").and_then(|v| v.as_str())?.trim();
                let value = obj.get("value").and_then(|v| v.as_str())?.trim();
                (!key.is_empty() && !value.is_empty()).then(|| format!("{key}: {value}"))
            }
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect()
}

/// Turns to mine for facts, tagged with the turn they came from.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub conversation_id: String,
    pub source_turn_id: i64,
    pub turns: Vec<Turn>,
}

/// Sending side of the bounded extraction queue. Cheap to clone.
#[derive(Clone)]
pub struct ExtractionQueue {
    tx: mpsc::Sender<ExtractionJob>,
}

impl ExtractionQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ExtractionJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue without waiting. A full or closed queue drops the job with a
    /// warning and returns `false`.
    pub fn enqueue(&self, job: ExtractionJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(conversation = %job.conversation_id, "extraction queue full, dropping job");
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                warn!(conversation = %job.conversation_id, "extraction worker gone, dropping job");
                false
            }
        }
    }
}

/// Extract and store facts for one job. Returns how many candidates the store
/// accepted, including ones matched to an existing fact.
pub async fn process_job(
    extractor: &FactExtractor,
    store: &KnowledgeStore,
    job: &ExtractionJob,
) -> Result<usize, ExtractionError> {
    let candidates = extractor.extract(&job.turns).await?;
    let mut stored = 0;
    for content in candidates {
        match store.add_fact_from_turn(&content, job.source_turn_id).await {
            Ok(_) => stored += 1,
            Err(e) => warn!(error = %e, fact = %content, "could not store extracted fact"),
        }
    }
    Ok(stored)
}

/// Start the worker. It exits once every [`ExtractionQueue`] handle is dropped
/// and the queue is drained.
pub fn spawn_worker(
    mut rx: mpsc::Receiver<ExtractionJob>,
    extractor: FactExtractor,
    store: KnowledgeStore,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("fact extraction worker started");
        while let Some(job) = rx.recv().await {
            match process_job(&extractor, &store, &job).await {
                Ok(count) => debug!(conversation = %job.conversation_id, count, "extraction job done"),
                Err(e) => warn!(conversation = %job.conversation_id, error = %e, "fact extraction failed"),
            }
        }
        info!("fact extraction worker stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn turn(role: Role, content: &str) -> Turn {
        Turn {
            id: 1,
            conversation_id: "c".into(),
            seq: 1,
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn parse_plain_array() {
        let facts = parse_extraction_response(r#"["User likes sushi", "User has a dog named Rex"]"#);
        assert_eq!(facts, vec!["User likes sushi", "User has a dog named Rex"]);
    }

    #[test]
    fn parse_fenced_with_prose() {
        let raw = "Here you go:\n```json\n[\"Lives in Lisbon\"]\n```\nHope that helps!";
        assert_eq!(parse_extraction_response(raw), vec!["Lives in Lisbon"]);
    }

    #[test]
    fn parse_object_forms() {
        let raw = r#"[
            {"content": "Allergic to peanuts"},
            {"category": "person", "key": "Sarah", "value": "friend, birthday March 15", "confidence": 0.8},
            {"key": "", "value": "orphan"},
            42
        ]"#;
        assert_eq!(
            parse_extraction_response(raw),
            vec!["Allergic to peanuts", "Sarah: friend, birthday March 15"]
        );
    }

    #[test]
    fn parse_garbage_is_empty() {
        assert!(parse_extraction_response("no facts here").is_empty());
        assert!(parse_extraction_response("[not json").is_empty());
        assert!(parse_extraction_response("[]").is_empty());
        assert!(parse_extraction_response(r#"["  "]"#).is_empty());
    }

    #[test]
    fn transcript_skips_tool_and_blank_turns() {
        let text = format_transcript(&[
            turn(Role::User, "I love hiking"),
            turn(Role::Tool, "{\"ok\":true}"),
            turn(Role::Assistant, " "),
            turn(Role::Assistant, "Nice!"),
        ]);
        assert_eq!(text, "User: I love hiking\nApex: Nice!");
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let (queue, _rx) = ExtractionQueue::channel(1);
        let job = ExtractionJob {
            conversation_id: "c".into(),
            source_turn_id: 1,
            turns: Vec::new(),
        };
        assert!(queue.enqueue(job.clone()));
        assert!(!queue.enqueue(job));
    }

    #[tokio::test]
    async fn closed_queue_drops() {
        let (queue, rx) = ExtractionQueue::channel(4);
        drop(rx);
        assert!(!queue.enqueue(ExtractionJob {
            conversation_id: "c".into(),
            source_turn_id: 1,
            turns: Vec::new(),
        }));
    }
}
