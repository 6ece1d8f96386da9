//! Per-turn context assembly: recent history plus relevant facts plus the
//! current time, and the system prompt rendered from them.

use chrono::{DateTime, Utc};

use crate::config::MemoryConfig;
use crate::error::StoreError;
use crate::memory::conversation::ConversationStore;
use crate::memory::knowledge::KnowledgeStore;
use crate::memory::types::{ScoredFact, Turn};

const PERSONA: &str = "\
You are Apex, a capable personal assistant. You are efficient, slightly witty \
and always helpful. You know the user personally and remember past conversations.";

const RULES: &str = "\
RULES:
- Be concise. You are an assistant, not a chatbot.
- Use what you know about the user naturally. Never say \"according to my records\" or \"I found in my memory\".
- New information from the conversation is remembered automatically. Do not announce that you are saving anything.
- Use the remember, recall and forget_fact tools only when the user explicitly asks.
- If a tool returns an error, tell the user plainly what went wrong. Never claim you did something you didn't.";

/// Everything the model sees besides the new message. Rebuilt every request.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationContext {
    pub current_time: DateTime<Utc>,
    /// Oldest first.
    pub recent_turns: Vec<Turn>,
    /// Highest score first. Keyword fallback hits score 0, newest first.
    pub relevant_facts: Vec<ScoredFact>,
}

#[derive(Clone)]
pub struct ContextBuilder {
    conversations: ConversationStore,
    knowledge: KnowledgeStore,
    recent_turns: usize,
    max_facts: usize,
    min_score: f32,
}

impl ContextBuilder {
    pub fn new(conversations: ConversationStore, knowledge: KnowledgeStore, memory: &MemoryConfig) -> Self {
        Self {
            conversations,
            knowledge,
            recent_turns: memory.recent_turns,
            max_facts: memory.max_facts,
            min_score: memory.min_score,
        }
    }

    /// Gather context for `latest_user_message`. A blank message skips the fact search.
    pub async fn build(
        &self,
        conversation_id: &str,
        latest_user_message: &str,
        now: DateTime<Utc>,
    ) -> Result<ConversationContext, StoreError> {
        let recent_turns = self
            .conversations
            .recent_turns(conversation_id, self.recent_turns)
            .await?;

        let relevant_facts = if latest_user_message.trim().is_empty() {
            Vec::new()
        } else {
            self.relevant_facts(latest_user_message).await?
        };

        tracing::debug!(
            conversation = conversation_id,
            turns = recent_turns.len(),
            facts = relevant_facts.len(),
            "context built"
        );

        Ok(ConversationContext {
            current_time: now,
            recent_turns,
            relevant_facts,
        })
    }

    /// Semantic search, falling back to a substring match when the embedder
    /// fails. Facts are optional context, so a failed fallback yields none.
    async fn relevant_facts(&self, message: &str) -> Result<Vec<ScoredFact>, StoreError> {
        match self.knowledge.search(message, self.max_facts, self.min_score).await {
            Ok(facts) => Ok(facts),
            Err(StoreError::Embedding(e)) => {
                tracing::warn!(error = %e, "embedding failed, falling back to keyword fact search");
                match self.knowledge.search_keyword(message, self.max_facts).await {
                    Ok(facts) => Ok(facts),
                    Err(e) => {
                        tracing::warn!(error = %e, "keyword fact search failed, continuing without facts");
                        Ok(Vec::new())
                    }
                }
            }
            Err(e) => Err(e),
        }
    }
}

/// System message for one request.
pub fn render_system_prompt(ctx: &ConversationContext) -> String {
    let mut sections = vec![PERSONA.to_string()];

    sections.push(format!(
        "CURRENT TIME:\n{}",
        ctx.current_time.format("%A, %B %-d, %Y %H:%M UTC")
    ));

    if !ctx.relevant_facts.is_empty() {
        let facts: Vec<String> = ctx
            .relevant_facts
            .iter()
            .map(|f| format!("- {}", f.fact.content))
            .collect();
        sections.push(format!("WHAT YOU KNOW ABOUT THE USER:\n{}", facts.join("\n")));
    }

    sections.push(RULES.to_string());
    sections.join("\n\n")
}
