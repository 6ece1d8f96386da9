//! Conversation orchestration: the bounded tool-calling loop.
//!
//! One request walks an explicit state machine:
//!
//! ```text
//! AwaitingContext → CallingModel → ExecutingTools → CallingModel → … → Responding → Done
//!                               ↘ Responding → Done
//! ```
//!
//! At most `max_tool_rounds` tool rounds run. If the model still wants tools
//! after that, the reply is a fixed "could not complete" message. Tool errors
//! are fed back to the model; model failures are retried and then returned.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::config::ApexConfig;
use crate::context::{render_system_prompt, ContextBuilder, ConversationContext};
use crate::error::{ModelError, OrchestratorError};
use crate::extractor::{ExtractionJob, ExtractionQueue};
use crate::memory::conversation::ConversationStore;
use crate::memory::types::{Role, Turn};
use crate::model::retry::{complete_with_retry, RetryPolicy};
use crate::model::{ChatMessage, Completion, ModelClient, ToolCallRequest};
use crate::tools::ToolRegistry;

/// Reply used when the model keeps asking for tools past the round limit.
pub const BOUND_REACHED_TEXT: &str = "I couldn't complete that request: it needed more tool steps \
than I can take in one turn, so I stopped before finishing. Could you break it into smaller steps?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingContext,
    CallingModel,
    ExecutingTools,
    Responding,
    Done,
}

/// Outcome of one orchestrated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    /// Tool rounds actually executed.
    pub tool_rounds: u32,
    /// The model asked for more tools than allowed and `text` is the fallback.
    pub bound_reached: bool,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_tool_rounds: u32,
    pub tool_timeout: Duration,
    pub retry: RetryPolicy,
    /// Turns handed to the extractor after each reply.
    pub extraction_window: usize,
}

impl OrchestratorSettings {
    pub fn from_config(config: &ApexConfig) -> Self {
        Self {
            max_tool_rounds: config.orchestrator.max_tool_rounds,
            tool_timeout: config.orchestrator.tool_timeout(),
            retry: RetryPolicy::from_config(&config.model),
            extraction_window: config.memory.extraction_window,
        }
    }
}

pub struct Orchestrator {
    model: Arc<dyn ModelClient>,
    registry: Arc<ToolRegistry>,
    context: ContextBuilder,
    conversations: ConversationStore,
    extraction: Option<ExtractionQueue>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        model: Arc<dyn ModelClient>,
        registry: Arc<ToolRegistry>,
        context: ContextBuilder,
        conversations: ConversationStore,
        extraction: Option<ExtractionQueue>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            model,
            registry,
            context,
            conversations,
            extraction,
            settings,
        }
    }

    /// Process one user message and return only the reply text.
    pub async fn handle(&self, conversation_id: &str, user_message: &str) -> Result<String, OrchestratorError> {
        self.respond(conversation_id, user_message).await.map(|r| r.text)
    }

    /// Process one user message through the full state machine.
    pub async fn respond(&self, conversation_id: &str, user_message: &str) -> Result<Reply, OrchestratorError> {
        let schemas = self.registry.list_schemas();
        let mut phase = Phase::AwaitingContext;
        let mut context: Option<ConversationContext> = None;
        let mut messages: Vec<ChatMessage> = Vec::new();
        let mut pending: Vec<ToolCallRequest> = Vec::new();
        let mut tool_rounds = 0u32;
        let mut bound_reached = false;
        let mut text = String::new();

        info!(conversation = conversation_id, chars = user_message.len(), "handling message");

        loop {
            debug!(conversation = conversation_id, ?phase, tool_rounds, "orchestrator step");
            phase = match phase {
                Phase::AwaitingContext => {
                    let ctx = self.context.build(conversation_id, user_message, Utc::now()).await?;
                    messages = seed_messages(&ctx, user_message);
                    context = Some(ctx);
                    Phase::CallingModel
                }

                Phase::CallingModel => {
                    let completion =
                        complete_with_retry(self.model.as_ref(), &self.settings.retry, &messages, &schemas)
                            .await?;
                    match completion {
                        Completion::Text(reply) if reply.trim().is_empty() => {
                            return Err(invalid("model returned an empty reply"));
                        }
                        Completion::Text(reply) => {
                            text = reply;
                            Phase::Responding
                        }
                        Completion::ToolCalls(calls) if calls.is_empty() => {
                            return Err(invalid("model returned an empty tool call list"));
                        }
                        Completion::ToolCalls(calls) if tool_rounds >= self.settings.max_tool_rounds => {
                            warn!(
                                conversation = conversation_id,
                                tool_rounds,
                                requested = calls.len(),
                                "tool round limit reached, replying without further tools"
                            );
                            bound_reached = true;
                            text = BOUND_REACHED_TEXT.to_string();
                            Phase::Responding
                        }
                        Completion::ToolCalls(calls) => {
                            pending = calls;
                            Phase::ExecutingTools
                        }
                    }
                }

                Phase::ExecutingTools => {
                    tool_rounds += 1;
                    let calls = std::mem::take(&mut pending);
                    debug!(round = tool_rounds, calls = calls.len(), "executing tool round");

                    let results = join_all(
                        calls
                            .iter()
                            .map(|call| self.registry.execute(call, self.settings.tool_timeout)),
                    )
                    .await;

                    messages.push(ChatMessage::assistant_tool_calls(calls));
                    messages.extend(results.iter().map(ChatMessage::tool_result));
                    Phase::CallingModel
                }

                Phase::Responding => {
                    let prior = context.take().map(|c| c.recent_turns).unwrap_or_default();
                    self.persist_and_enqueue(conversation_id, user_message, &text, prior)
                        .await?;
                    Phase::Done
                }

                Phase::Done => break,
            };
        }

        info!(conversation = conversation_id, tool_rounds, bound_reached, "reply ready");
        Ok(Reply {
            text,
            tool_rounds,
            bound_reached,
        })
    }

    /// Append the user and assistant turns in one transaction, then hand the
    /// latest turns to the extractor without waiting.
    async fn persist_and_enqueue(
        &self,
        conversation_id: &str,
        user_message: &str,
        reply: &str,
        mut window: Vec<Turn>,
    ) -> Result<(), OrchestratorError> {
        let (user_turn, assistant_turn) = self
            .conversations
            .append_exchange(conversation_id, user_message, reply)
            .await?;

        let Some(queue) = &self.extraction else {
            return Ok(());
        };

        let source_turn_id = user_turn.as_ref().map_or(assistant_turn.id, |t| t.id);
        window.extend(user_turn);
        window.push(assistant_turn);
        let skip = window.len().saturating_sub(self.settings.extraction_window);
        let turns = window.split_off(skip);

        queue.enqueue(ExtractionJob {
            conversation_id: conversation_id.to_string(),
            source_turn_id,
            turns,
        });
        Ok(())
    }
}

/// System prompt, replayable prior turns, then the new user message.
fn seed_messages(ctx: &ConversationContext, user_message: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(ctx.recent_turns.len() + 2);
    messages.push(ChatMessage::system(render_system_prompt(ctx)));
    for turn in &ctx.recent_turns {
        match turn.role {
            Role::User => messages.push(ChatMessage::user(turn.content.clone())),
            Role::Assistant => messages.push(ChatMessage::assistant(turn.content.clone())),
            Role::Tool => {}
        }
    }
    messages.push(ChatMessage::user(user_message));
    messages
}

fn invalid(reason: &str) -> OrchestratorError {
    OrchestratorError::ModelCallFailure {
        attempts: 1,
        source: ModelError::InvalidResponse(reason.to_string()),
    }
}
