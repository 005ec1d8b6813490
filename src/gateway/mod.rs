//! Model gateway
//!
//! Builds the prompt for a coaching turn, walks the model fallback chain
//! through the shared [`DispatchLane`] and keeps replies on topic.

mod backend;
mod lane;

use std::sync::Arc;

use crate::catalog::Catalog;
use crate::config::LlmConfig;
use crate::conversation::{Turn, recent_history};
use crate::{Error, Result};

pub use backend::{BackendError, ChatBackend, ChatMessage, ChatRequest, OpenRouterBackend};
pub use lane::{DispatchLane, SharedLimiter, create_limiter};

/// Appended to every system prompt
pub const BREVITY_INSTRUCTION: &str = "Respond concisely (under 100 words).";

/// Reply used when the model wandered off topic
#[must_use]
pub fn redirect_sentence(topic: &str) -> String {
    format!("Let's stay focused on {topic}. Could you ask me something about {topic}?")
}

fn confinement_instruction(topic: &str) -> String {
    format!(
        "Only discuss {topic}. If the user asks about something unrelated, \
         politely decline and guide them back to {topic}."
    )
}

/// Keep `reply` only if it mentions the topic
fn confine_to_topic(topic: &str, reply: String) -> String {
    if reply.to_lowercase().contains(&topic.to_lowercase()) {
        reply
    } else {
        tracing::debug!(topic, "reply did not mention topic, redirecting");
        redirect_sentence(topic)
    }
}

/// Sends coaching turns to the language model
pub struct ModelGateway {
    backend: Arc<dyn ChatBackend>,
    lane: DispatchLane,
    catalog: Arc<Catalog>,
    models: Vec<String>,
    temperature: f32,
    max_tokens: u32,
    max_history_turns: usize,
}

impl ModelGateway {
    #[must_use]
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        llm: &LlmConfig,
        max_history_turns: usize,
        catalog: Arc<Catalog>,
    ) -> Self {
        Self {
            backend,
            lane: DispatchLane::new(llm.dispatch_spacing, llm.requests_per_minute),
            catalog,
            models: llm.model_chain(),
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
            max_history_turns,
        }
    }

    /// Messages for one turn: system prompt, capped history, then the utterance
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `mode` is not a known coaching mode
    pub fn build_messages(
        &self,
        topic: &str,
        mode: &str,
        utterance: &str,
        history: &[Turn],
    ) -> Result<Vec<ChatMessage>> {
        let mode = self.catalog.mode(mode)?;
        let system = format!(
            "{}\n\n{}\n\n{BREVITY_INSTRUCTION}",
            mode.prompt_for(topic),
            confinement_instruction(topic)
        );

        let mut messages = Vec::with_capacity(self.max_history_turns + 2);
        messages.push(ChatMessage::new("system", system));
        messages.extend(
            recent_history(history, self.max_history_turns)
                .map(|t| ChatMessage::new(t.role.as_str(), t.content.clone())),
        );
        messages.push(ChatMessage::new("user", utterance));

        Ok(messages)
    }

    /// Get the coach's reply to `utterance`
    ///
    /// # Errors
    ///
    /// - `Error::Config` for an unknown mode
    /// - `Error::ModelUnavailable` on the first failure that is not a rate limit
    /// - `Error::RateLimited` when every model was rate limited
    pub async fn respond(
        &self,
        topic: &str,
        mode: &str,
        utterance: &str,
        history: &[Turn],
    ) -> Result<String> {
        let messages = self.build_messages(topic, mode, utterance, history)?;
        let mut last_limit = String::new();

        for model in &self.models {
            let request = ChatRequest {
                model: model.clone(),
                messages: messages.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            };

            let started = std::time::Instant::now();
            match self.lane.run(|| self.backend.complete(&request)).await {
                Ok(reply) => {
                    tracing::info!(
                        model = %model,
                        elapsed_ms = started.elapsed().as_millis(),
                        "model replied"
                    );
                    return Ok(confine_to_topic(topic, reply));
                }
                Err(e) if e.is_rate_limit() => {
                    tracing::warn!(model = %model, error = %e, "model rate limited, trying next");
                    last_limit = format!("{model}: {e}");
                }
                Err(e) => {
                    tracing::error!(model = %model, error = %e, "model call failed");
                    return Err(Error::ModelUnavailable(format!("{model}: {e}")));
                }
            }
        }

        Err(Error::RateLimited(last_limit))
    }
}
