//! Bridges rig's `CompletionModel` to the router's `LlmProvider` trait.
//!
//! rig owns the HTTP transport and the provider wire format. The adapter only
//! maps the request shape (system preamble, history, final prompt) and folds
//! the assistant's text blocks back into one string.

use async_trait::async_trait;
use rig::completion::{AssistantContent, CompletionError, CompletionModel, Message};

use crate::error::LlmError;

use super::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role,
};

/// Anthropic rejects requests without a token cap.
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// `LlmProvider` over any rig completion model.
pub struct RigAdapter<M: CompletionModel> {
    model: M,
    model_name: String,
    provider: &'static str,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: impl Into<String>, provider: &'static str) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            provider,
        }
    }

    fn map_error(&self, err: CompletionError) -> LlmError {
        match err {
            CompletionError::ResponseError(reason) => LlmError::InvalidResponse {
                provider: self.provider.to_string(),
                reason,
            },
            other => LlmError::RequestFailed {
                provider: self.provider.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Request split the way rig's builder wants it.
struct RigParts {
    preamble: Option<String>,
    history: Vec<Message>,
    prompt: Message,
}

fn to_rig_message(message: &ChatMessage) -> Message {
    match message.role {
        Role::Assistant => Message::assistant(message.content.clone()),
        Role::User | Role::System => Message::user(message.content.clone()),
    }
}

fn split_request(request: &CompletionRequest) -> Option<RigParts> {
    let mut turns: Vec<Message> = request
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(to_rig_message)
        .collect();
    let prompt = turns.pop()?;
    Some(RigParts {
        preamble: request.system_prompt(),
        history: turns,
        prompt,
    })
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let Some(parts) = split_request(&request) else {
            return Err(LlmError::RequestFailed {
                provider: self.provider.to_string(),
                reason: "request has no conversation turns".to_string(),
            });
        };

        let max_tokens = request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        let mut builder = self
            .model
            .completion_request(parts.prompt)
            .messages(parts.history)
            .max_tokens(u64::from(max_tokens));
        if let Some(preamble) = parts.preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }

        let response = builder.send().await.map_err(|e| self.map_error(e))?;

        let content: String = response
            .choice
            .iter()
            .filter_map(|block| match block {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect();

        let output_tokens = u32::try_from(response.usage.output_tokens).unwrap_or(u32::MAX);
        let finish_reason = if output_tokens >= max_tokens {
            FinishReason::Length
        } else {
            FinishReason::Stop
        };

        Ok(CompletionResponse {
            content,
            input_tokens: u32::try_from(response.usage.input_tokens).unwrap_or(u32::MAX),
            output_tokens,
            finish_reason,
            response_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_become_the_preamble() {
        let request = CompletionRequest::new(vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
            ChatMessage::user("how many days?"),
        ]);
        let parts = split_request(&request).unwrap();
        assert_eq!(parts.preamble.as_deref(), Some("be brief"));
        assert_eq!(parts.history.len(), 2);
    }

    #[test]
    fn request_without_turns_cannot_be_split() {
        let request = CompletionRequest::new(vec![ChatMessage::system("only a prompt")]);
        assert!(split_request(&request).is_none());
    }
}
