//! Scripted LLM provider with no network access. Used by tests and by the `offline`
//! backend for local runs.
//!
//! Replies are queued per `CallPurpose`. When a queue is empty the provider
//! falls back to a per-purpose default: an echo of the last user message for
//! replies, an empty label for classification, `{}` for extraction.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::LlmError;

use super::provider::{
    CallPurpose, ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
    Role,
};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    /// Fail with a transport error.
    Error(String),
    /// Never answer within any reasonable timeout.
    Hang,
}

/// A recorded call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub purpose: CallPurpose,
    pub messages: Vec<ChatMessage>,
}

/// Scripted provider.
#[derive(Default)]
pub struct MockLlm {
    scripts: Mutex<HashMap<CallPurpose, VecDeque<MockReply>>>,
    defaults: HashMap<CallPurpose, MockReply>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply used whenever the queue for `purpose` is empty.
    pub fn with_default(mut self, purpose: CallPurpose, reply: MockReply) -> Self {
        self.defaults.insert(purpose, reply);
        self
    }

    /// Queue a reply for the next call with `purpose`.
    pub async fn push(&self, purpose: CallPurpose, reply: MockReply) {
        self.scripts
            .lock()
            .await
            .entry(purpose)
            .or_default()
            .push_back(reply);
    }

    pub async fn push_text(&self, purpose: CallPurpose, text: impl Into<String>) {
        self.push(purpose, MockReply::Text(text.into())).await;
    }

    /// Every call made so far, in order.
    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }

    /// Number of calls made for `purpose`.
    pub async fn call_count(&self, purpose: CallPurpose) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.purpose == purpose)
            .count()
    }

    fn builtin_default(request: &CompletionRequest) -> MockReply {
        match request.purpose {
            CallPurpose::Classify => MockReply::Text(String::new()),
            CallPurpose::Extract => MockReply::Text("{}".to_string()),
            CallPurpose::Respond => {
                let last_user = request
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or("(no input)");
                MockReply::Text(format!("Noted: {last_user}"))
            }
        }
    }
}

#[async_trait]
impl LlmProvider for MockLlm {
    fn model_name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.lock().await.push(RecordedCall {
            purpose: request.purpose,
            messages: request.messages.clone(),
        });

        let scripted = self
            .scripts
            .lock()
            .await
            .get_mut(&request.purpose)
            .and_then(VecDeque::pop_front);
        let reply = scripted
            .or_else(|| self.defaults.get(&request.purpose).cloned())
            .unwrap_or_else(|| Self::builtin_default(&request));

        match reply {
            MockReply::Text(content) => Ok(CompletionResponse {
                content,
                input_tokens: 0,
                output_tokens: 0,
                finish_reason: FinishReason::Stop,
                response_id: None,
            }),
            MockReply::Error(reason) => Err(LlmError::RequestFailed {
                provider: "mock".to_string(),
                reason,
            }),
            MockReply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(LlmError::Timeout {
                    after: Duration::from_secs(3600),
                })
            }
        }
    }
}
