/// Scriptable chat model for tests.
///
/// Replies are produced by a closure over the prompt; every prompt received
/// is recorded so tests can inspect what the pipeline sent.
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ChatModel, LlmError};

type Responder = dyn Fn(&str) -> Result<String, LlmError> + Send + Sync;

pub struct MockChatModel {
    responder: Box<Responder>,
    prompts: Mutex<Vec<String>>,
}

impl MockChatModel {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with `reply`.
    pub fn replying(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::new(move |_| Ok(reply.clone()))
    }

    /// Always fails with `err`.
    pub fn failing(err: LlmError) -> Self {
        Self::new(move |_| Err(err.clone()))
    }

    /// Prompts received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        (self.responder)(prompt)
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}
