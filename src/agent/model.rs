//! The `invoke(prompt) -> text` collaborator the stages call.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::gateway::{Attribution, ChatGateway, ChatModel, ChatRequest, Message, ProviderError};

/// A gateway bound to one model and sampling setup.
///
/// Cloning is cheap; the pipeline clones once per run to attach the run id.
#[derive(Clone)]
pub struct AnalystModel {
    gateway: Arc<dyn ChatGateway>,
    model: ChatModel,
    temperature: f32,
    max_tokens: Option<u32>,
    run_id: Option<Uuid>,
}

impl AnalystModel {
    pub fn new(gateway: Arc<dyn ChatGateway>, model: ChatModel) -> Self {
        Self {
            gateway,
            model,
            temperature: 0.0,
            max_tokens: None,
            run_id: None,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn max_tokens(mut self, max: Option<u32>) -> Self {
        self.max_tokens = max;
        self
    }

    /// Same model, with calls attributed to `run_id`.
    pub fn for_run(&self, run_id: Uuid) -> Self {
        Self {
            run_id: Some(run_id),
            ..self.clone()
        }
    }

    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    /// Send `prompt` as a single user message and return the trimmed reply.
    pub async fn invoke(&self, caller: &'static str, prompt: &str) -> Result<String, ProviderError> {
        let mut attribution = Attribution::new(caller);
        if let Some(run_id) = self.run_id {
            attribution = attribution.with_run(run_id);
        }

        let mut req = ChatRequest::new(
            self.model.clone(),
            vec![Message::user(prompt)],
            attribution,
        )
        .temperature(self.temperature);
        if let Some(max) = self.max_tokens {
            req = req.max_tokens(max);
        }

        let resp = self.gateway.chat(req).await?;
        Ok(resp.content.trim().to_string())
    }
}

impl fmt::Debug for AnalystModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalystModel")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}
