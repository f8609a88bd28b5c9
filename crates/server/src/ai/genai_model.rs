//! Any provider genai can reach, addressed by model name

use async_trait::async_trait;
use genai::chat::{ChatMessage, ChatOptions, ChatRequest};
use genai::Client as GenAIClient;

use super::{ChatModel, CompletionRequest, LlmError};

pub struct GenAiModel {
    client: GenAIClient,
    model: String,
}

impl GenAiModel {
    /// Credentials come from the provider's usual environment variables.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: GenAIClient::default(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl ChatModel for GenAiModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let chat_req = ChatRequest::new(vec![
            ChatMessage::system(&request.system),
            ChatMessage::user(&request.prompt),
        ]);

        let options = chat_options(&request);

        let response = self
            .client
            .exec_chat(&self.model, chat_req, options.as_ref())
            .await
            .map_err(|e| LlmError::Provider(e.to_string()))?;

        response
            .first_text()
            .map(str::to_string)
            .ok_or_else(|| LlmError::MalformedResponse("no text in response".into()))
    }
}

fn chat_options(request: &CompletionRequest) -> Option<ChatOptions> {
    request
        .temperature
        .map(|t| ChatOptions::default().with_temperature(f64::from(t)))
}
