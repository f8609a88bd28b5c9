//! Azure OpenAI chat-completions deployment over reqwest

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ChatModel, CompletionRequest, LlmError};

pub struct AzureChatModel {
    http: reqwest::Client,
    url: String,
    api_key: String,
    deployment: String,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    messages: [WireMessage<'a>; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl AzureChatModel {
    pub fn new(
        endpoint: &str,
        deployment: &str,
        api_version: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            endpoint.trim_end_matches('/'),
            deployment,
            api_version
        );
        Ok(Self {
            http,
            url,
            api_key: api_key.unwrap_or_default(),
            deployment: deployment.to_string(),
        })
    }
}

#[async_trait]
impl ChatModel for AzureChatModel {
    fn name(&self) -> &str {
        &self.deployment
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let body = ChatCompletionRequest {
            messages: [
                WireMessage {
                    role: "system",
                    content: &request.system,
                },
                WireMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: request.temperature,
        };

        debug!("[AI] POST {}", self.url);
        let response = self
            .http
            .post(&self.url)
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            return Err(LlmError::Upstream {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).chars().take(512).collect(),
            });
        }

        extract_content(&bytes)
    }
}

/// Pull the first choice's text out of a completions payload.
pub(crate) fn extract_content(bytes: &[u8]) -> Result<String, LlmError> {
    let parsed: ChatCompletionResponse = serde_json::from_slice(bytes)
        .map_err(|e| LlmError::MalformedResponse(format!("completion body: {}", e)))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| LlmError::MalformedResponse("completion has no content".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_choice() {
        let body = br#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"Take a breath."}}]}"#;
        assert_eq!(extract_content(body).unwrap(), "Take a breath.");
    }

    #[test]
    fn missing_choices_fail_closed() {
        assert!(matches!(
            extract_content(br#"{"choices":[]}"#),
            Err(LlmError::MalformedResponse(_))
        ));
        assert!(matches!(
            extract_content(br#"{"error":{"message":"quota"}}"#),
            Err(LlmError::MalformedResponse(_))
        ));
    }

    #[test]
    fn url_joins_endpoint_and_deployment() {
        let model = AzureChatModel::new(
            "https://mend.openai.azure.com/",
            "gpt-35-turbo",
            "2024-02-15-preview",
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            model.url,
            "https://mend.openai.azure.com/openai/deployments/gpt-35-turbo/chat/completions?api-version=2024-02-15-preview"
        );
    }
}
