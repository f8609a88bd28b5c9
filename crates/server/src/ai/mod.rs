//! AI collaborator
//!
//! [`AiService`] owns prompt construction, the call timeout and strict
//! parsing of structured replies. The actual chat-completion backend sits
//! behind [`ChatModel`]:
//! - [`AzureChatModel`] for an Azure OpenAI deployment
//! - [`GenAiModel`] for any model name genai understands
//!
//! With neither configured every call fails with [`LlmError::NotConfigured`].

pub mod azure;
pub mod genai_model;
pub mod prompts;

pub use azure::AzureChatModel;
pub use genai_model::GenAiModel;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::LlmConfig;
use crate::models::{CommunicationScore, Message};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM is not configured")]
    NotConfigured,

    #[error("LLM call timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("provider error: {0}")]
    Provider(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A chat-completion backend: one system + one user message in, free text out.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError>;
}

/// Structured verdict on a single spoken turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceEvaluation {
    pub tone: String,
    pub empathy: u8,
    pub clarity: u8,
    pub respect: u8,
    pub warning: bool,
}

const TONES: [&str; 5] = ["respectful", "hostile", "passive", "supportive", "neutral"];

/// Ratings the model produced for one partner; the caller attaches ids.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreDraft {
    pub empathy: u8,
    pub listening: u8,
    pub respect: u8,
    pub clarity: u8,
    pub conflict_resolution: u8,
    #[serde(default)]
    pub summary: String,
}

impl ScoreDraft {
    pub fn into_score(self, session_id: &str, partner_id: &str, created_at: i64) -> CommunicationScore {
        CommunicationScore {
            session_id: session_id.to_string(),
            partner_id: partner_id.to_string(),
            empathy: self.empathy,
            listening: self.listening,
            respect: self.respect,
            clarity: self.clarity,
            conflict_resolution: self.conflict_resolution,
            summary: Some(self.summary).filter(|s| !s.trim().is_empty()),
            created_at,
        }
    }
}

pub struct AiService {
    model: Option<Arc<dyn ChatModel>>,
    timeout: Duration,
}

impl AiService {
    pub fn new(model: Arc<dyn ChatModel>, timeout: Duration) -> Self {
        Self {
            model: Some(model),
            timeout,
        }
    }

    pub fn disabled() -> Self {
        Self {
            model: None,
            timeout: Duration::from_secs(crate::config::DEFAULT_LLM_TIMEOUT_SECS),
        }
    }

    /// Pick a backend from configuration: an Azure deployment first, then a genai model.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let model: Arc<dyn ChatModel> = match (&config.endpoint, &config.deployment, &config.model) {
            (Some(endpoint), Some(deployment), _) => Arc::new(AzureChatModel::new(
                endpoint,
                deployment,
                &config.api_version,
                config.api_key.clone(),
                config.timeout,
            )?),
            (_, _, Some(model)) => Arc::new(GenAiModel::new(model.clone())),
            _ => {
                warn!("[AI] No LLM configured; moderation, reflections and scoring are disabled");
                return Ok(Self::disabled());
            }
        };

        info!("[AI] Using model {}", model.name());
        Ok(Self::new(model, config.timeout))
    }

    pub fn is_enabled(&self) -> bool {
        self.model.is_some()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let model = self.model.as_ref().ok_or(LlmError::NotConfigured)?;
        let reply = tokio::time::timeout(self.timeout, model.complete(request))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout))??;

        let reply = reply.trim();
        if reply.is_empty() {
            return Err(LlmError::MalformedResponse("empty completion".into()));
        }
        debug!("[AI] {} replied with {} chars", model.name(), reply.len());
        Ok(reply.to_string())
    }

    /// Short validating reply to what a partner just said.
    pub async fn therapist_reply(&self, issue: &str) -> Result<String, LlmError> {
        self.complete(CompletionRequest::new(
            prompts::THERAPIST_SYSTEM,
            prompts::therapist(issue),
        ))
        .await
    }

    pub async fn evaluate_voice(
        &self,
        speaker: &str,
        transcript: &str,
        context: &str,
    ) -> Result<VoiceEvaluation, LlmError> {
        let raw = self
            .complete(CompletionRequest::new(
                prompts::VOICE_SYSTEM,
                prompts::voice_evaluation(speaker, transcript, context),
            ))
            .await?;

        let mut evaluation: VoiceEvaluation = parse_json_reply(&raw)?;
        evaluation.tone = evaluation.tone.to_lowercase();
        if !TONES.contains(&evaluation.tone.as_str()) {
            return Err(LlmError::MalformedResponse(format!("unknown tone {:?}", evaluation.tone)));
        }
        for (field, value) in [
            ("empathy", evaluation.empathy),
            ("clarity", evaluation.clarity),
            ("respect", evaluation.respect),
        ] {
            if value > 10 {
                return Err(LlmError::MalformedResponse(format!("{} out of range: {}", field, value)));
            }
        }
        Ok(evaluation)
    }

    /// Therapist-style summary of a session transcript.
    pub async fn reflect(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.complete(
            CompletionRequest::new(prompts::REFLECTION_SYSTEM, prompts::reflection(messages))
                .with_temperature(0.7),
        )
        .await
    }

    /// Rate a transcript 1-5 on each communication dimension.
    pub async fn score(&self, messages: &[Message]) -> Result<ScoreDraft, LlmError> {
        let raw = self
            .complete(
                CompletionRequest::new(prompts::SCORE_SYSTEM, prompts::score(messages))
                    .with_temperature(0.6),
            )
            .await?;

        let draft: ScoreDraft = parse_json_reply(&raw)?;
        for (field, value) in [
            ("empathy", draft.empathy),
            ("listening", draft.listening),
            ("respect", draft.respect),
            ("clarity", draft.clarity),
            ("conflictResolution", draft.conflict_resolution),
        ] {
            if !(1..=5).contains(&value) {
                return Err(LlmError::MalformedResponse(format!("{} out of range: {}", field, value)));
            }
        }
        Ok(draft)
    }
}

/// Parse a JSON object out of a model reply, tolerating a markdown code fence.
pub(crate) fn parse_json_reply<T: DeserializeOwned>(raw: &str) -> Result<T, LlmError> {
    let mut body = raw.trim();
    if let Some(rest) = body.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        body = rest.strip_suffix("```").unwrap_or(rest).trim();
    }
    serde_json::from_str(body).map_err(|e| LlmError::MalformedResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Canned {
        reply: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl Canned {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                reply: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
                delay: Duration::ZERO,
            })
        }
    }

    #[async_trait]
    impl ChatModel for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<String, LlmError> {
            tokio::time::sleep(self.delay).await;
            Ok(self.reply.lock().unwrap().pop().unwrap_or_default())
        }
    }

    fn service(replies: &[&str]) -> AiService {
        AiService::new(Canned::new(replies), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn disabled_service_reports_not_configured() {
        let ai = AiService::disabled();
        assert!(!ai.is_enabled());
        assert!(matches!(ai.therapist_reply("x").await, Err(LlmError::NotConfigured)));
    }

    #[tokio::test]
    async fn fenced_score_is_parsed() {
        let ai = service(&[
            "```json\n{\"empathy\":4,\"listening\":5,\"respect\":4,\"clarity\":3,\"conflictResolution\":4,\"summary\":\"Calm.\"}\n```",
        ]);
        let draft = ai.score(&[Message::new("u1", "hi")]).await.unwrap();
        assert_eq!(draft.listening, 5);
        let score = draft.into_score("s1", "u1", 10);
        assert_eq!(score.summary.as_deref(), Some("Calm."));
        assert_eq!(score.partner_id, "u1");
    }

    #[tokio::test]
    async fn out_of_range_or_prose_scores_fail_closed() {
        let ai = service(&[
            r#"{"empathy":9,"listening":5,"respect":4,"clarity":3,"conflictResolution":4}"#,
            "I think they did well.",
        ]);
        assert!(matches!(ai.score(&[]).await, Err(LlmError::MalformedResponse(_))));
        assert!(matches!(ai.score(&[]).await, Err(LlmError::MalformedResponse(_))));
    }

    #[tokio::test]
    async fn voice_evaluation_requires_known_tone() {
        let ai = service(&[
            r#"{"tone":"Hostile","empathy":2,"clarity":6,"respect":1,"warning":true}"#,
            r#"{"tone":"sarcastic","empathy":2,"clarity":6,"respect":1,"warning":true}"#,
        ]);
        let eval = ai.evaluate_voice("u1", "whatever", "").await.unwrap();
        assert_eq!(eval.tone, "hostile");
        assert!(eval.warning);
        assert!(ai.evaluate_voice("u1", "whatever", "").await.is_err());
    }

    #[tokio::test]
    async fn slow_model_times_out() {
        let model = Arc::new(Canned {
            reply: Mutex::new(vec!["late".into()]),
            delay: Duration::from_millis(200),
        });
        let ai = AiService::new(model, Duration::from_millis(20));
        assert!(matches!(ai.therapist_reply("x").await, Err(LlmError::Timeout(_))));
    }

    #[tokio::test]
    async fn blank_reply_is_an_error() {
        let ai = service(&["   "]);
        assert!(matches!(
            ai.therapist_reply("x").await,
            Err(LlmError::MalformedResponse(_))
        ));
    }

    #[test]
    fn from_config_without_backend_is_disabled() {
        let ai = AiService::from_config(&LlmConfig::default()).unwrap();
        assert!(!ai.is_enabled());
    }
}
