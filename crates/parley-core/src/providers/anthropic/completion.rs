//! Anthropic completion api implementation

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{Level, enabled};
use tracing_futures::Instrument;

use super::client::Client;
use super::streaming;
use crate::{
    completion::{self, ChatModel, ChatOptions, CompletionError, Prompt, Role},
    http_client::{self, HttpClientExt, retry::send_with_retry, sse::GenericEventSource},
    json_utils,
    streaming::StreamingChatResponse,
    telemetry::{
        AiProvider, ChatModelObservationContext, ChatModelObservationConvention,
        DefaultChatModelObservationConvention, ObservationSpan,
    },
};

// ================================================================
// Anthropic Completion API
// ================================================================
/// `claude-3-5-sonnet-20240620` completion model
pub const CLAUDE_3_5_SONNET: &str = "claude-3-5-sonnet-20240620";

/// `claude-3-opus-20240229` completion model
pub const CLAUDE_3_OPUS: &str = "claude-3-opus-20240229";

/// `claude-3-sonnet-20240229` completion model
pub const CLAUDE_3_SONNET: &str = "claude-3-sonnet-20240229";

/// `claude-3-haiku-20240307` completion model
pub const CLAUDE_3_HAIKU: &str = "claude-3-haiku-20240307";

pub const ANTHROPIC_VERSION_2023_01_01: &str = "2023-01-01";
pub const ANTHROPIC_VERSION_2023_06_01: &str = "2023-06-01";
pub const ANTHROPIC_VERSION_LATEST: &str = ANTHROPIC_VERSION_2023_06_01;

/// Used when neither the prompt nor the model defaults set `max_tokens`, which Anthropic requires.
pub const DEFAULT_MAX_TOKENS: u64 = 500;

#[derive(Debug, Deserialize)]
pub struct CompletionResponse {
    pub content: Vec<Content>,
    pub id: String,
    pub model: String,
    pub role: String,
    pub stop_reason: Option<String>,
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text {
        text: String,
    },
    /// Tool use, thinking and other block types are not supported.
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    pub cache_read_input_tokens: Option<u64>,
    pub cache_creation_input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: u64,
}

impl From<Usage> for completion::Usage {
    fn from(usage: Usage) -> Self {
        completion::Usage::new(usage.input_tokens, usage.output_tokens)
    }
}

impl From<CompletionResponse> for completion::ChatResponse {
    fn from(response: CompletionResponse) -> Self {
        let texts: Vec<String> = response
            .content
            .into_iter()
            .filter_map(|content| match content {
                Content::Text { text } => Some(text),
                Content::Unsupported => None,
            })
            .collect();

        let result = (!texts.is_empty()).then(|| completion::Generation::new(texts.concat()));

        completion::ChatResponse::new(
            result,
            completion::ResponseMetadata {
                id: Some(response.id),
                model: Some(response.model),
                finish_reasons: response.stop_reason.into_iter().collect(),
                usage: Some(response.usage.into()),
            },
        )
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Message {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct Metadata {
    user_id: Option<String>,
}

/// Body of `POST /v1/messages`. Frequency and presence penalties have no Anthropic counterpart
/// and are never sent.
#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<Metadata>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

/// An error reported by the Messages API, in an error response or a streaming `error` event.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiResponse<T> {
    Message(T),
    Error(ApiErrorResponse),
}

/// Maps a transport error, extracting the provider message from Anthropic error bodies.
pub(crate) fn provider_error(error: http_client::Error) -> CompletionError {
    match error {
        http_client::Error::InvalidStatusCodeWithMessage(status, body) => {
            let message = serde_json::from_str::<ApiErrorResponse>(&body)
                .map(|response| format!("{}: {}", response.error.kind, response.error.message))
                .unwrap_or(body);
            CompletionError::ProviderError { status, message }
        }
        other => other.into(),
    }
}

/// Request fields that are set from typed [`ChatOptions`] and recorded on the observation.
/// `additional_params` cannot override them.
const RESERVED_PARAMS: [&str; 9] = [
    "model",
    "messages",
    "system",
    "max_tokens",
    "stop_sequences",
    "temperature",
    "top_k",
    "top_p",
    "stream",
];

fn strip_reserved_params(mut params: serde_json::Value) -> serde_json::Value {
    if let Some(map) = params.as_object_mut() {
        for key in RESERVED_PARAMS {
            if map.remove(key).is_some() {
                tracing::warn!(
                    target: "parley::completions",
                    param = key,
                    "Ignoring additional param that overrides a chat option"
                );
            }
        }
    }
    params
}

#[derive(Clone)]
pub struct CompletionModel<T = reqwest::Client> {
    client: Client<T>,
    pub model: String,
    default_options: ChatOptions,
    convention: Arc<dyn ChatModelObservationConvention>,
}

impl<T> std::fmt::Debug for CompletionModel<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionModel")
            .field("client", &self.client)
            .field("model", &self.model)
            .field("default_options", &self.default_options)
            .finish_non_exhaustive()
    }
}

impl<T> CompletionModel<T> {
    pub fn new(client: Client<T>, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
            default_options: ChatOptions::default(),
            convention: Arc::new(DefaultChatModelObservationConvention),
        }
    }

    /// Options applied to every call, unless the prompt overrides them.
    pub fn with_default_options(mut self, options: ChatOptions) -> Self {
        self.default_options = options;
        self
    }

    /// Replaces the convention deciding which attributes observations carry.
    pub fn with_observation_convention(
        mut self,
        convention: impl ChatModelObservationConvention + 'static,
    ) -> Self {
        self.convention = Arc::new(convention);
        self
    }

    pub fn default_options(&self) -> &ChatOptions {
        &self.default_options
    }

    /// The options a call runs with: the prompt's, then the model defaults, then the model name
    /// and [`DEFAULT_MAX_TOKENS`].
    pub fn merged_options(&self, options: Option<ChatOptions>) -> ChatOptions {
        let mut options = options.unwrap_or_default().merge(&self.default_options);
        if options.model.is_none() {
            options.model = Some(self.model.clone());
        }
        if options.max_tokens.is_none() {
            options.max_tokens = Some(DEFAULT_MAX_TOKENS);
        }
        options
    }

    pub(crate) fn create_request_body(
        &self,
        messages: Vec<completion::Message>,
        options: &ChatOptions,
        stream: bool,
    ) -> Result<serde_json::Value, CompletionError> {
        let (system, messages): (Vec<_>, Vec<_>) = messages
            .into_iter()
            .partition(|message| message.role == Role::System);

        if messages.is_empty() {
            return Err(CompletionError::RequestError(
                "Anthropic requires at least one user or assistant message".into(),
            ));
        }

        let system = (!system.is_empty()).then(|| {
            system
                .into_iter()
                .map(|message| message.content)
                .collect::<Vec<_>>()
                .join("\n\n")
        });

        let request = MessagesRequest {
            model: options.model.clone().unwrap_or_else(|| self.model.clone()),
            messages: messages
                .into_iter()
                .map(|message| Message {
                    role: match message.role {
                        Role::Assistant => "assistant".to_string(),
                        Role::User | Role::System => "user".to_string(),
                    },
                    content: message.content,
                })
                .collect(),
            max_tokens: options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system,
            stop_sequences: options
                .stop_sequences
                .clone()
                .filter(|sequences| !sequences.is_empty()),
            temperature: options.temperature,
            top_k: options.top_k,
            top_p: options.top_p,
            metadata: options.user_id.clone().map(|user_id| Metadata {
                user_id: Some(user_id),
            }),
            stream,
        };

        let mut body = serde_json::to_value(request)?;
        if let Some(params) = options.additional_params.clone() {
            json_utils::merge_inplace(&mut body, strip_reserved_params(params));
        }

        Ok(body)
    }

    fn start_observation(&self, options: &ChatOptions) -> ObservationSpan {
        ObservationSpan::start(
            ChatModelObservationContext::new(AiProvider::Anthropic, options.clone()),
            self.convention.clone(),
        )
    }
}

impl<T> CompletionModel<T>
where
    T: HttpClientExt + Clone + 'static,
{
    async fn send_messages(
        &self,
        messages: Vec<completion::Message>,
        options: &ChatOptions,
    ) -> Result<completion::ChatResponse, CompletionError> {
        let body = self.create_request_body(messages, options, false)?;

        if enabled!(Level::TRACE) {
            tracing::trace!(
                target: "parley::completions",
                "Anthropic completion request: {}",
                serde_json::to_string_pretty(&body)?
            );
        }

        let req = self
            .client
            .post("/v1/messages")
            .body(serde_json::to_vec(&body)?)
            .map_err(http_client::Error::from)?;

        let response = send_with_retry(self.client.http_client(), req, self.client.retry_config())
            .await
            .map_err(provider_error)?;
        let bytes = response.into_body().await?;

        match serde_json::from_slice::<ApiResponse<CompletionResponse>>(&bytes)? {
            ApiResponse::Message(completion) => {
                if enabled!(Level::TRACE) {
                    tracing::trace!(
                        target: "parley::completions",
                        "Anthropic completion response: {}",
                        String::from_utf8_lossy(&bytes)
                    );
                }
                Ok(completion.into())
            }
            ApiResponse::Error(response) => Err(CompletionError::ResponseError(format!(
                "{}: {}",
                response.error.kind, response.error.message
            ))),
        }
    }

    async fn open_stream(
        &self,
        messages: Vec<completion::Message>,
        options: &ChatOptions,
    ) -> Result<crate::streaming::StreamingResult, CompletionError> {
        let body = self.create_request_body(messages, options, true)?;

        if enabled!(Level::TRACE) {
            tracing::trace!(
                target: "parley::completions",
                "Anthropic streaming completion request: {}",
                serde_json::to_string_pretty(&body)?
            );
        }

        let req = self
            .client
            .post("/v1/messages")
            .body(serde_json::to_vec(&body)?)
            .map_err(http_client::Error::from)?;

        let event_source = GenericEventSource::with_retry_policy(
            self.client.http_client().clone(),
            req,
            self.client.retry_config().clone(),
        );

        streaming::connect(event_source).await
    }
}

impl<T> ChatModel for CompletionModel<T>
where
    T: HttpClientExt + Clone + 'static,
{
    async fn call(&self, prompt: Prompt) -> Result<completion::ChatResponse, CompletionError> {
        let (messages, options) = prompt.into_parts();
        let options = self.merged_options(options);

        let mut observation = self.start_observation(&options);
        let span = observation.span().clone();

        let result = self.send_messages(messages, &options).instrument(span).await;

        match &result {
            Ok(response) => observation.record_response(response.clone()),
            Err(error) => observation.record_error(error),
        }

        result
    }

    async fn stream(&self, prompt: Prompt) -> Result<StreamingChatResponse, CompletionError> {
        let (messages, options) = prompt.into_parts();
        let options = self.merged_options(options);

        let observation = self.start_observation(&options);
        let span = observation.span().clone();

        match self.open_stream(messages, &options).instrument(span).await {
            Ok(inner) => Ok(StreamingChatResponse::observed(inner, observation)),
            Err(error) => {
                observation.record_error(&error);
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::Message as ChatMessage;

    fn model() -> CompletionModel {
        let client = Client::new("test-key").expect("client should build");
        CompletionModel::new(client, CLAUDE_3_HAIKU)
    }

    #[test]
    fn merged_options_fall_back_to_model_and_default_max_tokens() {
        let options = model().merged_options(None);
        assert_eq!(options.model.as_deref(), Some(CLAUDE_3_HAIKU));
        assert_eq!(options.max_tokens, Some(DEFAULT_MAX_TOKENS));
    }

    #[test]
    fn prompt_options_override_model_defaults() {
        let model = model().with_default_options(
            ChatOptions::builder()
                .max_tokens(1024)
                .temperature(0.1)
                .build(),
        );
        let options = model.merged_options(Some(
            ChatOptions::builder()
                .model(CLAUDE_3_5_SONNET)
                .temperature(0.7)
                .build(),
        ));

        assert_eq!(options.model.as_deref(), Some(CLAUDE_3_5_SONNET));
        assert_eq!(options.max_tokens, Some(1024));
        assert_eq!(options.temperature, Some(0.7));
    }

    #[test]
    fn request_body_maps_options() {
        let model = model();
        let options = model.merged_options(Some(
            ChatOptions::builder()
                .max_tokens(2048)
                .stop_sequences(["this-is-the-end"])
                .temperature(0.7)
                .top_k(1)
                .top_p(1.0)
                .frequency_penalty(0.5)
                .presence_penalty(0.5)
                .user_id("user-1")
                .additional_params(serde_json::json!({"top_k": 5, "service_tier": "auto"}))
                .build(),
        ));

        let body = model
            .create_request_body(
                vec![
                    ChatMessage::system("Be brief."),
                    ChatMessage::user("Why does a raven look like a desk?"),
                ],
                &options,
                false,
            )
            .expect("request should build");

        assert_eq!(
            body,
            serde_json::json!({
                "model": CLAUDE_3_HAIKU,
                "messages": [
                    {"role": "user", "content": "Why does a raven look like a desk?"}
                ],
                "max_tokens": 2048,
                "system": "Be brief.",
                "stop_sequences": ["this-is-the-end"],
                "temperature": 0.7,
                "top_k": 1,
                "top_p": 1.0,
                "metadata": {"user_id": "user-1"},
                "service_tier": "auto"
            })
        );
    }

    #[test]
    fn additional_params_cannot_override_observed_options() {
        let model = model();
        let options = model.merged_options(Some(
            ChatOptions::builder()
                .temperature(0.7)
                .additional_params(serde_json::json!({
                    "model": "claude-2.1",
                    "temperature": 0.1,
                    "max_tokens": 8,
                    "stream": true,
                    "thinking": {"type": "disabled"}
                }))
                .build(),
        ));

        let body = model
            .create_request_body(vec![ChatMessage::user("Hello")], &options, false)
            .expect("request should build");

        assert_eq!(body["model"], CLAUDE_3_HAIKU);
        assert_eq!(body["temperature"], 0.7);
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert!(body.get("stream").is_none());
        assert_eq!(body["thinking"], serde_json::json!({"type": "disabled"}));
    }

    #[test]
    fn streaming_request_sets_stream_flag() {
        let model = model();
        let body = model
            .create_request_body(
                vec![ChatMessage::user("Hello")],
                &model.merged_options(None),
                true,
            )
            .expect("request should build");

        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert!(body.get("system").is_none());
    }

    #[test]
    fn request_without_conversation_is_rejected() {
        let model = model();
        let result = model.create_request_body(
            vec![ChatMessage::system("Only a system prompt")],
            &model.merged_options(None),
            false,
        );
        assert!(matches!(result, Err(CompletionError::RequestError(_))));
    }

    #[test]
    fn response_converts_to_chat_response() {
        let response: CompletionResponse = serde_json::from_value(serde_json::json!({
            "id": "msg_013Zva2CMHLNnXjNJJKqJ2EF",
            "type": "message",
            "role": "assistant",
            "model": CLAUDE_3_5_SONNET,
            "content": [
                {"type": "text", "text": "Because "},
                {"type": "tool_use", "id": "toolu_01", "name": "noop", "input": {}},
                {"type": "text", "text": "Poe wrote on both."}
            ],
            "stop_reason": "end_turn",
            "stop_sequence": null,
            "usage": {"input_tokens": 14, "output_tokens": 10}
        }))
        .expect("response should deserialize");

        let response: completion::ChatResponse = response.into();
        assert_eq!(response.text(), Some("Because Poe wrote on both."));
        assert_eq!(response.metadata.finish_reasons, vec!["end_turn"]);
        assert_eq!(response.metadata.usage, Some(completion::Usage::new(14, 10)));
        assert_eq!(response.metadata.model.as_deref(), Some(CLAUDE_3_5_SONNET));
    }

    #[test]
    fn provider_error_extracts_message() {
        let error = provider_error(http_client::Error::InvalidStatusCodeWithMessage(
            http::StatusCode::BAD_REQUEST,
            r#"{"type":"error","error":{"type":"invalid_request_error","message":"max_tokens: too large"}}"#
                .to_string(),
        ));

        match error {
            CompletionError::ProviderError { status, message } => {
                assert_eq!(status, http::StatusCode::BAD_REQUEST);
                assert_eq!(message, "invalid_request_error: max_tokens: too large");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
