//! Request side of a chat call: the [`Prompt`] and the portable [`ChatOptions`].

use serde::{Deserialize, Serialize};

use crate::json_utils;

use super::message::Message;

/// Portable chat options.
///
/// Every field is optional. Options passed with a [`Prompt`] take precedence over the defaults
/// configured on the model (see [`ChatOptions::merge`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatOptions {
    pub model: Option<String>,
    pub max_tokens: Option<u64>,
    pub stop_sequences: Option<Vec<String>>,
    pub temperature: Option<f64>,
    pub top_k: Option<u64>,
    pub top_p: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
    /// An opaque end-user identifier forwarded to the provider for abuse detection.
    pub user_id: Option<String>,
    /// Provider specific parameters merged into the request body. Keys that a typed option above
    /// controls (such as `temperature` or `model`) are dropped, so observations match the request.
    pub additional_params: Option<serde_json::Value>,
}

impl ChatOptions {
    pub fn builder() -> ChatOptionsBuilder {
        ChatOptionsBuilder::default()
    }

    /// Fills every unset field from `defaults`. Additional params are merged key by key,
    /// with the keys of `self` winning.
    pub fn merge(self, defaults: &ChatOptions) -> ChatOptions {
        let additional_params = match (defaults.additional_params.clone(), self.additional_params)
        {
            (Some(defaults), Some(params)) => Some(json_utils::merge(defaults, params)),
            (defaults, params) => params.or(defaults),
        };

        ChatOptions {
            model: self.model.or_else(|| defaults.model.clone()),
            max_tokens: self.max_tokens.or(defaults.max_tokens),
            stop_sequences: self
                .stop_sequences
                .or_else(|| defaults.stop_sequences.clone()),
            temperature: self.temperature.or(defaults.temperature),
            top_k: self.top_k.or(defaults.top_k),
            top_p: self.top_p.or(defaults.top_p),
            frequency_penalty: self.frequency_penalty.or(defaults.frequency_penalty),
            presence_penalty: self.presence_penalty.or(defaults.presence_penalty),
            user_id: self.user_id.or_else(|| defaults.user_id.clone()),
            additional_params,
        }
    }
}

/// Builder for [`ChatOptions`].
#[derive(Debug, Clone, Default)]
pub struct ChatOptionsBuilder {
    options: ChatOptions,
}

impl ChatOptionsBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.options.model = Some(model.into());
        self
    }

    /// Sets the max tokens for the request.
    /// Note: Anthropic requires it, models fall back to their default when unset.
    pub fn max_tokens(mut self, max_tokens: u64) -> Self {
        self.options.max_tokens = Some(max_tokens);
        self
    }

    pub fn stop_sequences<I, S>(mut self, stop_sequences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.stop_sequences = Some(stop_sequences.into_iter().map(Into::into).collect());
        self
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.options.temperature = Some(temperature);
        self
    }

    pub fn top_k(mut self, top_k: u64) -> Self {
        self.options.top_k = Some(top_k);
        self
    }

    pub fn top_p(mut self, top_p: f64) -> Self {
        self.options.top_p = Some(top_p);
        self
    }

    pub fn frequency_penalty(mut self, frequency_penalty: f64) -> Self {
        self.options.frequency_penalty = Some(frequency_penalty);
        self
    }

    pub fn presence_penalty(mut self, presence_penalty: f64) -> Self {
        self.options.presence_penalty = Some(presence_penalty);
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.options.user_id = Some(user_id.into());
        self
    }

    /// Adds provider specific parameters. Repeated calls are merged.
    pub fn additional_params(mut self, additional_params: serde_json::Value) -> Self {
        self.options.additional_params = match self.options.additional_params {
            Some(params) => Some(json_utils::merge(params, additional_params)),
            None => Some(additional_params),
        };
        self
    }

    pub fn build(self) -> ChatOptions {
        self.options
    }
}

/// The input of a chat call: ordered messages plus optional per-call options.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    messages: Vec<Message>,
    options: Option<ChatOptions>,
}

impl Prompt {
    /// A prompt holding a single user message.
    pub fn new(text: impl Into<String>) -> Self {
        Self::from_messages(vec![Message::user(text)])
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            options: None,
        }
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn options(&self) -> Option<&ChatOptions> {
        self.options.as_ref()
    }

    pub fn into_parts(self) -> (Vec<Message>, Option<ChatOptions>) {
        (self.messages, self.options)
    }
}

impl From<&str> for Prompt {
    fn from(text: &str) -> Self {
        Prompt::new(text)
    }
}

impl From<String> for Prompt {
    fn from(text: String) -> Self {
        Prompt::new(text)
    }
}
