//! Attribute names and values for chat model observations.
//!
//! Names follow the OpenTelemetry GenAI semantic conventions so that downstream trace and
//! metrics backends can consume them unchanged.

use std::fmt;

/// Value recorded for an attribute whose source is absent.
pub const NONE_VALUE: &str = "none";

/// The kind of AI operation being observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum AiOperationType {
    Chat,
}

impl AiOperationType {
    pub const fn value(&self) -> &'static str {
        match self {
            AiOperationType::Chat => "chat",
        }
    }
}

impl fmt::Display for AiOperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}

/// The vendor serving the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum AiProvider {
    Anthropic,
}

impl AiProvider {
    pub const fn value(&self) -> &'static str {
        match self {
            AiProvider::Anthropic => "anthropic",
        }
    }
}

impl fmt::Display for AiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}

/// Whether `key` is one of the attribute names an observation span declares.
pub fn is_declared_key(key: &str) -> bool {
    LowCardinalityKeyNames::ALL
        .iter()
        .any(|name| name.as_str() == key)
        || HighCardinalityKeyNames::ALL
            .iter()
            .any(|name| name.as_str() == key)
}

/// Keys with a bounded value domain. Safe to use as metric dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LowCardinalityKeyNames {
    OperationName,
    AiProvider,
    RequestModel,
    ResponseModel,
}

impl LowCardinalityKeyNames {
    pub const ALL: [LowCardinalityKeyNames; 4] = [
        LowCardinalityKeyNames::OperationName,
        LowCardinalityKeyNames::AiProvider,
        LowCardinalityKeyNames::RequestModel,
        LowCardinalityKeyNames::ResponseModel,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            LowCardinalityKeyNames::OperationName => "gen_ai.operation.name",
            LowCardinalityKeyNames::AiProvider => "gen_ai.system",
            LowCardinalityKeyNames::RequestModel => "gen_ai.request.model",
            LowCardinalityKeyNames::ResponseModel => "gen_ai.response.model",
        }
    }
}

/// Keys with an unbounded value domain. Only meant for traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HighCardinalityKeyNames {
    RequestFrequencyPenalty,
    RequestMaxTokens,
    RequestPresencePenalty,
    RequestStopSequences,
    RequestTemperature,
    RequestTopK,
    RequestTopP,
    ResponseId,
    ResponseFinishReasons,
    UsageInputTokens,
    UsageOutputTokens,
    UsageTotalTokens,
}

impl HighCardinalityKeyNames {
    pub const ALL: [HighCardinalityKeyNames; 12] = [
        HighCardinalityKeyNames::RequestFrequencyPenalty,
        HighCardinalityKeyNames::RequestMaxTokens,
        HighCardinalityKeyNames::RequestPresencePenalty,
        HighCardinalityKeyNames::RequestStopSequences,
        HighCardinalityKeyNames::RequestTemperature,
        HighCardinalityKeyNames::RequestTopK,
        HighCardinalityKeyNames::RequestTopP,
        HighCardinalityKeyNames::ResponseId,
        HighCardinalityKeyNames::ResponseFinishReasons,
        HighCardinalityKeyNames::UsageInputTokens,
        HighCardinalityKeyNames::UsageOutputTokens,
        HighCardinalityKeyNames::UsageTotalTokens,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            HighCardinalityKeyNames::RequestFrequencyPenalty => "gen_ai.request.frequency_penalty",
            HighCardinalityKeyNames::RequestMaxTokens => "gen_ai.request.max_tokens",
            HighCardinalityKeyNames::RequestPresencePenalty => "gen_ai.request.presence_penalty",
            HighCardinalityKeyNames::RequestStopSequences => "gen_ai.request.stop_sequences",
            HighCardinalityKeyNames::RequestTemperature => "gen_ai.request.temperature",
            HighCardinalityKeyNames::RequestTopK => "gen_ai.request.top_k",
            HighCardinalityKeyNames::RequestTopP => "gen_ai.request.top_p",
            HighCardinalityKeyNames::ResponseId => "gen_ai.response.id",
            HighCardinalityKeyNames::ResponseFinishReasons => "gen_ai.response.finish_reasons",
            HighCardinalityKeyNames::UsageInputTokens => "gen_ai.usage.input_tokens",
            HighCardinalityKeyNames::UsageOutputTokens => "gen_ai.usage.output_tokens",
            HighCardinalityKeyNames::UsageTotalTokens => "gen_ai.usage.total_tokens",
        }
    }
}

/// A single attribute of an observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    key: &'static str,
    value: String,
}

impl KeyValue {
    pub fn new(key: &'static str, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }

    /// An attribute carrying the [`NONE_VALUE`] sentinel.
    pub fn none(key: &'static str) -> Self {
        Self::new(key, NONE_VALUE)
    }

    /// Builds an attribute from an optional value, falling back to [`NONE_VALUE`].
    pub fn or_none<T, F>(key: &'static str, value: Option<T>, render: F) -> Self
    where
        F: FnOnce(T) -> String,
    {
        match value {
            Some(value) => Self::new(key, render(value)),
            None => Self::none(key),
        }
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// An ordered set of attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValues(Vec<KeyValue>);

impl KeyValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `key_value`, replacing any previous value for the same key.
    pub fn with(mut self, key_value: KeyValue) -> Self {
        self.0.retain(|existing| existing.key != key_value.key);
        self.0.push(key_value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|key_value| key_value.key == key)
            .map(KeyValue::value)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, KeyValue> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<KeyValue> for KeyValues {
    fn from_iter<I: IntoIterator<Item = KeyValue>>(iter: I) -> Self {
        iter.into_iter().fold(KeyValues::new(), KeyValues::with)
    }
}

impl IntoIterator for KeyValues {
    type Item = KeyValue;
    type IntoIter = std::vec::IntoIter<KeyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a KeyValues {
    type Item = &'a KeyValue;
    type IntoIter = std::slice::Iter<'a, KeyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
