use crate::completion::{ChatOptions, ChatResponse};

use super::conventions::{
    AiOperationType, AiProvider, HighCardinalityKeyNames, KeyValue, KeyValues,
    LowCardinalityKeyNames,
};
use super::{format_float, format_list};

/// Everything known about a chat call at a given point of its lifecycle.
///
/// Created with the merged request options before the request is sent. The response is attached
/// once it is available (for streams, once the stream is over).
#[derive(Debug, Clone)]
pub struct ChatModelObservationContext {
    operation_type: AiOperationType,
    provider: AiProvider,
    request_options: ChatOptions,
    response: Option<ChatResponse>,
}

impl ChatModelObservationContext {
    pub fn new(provider: AiProvider, request_options: ChatOptions) -> Self {
        Self {
            operation_type: AiOperationType::Chat,
            provider,
            request_options,
            response: None,
        }
    }

    pub fn operation_type(&self) -> AiOperationType {
        self.operation_type
    }

    pub fn provider(&self) -> AiProvider {
        self.provider
    }

    pub fn request_options(&self) -> &ChatOptions {
        &self.request_options
    }

    pub fn response(&self) -> Option<&ChatResponse> {
        self.response.as_ref()
    }

    pub fn set_response(&mut self, response: ChatResponse) {
        self.response = Some(response);
    }

    pub fn with_response(mut self, response: ChatResponse) -> Self {
        self.set_response(response);
        self
    }
}

/// Computes the name and attributes of a chat observation.
///
/// Implementations must be pure: the same context always yields the same key values. Only the
/// names in [`LowCardinalityKeyNames`](super::LowCardinalityKeyNames) and
/// [`HighCardinalityKeyNames`](super::HighCardinalityKeyNames) can be recorded on the span; any
/// other key is skipped with a warning.
pub trait ChatModelObservationConvention: Send + Sync {
    /// The contextual name of the observation, e.g. `chat claude-3-haiku-20240307`.
    fn contextual_name(&self, context: &ChatModelObservationContext) -> String;

    fn low_cardinality_key_values(&self, context: &ChatModelObservationContext) -> KeyValues;

    fn high_cardinality_key_values(&self, context: &ChatModelObservationContext) -> KeyValues;
}

/// The GenAI attribute set, with [`NONE_VALUE`](super::NONE_VALUE) standing in for anything absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultChatModelObservationConvention;

impl ChatModelObservationConvention for DefaultChatModelObservationConvention {
    fn contextual_name(&self, context: &ChatModelObservationContext) -> String {
        match context.request_options().model.as_deref() {
            Some(model) if !model.is_empty() => {
                format!("{} {model}", context.operation_type().value())
            }
            _ => context.operation_type().value().to_string(),
        }
    }

    fn low_cardinality_key_values(&self, context: &ChatModelObservationContext) -> KeyValues {
        let response_model = context
            .response()
            .and_then(|response| response.metadata.model.clone())
            .filter(|model| !model.is_empty());

        KeyValues::new()
            .with(KeyValue::new(
                LowCardinalityKeyNames::OperationName.as_str(),
                context.operation_type().value(),
            ))
            .with(KeyValue::new(
                LowCardinalityKeyNames::AiProvider.as_str(),
                context.provider().value(),
            ))
            .with(KeyValue::or_none(
                LowCardinalityKeyNames::RequestModel.as_str(),
                context.request_options().model.clone(),
                |model| model,
            ))
            .with(KeyValue::or_none(
                LowCardinalityKeyNames::ResponseModel.as_str(),
                response_model,
                |model| model,
            ))
    }

    fn high_cardinality_key_values(&self, context: &ChatModelObservationContext) -> KeyValues {
        let options = context.request_options();
        let metadata = context.response().map(|response| &response.metadata);
        let usage = metadata.and_then(|metadata| metadata.usage);
        let stop_sequences = options
            .stop_sequences
            .as_deref()
            .filter(|sequences| !sequences.is_empty());
        let finish_reasons = metadata
            .map(|metadata| metadata.finish_reasons.as_slice())
            .filter(|reasons| !reasons.is_empty());

        KeyValues::new()
            .with(KeyValue::or_none(
                HighCardinalityKeyNames::RequestFrequencyPenalty.as_str(),
                options.frequency_penalty,
                format_float,
            ))
            .with(KeyValue::or_none(
                HighCardinalityKeyNames::RequestMaxTokens.as_str(),
                options.max_tokens,
                |tokens| tokens.to_string(),
            ))
            .with(KeyValue::or_none(
                HighCardinalityKeyNames::RequestPresencePenalty.as_str(),
                options.presence_penalty,
                format_float,
            ))
            .with(KeyValue::or_none(
                HighCardinalityKeyNames::RequestStopSequences.as_str(),
                stop_sequences,
                format_list,
            ))
            .with(KeyValue::or_none(
                HighCardinalityKeyNames::RequestTemperature.as_str(),
                options.temperature,
                format_float,
            ))
            .with(KeyValue::or_none(
                HighCardinalityKeyNames::RequestTopK.as_str(),
                options.top_k,
                |top_k| top_k.to_string(),
            ))
            .with(KeyValue::or_none(
                HighCardinalityKeyNames::RequestTopP.as_str(),
                options.top_p,
                format_float,
            ))
            .with(KeyValue::or_none(
                HighCardinalityKeyNames::ResponseId.as_str(),
                metadata
                    .and_then(|metadata| metadata.id.clone())
                    .filter(|id| !id.is_empty()),
                |id| id,
            ))
            .with(KeyValue::or_none(
                HighCardinalityKeyNames::ResponseFinishReasons.as_str(),
                finish_reasons,
                format_list,
            ))
            .with(KeyValue::or_none(
                HighCardinalityKeyNames::UsageInputTokens.as_str(),
                usage.map(|usage| usage.input_tokens),
                |tokens| tokens.to_string(),
            ))
            .with(KeyValue::or_none(
                HighCardinalityKeyNames::UsageOutputTokens.as_str(),
                usage.map(|usage| usage.output_tokens),
                |tokens| tokens.to_string(),
            ))
            .with(KeyValue::or_none(
                HighCardinalityKeyNames::UsageTotalTokens.as_str(),
                usage.map(|usage| usage.total_tokens),
                |tokens| tokens.to_string(),
            ))
    }
}
