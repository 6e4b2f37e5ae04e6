use std::fmt;
use std::sync::Arc;

use tracing::Span;

use crate::completion::{ChatResponse, CompletionError};

use super::SpanCombinator;
use super::convention::{ChatModelObservationContext, ChatModelObservationConvention};

/// The observation of a single chat call, backed by a `tracing` span.
///
/// All attributes are recorded as soon as the observation starts (response attributes as `none`)
/// and recorded again once a response is available. The span closes when the observation and
/// every clone of [`ObservationSpan::span`] are dropped.
pub struct ObservationSpan {
    span: Span,
    context: ChatModelObservationContext,
    convention: Arc<dyn ChatModelObservationConvention>,
}

impl ObservationSpan {
    pub fn start(
        context: ChatModelObservationContext,
        convention: Arc<dyn ChatModelObservationConvention>,
    ) -> Self {
        let span = tracing::info_span!(
            target: "parley::completions",
            "gen_ai.client.operation",
            otel.name = tracing::field::Empty,
            otel.kind = "client",
            gen_ai.operation.name = tracing::field::Empty,
            gen_ai.system = tracing::field::Empty,
            gen_ai.request.model = tracing::field::Empty,
            gen_ai.response.model = tracing::field::Empty,
            gen_ai.request.frequency_penalty = tracing::field::Empty,
            gen_ai.request.max_tokens = tracing::field::Empty,
            gen_ai.request.presence_penalty = tracing::field::Empty,
            gen_ai.request.stop_sequences = tracing::field::Empty,
            gen_ai.request.temperature = tracing::field::Empty,
            gen_ai.request.top_k = tracing::field::Empty,
            gen_ai.request.top_p = tracing::field::Empty,
            gen_ai.response.id = tracing::field::Empty,
            gen_ai.response.finish_reasons = tracing::field::Empty,
            gen_ai.usage.input_tokens = tracing::field::Empty,
            gen_ai.usage.output_tokens = tracing::field::Empty,
            gen_ai.usage.total_tokens = tracing::field::Empty,
            "error.type" = tracing::field::Empty,
        );

        let observation = Self {
            span,
            context,
            convention,
        };
        observation
            .span
            .record_contextual_name(&observation.convention.contextual_name(&observation.context));
        observation.record_key_values();
        observation
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn context(&self) -> &ChatModelObservationContext {
        &self.context
    }

    /// Attaches the response to the context and records the attributes derived from it.
    pub fn record_response(&mut self, response: ChatResponse) {
        self.context.set_response(response);
        self.record_key_values();
    }

    pub fn record_error(&self, error: &CompletionError) {
        self.span.record_error_type(&error.error_type());
    }

    fn record_key_values(&self) {
        self.span
            .record_key_values(&self.convention.low_cardinality_key_values(&self.context));
        self.span
            .record_key_values(&self.convention.high_cardinality_key_values(&self.context));
    }
}

impl fmt::Debug for ObservationSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservationSpan")
            .field("span", &self.span)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
