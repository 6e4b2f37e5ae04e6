//! This module concerns observing chat calls.
//!
//! Each call is wrapped in a `tracing` span named [OBSERVATION_NAME] whose fields follow the
//! OpenTelemetry GenAI semantic conventions. Any subscriber can consume them: for instance
//! `tracing-opentelemetry` exports the span under its contextual name (the `otel.name` field).
//!
//! What gets recorded is decided by a [ChatModelObservationConvention]. The
//! [DefaultChatModelObservationConvention] records the full attribute set and uses the `none`
//! sentinel for absent values, so the set of keys never changes between calls.

#[cfg(any(test, feature = "test-utils"))]
pub mod collector;
mod convention;
mod conventions;
mod span;

pub use convention::{
    ChatModelObservationContext, ChatModelObservationConvention,
    DefaultChatModelObservationConvention,
};
pub use conventions::{
    AiOperationType, AiProvider, HighCardinalityKeyNames, KeyValue, KeyValues,
    LowCardinalityKeyNames, NONE_VALUE, is_declared_key,
};
pub use span::ObservationSpan;

/// Name of the span wrapping every chat call.
pub const OBSERVATION_NAME: &str = "gen_ai.client.operation";

/// Field holding the contextual name of an observation.
pub const CONTEXTUAL_NAME_FIELD: &str = "otel.name";

/// Field holding the error type of a failed observation.
pub const ERROR_TYPE_FIELD: &str = "error.type";

/// A trait designed specifically to be used with Spans for the purpose of recording telemetry.
/// Recording on a disabled span is a no-op.
pub trait SpanCombinator {
    /// Records each key value as a span field. A `tracing` span only accepts the fields it was
    /// created with, so keys outside [LowCardinalityKeyNames] and [HighCardinalityKeyNames] are
    /// skipped with a warning.
    fn record_key_values(&self, key_values: &KeyValues);

    fn record_contextual_name(&self, name: &str);

    fn record_error_type(&self, error_type: &str);
}

impl SpanCombinator for tracing::Span {
    fn record_key_values(&self, key_values: &KeyValues) {
        if self.is_disabled() {
            return;
        }

        for key_value in key_values {
            if !is_declared_key(key_value.key()) {
                tracing::warn!(
                    target: "parley::completions",
                    key = key_value.key(),
                    "Skipping observation key that is not a declared span field"
                );
                continue;
            }
            self.record(key_value.key(), key_value.value());
        }
    }

    fn record_contextual_name(&self, name: &str) {
        if self.is_disabled() {
            return;
        }

        self.record(CONTEXTUAL_NAME_FIELD, name);
    }

    fn record_error_type(&self, error_type: &str) {
        if self.is_disabled() {
            return;
        }

        self.record(ERROR_TYPE_FIELD, error_type);
    }
}

/// Renders a float the way metrics backends expect it: always with a fractional part.
pub(crate) fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

/// Renders a list of strings as a JSON array.
pub(crate) fn format_list(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| NONE_VALUE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing::field::{Field, Visit};
    use tracing_subscriber::{Layer, layer::Context, layer::SubscriberExt};

    /// Collects the `key` field of warnings.
    #[derive(Clone, Default)]
    struct WarnedKeys(Arc<Mutex<Vec<String>>>);

    impl<S: tracing::Subscriber> Layer<S> for WarnedKeys {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            struct KeyVisitor(Option<String>);

            impl Visit for KeyVisitor {
                fn record_str(&mut self, field: &Field, value: &str) {
                    if field.name() == "key" {
                        self.0 = Some(value.to_string());
                    }
                }

                fn record_debug(&mut self, _field: &Field, _value: &dyn std::fmt::Debug) {}
            }

            if *event.metadata().level() != tracing::Level::WARN {
                return;
            }
            let mut visitor = KeyVisitor(None);
            event.record(&mut visitor);
            if let Some(key) = visitor.0 {
                self.0.lock().unwrap().push(key);
            }
        }
    }

    #[test]
    fn undeclared_keys_are_skipped_with_a_warning() {
        let collector = collector::ObservationCollector::new();
        let warned = WarnedKeys::default();
        let _guard = tracing::subscriber::set_default(
            tracing_subscriber::registry()
                .with(collector.layer())
                .with(warned.clone()),
        );

        let span = tracing::info_span!(
            OBSERVATION_NAME,
            gen_ai.system = tracing::field::Empty,
            "app.tenant" = tracing::field::Empty,
        );
        span.record_key_values(
            &KeyValues::new()
                .with(KeyValue::new("gen_ai.system", "anthropic"))
                .with(KeyValue::new("app.tenant", "acme")),
        );

        let observation = collector.last_observation().unwrap();
        assert_eq!(observation.low("gen_ai.system"), Some("anthropic"));
        assert_eq!(observation.low_cardinality_key_values.len(), 1);
        assert!(observation.high_cardinality_key_values.is_empty());
        assert_eq!(*warned.0.lock().unwrap(), vec!["app.tenant".to_string()]);
    }

    #[test]
    fn declared_keys_cover_both_cardinalities() {
        assert!(is_declared_key("gen_ai.request.model"));
        assert!(is_declared_key("gen_ai.usage.total_tokens"));
        assert!(!is_declared_key("app.tenant"));
        assert!(!is_declared_key(CONTEXTUAL_NAME_FIELD));
    }

    #[test]
    fn floats_always_carry_a_fraction() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(0.7), "0.7");
        assert_eq!(format_float(2.0), "2.0");
        assert_eq!(format_float(-0.25), "-0.25");
    }

    #[test]
    fn lists_render_as_json() {
        assert_eq!(
            format_list(&["this-is-the-end".to_string()]),
            r#"["this-is-the-end"]"#
        );
        assert_eq!(
            format_list(&["end_turn".to_string(), "stop_sequence".to_string()]),
            r#"["end_turn","stop_sequence"]"#
        );
    }
}
