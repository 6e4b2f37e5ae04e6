use async_stream::stream;
use futures::StreamExt;
use serde::Deserialize;

use super::completion::{ApiError, Usage, provider_error};
use crate::completion::{self, ChatResponse, CompletionError, Generation, ResponseMetadata};
use crate::http_client::{
    HttpClientExt,
    retry::RetryConfig,
    sse::{Event, GenericEventSource},
};
use crate::streaming::StreamingResult;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamingEvent {
    MessageStart {
        message: MessageStart,
    },
    ContentBlockStart {
        index: usize,
        content_block: serde_json::Value,
    },
    ContentBlockDelta {
        index: usize,
        delta: ContentDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: MessageDelta,
        usage: Usage,
    },
    MessageStop,
    Ping,
    Error {
        error: ApiError,
    },
}

#[derive(Debug, Deserialize)]
pub struct MessageStart {
    pub id: String,
    pub model: String,
    pub stop_reason: Option<String>,
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    TextDelta {
        text: String,
    },
    /// Tool input, thinking and signature deltas are not supported.
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
pub struct MessageDelta {
    pub stop_reason: Option<String>,
    pub stop_sequence: Option<String>,
}

/// Metadata accumulated over the events of one message.
#[derive(Debug, Default)]
struct MessageState {
    id: Option<String>,
    model: Option<String>,
    usage: Option<completion::Usage>,
}

impl MessageState {
    fn metadata(
        &self,
        finish_reasons: Vec<String>,
        usage: Option<completion::Usage>,
    ) -> ResponseMetadata {
        ResponseMetadata {
            id: self.id.clone(),
            model: self.model.clone(),
            finish_reasons,
            usage,
        }
    }

    fn merge_usage(&mut self, usage: completion::Usage) {
        self.usage = Some(match self.usage {
            Some(previous) => previous.merge(usage),
            None => usage,
        });
    }
}

/// Maps one event to the element it produces, if any.
fn handle_event(
    state: &mut MessageState,
    event: StreamingEvent,
) -> Option<Result<ChatResponse, CompletionError>> {
    match event {
        StreamingEvent::MessageStart { message } => {
            state.id = Some(message.id);
            state.model = Some(message.model);
            state.merge_usage(message.usage.into());
            Some(Ok(ChatResponse::new(
                None,
                state.metadata(Vec::new(), state.usage),
            )))
        }
        StreamingEvent::ContentBlockDelta {
            delta: ContentDelta::TextDelta { text },
            ..
        } => Some(Ok(ChatResponse::new(
            Some(Generation::new(text)),
            state.metadata(Vec::new(), None),
        ))),
        StreamingEvent::MessageDelta { delta, usage } => {
            state.merge_usage(usage.into());
            Some(Ok(ChatResponse::new(
                None,
                state.metadata(delta.stop_reason.into_iter().collect(), state.usage),
            )))
        }
        StreamingEvent::MessageStop => Some(Ok(ChatResponse::new(
            None,
            state.metadata(Vec::new(), state.usage),
        ))),
        StreamingEvent::Error { error } => Some(Err(CompletionError::ResponseError(format!(
            "{}: {}",
            error.kind, error.message
        )))),
        event @ (StreamingEvent::ContentBlockDelta { .. }
        | StreamingEvent::ContentBlockStart { .. }
        | StreamingEvent::ContentBlockStop { .. }
        | StreamingEvent::Ping) => {
            tracing::debug!(target: "parley::completions", ?event, "Ignoring stream event");
            None
        }
    }
}

/// Opens the event stream and maps Anthropic events to [`ChatResponse`] elements.
///
/// Connection failures (after retries) are returned directly. Once connected, the stream ends
/// after `message_stop`, after an `error` event or on a transport error.
pub(crate) async fn connect<T>(
    event_source: GenericEventSource<T, Vec<u8>, RetryConfig>,
) -> Result<StreamingResult, CompletionError>
where
    T: HttpClientExt + Clone + 'static,
{
    let mut event_source = Box::pin(event_source);

    match event_source.next().await {
        Some(Ok(Event::Open)) => {}
        Some(Ok(Event::Message(message))) => {
            return Err(CompletionError::ResponseError(format!(
                "Unexpected event before the stream opened: {}",
                message.event
            )));
        }
        Some(Err(error)) => return Err(provider_error(error)),
        None => {
            return Err(CompletionError::ResponseError(
                "Stream closed before it was opened".to_string(),
            ));
        }
    }

    Ok(Box::pin(stream! {
        let mut state = MessageState::default();

        while let Some(event) = event_source.next().await {
            let message = match event {
                Ok(Event::Open) => continue,
                Ok(Event::Message(message)) => message,
                Err(error) => {
                    yield Err(CompletionError::from(error));
                    break;
                }
            };

            if message.data.trim().is_empty() {
                continue;
            }

            let event = match serde_json::from_str::<StreamingEvent>(&message.data) {
                Ok(event) => event,
                Err(error) => {
                    tracing::error!(
                        target: "parley::completions",
                        ?error,
                        data = %message.data,
                        "Failed to parse SSE message"
                    );
                    continue;
                }
            };

            let terminal = matches!(event, StreamingEvent::MessageStop | StreamingEvent::Error { .. });

            if let Some(element) = handle_event(&mut state, event) {
                yield element;
            }

            if terminal {
                break;
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(data: &str) -> StreamingEvent {
        serde_json::from_str(data).expect("event should deserialize")
    }

    fn events() -> Vec<&'static str> {
        vec![
            r#"{"type":"message_start","message":{"id":"msg_01","type":"message","role":"assistant","content":[],"model":"claude-3-5-sonnet-20240620","stop_reason":null,"stop_sequence":null,"usage":{"input_tokens":25,"output_tokens":1}}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"{"type":"ping"}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"!"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn","stop_sequence":null},"usage":{"output_tokens":15}}"#,
            r#"{"type":"message_stop"}"#,
        ]
    }

    #[test]
    fn maps_message_events_to_elements() {
        let mut state = MessageState::default();
        let elements: Vec<ChatResponse> = events()
            .into_iter()
            .filter_map(|data| handle_event(&mut state, parse(data)))
            .collect::<Result<_, _>>()
            .expect("no error events");

        assert_eq!(elements.len(), 5);

        let start = &elements[0];
        assert_eq!(start.result, None);
        assert_eq!(start.metadata.id.as_deref(), Some("msg_01"));
        assert_eq!(start.metadata.usage, Some(completion::Usage::new(25, 1)));

        let text: String = elements.iter().filter_map(ChatResponse::text).collect();
        assert_eq!(text, "Hello!");

        let delta = &elements[3];
        assert_eq!(delta.result, None);
        assert_eq!(delta.metadata.finish_reasons, vec!["end_turn"]);
        assert_eq!(delta.metadata.usage, Some(completion::Usage::new(25, 15)));

        let stop = &elements[4];
        assert_eq!(stop.result, None);
        assert!(stop.metadata.finish_reasons.is_empty());
        assert_eq!(stop.metadata.id.as_deref(), Some("msg_01"));
        assert_eq!(stop.metadata.usage, Some(completion::Usage::new(25, 15)));
    }

    #[test]
    fn error_event_becomes_response_error() {
        let mut state = MessageState::default();
        let event = parse(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        );

        match handle_event(&mut state, event) {
            Some(Err(CompletionError::ResponseError(message))) => {
                assert_eq!(message, "overloaded_error: Overloaded");
            }
            other => panic!("unexpected element: {other:?}"),
        }
    }

    #[test]
    fn unsupported_deltas_are_ignored() {
        let mut state = MessageState::default();
        let event = parse(
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"a\":"}}"#,
        );
        assert!(handle_event(&mut state, event).is_none());
    }
}
