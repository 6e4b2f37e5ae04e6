//! This module provides the streaming side of chat calls.
//!
//! [StreamingChatResponse] is what [ChatModel::stream](crate::completion::ChatModel::stream)
//! returns. It yields partial [ChatResponse]s as the provider produces them, keeps a running
//! aggregate of the call (text, id, model, usage and finish reasons) and closes the call's
//! observation as soon as the stream terminates.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use futures::stream::FusedStream;
use tracing_futures::Instrument;

use crate::completion::{ChatResponse, CompletionError, Generation, ResponseMetadata, Usage};
use crate::telemetry::ObservationSpan;

pub type StreamingResult =
    Pin<Box<dyn Stream<Item = Result<ChatResponse, CompletionError>> + Send>>;

/// Running aggregate of the elements seen so far.
#[derive(Debug, Clone, Default)]
struct StreamAggregate {
    text: String,
    has_text: bool,
    id: Option<String>,
    model: Option<String>,
    finish_reasons: Vec<String>,
    /// Finish reasons of the most recent element only.
    last_finish_reasons: Vec<String>,
    usage: Option<Usage>,
    elements: usize,
}

impl StreamAggregate {
    fn push(&mut self, response: &ChatResponse) {
        self.elements += 1;

        if let Some(generation) = &response.result {
            self.has_text = true;
            self.text.push_str(&generation.text);
        }

        let metadata = &response.metadata;
        if metadata.id.is_some() {
            self.id.clone_from(&metadata.id);
        }
        if metadata.model.is_some() {
            self.model.clone_from(&metadata.model);
        }
        self.last_finish_reasons.clone_from(&metadata.finish_reasons);
        for reason in &metadata.finish_reasons {
            if !self.finish_reasons.contains(reason) {
                self.finish_reasons.push(reason.clone());
            }
        }
        if let Some(usage) = metadata.usage {
            self.usage = Some(match self.usage {
                Some(previous) => previous.merge(usage),
                None => usage,
            });
        }
    }

    fn response(&self) -> ChatResponse {
        ChatResponse::new(
            self.has_text.then(|| Generation::new(self.text.clone())),
            ResponseMetadata {
                id: self.id.clone(),
                model: self.model.clone(),
                finish_reasons: self.finish_reasons.clone(),
                usage: self.usage,
            },
        )
    }

    /// What the observation records: the aggregate, with the finish reasons of the element the
    /// stream stopped on.
    fn observed_response(&self) -> ChatResponse {
        let mut response = self.response();
        response
            .metadata
            .finish_reasons
            .clone_from(&self.last_finish_reasons);
        response
    }
}

/// A stream of partial chat responses.
///
/// When the inner stream ends, fails, or this value is dropped early, the aggregate is recorded
/// on the observation and the observation is closed. The stream is fused afterwards.
///
/// The recorded finish reasons are those of the last element received. For Anthropic that is the
/// terminal `message_stop` element, which carries none.
pub struct StreamingChatResponse {
    inner: Option<StreamingResult>,
    observation: Option<ObservationSpan>,
    aggregate: StreamAggregate,
}

impl StreamingChatResponse {
    /// Wraps a stream that is not observed.
    pub fn new(inner: StreamingResult) -> Self {
        Self {
            inner: Some(inner),
            observation: None,
            aggregate: StreamAggregate::default(),
        }
    }

    /// Wraps `inner` so that it is polled inside the observation's span.
    pub fn observed(inner: StreamingResult, observation: ObservationSpan) -> Self {
        let span = observation.span().clone();
        Self {
            inner: Some(Box::pin(inner.instrument(span))),
            observation: Some(observation),
            aggregate: StreamAggregate::default(),
        }
    }

    /// The aggregate of every element received so far: concatenated text, last id and model,
    /// merged usage and the finish reasons seen.
    pub fn aggregated(&self) -> ChatResponse {
        self.aggregate.response()
    }

    /// Number of elements yielded so far.
    pub fn elements(&self) -> usize {
        self.aggregate.elements
    }

    fn finish(&mut self, error: Option<&CompletionError>) {
        // Dropping the instrumented stream releases its handle on the span.
        self.inner = None;

        if let Some(mut observation) = self.observation.take() {
            if let Some(error) = error {
                observation.record_error(error);
            }
            observation.record_response(self.aggregate.observed_response());
        }
    }
}

impl Stream for StreamingChatResponse {
    type Item = Result<ChatResponse, CompletionError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let stream = self.get_mut();

        let Some(inner) = stream.inner.as_mut() else {
            return Poll::Ready(None);
        };

        match inner.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => {
                stream.finish(None);
                Poll::Ready(None)
            }
            Poll::Ready(Some(Ok(response))) => {
                stream.aggregate.push(&response);
                Poll::Ready(Some(Ok(response)))
            }
            Poll::Ready(Some(Err(err))) => {
                stream.finish(Some(&err));
                Poll::Ready(Some(Err(err)))
            }
        }
    }
}

impl FusedStream for StreamingChatResponse {
    fn is_terminated(&self) -> bool {
        self.inner.is_none()
    }
}

impl Drop for StreamingChatResponse {
    fn drop(&mut self) {
        self.finish(None);
    }
}

impl fmt::Debug for StreamingChatResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingChatResponse")
            .field("terminated", &self.inner.is_none())
            .field("observation", &self.observation)
            .field("aggregate", &self.aggregate)
            .finish()
    }
}
