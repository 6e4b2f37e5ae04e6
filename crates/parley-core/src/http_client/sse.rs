//! An SSE implementation that leverages [`crate::http_client::HttpClientExt`] to allow streaming
//! with retry handling for any implementor of HttpClientExt.
//!
//! Retries only happen while connecting. Once events are flowing, a transport error ends the
//! stream: chat completions cannot be resumed mid-generation.
use crate::http_client::{
    BoxedStream, HttpClientExt, Result as StreamResult,
    retry::{DEFAULT_RETRY, RetryConfig, RetryPolicy},
};
use bytes::Bytes;
use eventsource_stream::{Event as MessageEvent, EventStreamError, Eventsource};
use futures::Stream;
use futures::{future::BoxFuture, stream::BoxStream};
use futures_timer::Delay;
use http::{HeaderValue, Request, Response, StatusCode};
use pin_project_lite::pin_project;
use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

type ResponseFuture = BoxFuture<'static, StreamResult<Response<BoxedStream>>>;

type EventStream = BoxStream<'static, Result<MessageEvent, EventStreamError<super::Error>>>;

pin_project! {
    /// Internal state variants for the SSE state machine.
    #[project = SourceStateProjection]
    enum SourceState {
        /// Connection attempt, with the retry history if this is a reconnection
        Connecting {
            #[pin]
            response_future: ResponseFuture,
            last_retry: Option<(usize, Duration)>,
        },
        /// Actively receiving SSE events
        Open {
            #[pin]
            event_stream: EventStream,
        },
        /// Waiting before retry after a transient connection error
        WaitingToRetry {
            #[pin]
            retry_delay: Delay,
            current_retry: (usize, Duration),
        },
        /// Terminal state
        Closed,
    }
}

pin_project! {
    /// A generic SSE event source that works with any [`HttpClientExt`] implementation.
    #[project = GenericEventSourceProjection]
    pub struct GenericEventSource<HttpClient, RequestBody, Retry = RetryConfig> {
        client: HttpClient,
        req: Request<RequestBody>,
        retry_policy: Retry,
        #[pin]
        state: SourceState,
    }
}

impl<HttpClient, RequestBody> GenericEventSource<HttpClient, RequestBody>
where
    HttpClient: HttpClientExt + Clone + 'static,
    RequestBody: Into<Bytes> + Clone + Send + 'static,
{
    /// Create a new event source that will connect to the given request.
    pub fn new(client: HttpClient, req: Request<RequestBody>) -> Self {
        Self::with_retry_policy(client, req, DEFAULT_RETRY)
    }
}

impl<HttpClient, RequestBody, Retry> GenericEventSource<HttpClient, RequestBody, Retry>
where
    HttpClient: HttpClientExt + Clone + 'static,
    RequestBody: Into<Bytes> + Clone + Send + 'static,
    Retry: RetryPolicy,
{
    pub fn with_retry_policy(
        client: HttpClient,
        req: Request<RequestBody>,
        retry_policy: Retry,
    ) -> Self {
        let response_future = create_response_future(&client, &req);
        let state = SourceState::Connecting {
            response_future,
            last_retry: None,
        };

        Self {
            client,
            req,
            retry_policy,
            state,
        }
    }
}

fn create_response_future<HttpClient, RequestBody>(
    client: &HttpClient,
    req: &Request<RequestBody>,
) -> ResponseFuture
where
    HttpClient: HttpClientExt + Clone + 'static,
    RequestBody: Into<Bytes> + Clone + Send + 'static,
{
    let mut req_clone = req.clone();
    req_clone
        .headers_mut()
        .entry("Accept")
        .or_insert(HeaderValue::from_static("text/event-stream"));

    let client_clone = client.clone();
    Box::pin(async move { client_clone.send_streaming(req_clone).await })
}

/// Events created by the [`GenericEventSource`]
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Event {
    /// The event fired when the connection is opened
    Open,
    /// The event fired when a [`MessageEvent`] is received
    Message(MessageEvent),
}

impl From<MessageEvent> for Event {
    fn from(event: MessageEvent) -> Self {
        Event::Message(event)
    }
}

impl<HttpClient, RequestBody, Retry> Stream for GenericEventSource<HttpClient, RequestBody, Retry>
where
    HttpClient: HttpClientExt + Clone + 'static,
    RequestBody: Into<Bytes> + Clone + Send + 'static,
    Retry: RetryPolicy,
{
    type Item = Result<Event, super::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            match this.state.as_mut().project() {
                SourceStateProjection::Connecting {
                    response_future,
                    last_retry,
                } => {
                    let last_retry = *last_retry;
                    match response_future.poll(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Ok(response)) => match check_response(response) {
                            Ok(response) => {
                                // Transition: Connecting -> Open
                                let event_stream = response.into_body().eventsource();
                                this.state.set(SourceState::Open {
                                    event_stream: Box::pin(event_stream),
                                });
                                return Poll::Ready(Some(Ok(Event::Open)));
                            }
                            Err(err) => {
                                // Transition: Connecting -> Closed (unexpected response)
                                this.state.set(SourceState::Closed);
                                return Poll::Ready(Some(Err(err)));
                            }
                        },
                        Poll::Ready(Err(err)) => {
                            if let Some(delay_duration) = this.retry_policy.retry(&err, last_retry)
                            {
                                let retry_num = last_retry.map(|(count, _)| count).unwrap_or(0) + 1;
                                tracing::warn!(
                                    target: "parley::completions",
                                    attempt = retry_num,
                                    delay_ms = delay_duration.as_millis() as u64,
                                    error = %err,
                                    "Retrying event stream connection after transient failure"
                                );
                                // Transition: Connecting -> WaitingToRetry
                                this.state.set(SourceState::WaitingToRetry {
                                    retry_delay: Delay::new(delay_duration),
                                    current_retry: (retry_num, delay_duration),
                                });
                                continue;
                            }

                            // Transition: Connecting -> Closed (retries exhausted or not retryable)
                            this.state.set(SourceState::Closed);
                            return Poll::Ready(Some(Err(err)));
                        }
                    }
                }

                SourceStateProjection::Open { event_stream } => {
                    match event_stream.poll_next(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Some(Ok(event))) => {
                            if let Some(duration) = event.retry {
                                this.retry_policy.set_reconnection_time(duration);
                            }
                            return Poll::Ready(Some(Ok(Event::Message(event))));
                        }
                        Poll::Ready(Some(Err(EventStreamError::Transport(err)))) => {
                            // Transition: Open -> Closed
                            this.state.set(SourceState::Closed);
                            return Poll::Ready(Some(Err(err)));
                        }
                        Poll::Ready(Some(Err(EventStreamError::Parser(error)))) => {
                            tracing::debug!(target: "parley::completions", %error, "Skipping unparsable SSE line");
                            continue;
                        }
                        Poll::Ready(Some(Err(EventStreamError::Utf8(error)))) => {
                            tracing::debug!(target: "parley::completions", %error, "Skipping non UTF-8 SSE line");
                            continue;
                        }
                        Poll::Ready(None) => {
                            // Transition: Open -> Closed
                            this.state.set(SourceState::Closed);
                            return Poll::Ready(None);
                        }
                    }
                }

                SourceStateProjection::WaitingToRetry {
                    retry_delay,
                    current_retry,
                } => {
                    let retry_info = *current_retry;
                    match retry_delay.poll(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(()) => {
                            // Transition: WaitingToRetry -> Connecting
                            let response_future = create_response_future(this.client, this.req);
                            this.state.set(SourceState::Connecting {
                                response_future,
                                last_retry: Some(retry_info),
                            });
                            continue;
                        }
                    }
                }

                SourceStateProjection::Closed => {
                    return Poll::Ready(None);
                }
            }
        }
    }
}

fn check_response<T>(response: Response<T>) -> Result<Response<T>, super::Error> {
    let StatusCode::OK = response.status() else {
        return Err(super::Error::InvalidStatusCode(response.status()));
    };

    let Some(content_type) = response.headers().get(http::header::CONTENT_TYPE) else {
        return Err(super::Error::InvalidContentType(HeaderValue::from_static(
            "",
        )));
    };

    if content_type
        .to_str()
        .map_err(|_| ())
        .and_then(|s| s.parse::<mime::Mime>().map_err(|_| ()))
        .map(|mime_type| {
            matches!(
                (mime_type.type_(), mime_type.subtype()),
                (mime::TEXT, mime::EVENT_STREAM)
            )
        })
        .unwrap_or(false)
    {
        Ok(response)
    } else {
        Err(super::Error::InvalidContentType(content_type.clone()))
    }
}
