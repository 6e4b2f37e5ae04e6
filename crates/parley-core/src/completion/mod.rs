//! This module provides the chat model abstraction.
//!
//! A [ChatModel] turns a [Prompt] into a [ChatResponse], either in one shot with
//! [ChatModel::call] or incrementally with [ChatModel::stream]. Both are observed: see
//! [crate::telemetry].

pub mod message;
pub mod request;
pub mod response;

use std::future::Future;

use http::StatusCode;
use thiserror::Error;

use crate::http_client;
use crate::streaming::StreamingChatResponse;

pub use message::{Message, Role};
pub use request::{ChatOptions, ChatOptionsBuilder, Prompt};
pub use response::{ChatResponse, Generation, ResponseMetadata, Usage};

// Errors
#[derive(Debug, Error)]
pub enum CompletionError {
    /// Http error (e.g.: connection error, timeout, etc.)
    #[error("HttpError: {0}")]
    HttpError(http_client::Error),

    /// Json error (e.g.: serialization, deserialization)
    #[error("JsonError: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Error building the completion request
    #[error("RequestError: {0}")]
    RequestError(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),

    /// Error parsing the completion response
    #[error("ResponseError: {0}")]
    ResponseError(String),

    /// Error returned by the completion model provider, carrying the upstream status
    #[error("ProviderError: {status}: {message}")]
    ProviderError { status: StatusCode, message: String },
}

impl CompletionError {
    /// A low-cardinality description of the failure, recorded as `error.type` on observations.
    pub fn error_type(&self) -> String {
        match self {
            CompletionError::ProviderError { status, .. } => status.as_u16().to_string(),
            CompletionError::HttpError(_) => "http_error".to_string(),
            CompletionError::JsonError(_) => "json_error".to_string(),
            CompletionError::RequestError(_) => "request_error".to_string(),
            CompletionError::ResponseError(_) => "response_error".to_string(),
        }
    }
}

impl From<http_client::Error> for CompletionError {
    fn from(error: http_client::Error) -> Self {
        match error {
            http_client::Error::InvalidStatusCodeWithMessage(status, message) => {
                CompletionError::ProviderError { status, message }
            }
            http_client::Error::InvalidStatusCode(status) => CompletionError::ProviderError {
                status,
                message: status.canonical_reason().unwrap_or_default().to_string(),
            },
            other => CompletionError::HttpError(other),
        }
    }
}

/// Trait defining an observed chat model.
pub trait ChatModel: Clone + Send + Sync {
    /// Performs a single chat call and waits for the whole response.
    fn call(
        &self,
        prompt: Prompt,
    ) -> impl Future<Output = Result<ChatResponse, CompletionError>> + Send;

    /// Opens a streaming chat call. The returned stream yields partial responses until the
    /// provider signals the end of the message.
    fn stream(
        &self,
        prompt: Prompt,
    ) -> impl Future<Output = Result<StreamingChatResponse, CompletionError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_become_provider_errors() {
        let error: CompletionError = http_client::Error::InvalidStatusCodeWithMessage(
            StatusCode::TOO_MANY_REQUESTS,
            "rate limited".to_string(),
        )
        .into();

        match &error {
            CompletionError::ProviderError { status, message } => {
                assert_eq!(*status, StatusCode::TOO_MANY_REQUESTS);
                assert_eq!(message, "rate limited");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(error.error_type(), "429");
    }

    #[test]
    fn transport_errors_stay_http_errors() {
        let error: CompletionError = http_client::Error::StreamEnded.into();
        assert!(matches!(error, CompletionError::HttpError(_)));
        assert_eq!(error.error_type(), "http_error");
    }
}
