//! This module provides traits for defining and creating provider clients.
//! Clients are used to create models for chat calls.

use thiserror::Error;

use crate::completion::ChatModel;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClientBuilderError {
    #[error("missing environment variable: {0}")]
    MissingEnv(&'static str),
    #[error("invalid property: {0}")]
    InvalidProperty(&'static str),
    #[error("invalid retry configuration: {0}")]
    Retry(#[from] crate::http_client::retry::RetryConfigError),
}

/// Abstracts over the ability to instantiate a client, either via environment variables or some
/// `Self::Input`
pub trait ProviderClient: Sized {
    type Input;

    /// Create a client from the process's environment.
    fn from_env() -> Result<Self, ClientBuilderError>;

    fn from_val(input: Self::Input) -> Result<Self, ClientBuilderError>;
}

/// A provider client with chat capabilities.
pub trait CompletionClient {
    /// The type of ChatModel used by the client.
    type CompletionModel: ChatModel;

    /// Create a chat model with the given name.
    ///
    /// # Example
    /// ```ignore
    /// use parley::{client::{CompletionClient, ProviderClient}, providers::anthropic};
    ///
    /// // Initialize the Anthropic client
    /// let anthropic = anthropic::Client::from_env()?;
    ///
    /// let haiku = anthropic.completion_model(anthropic::CLAUDE_3_HAIKU);
    /// ```
    fn completion_model(&self, model: &str) -> Self::CompletionModel;
}

/// Reads a required environment variable.
pub(crate) fn required_env(name: &'static str) -> Result<String, ClientBuilderError> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or(ClientBuilderError::MissingEnv(name))
}
