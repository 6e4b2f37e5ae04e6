//! Parley is a chat model client that treats observability as part of the call contract.
//!
//! # Table of contents
//!
//! - [High-level features](#high-level-features)
//! - [Simple Example](#simple-example)
//! - [Core Concepts](#core-concepts)
//!
//! # High-level features
//! - Single-shot and streaming chat calls against the Anthropic Messages API
//! - A `tracing` span around every call, carrying the GenAI attribute set split into
//!   low-cardinality (safe for metrics) and high-cardinality (tracing only) key values
//! - Configurable retries for transient HTTP failures
//!
//! # Simple example:
//! ```ignore
//! use parley::{
//!     client::{CompletionClient, ProviderClient},
//!     completion::{ChatModel, ChatOptions, Prompt},
//!     providers::anthropic,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // This requires the `ANTHROPIC_API_KEY` environment variable to be set.
//!     let client = anthropic::Client::from_env()?;
//!     let sonnet = client.completion_model(anthropic::CLAUDE_3_5_SONNET);
//!
//!     let options = ChatOptions::builder().max_tokens(256).temperature(0.7).build();
//!     let response = sonnet
//!         .call(Prompt::new("Why does a raven look like a desk?").with_options(options))
//!         .await?;
//!
//!     println!("{}", response.text().unwrap_or_default());
//!     Ok(())
//! }
//! ```
//!
//! # Core concepts
//! ## Chat models
//! Each provider exposes a `Client` that creates chat models. Models implement
//! [ChatModel](crate::completion::ChatModel), which offers a blocking-style
//! [call](crate::completion::ChatModel::call) and a lazy
//! [stream](crate::completion::ChatModel::stream).
//!
//! ## Observations
//! Every invocation opens a span named [OBSERVATION_NAME](crate::telemetry::OBSERVATION_NAME).
//! Its attributes are produced by a
//! [ChatModelObservationConvention](crate::telemetry::ChatModelObservationConvention) and are
//! recorded before the request is sent and again once the response (or the whole stream) is
//! available. Install any `tracing` subscriber to consume them; `tracing-opentelemetry` picks up
//! the contextual span name from the `otel.name` field.

pub mod client;
pub mod completion;
pub mod http_client;
pub mod json_utils;
pub mod providers;
pub mod streaming;
pub mod telemetry;

pub use completion::message::{Message, Role};
