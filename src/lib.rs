//! Parley: an observable chat model client.
//!
//! This crate re-exports [`parley_core`]. See its documentation for an overview of chat models,
//! streaming and observations.
//!
//! ```no_run
//! use parley::{
//!     client::{CompletionClient, ProviderClient},
//!     completion::{ChatModel, Prompt},
//!     providers::anthropic,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = anthropic::Client::from_env()?;
//! let haiku = client.completion_model(anthropic::CLAUDE_3_HAIKU);
//! let response = haiku.call(Prompt::new("Tell me a joke")).await?;
//! println!("{}", response.text().unwrap_or_default());
//! # Ok(())
//! # }
//! ```

pub use parley_core::*;
