//! This module contains clients for the supported LLM providers.
//!
//! Currently, the following providers are supported:
//! - Anthropic
//!
//! Each provider has its own module, which contains a `Client` implementation that can
//! be used to initialize chat models.
pub mod anthropic;
