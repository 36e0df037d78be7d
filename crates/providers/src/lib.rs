//! Provider adapters for the two external chat-completion APIs.
//!
//! Both DeepSeek and OpenAI speak the OpenAI-compatible chat-completions
//! JSON shape; the per-model flags in the catalogue drive the request
//! body. Transient failures retry with exponential backoff.

mod client;
mod types;

pub use client::{ProviderClient, ProviderRegistry};
pub use types::{Completion, ProviderMessage, Usage};
