//! Completion/embedding collaborator.
//!
//! This module provides:
//! - `CompletionProvider`: abstract interface over chat-completion services
//! - `OpenAiCompatProvider`: client for OpenAI-compatible HTTP endpoints

mod openai_compat;
mod provider;
mod types;

pub use openai_compat::OpenAiCompatProvider;
pub use provider::CompletionProvider;
pub use types::{ChatMessage, ChatRequest};
