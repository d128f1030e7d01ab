//! Assistant orchestration core.
//!
//! Drives a single traveller query through retrieval, prompt assembly, and
//! generation:
//! - `retrieval`: gathers knowledge-base matches, conversation history, and
//!   location context, each degrading independently on failure
//! - `prompt`: folds the gathered context into completion messages
//! - `scoring`: heuristic confidence + context summary from retrieval alone
//! - `AssistantService`: the externally-callable facade with its grounded /
//!   fallback two-state outcome

mod prompt;
mod retrieval;
mod scoring;
mod service;
mod types;

pub use retrieval::ContextRetriever;
pub use service::AssistantService;
pub use types::{AnswerPath, AssistantRequest, AssistantResponse, RetrievedContext};
