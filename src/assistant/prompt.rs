//! Prompt assembly.
//!
//! Builds the message list sent to the completion provider: a fixed system
//! preamble, a short tail of conversation history, and a single user turn
//! carrying the query, the numbered sources, and the grounding instructions.

use crate::history::ConversationTurn;
use crate::knowledge::ContentRecord;
use crate::llm::ChatMessage;

use super::types::RetrievedContext;

/// How many history turns are folded into the prompt. Retrieval fetches
/// more; only this tail reaches the model.
const PROMPT_HISTORY_TURNS: usize = 4;

const SYSTEM_PREAMBLE: &str = "You are CulturalCompass, a travel assistant. \
You help travellers understand destinations, local customs, events, and \
cultural etiquette. Answer from the context provided with each question, \
cite the sources you use, and stay respectful and culturally sensitive.";

const INSTRUCTIONS: &str = "Answer the question using the context above. \
Ground every claim in the numbered sources and cite them as [Source N]. \
If the context does not cover the question, say so instead of inventing \
details. Be respectful and culturally sensitive when describing local \
customs and etiquette.";

/// Build the full message list for one request.
///
/// History turns are spliced immediately before the final user turn. The
/// completion provider only ever sees system/user roles: stored assistant
/// turns are re-framed as `"Previous response: ..."` user messages rather
/// than replayed with the assistant role.
pub fn build_messages(
    query: &str,
    context: &RetrievedContext,
    include_history: bool,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage {
        role: "system".to_string(),
        content: SYSTEM_PREAMBLE.to_string(),
    }];

    if include_history && !context.conversation_history.is_empty() {
        let tail_start = context
            .conversation_history
            .len()
            .saturating_sub(PROMPT_HISTORY_TURNS);
        for turn in &context.conversation_history[tail_start..] {
            messages.push(ChatMessage {
                role: "user".to_string(),
                content: reframe_turn(turn),
            });
        }
    }

    messages.push(ChatMessage {
        role: "user".to_string(),
        content: build_enriched_prompt(query, &context.retrieved_content, &context.location_context),
    });

    messages
}

fn reframe_turn(turn: &ConversationTurn) -> String {
    match turn.role.as_str() {
        "assistant" => format!("Previous response: {}", turn.content),
        _ => turn.content.clone(),
    }
}

/// The single user turn: raw query, numbered sources, optional location
/// block, fixed instruction block.
pub fn build_enriched_prompt(
    query: &str,
    sources: &[ContentRecord],
    location_context: &str,
) -> String {
    let mut prompt = String::from(query);

    for (index, source) in sources.iter().enumerate() {
        prompt.push_str("\n\n");
        prompt.push_str(&format_source(index + 1, source));
    }

    if !location_context.is_empty() {
        prompt.push_str("\n\nLocation context:\n");
        prompt.push_str(location_context);
    }

    prompt.push_str("\n\n");
    prompt.push_str(INSTRUCTIONS);

    prompt
}

fn format_source(number: usize, source: &ContentRecord) -> String {
    format!(
        "Source {} ({}, similarity: {:.2}): Title: {} Content: {}",
        number,
        source.content_type,
        source.similarity.unwrap_or(0.0),
        source.title,
        source.content
    )
}
