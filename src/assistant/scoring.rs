//! Confidence scoring and context summaries.
//!
//! The confidence score is a pure function of the retrieved records and the
//! query text; the generated answer never feeds back into it. Weights and
//! caps are hand-tuned values, not a calibrated probability, and existing
//! consumers depend on them verbatim.

use crate::knowledge::ContentRecord;

const NO_CONTEXT_CONFIDENCE: f64 = 0.2;
const BASE_CONFIDENCE: f64 = 0.3;
const SIMILARITY_WEIGHT: f64 = 0.5;
const SOURCE_COUNT_WEIGHT: f64 = 0.15;
const QUERY_LENGTH_WEIGHT: f64 = 0.05;
const SOURCE_COUNT_SATURATION: f64 = 5.0;
const QUERY_LENGTH_SATURATION: f64 = 100.0;
const MAX_CONFIDENCE: f64 = 0.95;

/// Confidence of a response produced without any retrieval at all.
pub const FALLBACK_CONFIDENCE: f64 = 0.3;

pub const NO_CONTEXT_SUMMARY: &str = "No specific context found in knowledge base";
pub const FALLBACK_SUMMARY: &str = "No additional context available";

/// Grounding confidence for a set of retrieved records and the query that
/// produced them.
pub fn confidence(sources: &[ContentRecord], query: &str) -> f64 {
    if sources.is_empty() {
        return NO_CONTEXT_CONFIDENCE;
    }

    let avg_similarity = average_similarity(sources);
    let source_count_term = (sources.len() as f64 / SOURCE_COUNT_SATURATION).min(1.0);
    let query_length_term = (query.chars().count() as f64 / QUERY_LENGTH_SATURATION).min(1.0);

    let score = BASE_CONFIDENCE
        + avg_similarity * SIMILARITY_WEIGHT
        + source_count_term * SOURCE_COUNT_WEIGHT
        + query_length_term * QUERY_LENGTH_WEIGHT;

    score.min(MAX_CONFIDENCE)
}

/// Human-readable summary of what retrieval contributed.
pub fn context_summary(sources: &[ContentRecord]) -> String {
    if sources.is_empty() {
        return NO_CONTEXT_SUMMARY.to_string();
    }

    let mut content_types: Vec<&str> = Vec::new();
    for source in sources {
        if !content_types.contains(&source.content_type.as_str()) {
            content_types.push(&source.content_type);
        }
    }

    format!(
        "Retrieved {} relevant documents ({}) with average similarity: {:.2}",
        sources.len(),
        content_types.join(", "),
        average_similarity(sources)
    )
}

fn average_similarity(sources: &[ContentRecord]) -> f64 {
    if sources.is_empty() {
        return 0.0;
    }
    let total: f64 = sources
        .iter()
        .map(|source| source.similarity.unwrap_or(0.0))
        .sum();
    total / sources.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(content_type: &str, similarity: f64) -> ContentRecord {
        ContentRecord {
            id: format!("rec-{}", similarity),
            content_id: format!("content-{}", similarity),
            content_type: content_type.to_string(),
            title: "A title".to_string(),
            content: "A body".to_string(),
            metadata: None,
            similarity: Some(similarity),
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn empty_sources_score_floor() {
        assert_eq!(confidence(&[], "anything at all"), 0.2);
    }

    #[test]
    fn five_sources_average_point_seven() {
        // avg 0.7, count term saturated, 40-char query -> 0.82
        let sources: Vec<ContentRecord> = [0.9, 0.8, 0.7, 0.6, 0.5]
            .iter()
            .map(|s| record("destination", *s))
            .collect();
        let query = "What etiquette rules apply in this city?";
        assert_eq!(query.chars().count(), 40);

        let score = confidence(&sources, query);
        assert!((score - 0.82).abs() < 1e-9, "got {}", score);
    }

    #[test]
    fn text_match_sentinel_sources() {
        // two substring-match records at the 0.5 sentinel
        let sources = vec![record("customs", 0.5), record("events", 0.5)];
        let query = "best local food markets";
        let expected = 0.3 + 0.25 + 0.06 + (query.chars().count() as f64 / 100.0) * 0.05;
        let score = confidence(&sources, query);
        assert!((score - expected).abs() < 1e-9, "got {}", score);
    }

    #[test]
    fn confidence_is_capped() {
        let sources: Vec<ContentRecord> =
            (0..8).map(|_| record("destination", 1.0)).collect();
        let query = "q".repeat(200);
        assert_eq!(confidence(&sources, &query), 0.95);
    }

    #[test]
    fn confidence_stays_in_bounds() {
        for count in 0..6 {
            let sources: Vec<ContentRecord> =
                (0..count).map(|_| record("destination", 0.41)).collect();
            let score = confidence(&sources, "a short query");
            assert!((0.2..=0.95).contains(&score), "got {}", score);
        }
    }

    #[test]
    fn summary_for_empty_sources() {
        assert_eq!(context_summary(&[]), "No specific context found in knowledge base");
    }

    #[test]
    fn summary_lists_distinct_types_in_order() {
        let sources = vec![
            record("destination", 0.9),
            record("customs", 0.8),
            record("destination", 0.5),
        ];
        assert_eq!(
            context_summary(&sources),
            "Retrieved 3 relevant documents (destination, customs) with average similarity: 0.73"
        );
    }
}
