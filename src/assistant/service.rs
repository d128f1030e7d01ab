//! The assistant facade.
//!
//! `generate_answer` drives retrieval, prompt assembly, and generation, and
//! resolves every request to one of two terminal outcomes:
//! - `Grounded`: the answer was generated with retrieved context attached
//! - `Fallback`: a primary-path failure discarded all context and the bare
//!   query was re-sent as a minimal single-message request
//!
//! Only a failure of the fallback generation itself reaches the caller.

use std::sync::Arc;

use crate::config::AssistantSettings;
use crate::errors::ApiError;
use crate::history::ConversationStore;
use crate::llm::{ChatMessage, ChatRequest, CompletionProvider};

use super::retrieval::ContextRetriever;
use super::scoring;
use super::types::{AnswerPath, AssistantRequest, AssistantResponse, RetrievedContext};
use super::prompt;

pub struct AssistantService {
    retriever: ContextRetriever,
    provider: Arc<dyn CompletionProvider>,
    history: ConversationStore,
    chat_model: String,
    record_interactions: bool,
}

impl AssistantService {
    pub fn new(
        retriever: ContextRetriever,
        provider: Arc<dyn CompletionProvider>,
        history: ConversationStore,
        chat_model: impl Into<String>,
        settings: &AssistantSettings,
    ) -> Self {
        Self {
            retriever,
            provider,
            history,
            chat_model: chat_model.into(),
            record_interactions: settings.record_interactions,
        }
    }

    /// Answer a traveller query, grounded in the knowledge base when
    /// possible.
    ///
    /// Returns an error only when the query is empty (caller-contract
    /// violation) or when both the grounded attempt and the no-context
    /// fallback fail.
    pub async fn generate_answer(
        &self,
        request: &AssistantRequest,
    ) -> Result<AssistantResponse, ApiError> {
        if request.query.trim().is_empty() {
            return Err(ApiError::BadRequest("query must not be empty".to_string()));
        }

        match self.grounded_answer(request).await {
            Ok((response, context)) => {
                self.spawn_interaction_record(request, &response, &context);
                Ok(response)
            }
            Err(err) => {
                tracing::warn!("grounded generation failed, retrying without context: {}", err);
                self.fallback_answer(request).await
            }
        }
    }

    async fn grounded_answer(
        &self,
        request: &AssistantRequest,
    ) -> Result<(AssistantResponse, RetrievedContext), ApiError> {
        let context = self.retriever.gather(request).await;

        let messages = prompt::build_messages(&request.query, &context, request.include_history);
        let answer = self
            .provider
            .chat(ChatRequest::new(messages), &self.chat_model)
            .await?;

        let confidence = scoring::confidence(&context.retrieved_content, &request.query);
        let context_used = scoring::context_summary(&context.retrieved_content);

        let response = AssistantResponse {
            response: answer,
            sources: context.retrieved_content.clone(),
            context_used,
            confidence,
            path: AnswerPath::Grounded,
        };

        Ok((response, context))
    }

    async fn fallback_answer(
        &self,
        request: &AssistantRequest,
    ) -> Result<AssistantResponse, ApiError> {
        let messages = vec![ChatMessage {
            role: "user".to_string(),
            content: request.query.clone(),
        }];

        let answer = self
            .provider
            .chat(ChatRequest::new(messages), &self.chat_model)
            .await?;

        Ok(AssistantResponse {
            response: answer,
            sources: Vec::new(),
            context_used: scoring::FALLBACK_SUMMARY.to_string(),
            confidence: scoring::FALLBACK_CONFIDENCE,
            path: AnswerPath::Fallback,
        })
    }

    /// Fire-and-forget analytics write. The response has already been
    /// produced when this runs; failures are logged and dropped.
    fn spawn_interaction_record(
        &self,
        request: &AssistantRequest,
        response: &AssistantResponse,
        context: &RetrievedContext,
    ) {
        if !self.record_interactions {
            return;
        }

        let history = self.history.clone();
        let conversation_id = request.conversation_id.clone();
        let query = request.query.clone();
        let answer = response.response.clone();
        let source_count = response.sources.len() as i64;
        let confidence = response.confidence;
        let semantic = context.query_embedding.is_some();

        tokio::spawn(async move {
            if let Err(err) = history
                .record_interaction(
                    conversation_id.as_deref(),
                    &query,
                    &answer,
                    source_count,
                    confidence,
                    semantic,
                )
                .await
            {
                tracing::warn!("failed to record interaction: {}", err);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::knowledge::{ContentRecord, KnowledgeIndex, SearchRequest};

    fn record(content_type: &str, title: &str, similarity: f64) -> ContentRecord {
        ContentRecord {
            id: title.to_lowercase(),
            content_id: format!("c-{}", title.to_lowercase()),
            content_type: content_type.to_string(),
            title: title.to_string(),
            content: format!("All about {}.", title),
            metadata: None,
            similarity: Some(similarity),
            created_at: None,
            updated_at: None,
        }
    }

    struct StaticIndex {
        similar: Vec<ContentRecord>,
    }

    #[async_trait]
    impl KnowledgeIndex for StaticIndex {
        async fn search_similar(
            &self,
            _request: &SearchRequest,
        ) -> Result<Vec<ContentRecord>, ApiError> {
            Ok(self.similar.clone())
        }

        async fn search_text(
            &self,
            _query: &str,
            _limit: usize,
        ) -> Result<Vec<ContentRecord>, ApiError> {
            Ok(Vec::new())
        }
    }

    /// Scripted provider: each chat call pops the next outcome.
    struct ScriptedProvider {
        chat_outcomes: Mutex<Vec<Result<String, ApiError>>>,
        chat_calls: AtomicUsize,
        last_messages: Mutex<Vec<ChatMessage>>,
    }

    impl ScriptedProvider {
        fn new(chat_outcomes: Vec<Result<String, ApiError>>) -> Self {
            Self {
                chat_outcomes: Mutex::new(chat_outcomes),
                chat_calls: AtomicUsize::new(0),
                last_messages: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn health_check(&self) -> Result<bool, ApiError> {
            Ok(true)
        }

        async fn chat(&self, request: ChatRequest, _model_id: &str) -> Result<String, ApiError> {
            self.chat_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_messages.lock().unwrap() = request.messages;
            let mut outcomes = self.chat_outcomes.lock().unwrap();
            if outcomes.is_empty() {
                return Ok("default answer".to_string());
            }
            outcomes.remove(0)
        }

        async fn embed(
            &self,
            inputs: &[String],
            _model_id: &str,
        ) -> Result<Vec<Vec<f32>>, ApiError> {
            Ok(inputs.iter().map(|_| vec![0.5, 0.5]).collect())
        }
    }

    async fn service_with(
        similar: Vec<ContentRecord>,
        chat_outcomes: Vec<Result<String, ApiError>>,
        record_interactions: bool,
    ) -> (tempfile::TempDir, AssistantService, Arc<ScriptedProvider>) {
        let dir = tempfile::tempdir().unwrap();
        let history = ConversationStore::new(dir.path().join("test.db"))
            .await
            .unwrap();

        let provider = Arc::new(ScriptedProvider::new(chat_outcomes));
        let index = Arc::new(StaticIndex { similar });
        let retriever = ContextRetriever::new(
            index,
            provider.clone(),
            history.clone(),
            "text-embedding-3-small",
        );
        let service = AssistantService::new(
            retriever,
            provider.clone(),
            history,
            "gpt-4o-mini",
            &AssistantSettings {
                record_interactions,
            },
        );
        (dir, service, provider)
    }

    #[tokio::test]
    async fn empty_query_is_a_caller_error() {
        let (_dir, service, _provider) = service_with(Vec::new(), Vec::new(), false).await;
        let err = service
            .generate_answer(&AssistantRequest::new("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn grounded_answer_returns_retrieved_sources_untouched() {
        let sources = vec![
            record("destination", "Kyoto", 0.9),
            record("customs", "Tipping", 0.7),
        ];
        let (_dir, service, _provider) = service_with(
            sources.clone(),
            vec![Ok("grounded answer".to_string())],
            false,
        )
        .await;

        let response = service
            .generate_answer(&AssistantRequest::new("what about Kyoto?"))
            .await
            .unwrap();

        assert_eq!(response.path, AnswerPath::Grounded);
        assert_eq!(response.response, "grounded answer");
        assert_eq!(response.sources.len(), 2);
        assert_eq!(response.sources[0].id, sources[0].id);
        assert_eq!(response.sources[1].id, sources[1].id);
    }

    #[tokio::test]
    async fn zero_sources_on_grounded_path_scores_floor() {
        let (_dir, service, _provider) =
            service_with(Vec::new(), vec![Ok("thin answer".to_string())], false).await;

        let response = service
            .generate_answer(&AssistantRequest::new("anything"))
            .await
            .unwrap();

        assert_eq!(response.path, AnswerPath::Grounded);
        assert_eq!(response.confidence, 0.2);
        assert_eq!(
            response.context_used,
            "No specific context found in knowledge base"
        );
    }

    #[tokio::test]
    async fn transient_generation_failure_triggers_fallback() {
        let sources = vec![record("destination", "Kyoto", 0.9)];
        let (_dir, service, provider) = service_with(
            sources,
            vec![
                Err(ApiError::Internal("upstream flake".to_string())),
                Ok("bare answer".to_string()),
            ],
            false,
        )
        .await;

        let response = service
            .generate_answer(&AssistantRequest::new("what about Kyoto?"))
            .await
            .unwrap();

        assert_eq!(response.path, AnswerPath::Fallback);
        assert!(response.sources.is_empty());
        assert_eq!(response.context_used, "No additional context available");
        assert_eq!(response.confidence, 0.3);
        assert_eq!(provider.chat_calls.load(Ordering::SeqCst), 2);

        // fallback request is the bare query, no context injected
        let messages = provider.last_messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[0].content, "what about Kyoto?");
    }

    #[tokio::test]
    async fn fallback_failure_propagates() {
        let (_dir, service, _provider) = service_with(
            Vec::new(),
            vec![
                Err(ApiError::NotConfigured("no key".to_string())),
                Err(ApiError::NotConfigured("no key".to_string())),
            ],
            false,
        )
        .await;

        let err = service
            .generate_answer(&AssistantRequest::new("anything"))
            .await
            .unwrap_err();
        assert!(err.is_not_configured());
    }

    #[tokio::test]
    async fn confidence_and_summary_are_deterministic() {
        let sources = vec![
            record("destination", "Kyoto", 0.9),
            record("customs", "Tipping", 0.7),
        ];
        let (_dir, service, _provider) = service_with(
            sources,
            vec![
                Ok("first answer".to_string()),
                Ok("second answer".to_string()),
            ],
            false,
        )
        .await;

        let request = AssistantRequest::new("what about Kyoto?");
        let first = service.generate_answer(&request).await.unwrap();
        let second = service.generate_answer(&request).await.unwrap();

        assert_eq!(first.confidence, second.confidence);
        assert_eq!(first.context_used, second.context_used);
    }

    #[tokio::test]
    async fn grounded_success_records_an_interaction() {
        let sources = vec![record("destination", "Kyoto", 0.9)];
        let (_dir, service, _provider) =
            service_with(sources, vec![Ok("answer".to_string())], true).await;

        service
            .generate_answer(&AssistantRequest::new("what about Kyoto?"))
            .await
            .unwrap();

        // the write is fire-and-forget; give it a moment to land
        let mut count = 0;
        for _ in 0..20 {
            count = service.history.interaction_count().await.unwrap();
            if count > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert_eq!(count, 1);
    }
}
