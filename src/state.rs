use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::assistant::{AssistantService, ContextRetriever};
use crate::config::{AppPaths, AssistantSettings, ConfigService, KnowledgeSettings, LlmSettings};
use crate::history::ConversationStore;
use crate::knowledge::{KnowledgeIndex, RemoteKnowledgeIndex};
use crate::llm::{CompletionProvider, OpenAiCompatProvider};

#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config: ConfigService,
    pub history: ConversationStore,
    pub assistant: Arc<AssistantService>,
    #[allow(dead_code)]
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub async fn initialize() -> anyhow::Result<Arc<Self>> {
        let paths = Arc::new(AppPaths::new());
        let config = ConfigService::new(paths.clone());

        let merged = config
            .load_config()
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));
        let llm_settings = LlmSettings::from_config(&merged);
        let knowledge_settings = KnowledgeSettings::from_config(&merged);
        let assistant_settings = AssistantSettings::from_config(&merged);

        let history = ConversationStore::new(paths.db_path.clone()).await?;

        let provider: Arc<dyn CompletionProvider> =
            Arc::new(OpenAiCompatProvider::new(&llm_settings));
        let index: Arc<dyn KnowledgeIndex> = Arc::new(RemoteKnowledgeIndex::new(&knowledge_settings));

        let retriever = ContextRetriever::new(
            index,
            provider.clone(),
            history.clone(),
            llm_settings.embedding_model.clone(),
        );
        let assistant = Arc::new(AssistantService::new(
            retriever,
            provider,
            history.clone(),
            llm_settings.chat_model.clone(),
            &assistant_settings,
        ));

        let started_at = Utc::now();

        Ok(Arc::new(AppState {
            paths,
            config,
            history,
            assistant,
            started_at,
        }))
    }
}
