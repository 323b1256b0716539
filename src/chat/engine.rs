// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Turn orchestration
//!
//! `ChatEngine::submit` runs one user turn end to end:
//!
//! 1. resolve the effective context and create the chat service
//! 2. create the message, or reset it when regenerating
//! 3. pick the history window and augment the prompt with knowledge
//! 4. stream the turn, forwarding events to the caller's observer
//! 5. persist the reply, reasoning, token counts and citations
//!
//! Per-chat state (loading flag, running tool) lives in the engine so a
//! second submit for a chat that is still generating is rejected.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::catalog::ProviderCatalog;
use crate::chat::context::{ChatContextResolver, EffectiveContext};
use crate::chat::service::ChatService;
use crate::chat::session::{TurnObserver, TurnOutcome};
use crate::chat::store::{MessageStore, MessageUpdate, NewMessage, UsageRecord};
use crate::chat::streaming::{split_reasoning, TurnResult};
use crate::chat::types::{Chat, ChatMessage};
use crate::chat::window::{build_request_messages, select_context_messages};
use crate::config::Settings;
use crate::error::{PalaverError, Result};
use crate::knowledge::{reconcile, Citations, KnowledgeAugmenter, KnowledgeBase};
use crate::llm::factory::ChatServiceFactory;
use crate::llm::provider::ChatBackend;

/// Visible state of one chat
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatState {
    pub loading: bool,
    pub running_tool: Option<String>,
}

#[derive(Debug, Default)]
struct ChatEntry {
    state: ChatState,
    cancel: Option<CancellationToken>,
}

type ChatStates = Mutex<HashMap<String, ChatEntry>>;

fn lock_states(states: &ChatStates) -> MutexGuard<'_, HashMap<String, ChatEntry>> {
    match states.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Holds a chat's loading entry for the length of one submit.
///
/// Dropping it releases the entry even when the submit future is dropped
/// mid-turn. A message still marked active at that point is deactivated on
/// the runtime in the background.
struct TurnGuard<'a> {
    states: &'a ChatStates,
    chat_id: String,
    store: Arc<dyn MessageStore>,
    active_message: Option<String>,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        lock_states(self.states).remove(&self.chat_id);
        let Some(message_id) = self.active_message.take() else {
            return;
        };
        tracing::debug!(target: "palaver.chat.engine", chat_id = %self.chat_id, message_id = %message_id, "Turn dropped before finishing");
        let store = Arc::clone(&self.store);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = store
                        .update_message(&message_id, MessageUpdate::deactivate())
                        .await
                    {
                        tracing::warn!(target: "palaver.chat.engine", message_id = %message_id, error = %e, "Failed to deactivate message");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(target: "palaver.chat.engine", message_id = %message_id, "No runtime to deactivate message");
            }
        }
    }
}

/// What a finished submit produced
#[derive(Debug)]
pub struct TurnSummary {
    /// The message as persisted after the turn
    pub message: ChatMessage,
    pub outcome: TurnOutcome,
    pub citations: Citations,
}

/// Tracks the running tool and forwards everything to the caller
struct EngineObserver<'a> {
    chat_id: &'a str,
    states: &'a ChatStates,
    inner: &'a mut dyn TurnObserver,
}

impl TurnObserver for EngineObserver<'_> {
    fn on_reading(&mut self, content: &str, reasoning: Option<&str>) {
        self.inner.on_reading(content, reasoning);
    }

    fn on_tool_calls(&mut self, tool_name: &str) {
        if let Some(entry) = lock_states(self.states).get_mut(self.chat_id) {
            entry.state.running_tool = Some(tool_name.to_string());
        }
        self.inner.on_tool_calls(tool_name);
    }

    fn on_complete(&mut self, result: &TurnResult) {
        self.inner.on_complete(result);
    }

    fn on_error(&mut self, error: &PalaverError, aborted: bool) {
        if !aborted {
            tracing::warn!(target: "palaver.chat.engine", chat_id = %self.chat_id, error = %error, "Turn failed");
        }
        self.inner.on_error(error, aborted);
    }
}

/// Runs chat turns against a message store and a knowledge base
pub struct ChatEngine {
    catalog: ProviderCatalog,
    settings: Settings,
    store: Arc<dyn MessageStore>,
    knowledge: Arc<dyn KnowledgeBase>,
    backend: Option<Arc<dyn ChatBackend>>,
    states: ChatStates,
}

impl ChatEngine {
    pub fn new(
        catalog: ProviderCatalog,
        settings: Settings,
        store: Arc<dyn MessageStore>,
        knowledge: Arc<dyn KnowledgeBase>,
    ) -> Self {
        Self {
            catalog,
            settings,
            store,
            knowledge,
            backend: None,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Use `backend` for every turn instead of one built from settings
    pub fn with_backend(mut self, backend: Arc<dyn ChatBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replace the settings used by later turns
    pub fn set_settings(&mut self, settings: Settings) {
        self.settings = settings;
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Context a turn in `chat` would run with right now
    pub fn resolve(&self, chat: &Chat) -> EffectiveContext {
        ChatContextResolver::new(&self.catalog, &self.settings).resolve(chat)
    }

    /// Loading flag and running tool of `chat_id`
    pub fn state(&self, chat_id: &str) -> ChatState {
        lock_states(&self.states)
            .get(chat_id)
            .map(|entry| entry.state.clone())
            .unwrap_or_default()
    }

    pub fn is_loading(&self, chat_id: &str) -> bool {
        self.state(chat_id).loading
    }

    /// Abort the turn running in `chat_id`; false when nothing is running
    pub fn abort(&self, chat_id: &str) -> bool {
        let token = lock_states(&self.states)
            .get(chat_id)
            .and_then(|entry| entry.cancel.clone());
        match token {
            Some(token) => {
                tracing::debug!(target: "palaver.chat.engine", chat_id = %chat_id, "Aborting turn");
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn service_for(&self, context: EffectiveContext) -> Result<ChatService> {
        match &self.backend {
            Some(backend) => Ok(ChatService::new(Arc::clone(backend), context)),
            None => {
                let provider_id = context.provider_kind().key();
                ChatServiceFactory::create(&provider_id, context, &self.settings)
            }
        }
    }

    fn begin(&self, chat_id: &str) -> Result<TurnGuard<'_>> {
        let mut states = lock_states(&self.states);
        let entry = states.entry(chat_id.to_string()).or_default();
        if entry.state.loading {
            return Err(PalaverError::Session(
                "A turn is already in progress for this chat".to_string(),
            ));
        }
        entry.state.loading = true;
        entry.state.running_tool = None;
        Ok(TurnGuard {
            states: &self.states,
            chat_id: chat_id.to_string(),
            store: Arc::clone(&self.store),
            active_message: None,
        })
    }

    fn set_cancel(&self, chat_id: &str, token: Option<CancellationToken>) {
        if let Some(entry) = lock_states(&self.states).get_mut(chat_id) {
            entry.cancel = token;
        }
    }

    /// Run one turn for `prompt` in `chat`.
    ///
    /// With `retry_of` the named message is regenerated in place and only
    /// the history before it is sent. Blank prompts are rejected.
    pub async fn submit(
        &self,
        chat: &Chat,
        prompt: &str,
        retry_of: Option<&str>,
        observer: &mut dyn TurnObserver,
    ) -> Result<TurnSummary> {
        if prompt.trim().is_empty() {
            return Err(PalaverError::InvalidInput("Prompt is empty".to_string()));
        }
        let mut turn = self.begin(&chat.id)?;

        let result = self
            .run_turn(chat, prompt, retry_of, observer, &mut turn)
            .await;
        if let (Err(e), Some(message_id)) = (&result, turn.active_message.take()) {
            tracing::warn!(target: "palaver.chat.engine", chat_id = %chat.id, error = %e, "Turn aborted by store error");
            if let Err(e) = self
                .store
                .update_message(&message_id, MessageUpdate::deactivate())
                .await
            {
                tracing::warn!(target: "palaver.chat.engine", message_id = %message_id, error = %e, "Failed to deactivate message");
            }
        }
        result
    }

    async fn run_turn(
        &self,
        chat: &Chat,
        prompt: &str,
        retry_of: Option<&str>,
        observer: &mut dyn TurnObserver,
        turn: &mut TurnGuard<'_>,
    ) -> Result<TurnSummary> {
        let context = self.resolve(chat);
        let max_ctx_messages = context.max_ctx_messages();
        let model_label = context.model().display_name().to_string();
        let (temperature, max_tokens) = (context.temperature(), context.max_tokens());
        let service = self.service_for(context)?;

        let message = match retry_of {
            Some(id) => {
                match self.store.get_message(id).await? {
                    Some(existing) if existing.chat_id == chat.id => {}
                    Some(_) => {
                        return Err(PalaverError::Store(format!(
                            "Message {} does not belong to chat {}",
                            id, chat.id
                        )))
                    }
                    None => {
                        return Err(PalaverError::Store(format!("Message not found: {}", id)))
                    }
                }
                self.store
                    .update_message(
                        id,
                        MessageUpdate::restart(&model_label, temperature, max_tokens),
                    )
                    .await?
            }
            None => {
                self.store
                    .create_message(NewMessage {
                        chat_id: chat.id.clone(),
                        prompt: prompt.to_string(),
                        model: model_label.clone(),
                        temperature,
                        max_tokens,
                        is_active: true,
                    })
                    .await?
            }
        };
        turn.active_message = Some(message.id.clone());

        let all_messages = self.store.messages(&chat.id).await?;
        let history = select_context_messages(&all_messages, max_ctx_messages, retry_of);

        let augmentation = KnowledgeAugmenter::new(self.knowledge.as_ref())
            .with_limit(self.settings.knowledge.search_limit)
            .augment(chat, prompt)
            .await;
        let request_messages = build_request_messages(history, &augmentation.prompt);

        tracing::debug!(
            target: "palaver.chat.engine",
            chat_id = %chat.id,
            message_id = %message.id,
            provider = %service.provider_name(),
            model = %model_label,
            history = history.len(),
            chunks = augmentation.chunks.len(),
            "Submitting turn"
        );

        let handle = match service.chat(request_messages, retry_of.map(str::to_string)) {
            Ok(handle) => handle,
            Err(e) => {
                self.store
                    .update_message(&message.id, MessageUpdate::deactivate())
                    .await?;
                turn.active_message = None;
                return Err(e);
            }
        };
        self.set_cancel(&chat.id, Some(handle.cancellation_token()));

        let mut forwarder = EngineObserver {
            chat_id: &chat.id,
            states: &self.states,
            inner: observer,
        };
        let outcome = handle.drive(&mut forwarder).await;
        self.set_cancel(&chat.id, None);

        let result = outcome.result();
        if outcome.has_error() && result.is_blank() {
            let message = self
                .store
                .update_message(&message.id, MessageUpdate::deactivate())
                .await?;
            turn.active_message = None;
            return Ok(TurnSummary {
                message,
                outcome,
                citations: Citations::default(),
            });
        }

        let backend = service.backend();
        let input_tokens = match result.input_tokens {
            0 => backend.count_tokens(prompt),
            n => n,
        };
        let output_tokens = match result.output_tokens {
            0 => backend.count_tokens(&result.content),
            n => n,
        };
        let (reply, reasoning) = split_reasoning(&result.content, &result.reasoning);
        let citations = reconcile(&result.content, &augmentation.chunks, &augmentation.files);

        let message = self
            .store
            .update_message(
                &message.id,
                MessageUpdate {
                    reply: Some(reply),
                    reasoning: Some(reasoning),
                    input_tokens: Some(input_tokens),
                    output_tokens: Some(output_tokens),
                    is_active: Some(false),
                    cited_files: Some(citations.files_json()),
                    cited_chunks: Some(citations.chunks_json()),
                    tool_calls: Some(result.tool_calls.clone()),
                    ..Default::default()
                },
            )
            .await?;
        turn.active_message = None;

        self.store
            .record_usage(UsageRecord {
                provider: service.provider_name().to_string(),
                model: model_label,
                input_tokens,
                output_tokens,
            })
            .await?;

        tracing::debug!(
            target: "palaver.chat.engine",
            chat_id = %chat.id,
            input_tokens,
            output_tokens,
            cited = citations.chunks.len(),
            "Turn finished"
        );

        Ok(TurnSummary {
            message,
            outcome,
            citations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ProviderKind;
    use crate::chat::store::MemoryMessageStore;
    use crate::error::ApiError;
    use crate::knowledge::{CollectionFile, KnowledgeChunk};
    use crate::llm::message::Role;
    use crate::llm::mock_backend::{MockBackend, MockStep};
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Default)]
    struct StaticKnowledge {
        chunks: Vec<KnowledgeChunk>,
        files: Vec<CollectionFile>,
    }

    #[async_trait]
    impl KnowledgeBase for StaticKnowledge {
        async fn search(
            &self,
            collection_ids: &[String],
            _query: &str,
            limit: usize,
        ) -> Result<Vec<KnowledgeChunk>> {
            if collection_ids.is_empty() {
                return Ok(vec![]);
            }
            Ok(self.chunks.iter().take(limit).cloned().collect())
        }

        async fn files(&self, file_ids: &[String]) -> Result<Vec<CollectionFile>> {
            Ok(self
                .files
                .iter()
                .filter(|f| file_ids.contains(&f.id))
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct Recorder {
        text: String,
        tools: Vec<String>,
        completed: bool,
        errors: Vec<(String, bool)>,
    }

    impl TurnObserver for Recorder {
        fn on_reading(&mut self, content: &str, _reasoning: Option<&str>) {
            self.text.push_str(content);
        }

        fn on_tool_calls(&mut self, tool_name: &str) {
            self.tools.push(tool_name.to_string());
        }

        fn on_complete(&mut self, _result: &TurnResult) {
            self.completed = true;
        }

        fn on_error(&mut self, error: &PalaverError, aborted: bool) {
            self.errors.push((error.to_string(), aborted));
        }
    }

    fn engine_with(
        backend: MockBackend,
        knowledge: StaticKnowledge,
    ) -> (ChatEngine, Arc<MemoryMessageStore>) {
        let store = Arc::new(MemoryMessageStore::new());
        let engine = ChatEngine::new(
            ProviderCatalog::builtin(),
            Settings::default(),
            store.clone(),
            Arc::new(knowledge),
        )
        .with_backend(Arc::new(backend));
        (engine, store)
    }

    #[tokio::test]
    async fn test_submit_persists_reply_and_usage() {
        let backend = MockBackend::new().with_steps(vec![
            MockStep::Text("Hello".into()),
            MockStep::Text(" there".into()),
            MockStep::Usage { input: 12, output: 3 },
        ]);
        let (engine, store) = engine_with(backend, StaticKnowledge::default());
        let chat = Chat::new("c1").with_provider(ProviderKind::OpenAI);
        let mut recorder = Recorder::default();

        let summary = engine.submit(&chat, "Hi", None, &mut recorder).await.unwrap();

        assert!(summary.outcome.is_completed());
        assert_eq!(summary.message.reply, "Hello there");
        assert_eq!(summary.message.input_tokens, 12);
        assert_eq!(summary.message.output_tokens, 3);
        assert!(!summary.message.is_active);
        assert_eq!(recorder.text, "Hello there");
        assert!(recorder.completed);

        let usage = store.usage().await;
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].provider, "mock");
        assert_eq!(usage[0].input_tokens, 12);
        assert!(!engine.is_loading("c1"));
    }

    #[tokio::test]
    async fn test_token_counts_fall_back_to_estimates() {
        let backend = MockBackend::new().with_chunks(["12345678"]);
        let (engine, _store) = engine_with(backend, StaticKnowledge::default());
        let chat = Chat::new("c1");

        let summary = engine
            .submit(&chat, "abcd", None, &mut Recorder::default())
            .await
            .unwrap();
        assert_eq!(summary.message.input_tokens, 1);
        assert_eq!(summary.message.output_tokens, 2);
    }

    #[tokio::test]
    async fn test_blank_prompt_rejected() {
        let (engine, store) = engine_with(MockBackend::new(), StaticKnowledge::default());
        let result = engine
            .submit(&Chat::new("c1"), "   ", None, &mut Recorder::default())
            .await;
        assert!(matches!(result, Err(PalaverError::InvalidInput(_))));
        assert!(store.messages("c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_excludes_current_message() {
        let backend = MockBackend::new();
        let (engine, store) = engine_with(backend.clone(), StaticKnowledge::default());
        store.insert(ChatMessage::exchange("c1", "q0", "a0")).await;

        engine
            .submit(&Chat::new("c1"), "q1", None, &mut Recorder::default())
            .await
            .unwrap();

        let request = backend.last_request().unwrap();
        let contents: Vec<&str> = request.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["q0", "a0", "q1"]);
        assert_eq!(request.messages[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_retry_resets_and_anchors_history() {
        let backend = MockBackend::new().with_chunks(["fresh"]);
        let (engine, store) = engine_with(backend.clone(), StaticKnowledge::default());
        let first = ChatMessage::exchange("c1", "q0", "a0");
        let mut retried = ChatMessage::exchange("c1", "q1", "stale");
        retried.cited_files = r#"["x.md"]"#.to_string();
        let later = ChatMessage::exchange("c1", "q2", "a2");
        let retried_id = retried.id.clone();
        for m in [first, retried, later] {
            store.insert(m).await;
        }

        let summary = engine
            .submit(&Chat::new("c1"), "q1", Some(&retried_id), &mut Recorder::default())
            .await
            .unwrap();

        assert_eq!(summary.message.id, retried_id);
        assert_eq!(summary.message.reply, "fresh");
        assert_eq!(summary.message.cited_files, "[]");
        assert_eq!(store.messages("c1").await.unwrap().len(), 3);

        let contents: Vec<String> = backend
            .last_request()
            .unwrap()
            .messages
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["q0", "a0", "q1"]);
    }

    #[tokio::test]
    async fn test_retry_of_unknown_message() {
        let (engine, _store) = engine_with(MockBackend::new(), StaticKnowledge::default());
        let result = engine
            .submit(&Chat::new("c1"), "q", Some("missing"), &mut Recorder::default())
            .await;
        assert!(matches!(result, Err(PalaverError::Store(_))));
        assert!(!engine.is_loading("c1"));
    }

    #[tokio::test]
    async fn test_failure_without_output_only_deactivates() {
        let backend = MockBackend::new().failing_with(ApiError::AuthenticationFailed);
        let (engine, store) = engine_with(backend, StaticKnowledge::default());
        let mut recorder = Recorder::default();

        let summary = engine
            .submit(&Chat::new("c1"), "Hi", None, &mut recorder)
            .await
            .unwrap();

        assert!(summary.outcome.error().is_some());
        assert!(!summary.message.is_active);
        assert_eq!(summary.message.input_tokens, 0);
        assert!(store.usage().await.is_empty());
        assert_eq!(recorder.errors.len(), 1);
        assert!(!recorder.errors[0].1);
    }

    #[tokio::test]
    async fn test_failure_with_partial_output_is_kept() {
        let backend = MockBackend::new().with_steps(vec![
            MockStep::Text("partial".into()),
            MockStep::Fail(ApiError::Network("reset".into())),
        ]);
        let (engine, store) = engine_with(backend, StaticKnowledge::default());

        let summary = engine
            .submit(&Chat::new("c1"), "Hi", None, &mut Recorder::default())
            .await
            .unwrap();

        assert!(summary.outcome.error().is_some());
        assert_eq!(summary.message.reply, "partial");
        assert_eq!(store.usage().await.len(), 1);
    }

    #[tokio::test]
    async fn test_reasoning_split_from_content() {
        let backend = MockBackend::new().with_chunks(["<think>hmm</think>", "Answer"]);
        let (engine, _store) = engine_with(backend, StaticKnowledge::default());

        let summary = engine
            .submit(&Chat::new("c1"), "Hi", None, &mut Recorder::default())
            .await
            .unwrap();
        assert_eq!(summary.message.reply, "Answer");
        assert_eq!(summary.message.reasoning, "hmm");
    }

    #[tokio::test]
    async fn test_citations_reconciled() {
        let knowledge = StaticKnowledge {
            chunks: vec![
                KnowledgeChunk {
                    id: "A".into(),
                    file_id: "f1".into(),
                    collection_id: "col".into(),
                    content: "apples".into(),
                },
                KnowledgeChunk {
                    id: "B".into(),
                    file_id: "f2".into(),
                    collection_id: "col".into(),
                    content: "carrots".into(),
                },
            ],
            files: vec![
                CollectionFile::new("f1", "fruit.md"),
                CollectionFile::new("f2", "veg.md"),
            ],
        };
        let backend =
            MockBackend::new().with_chunks(["Apples are fruit [(1)](citation#A 'fruit.md')."]);
        let (engine, _store) = engine_with(backend.clone(), knowledge);
        let chat = Chat::new("c1").with_collections(vec!["col".into()]);

        let summary = engine
            .submit(&chat, "What is a fruit?", None, &mut Recorder::default())
            .await
            .unwrap();

        assert_eq!(summary.citations.files, vec!["fruit.md"]);
        assert_eq!(summary.message.cited_files, r#"["fruit.md"]"#);
        assert_eq!(
            summary.message.cited_chunks,
            r#"[{"seqNo":1,"content":"apples","id":"A"}]"#
        );
        assert_eq!(summary.message.prompt, "What is a fruit?");

        let sent = backend.last_request().unwrap();
        let last = sent.messages.last().unwrap();
        assert!(last.content.starts_with("\n# Context #"));
        assert!(last.content.ends_with("# Objective #\nWhat is a fruit?\n"));
    }

    #[tokio::test]
    async fn test_tool_calls_recorded() {
        let backend = MockBackend::new().with_steps(vec![MockStep::ToolCall {
            name: "search".into(),
            input: serde_json::json!({"q": "rust"}),
        }]);
        let (engine, _store) = engine_with(backend, StaticKnowledge::default());
        let mut recorder = Recorder::default();

        let summary = engine
            .submit(&Chat::new("c1"), "Hi", None, &mut recorder)
            .await
            .unwrap();

        assert_eq!(recorder.tools, vec!["search"]);
        assert_eq!(summary.message.tool_calls.len(), 1);
        assert_eq!(summary.message.tool_calls[0].input["q"], "rust");
    }

    #[tokio::test]
    async fn test_concurrent_submit_rejected_and_abort() {
        let backend = MockBackend::new().with_steps(vec![
            MockStep::Text("start".into()),
            MockStep::Delay(Duration::from_millis(20)),
            MockStep::Hang,
        ]);
        let (engine, _store) = engine_with(backend, StaticKnowledge::default());
        let engine = Arc::new(engine);
        let chat = Chat::new("c1");

        let running = {
            let engine = Arc::clone(&engine);
            let chat = chat.clone();
            tokio::spawn(async move {
                engine
                    .submit(&chat, "first", None, &mut Recorder::default())
                    .await
            })
        };

        while !engine.is_loading("c1") {
            tokio::task::yield_now().await;
        }
        let second = engine
            .submit(&chat, "second", None, &mut Recorder::default())
            .await;
        assert!(matches!(second, Err(PalaverError::Session(_))));

        while !engine.abort("c1") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let summary = running.await.unwrap().unwrap();
        assert!(summary.outcome.is_aborted());
        assert!(!engine.is_loading("c1"));
        assert!(!engine.abort("c1"));
    }

    #[tokio::test]
    async fn test_engine_without_backend_uses_factory() {
        let store = Arc::new(MemoryMessageStore::new());
        let mut settings = Settings::default();
        settings.provider_mut(ProviderKind::OpenAI).api_key_env =
            Some("PALAVER_ENGINE_TEST_NONEXISTENT_ENV".into());
        let engine = ChatEngine::new(
            ProviderCatalog::builtin(),
            settings,
            store.clone(),
            Arc::new(StaticKnowledge::default()),
        );

        let summary = engine
            .submit(&Chat::new("c1"), "Hi", None, &mut Recorder::default())
            .await
            .unwrap();
        assert!(matches!(summary.outcome.error(), Some(PalaverError::Config(_))));
        assert!(!summary.message.is_active);
    }

    #[tokio::test]
    async fn test_dropped_submit_releases_chat_and_message() {
        let backend = MockBackend::new().with_steps(vec![MockStep::Hang]);
        let (engine, store) = engine_with(backend.clone(), StaticKnowledge::default());
        let chat = Chat::new("c1");

        let timed_out = tokio::time::timeout(
            Duration::from_millis(50),
            engine.submit(&chat, "first", None, &mut Recorder::default()),
        )
        .await;
        assert!(timed_out.is_err());
        assert!(!engine.is_loading("c1"));
        assert!(!engine.abort("c1"));

        tokio::time::timeout(Duration::from_secs(1), async {
            while store.messages("c1").await.unwrap().iter().any(|m| m.is_active) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let _ = backend.with_chunks(["again"]);
        let summary = engine
            .submit(&chat, "second", None, &mut Recorder::default())
            .await
            .unwrap();
        assert_eq!(summary.message.reply, "again");
    }

    /// Delegates to memory but refuses to list messages
    #[derive(Default)]
    struct ListingFailsStore {
        inner: MemoryMessageStore,
    }

    #[async_trait]
    impl MessageStore for ListingFailsStore {
        async fn create_message(&self, message: NewMessage) -> Result<ChatMessage> {
            self.inner.create_message(message).await
        }

        async fn update_message(&self, id: &str, update: MessageUpdate) -> Result<ChatMessage> {
            self.inner.update_message(id, update).await
        }

        async fn get_message(&self, id: &str) -> Result<Option<ChatMessage>> {
            self.inner.get_message(id).await
        }

        async fn messages(&self, _chat_id: &str) -> Result<Vec<ChatMessage>> {
            Err(PalaverError::Store("disk full".into()))
        }

        async fn record_usage(&self, record: UsageRecord) -> Result<()> {
            self.inner.record_usage(record).await
        }
    }

    #[tokio::test]
    async fn test_store_error_deactivates_message() {
        let store = Arc::new(ListingFailsStore::default());
        let engine = ChatEngine::new(
            ProviderCatalog::builtin(),
            Settings::default(),
            store.clone(),
            Arc::new(StaticKnowledge::default()),
        )
        .with_backend(Arc::new(MockBackend::new()));

        let result = engine
            .submit(&Chat::new("c1"), "Hi", None, &mut Recorder::default())
            .await;
        assert!(matches!(result, Err(PalaverError::Store(_))));
        assert!(!engine.is_loading("c1"));

        let created = store.inner.messages("c1").await.unwrap();
        assert_eq!(created.len(), 1);
        assert!(!created[0].is_active);
    }

    #[tokio::test]
    async fn test_retry_of_message_from_another_chat() {
        let backend = MockBackend::new().with_chunks(["hijacked"]);
        let (engine, store) = engine_with(backend.clone(), StaticKnowledge::default());
        let foreign = ChatMessage::exchange("c2", "q", "kept");
        let foreign_id = foreign.id.clone();
        store.insert(foreign).await;

        let result = engine
            .submit(&Chat::new("c1"), "q", Some(&foreign_id), &mut Recorder::default())
            .await;

        assert!(matches!(result, Err(PalaverError::Store(_))));
        assert_eq!(backend.call_count(), 0);
        let untouched = store.get_message(&foreign_id).await.unwrap().unwrap();
        assert_eq!(untouched.reply, "kept");
        assert!(!untouched.is_active);
    }
}
