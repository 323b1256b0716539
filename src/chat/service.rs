// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Chat service: one backend bound to one resolved context
//!
//! `chat` spawns the streaming session on the Tokio runtime and hands back a
//! `TurnHandle`. The handle delivers `TurnEvent`s in emission order over a
//! channel and ends with exactly one terminal event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chat::context::EffectiveContext;
use crate::chat::session::{StreamingSession, TurnObserver, TurnOutcome};
use crate::chat::streaming::TurnResult;
use crate::error::{PalaverError, Result};
use crate::llm::message::Message;
use crate::llm::provider::{ChatBackend, ChatRequest};

/// One increment of a running turn
#[derive(Debug)]
pub enum TurnEvent {
    Reading {
        content: String,
        reasoning: Option<String>,
    },
    ToolCalls(String),
    Complete(TurnResult),
    Failed {
        error: PalaverError,
        aborted: bool,
        partial: TurnResult,
    },
}

impl TurnEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnEvent::Complete(_) | TurnEvent::Failed { .. })
    }
}

impl From<TurnOutcome> for TurnEvent {
    fn from(outcome: TurnOutcome) -> Self {
        match outcome {
            TurnOutcome::Completed(result) => TurnEvent::Complete(result),
            TurnOutcome::Aborted(partial) => TurnEvent::Failed {
                error: PalaverError::Aborted,
                aborted: true,
                partial,
            },
            TurnOutcome::Failed { error, partial } => TurnEvent::Failed {
                error,
                aborted: false,
                partial,
            },
        }
    }
}

/// Forwards non-terminal session callbacks into the turn channel
struct ChannelObserver {
    tx: mpsc::UnboundedSender<TurnEvent>,
}

impl TurnObserver for ChannelObserver {
    fn on_reading(&mut self, content: &str, reasoning: Option<&str>) {
        let _ = self.tx.send(TurnEvent::Reading {
            content: content.to_string(),
            reasoning: reasoning.map(str::to_string),
        });
    }

    fn on_tool_calls(&mut self, tool_name: &str) {
        let _ = self.tx.send(TurnEvent::ToolCalls(tool_name.to_string()));
    }
}

/// Clears the service's active flag when the turn task ends, even by panic
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Handle to one running turn
pub struct TurnHandle {
    rx: mpsc::UnboundedReceiver<TurnEvent>,
    cancel: CancellationToken,
    message_id: Option<String>,
    finished: bool,
}

impl TurnHandle {
    /// The message being regenerated, for retries
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    /// Request cancellation. Reading events stop immediately; the terminal
    /// event still arrives.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// A token that aborts this turn when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Next event, or `None` after the terminal event was delivered
    pub async fn next_event(&mut self) -> Option<TurnEvent> {
        if self.finished {
            return None;
        }
        loop {
            match self.rx.recv().await {
                Some(event) if event.is_terminal() => {
                    self.finished = true;
                    return Some(event);
                }
                Some(_) if self.cancel.is_cancelled() => continue,
                Some(event) => return Some(event),
                None => {
                    self.finished = true;
                    return Some(TurnEvent::Failed {
                        error: PalaverError::Session(
                            "Turn ended without a terminal event".to_string(),
                        ),
                        aborted: self.cancel.is_cancelled(),
                        partial: TurnResult::default(),
                    });
                }
            }
        }
    }

    /// Deliver every event to `observer` and return how the turn ended
    pub async fn drive(mut self, observer: &mut dyn TurnObserver) -> TurnOutcome {
        loop {
            match self.next_event().await {
                Some(TurnEvent::Reading { content, reasoning }) => {
                    observer.on_reading(&content, reasoning.as_deref());
                }
                Some(TurnEvent::ToolCalls(name)) => observer.on_tool_calls(&name),
                Some(TurnEvent::Complete(result)) => {
                    observer.on_complete(&result);
                    return TurnOutcome::Completed(result);
                }
                Some(TurnEvent::Failed {
                    error,
                    aborted,
                    partial,
                }) => {
                    observer.on_error(&error, aborted);
                    return if aborted {
                        TurnOutcome::Aborted(partial)
                    } else {
                        TurnOutcome::Failed { error, partial }
                    };
                }
                None => {
                    let error = PalaverError::Session("Turn already finished".to_string());
                    observer.on_error(&error, false);
                    return TurnOutcome::Failed {
                        error,
                        partial: TurnResult::default(),
                    };
                }
            }
        }
    }
}

impl Drop for TurnHandle {
    /// A handle dropped before its terminal event cancels the turn task.
    fn drop(&mut self) {
        if !self.finished {
            self.cancel.cancel();
        }
    }
}

/// A backend bound to the context resolved for its turns
pub struct ChatService {
    backend: Arc<dyn ChatBackend>,
    context: EffectiveContext,
    active: Arc<AtomicBool>,
    current: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for ChatService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatService")
            .field("context", &self.context)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl ChatService {
    pub fn new(backend: Arc<dyn ChatBackend>, context: EffectiveContext) -> Self {
        Self {
            backend,
            context,
            active: Arc::new(AtomicBool::new(false)),
            current: Mutex::new(None),
        }
    }

    /// The snapshot this service generates with
    pub fn context(&self) -> &EffectiveContext {
        &self.context
    }

    pub fn backend(&self) -> &Arc<dyn ChatBackend> {
        &self.backend
    }

    /// Backend name for usage records
    pub fn provider_name(&self) -> &str {
        self.backend.name()
    }

    /// Whether credentials and endpoint are configured
    pub fn is_ready(&self) -> bool {
        self.backend.is_ready()
    }

    /// Whether a turn of this service is still running
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Request for `messages` under this service's context
    pub fn build_request(&self, messages: Vec<Message>) -> ChatRequest {
        let ctx = &self.context;
        let mut request = ChatRequest::new(ctx.model().name.clone(), messages)
            .with_max_tokens(ctx.max_tokens())
            .with_temperature(ctx.temperature())
            .with_stream(ctx.stream());
        if let Some(system) = ctx.system_message() {
            request = request.with_system(system);
        }
        request
    }

    /// Start one turn. Must be called from within a Tokio runtime.
    ///
    /// Fails with a session error while a previous turn of this service is
    /// still running.
    pub fn chat(
        &self,
        messages: Vec<Message>,
        resume_message_id: Option<String>,
    ) -> Result<TurnHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PalaverError::Session(format!("No async runtime: {}", e)))?;

        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PalaverError::Session(
                "A turn is already in progress for this chat".to_string(),
            ));
        }
        let guard = ActiveGuard(Arc::clone(&self.active));

        let cancel = CancellationToken::new();
        match self.current.lock() {
            Ok(mut current) => *current = Some(cancel.clone()),
            Err(poisoned) => *poisoned.into_inner() = Some(cancel.clone()),
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let request = self.build_request(messages);
        let backend = Arc::clone(&self.backend);
        let token = cancel.clone();

        runtime.spawn(async move {
            let mut forwarder = ChannelObserver { tx: tx.clone() };
            let outcome = StreamingSession::new()
                .run(backend.as_ref(), request, &token, &mut forwarder)
                .await;
            // Clear the flag before the terminal event so a caller reacting
            // to it can start the next turn.
            drop(guard);
            let _ = tx.send(TurnEvent::from(outcome));
        });

        Ok(TurnHandle {
            rx,
            cancel,
            message_id: resume_message_id,
            finished: false,
        })
    }

    /// Abort the current turn, if any
    pub fn abort(&self) {
        let current = match self.current.lock() {
            Ok(current) => current.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if let Some(token) = current {
            tracing::debug!(target: "palaver.chat.service", "Aborting turn");
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ProviderCatalog;
    use crate::chat::context::ChatContextResolver;
    use crate::chat::session::NoopObserver;
    use crate::chat::types::Chat;
    use crate::config::Settings;
    use crate::llm::mock_backend::{MockBackend, MockStep};
    use std::time::Duration;

    fn service(backend: MockBackend, chat: &Chat) -> ChatService {
        let catalog = ProviderCatalog::builtin();
        let settings = Settings::default();
        let context = ChatContextResolver::new(&catalog, &settings).resolve(chat);
        ChatService::new(Arc::new(backend), context)
    }

    #[derive(Default)]
    struct Counter {
        readings: usize,
        terminals: usize,
        aborted: bool,
    }

    impl TurnObserver for Counter {
        fn on_reading(&mut self, _content: &str, _reasoning: Option<&str>) {
            self.readings += 1;
        }

        fn on_complete(&mut self, _result: &TurnResult) {
            self.terminals += 1;
        }

        fn on_error(&mut self, _error: &PalaverError, aborted: bool) {
            self.terminals += 1;
            self.aborted = aborted;
        }
    }

    #[test]
    fn test_build_request_uses_context() {
        let chat = Chat::new("c")
            .with_system_message("Be brief")
            .with_temperature(0.4)
            .with_stream(false);
        let service = service(MockBackend::new(), &chat);
        let request = service.build_request(vec![Message::user("Hi")]);

        assert_eq!(request.model, "gpt-4o");
        assert_eq!(request.system.as_deref(), Some("Be brief"));
        assert!((request.temperature - 0.4).abs() < 1e-6);
        assert!(!request.stream);
        assert_eq!(request.max_tokens, 4096);
    }

    #[test]
    fn test_chat_outside_runtime_is_rejected() {
        let service = service(MockBackend::new(), &Chat::new("c"));
        assert!(matches!(
            service.chat(vec![Message::user("Hi")], None),
            Err(PalaverError::Session(_))
        ));
        assert!(!service.is_active());
    }

    #[tokio::test]
    async fn test_turn_delivers_events_then_completes() {
        let backend = MockBackend::new().with_chunks(["a", "b", "c"]);
        let service = service(backend.clone(), &Chat::new("c"));
        let handle = service
            .chat(vec![Message::user("Hi")], Some("m1".into()))
            .unwrap();
        assert_eq!(handle.message_id(), Some("m1"));

        let mut counter = Counter::default();
        let outcome = handle.drive(&mut counter).await;

        assert!(outcome.is_completed());
        assert_eq!(outcome.result().content, "abc");
        assert_eq!(counter.readings, 3);
        assert_eq!(counter.terminals, 1);
        assert!(!service.is_active());
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_second_turn_rejected_while_active() {
        let backend = MockBackend::new().with_steps(vec![MockStep::Hang]);
        let service = service(backend, &Chat::new("c"));
        let handle = service.chat(vec![Message::user("one")], None).unwrap();

        assert!(service.is_active());
        assert!(matches!(
            service.chat(vec![Message::user("two")], None),
            Err(PalaverError::Session(_))
        ));

        service.abort();
        let outcome = handle.drive(&mut NoopObserver).await;
        assert!(outcome.is_aborted());
        assert!(!service.is_active());
    }

    #[tokio::test]
    async fn test_abort_stops_reading_and_fires_one_terminal() {
        let backend = MockBackend::new().with_steps(vec![
            MockStep::Text("one".into()),
            MockStep::Delay(Duration::from_millis(30)),
            MockStep::Text("two".into()),
            MockStep::Hang,
        ]);
        let service = service(backend, &Chat::new("c"));
        let mut handle = service.chat(vec![Message::user("Hi")], None).unwrap();

        let first = handle.next_event().await;
        assert!(matches!(first, Some(TurnEvent::Reading { ref content, .. }) if content == "one"));
        handle.abort();

        let mut counter = Counter::default();
        let outcome = handle.drive(&mut counter).await;

        assert!(outcome.is_aborted());
        assert_eq!(outcome.result().content, "one");
        assert_eq!(counter.readings, 0);
        assert_eq!(counter.terminals, 1);
        assert!(counter.aborted);
    }

    #[tokio::test]
    async fn test_drive_after_terminal_is_none() {
        let service = service(MockBackend::new(), &Chat::new("c"));
        let mut handle = service.chat(vec![Message::user("Hi")], None).unwrap();
        while let Some(event) = handle.next_event().await {
            if event.is_terminal() {
                break;
            }
        }
        assert!(handle.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_service_can_run_again_after_turn() {
        let service = service(MockBackend::new(), &Chat::new("c"));
        let first = service.chat(vec![Message::user("1")], None).unwrap();
        first.drive(&mut NoopObserver).await;
        let second = service.chat(vec![Message::user("2")], None).unwrap();
        assert!(second.drive(&mut NoopObserver).await.is_completed());
    }

    #[tokio::test]
    async fn test_dropping_handle_cancels_turn() {
        let backend = MockBackend::new().with_steps(vec![MockStep::Hang]);
        let service = service(backend, &Chat::new("c"));
        let handle = service.chat(vec![Message::user("Hi")], None).unwrap();
        let token = handle.cancellation_token();

        drop(handle);
        assert!(token.is_cancelled());

        tokio::time::timeout(Duration::from_secs(1), async {
            while service.is_active() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_finished_handle_drop_leaves_token_alone() {
        let service = service(MockBackend::new(), &Chat::new("c"));
        let handle = service.chat(vec![Message::user("Hi")], None).unwrap();
        let token = handle.cancellation_token();
        assert!(handle.drive(&mut NoopObserver).await.is_completed());
        assert!(!token.is_cancelled());
    }
}
