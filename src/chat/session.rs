// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Streaming session
//!
//! Drives one generation from dispatch to a terminal state:
//!
//! ```text
//! Idle -> Dispatched -> Streaming(Reasoning | Content) -> Completed
//!                   \                                \-> Aborted
//!                    \--------------------------------\-> Errored
//! ```
//!
//! Observer callbacks fire in backend emission order. Exactly one terminal
//! callback fires per turn, and none of the reading callbacks fire after
//! cancellation is observed.

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::chat::streaming::{StreamAccumulator, StreamEventResult, TurnResult};
use crate::error::{ApiError, PalaverError, Result};
use crate::llm::provider::{ChatBackend, ChatRequest};

/// Which channel the model is currently writing to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Reasoning,
    Content,
}

/// Life cycle of one turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Dispatched,
    Streaming(Phase),
    Completed,
    Aborted,
    Errored,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Aborted | SessionState::Errored
        )
    }

    fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Dispatched)
                | (Dispatched, Streaming(_))
                | (Streaming(_), Streaming(_))
                | (Dispatched | Streaming(_), Completed | Aborted | Errored)
        )
    }
}

/// Receives the events of one turn
///
/// All methods default to no-ops so observers implement only what they need.
pub trait TurnObserver: Send {
    /// New reply text or reasoning text, in emission order
    fn on_reading(&mut self, _content: &str, _reasoning: Option<&str>) {}

    /// The model asked to run a tool
    fn on_tool_calls(&mut self, _tool_name: &str) {}

    /// The backend finished normally
    fn on_complete(&mut self, _result: &TurnResult) {}

    /// The turn failed or was aborted
    fn on_error(&mut self, _error: &PalaverError, _aborted: bool) {}
}

/// Observer that ignores every event
#[derive(Debug, Default)]
pub struct NoopObserver;

impl TurnObserver for NoopObserver {}

/// How a turn ended
#[derive(Debug)]
pub enum TurnOutcome {
    Completed(TurnResult),
    /// Cancelled by the caller; carries the partial output
    Aborted(TurnResult),
    /// Backend or transport failure; carries the partial output
    Failed {
        error: PalaverError,
        partial: TurnResult,
    },
}

impl TurnOutcome {
    /// Output produced before the turn ended
    pub fn result(&self) -> &TurnResult {
        match self {
            TurnOutcome::Completed(result) | TurnOutcome::Aborted(result) => result,
            TurnOutcome::Failed { partial, .. } => partial,
        }
    }

    pub fn error(&self) -> Option<&PalaverError> {
        match self {
            TurnOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TurnOutcome::Completed(_))
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, TurnOutcome::Aborted(_))
    }

    /// Whether the turn ended with an error signal (failure or abort)
    pub fn has_error(&self) -> bool {
        !self.is_completed()
    }
}

/// State machine for one outstanding generation
#[derive(Debug)]
pub struct StreamingSession {
    state: SessionState,
    accumulator: StreamAccumulator,
}

impl Default for StreamingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            accumulator: StreamAccumulator::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move to `next`, rejecting transitions the life cycle does not allow
    pub fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(PalaverError::Session(format!(
                "Illegal session transition: {:?} -> {:?}",
                self.state, next
            )));
        }
        tracing::trace!(
            target: "palaver.chat.session",
            from = ?self.state,
            to = ?next,
            "Session transition"
        );
        self.state = next;
        Ok(())
    }

    /// Run one turn against `backend`, reporting to `observer`.
    ///
    /// Cancellation is checked before every stream poll and wins over a
    /// ready event.
    pub async fn run(
        mut self,
        backend: &dyn ChatBackend,
        request: ChatRequest,
        cancel: &CancellationToken,
        observer: &mut dyn TurnObserver,
    ) -> TurnOutcome {
        if let Err(e) = self.transition(SessionState::Dispatched) {
            observer.on_error(&e, false);
            return TurnOutcome::Failed {
                error: e,
                partial: TurnResult::default(),
            };
        }

        tracing::debug!(
            target: "palaver.chat.session",
            backend = %backend.name(),
            model = %request.model,
            messages = request.messages.len(),
            stream = request.stream,
            "Dispatching turn"
        );

        let dispatched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return self.abort(observer),
            result = backend.complete_stream(request) => result,
        };
        let mut stream = match dispatched {
            Ok(stream) => stream,
            Err(e) => return self.fail(e, observer),
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.abort(observer),
                next = stream.next() => next,
            };

            let event = match next {
                None => return self.complete(observer),
                Some(Err(e)) => return self.fail(e, observer),
                Some(Ok(event)) => event,
            };

            match self.accumulator.process_event(event) {
                StreamEventResult::TextDelta(text) => {
                    self.enter(Phase::Content);
                    observer.on_reading(&text, None);
                }
                StreamEventResult::ReasoningDelta(reasoning) => {
                    let phase = match self.state {
                        SessionState::Streaming(Phase::Content) => Phase::Content,
                        _ => Phase::Reasoning,
                    };
                    self.enter(phase);
                    observer.on_reading("", Some(&reasoning));
                }
                StreamEventResult::ToolStarted(name) => {
                    let phase = match self.state {
                        SessionState::Streaming(phase) => phase,
                        _ => Phase::Content,
                    };
                    self.enter(phase);
                    tracing::debug!(target: "palaver.chat.session", tool = %name, "Tool call");
                    observer.on_tool_calls(&name);
                }
                StreamEventResult::MessageStop => return self.complete(observer),
                StreamEventResult::Error {
                    error_type,
                    message,
                } => {
                    let error = PalaverError::Api(ApiError::StreamError(format!(
                        "{}: {}",
                        error_type, message
                    )));
                    return self.fail(error, observer);
                }
                _ => {}
            }
        }
    }

    fn enter(&mut self, phase: Phase) {
        let next = SessionState::Streaming(phase);
        if self.state != next {
            if let Err(e) = self.transition(next) {
                tracing::warn!(target: "palaver.chat.session", error = %e, "Ignoring transition");
            }
        }
    }

    fn finish_as(&mut self, state: SessionState) -> TurnResult {
        if let Err(e) = self.transition(state) {
            tracing::warn!(target: "palaver.chat.session", error = %e, "Forcing terminal state");
            self.state = state;
        }
        std::mem::take(&mut self.accumulator).finish()
    }

    fn complete(mut self, observer: &mut dyn TurnObserver) -> TurnOutcome {
        let result = self.finish_as(SessionState::Completed);
        tracing::debug!(
            target: "palaver.chat.session",
            content_len = result.content.len(),
            reasoning_len = result.reasoning.len(),
            input_tokens = result.input_tokens,
            output_tokens = result.output_tokens,
            "Turn completed"
        );
        observer.on_complete(&result);
        TurnOutcome::Completed(result)
    }

    fn abort(mut self, observer: &mut dyn TurnObserver) -> TurnOutcome {
        let partial = self.finish_as(SessionState::Aborted);
        tracing::debug!(
            target: "palaver.chat.session",
            content_len = partial.content.len(),
            "Turn aborted"
        );
        observer.on_error(&PalaverError::Aborted, true);
        TurnOutcome::Aborted(partial)
    }

    fn fail(mut self, error: PalaverError, observer: &mut dyn TurnObserver) -> TurnOutcome {
        let partial = self.finish_as(SessionState::Errored);
        tracing::warn!(
            target: "palaver.chat.session",
            error = %error,
            partial_len = partial.content.len(),
            "Turn failed"
        );
        observer.on_error(&error, false);
        TurnOutcome::Failed { error, partial }
    }
}
