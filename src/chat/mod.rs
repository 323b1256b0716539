// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Chat turns
//!
//! Context resolution, the streaming session state machine, the per-chat
//! service and the engine that ties a turn to message persistence.

pub mod context;
pub mod engine;
pub mod service;
pub mod session;
pub mod store;
pub mod streaming;
pub mod template;
pub mod types;
pub mod validation;
pub mod window;

pub use context::{ChatContextResolver, EffectiveContext};
pub use engine::{ChatEngine, ChatState, TurnSummary};
pub use service::{ChatService, TurnEvent, TurnHandle};
pub use session::{NoopObserver, SessionState, StreamingSession, TurnObserver, TurnOutcome};
pub use store::{MemoryMessageStore, MessageStore, MessageUpdate, NewMessage, UsageRecord};
pub use streaming::{split_reasoning, StreamAccumulator, ToolInvocation, TurnResult};
pub use template::PromptTemplate;
pub use types::{Chat, ChatMessage};
