// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! LLM module for Palaver
//!
//! The uniform backend contract, its wire implementations and the factory
//! that picks one per provider.

pub mod factory;
pub mod message;
pub mod mock_backend;
pub mod provider;
pub mod providers;

pub use factory::{create_backend, ChatServiceFactory};
pub use message::*;
pub use mock_backend::{MockBackend, MockStep};
pub use provider::*;
