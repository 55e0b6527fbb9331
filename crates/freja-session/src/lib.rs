// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod state;
mod store;

pub use state::{
    generate_session_id, ConnectionInfo, SessionError, SessionInfo, SessionState, TurnUsage,
};
pub use store::{FileSessionStore, SessionStore};
