//! Per-session conversation history.
//!
//! Sessions are owned by the orchestrator; each session is mutated only by
//! its owning request, under a per-session lock. Only the current turn's
//! normalized query feeds retrieval; the history rides along as context
//! for synthesis.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::core::HistoryTurn;

/// One live session.
#[derive(Debug, Default)]
pub struct Session {
    turns: VecDeque<HistoryTurn>,
}

impl Session {
    /// The retained turns, oldest first.
    #[must_use]
    pub fn turns(&self) -> Vec<HistoryTurn> {
        self.turns.iter().cloned().collect()
    }
}

/// Session registry with per-session locking.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Arc<tokio::sync::Mutex<Session>>>>,
    max_turns: usize,
}

impl SessionStore {
    /// Creates a store retaining at most `max_turns` turns per session.
    #[must_use]
    pub fn new(max_turns: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_turns,
        }
    }

    fn handle(&self, session_id: &str) -> Arc<tokio::sync::Mutex<Session>> {
        let Ok(mut sessions) = self.sessions.lock() else {
            return Arc::new(tokio::sync::Mutex::new(Session::default()));
        };
        Arc::clone(
            sessions
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(Session::default()))),
        )
    }

    /// The retained history of a session, oldest first.
    pub async fn history(&self, session_id: &str) -> Vec<HistoryTurn> {
        let handle = self.handle(session_id);
        let session = handle.lock().await;
        session.turns()
    }

    /// Records a completed turn, trimming to the retention window.
    pub async fn record_turn(&self, session_id: &str, user: String, assistant: String) {
        let handle = self.handle(session_id);
        let mut session = handle.lock().await;
        session.turns.push_back(HistoryTurn { user, assistant });
        while session.turns.len() > self.max_turns {
            session.turns.pop_front();
        }
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().map_or(0, |sessions| sessions.len())
    }

    /// Returns `true` when no sessions exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
