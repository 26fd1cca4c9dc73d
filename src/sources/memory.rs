//! Session memory: recent turns per session
//!
//! Bounded FIFO per session, evicting the oldest turn at capacity.

use super::MemoryReader;
use crate::errors::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;

/// Default number of recent turns kept per session
const MAX_RECENT_TURNS: usize = 8;

/// Maximum characters kept per turn
const MAX_TURN_CHARS: usize = 500;

/// In-process memory reader
#[derive(Debug)]
pub struct SessionMemory {
    max_turns: usize,
    sessions: DashMap<String, VecDeque<String>>,
}

impl SessionMemory {
    pub fn new() -> Self {
        Self::with_capacity(MAX_RECENT_TURNS)
    }

    pub fn with_capacity(max_turns: usize) -> Self {
        Self {
            max_turns: max_turns.max(1),
            sessions: DashMap::new(),
        }
    }

    /// Record one turn for a session
    pub fn remember(&self, session_id: &str, turn: &str) {
        let turn = turn.trim();
        if turn.is_empty() {
            return;
        }

        // Truncate long turns
        let turn = if turn.chars().count() > MAX_TURN_CHARS {
            let cut: String = turn.chars().take(MAX_TURN_CHARS).collect();
            format!("{}...", cut)
        } else {
            turn.to_string()
        };

        let mut turns = self.sessions.entry(session_id.to_string()).or_default();
        if turns.len() >= self.max_turns {
            turns.pop_front();
        }
        turns.push_back(turn);
    }

    pub fn turn_count(&self, session_id: &str) -> usize {
        self.sessions.get(session_id).map(|t| t.len()).unwrap_or(0)
    }

    pub fn forget(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }
}

impl Default for SessionMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryReader for SessionMemory {
    async fn load_recent(&self, session_id: &str) -> Result<Option<String>> {
        let joined = self.sessions.get(session_id).and_then(|turns| {
            if turns.is_empty() {
                None
            } else {
                Some(turns.iter().cloned().collect::<Vec<_>>().join("\n"))
            }
        });
        Ok(joined)
    }
}
