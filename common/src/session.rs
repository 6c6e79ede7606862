use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

pub type SessionId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: String,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Per-session FIFO scratch buffer of recent conversation turns, consulted alongside the
/// L0-L3 activation levels during retrieval. Bounded so a long-running session doesn't
/// grow this unbounded in memory.
pub struct WorkingBuffer {
    capacity: usize,
    sessions: Mutex<HashMap<SessionId, VecDeque<ConversationTurn>>>,
}

impl WorkingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn push(&self, session: &str, turn: ConversationTurn) {
        let mut sessions = self.sessions.lock().await;
        let buf = sessions.entry(session.to_string()).or_default();
        if buf.len() >= self.capacity {
            buf.pop_front();
        }
        buf.push_back(turn);
    }

    pub async fn recent(&self, session: &str, limit: usize) -> Vec<ConversationTurn> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(session)
            .map(|buf| buf.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn evicts_oldest_turn_beyond_capacity() {
        let buffer = WorkingBuffer::new(2);
        for i in 0..3 {
            buffer
                .push(
                    "s1",
                    ConversationTurn {
                        role: "user".into(),
                        text: format!("turn {i}"),
                        at: Utc::now(),
                    },
                )
                .await;
        }
        let recent = buffer.recent("s1", 10).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].text, "turn 2");
        assert_eq!(recent[1].text, "turn 1");
    }
}
