//! Bounded per-session conversation history with an optional durable mirror.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::entities::ExtractedEntity;
use super::matcher::CommandCategory;

/// Retained turns per session; older turns are evicted FIFO.
pub const HISTORY_LIMIT: usize = 20;

/// Who produced a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Speaker {
    User,
    Agent,
}

/// One exchange in the conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub turn_id: String,
    pub speaker: Speaker,
    pub content: String,
    /// Classified intent, for user turns that routed to one.
    pub intent: Option<CommandCategory>,
    pub entities: Vec<ExtractedEntity>,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    #[must_use]
    pub fn user(
        content: impl Into<String>,
        intent: Option<CommandCategory>,
        entities: Vec<ExtractedEntity>,
    ) -> Self {
        Self {
            turn_id: Uuid::new_v4().to_string(),
            speaker: Speaker::User,
            content: content.into(),
            intent,
            entities,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn agent(content: impl Into<String>) -> Self {
        Self {
            turn_id: Uuid::new_v4().to_string(),
            speaker: Speaker::Agent,
            content: content.into(),
            intent: None,
            entities: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Optional collaborator for durable history beyond the in-memory window.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn append_turn(
        &self,
        session_id: &str,
        turn: &ConversationTurn,
    ) -> Result<(), ConversationStoreError>;
}

/// Failure reported by a [`ConversationStore`] implementation.
#[derive(Debug, thiserror::Error)]
#[error("conversation store error: {message}")]
pub struct ConversationStoreError {
    pub message: String,
}

/// In-memory bounded history, guarded independently of session state.
///
/// The lock here covers only the history map; it is never held across an
/// await and never nests with the hub's session locks.
pub struct ConversationHistory {
    turns: Mutex<FxHashMap<String, VecDeque<ConversationTurn>>>,
    limit: usize,
    store: Option<Arc<dyn ConversationStore>>,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new(HISTORY_LIMIT, None)
    }
}

impl ConversationHistory {
    #[must_use]
    pub fn new(limit: usize, store: Option<Arc<dyn ConversationStore>>) -> Self {
        Self {
            turns: Mutex::new(FxHashMap::default()),
            limit: limit.max(1),
            store,
        }
    }

    /// Append a turn, evicting the oldest beyond the window.
    ///
    /// When a durable store is configured the turn is mirrored to it on a
    /// detached task; mirror failures are logged and never surfaced.
    pub fn append(&self, session_id: &str, turn: ConversationTurn) {
        {
            let mut map = self.turns.lock();
            let entry = map.entry(session_id.to_string()).or_default();
            entry.push_back(turn.clone());
            while entry.len() > self.limit {
                entry.pop_front();
            }
        }
        if let Some(store) = &self.store {
            let store = Arc::clone(store);
            let session_id = session_id.to_string();
            tokio::spawn(async move {
                if let Err(err) = store.append_turn(&session_id, &turn).await {
                    warn!(session_id, error = %err, "conversation mirror failed");
                }
            });
        }
    }

    /// Snapshot of the retained turns, oldest first.
    #[must_use]
    pub fn turns_for(&self, session_id: &str) -> Vec<ConversationTurn> {
        self.turns
            .lock()
            .get(session_id)
            .map(|turns| turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop a session's retained history.
    pub fn clear(&self, session_id: &str) {
        self.turns.lock().remove(session_id);
    }
}
