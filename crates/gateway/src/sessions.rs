//! Conversation session store
//!
//! Maps a session id to the conversation it owns. Each session gets its
//! own [`Conversation`], so unrelated callers never share a thread.
//! Sessions idle for longer than the TTL are evicted by a background sweep.

use ragline_common::{metrics, Conversation, SharedConversation};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

struct SessionEntry {
    conversation: SharedConversation,
    last_seen: Instant,
}

/// Shared, cloneable handle to all live sessions
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, SessionEntry>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Conversation of `session_id`, created on first use
    pub async fn get_or_create(&self, session_id: &str) -> SharedConversation {
        let mut sessions = self.sessions.lock().await;
        let now = Instant::now();

        let entry = sessions.entry(session_id.to_string()).or_insert_with(|| {
            debug!(session_id, "Session created");
            SessionEntry {
                conversation: Conversation::shared(),
                last_seen: now,
            }
        });
        entry.last_seen = now;
        let conversation = entry.conversation.clone();

        metrics::set_active_sessions(sessions.len());
        conversation
    }

    /// Drop sessions idle longer than the TTL.
    ///
    /// A session whose conversation is locked has a turn in flight and is
    /// kept regardless of age.
    pub async fn evict_expired(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        let ttl = self.ttl;

        sessions.retain(|_, entry| {
            entry.last_seen.elapsed() < ttl || entry.conversation.try_lock().is_err()
        });

        let evicted = before - sessions.len();
        metrics::set_active_sessions(sessions.len());
        evicted
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Run [`evict_expired`](Self::evict_expired) every `period` for the
    /// life of the process
    pub fn spawn_sweeper(&self, period: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = store.evict_expired().await;
                if evicted > 0 {
                    info!(evicted, "Expired sessions evicted");
                }
            }
        })
    }
}
