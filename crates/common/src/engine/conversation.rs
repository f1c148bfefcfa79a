use std::sync::Arc;
use tokio::sync::Mutex;

/// Per-session state of the stateful protocol.
///
/// A fresh conversation has no thread; the first turn on a thread carries
/// the retrieved context, later turns rely on the remote thread memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub thread_id: Option<String>,
    pub is_first_turn: bool,
}

/// Conversation guarded for the duration of one `respond` call
pub type SharedConversation = Arc<Mutex<Conversation>>;

impl Default for Conversation {
    fn default() -> Self {
        Self {
            thread_id: None,
            is_first_turn: true,
        }
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a fresh conversation for sharing with an engine
    pub fn shared() -> SharedConversation {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Forget the thread after a terminal run failure
    pub fn reset(&mut self) {
        self.thread_id = None;
        self.is_first_turn = true;
    }
}
