use parley_types::{BackendError, ConversationId, UserId};

/// Every failure the messaging core reports. None of these crash the
/// process; they are returned to the session layer as values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// Transient: retrying the same action later may succeed.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("user {user_id} is not a participant of conversation {conversation_id}")]
    NotAParticipant {
        conversation_id: ConversationId,
        user_id: UserId,
    },

    #[error("message content is empty")]
    EmptyContent,

    #[error("message content is {len} bytes, limit is {max}")]
    ContentTooLong { len: usize, max: usize },

    /// Integrity violation: more than one conversation links the same pair.
    #[error("{} conversations found for {user_a} and {user_b}", conversations.len())]
    DuplicateConversation {
        user_a: UserId,
        user_b: UserId,
        conversations: Vec<ConversationId>,
    },

    #[error("cannot open a conversation with yourself ({0})")]
    SelfConversation(UserId),

    /// The store refused the write (unknown user, constraint).
    #[error("store rejected the write: {0}")]
    Rejected(String),

    #[error("no active conversation")]
    NoActiveConversation,

    #[error("session closed")]
    SessionClosed,
}

impl ChatError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ChatError::StoreUnavailable(_))
    }
}

impl From<BackendError> for ChatError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unavailable(msg) | BackendError::Corrupt(msg) => ChatError::StoreUnavailable(msg),
            BackendError::Conflict(msg) | BackendError::Rejected(msg) => ChatError::Rejected(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
