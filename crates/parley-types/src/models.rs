use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub type UserId = Uuid;
pub type ConversationId = Uuid;
pub type MessageId = Uuid;

/// Identity record, owned by the auth collaborator. The messaging core only
/// ever reads `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub phone_number: String,
    pub created_at: DateTime<Utc>,
}

/// A conversation is a join key between exactly two participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    /// Canonical participant-pair key, unique in the store.
    /// `None` only on rows created before the key existed.
    pub pair_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantLink {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
}

/// Immutable once stored. Ordered by `(created_at, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn order_key(&self) -> (DateTime<Utc>, MessageId) {
        (self.created_at, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingIndicator {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub is_typing: bool,
    pub last_updated: DateTime<Utc>,
    pub composite_key: String,
}

impl TypingIndicator {
    pub fn new(
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
        last_updated: DateTime<Utc>,
    ) -> Self {
        Self {
            conversation_id,
            user_id,
            is_typing,
            last_updated,
            composite_key: Self::composite_key(conversation_id, user_id),
        }
    }

    /// Upsert key: one row per (conversation, user).
    pub fn composite_key(conversation_id: ConversationId, user_id: UserId) -> String {
        format!("{}_{}", conversation_id, user_id)
    }
}

/// Canonical key for an unordered pair of users: hex SHA-256 of `"{min}:{max}"`.
pub fn pair_key(a: UserId, b: UserId) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let digest = Sha256::digest(format!("{}:{}", lo, hi).as_bytes());
    hex::encode(digest)
}
