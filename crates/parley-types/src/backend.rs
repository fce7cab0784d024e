use std::future::Future;

use chrono::{DateTime, Utc};

use crate::events::{ChangeFilter, ChangeStream};
use crate::models::{Conversation, ConversationId, Message, TypingIndicator, UserId};

/// Errors a store reports back to the messaging core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Transient: backend down, lock poisoned, I/O failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A unique or primary key constraint rejected the write.
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    /// Any other constraint (foreign key, check) rejected the write.
    #[error("write rejected: {0}")]
    Rejected(String),
    /// A stored row could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// The managed relational store the messaging core is built on: filtered
/// queries, inserts, upsert-by-key, and a row-level change feed.
///
/// Implementations are cheap handles (`Clone`) shared between the resolver,
/// the message store, the presence tracker and their background pumps.
pub trait Backend: Clone + Send + Sync + 'static {
    /// Ids of every conversation `user_id` participates in.
    fn participant_conversations(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<Vec<ConversationId>, BackendError>> + Send;

    fn conversation_by_pair_key(
        &self,
        pair_key: &str,
    ) -> impl Future<Output = Result<Option<Conversation>, BackendError>> + Send;

    /// Create a conversation and both participant links in one transaction.
    /// Fails with `Conflict` when `pair_key` already exists.
    fn create_conversation(
        &self,
        pair_key: &str,
        user_a: UserId,
        user_b: UserId,
    ) -> impl Future<Output = Result<Conversation, BackendError>> + Send;

    fn is_participant(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> impl Future<Output = Result<bool, BackendError>> + Send;

    /// Append a message; the store assigns id and timestamp.
    fn insert_message(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        content: &str,
    ) -> impl Future<Output = Result<Message, BackendError>> + Send;

    /// Every message of a conversation, ascending by `(created_at, id)`.
    fn messages(
        &self,
        conversation_id: ConversationId,
    ) -> impl Future<Output = Result<Vec<Message>, BackendError>> + Send;

    /// Insert or replace the row with the same composite key.
    fn upsert_typing(
        &self,
        indicator: TypingIndicator,
    ) -> impl Future<Output = Result<TypingIndicator, BackendError>> + Send;

    fn typing_indicators(
        &self,
        conversation_id: ConversationId,
    ) -> impl Future<Output = Result<Vec<TypingIndicator>, BackendError>> + Send;

    /// Delete indicator rows last updated before `cutoff`, returning them.
    fn delete_typing_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<TypingIndicator>, BackendError>> + Send;

    /// Attach to the change feed. Changes committed after this returns are
    /// delivered in commit order.
    fn subscribe(&self, filter: ChangeFilter) -> Result<ChangeStream, BackendError>;
}
