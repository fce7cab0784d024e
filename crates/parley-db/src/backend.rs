use chrono::{DateTime, Utc};
use rusqlite::ffi;
use tracing::error;

use parley_types::{
    Backend, BackendError, ChangeFilter, ChangeStream, Conversation, ConversationId, Message,
    TypingIndicator, UserId,
};

use crate::Database;

/// Map a query failure onto the collaborator error taxonomy.
pub fn classify(err: anyhow::Error) -> BackendError {
    match err.downcast_ref::<rusqlite::Error>() {
        Some(rusqlite::Error::SqliteFailure(e, msg)) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            let detail = msg.clone().unwrap_or_else(|| e.to_string());
            match e.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => BackendError::Conflict(detail),
                _ => BackendError::Rejected(detail),
            }
        }
        Some(rusqlite::Error::FromSqlConversionFailure(..)) | Some(rusqlite::Error::InvalidColumnType(..)) => {
            BackendError::Corrupt(err.to_string())
        }
        _ => BackendError::Unavailable(err.to_string()),
    }
}

impl Database {
    /// Run a blocking query off the async runtime.
    pub async fn blocking<F, T>(&self, f: F) -> Result<T, BackendError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                BackendError::Unavailable(e.to_string())
            })?
            .map_err(classify)
    }
}

impl Backend for Database {
    async fn participant_conversations(&self, user_id: UserId) -> Result<Vec<ConversationId>, BackendError> {
        self.blocking(move |db| db.conversations_for_user(user_id)).await
    }

    async fn conversation_by_pair_key(&self, pair_key: &str) -> Result<Option<Conversation>, BackendError> {
        let key = pair_key.to_string();
        self.blocking(move |db| db.get_conversation_by_pair_key(&key)).await
    }

    async fn create_conversation(
        &self,
        pair_key: &str,
        user_a: UserId,
        user_b: UserId,
    ) -> Result<Conversation, BackendError> {
        let key = pair_key.to_string();
        self.blocking(move |db| db.create_conversation(Some(&key), user_a, user_b)).await
    }

    async fn is_participant(&self, conversation_id: ConversationId, user_id: UserId) -> Result<bool, BackendError> {
        self.blocking(move |db| db.is_participant(conversation_id, user_id)).await
    }

    async fn insert_message(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        content: &str,
    ) -> Result<Message, BackendError> {
        let content = content.to_string();
        self.blocking(move |db| db.insert_message(conversation_id, user_id, &content)).await
    }

    async fn messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>, BackendError> {
        self.blocking(move |db| db.get_messages(conversation_id)).await
    }

    async fn upsert_typing(&self, indicator: TypingIndicator) -> Result<TypingIndicator, BackendError> {
        self.blocking(move |db| db.upsert_typing(&indicator)).await
    }

    async fn typing_indicators(&self, conversation_id: ConversationId) -> Result<Vec<TypingIndicator>, BackendError> {
        self.blocking(move |db| db.get_typing(conversation_id)).await
    }

    async fn delete_typing_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<TypingIndicator>, BackendError> {
        self.blocking(move |db| db.delete_typing_before(cutoff)).await
    }

    fn subscribe(&self, filter: ChangeFilter) -> Result<ChangeStream, BackendError> {
        Ok(ChangeStream::new(self.changes(), filter))
    }
}
