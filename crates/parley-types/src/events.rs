use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::{Conversation, Message, ParticipantLink, TypingIndicator, User};

/// Tables that emit row-level change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Users,
    Conversations,
    ConversationParticipants,
    Messages,
    TypingIndicators,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeEvent {
    Insert,
    Update,
    Delete,
}

/// Which event types a subscriber wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMask {
    pub insert: bool,
    pub update: bool,
    pub delete: bool,
}

impl EventMask {
    pub const ALL: EventMask = EventMask { insert: true, update: true, delete: true };
    pub const INSERT: EventMask = EventMask { insert: true, update: false, delete: false };

    pub fn contains(&self, event: ChangeEvent) -> bool {
        match event {
            ChangeEvent::Insert => self.insert,
            ChangeEvent::Update => self.update,
            ChangeEvent::Delete => self.delete,
        }
    }
}

/// A decoded row from one of the notifying tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "table", content = "row", rename_all = "snake_case")]
pub enum Row {
    User(User),
    Conversation(Conversation),
    Participant(ParticipantLink),
    Message(Message),
    Typing(TypingIndicator),
}

impl Row {
    pub fn table(&self) -> Table {
        match self {
            Row::User(_) => Table::Users,
            Row::Conversation(_) => Table::Conversations,
            Row::Participant(_) => Table::ConversationParticipants,
            Row::Message(_) => Table::Messages,
            Row::Typing(_) => Table::TypingIndicators,
        }
    }

    /// String value of a column, for equality filtering. Unknown columns
    /// yield `None` and never match.
    pub fn column(&self, name: &str) -> Option<String> {
        match (self, name) {
            (Row::User(u), "id") => Some(u.id.to_string()),
            (Row::User(u), "username") => Some(u.username.clone()),
            (Row::Conversation(c), "id") => Some(c.id.to_string()),
            (Row::Conversation(c), "pair_key") => c.pair_key.clone(),
            (Row::Participant(p), "conversation_id") => Some(p.conversation_id.to_string()),
            (Row::Participant(p), "user_id") => Some(p.user_id.to_string()),
            (Row::Message(m), "id") => Some(m.id.to_string()),
            (Row::Message(m), "conversation_id") => Some(m.conversation_id.to_string()),
            (Row::Message(m), "user_id") => Some(m.user_id.to_string()),
            (Row::Typing(t), "conversation_id") => Some(t.conversation_id.to_string()),
            (Row::Typing(t), "user_id") => Some(t.user_id.to_string()),
            (Row::Typing(t), "composite_key") => Some(t.composite_key.clone()),
            _ => None,
        }
    }
}

/// One row-level change. `old` is set for update/delete, `new` for insert/update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowChange {
    pub event: ChangeEvent,
    pub table: Table,
    pub old: Option<Row>,
    pub new: Option<Row>,
}

impl RowChange {
    pub fn insert(row: Row) -> Self {
        Self { event: ChangeEvent::Insert, table: row.table(), old: None, new: Some(row) }
    }

    pub fn update(old: Option<Row>, new: Row) -> Self {
        Self { event: ChangeEvent::Update, table: new.table(), old, new: Some(new) }
    }

    pub fn delete(old: Row) -> Self {
        Self { event: ChangeEvent::Delete, table: old.table(), old: Some(old), new: None }
    }

    /// The row the change is about: `new` if present, otherwise `old`.
    pub fn row(&self) -> Option<&Row> {
        self.new.as_ref().or(self.old.as_ref())
    }
}

/// Subscription parameters: event types, table, and an optional equality
/// filter on a single column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    pub table: Table,
    pub events: EventMask,
    pub eq: Option<(&'static str, String)>,
}

impl ChangeFilter {
    pub fn table(table: Table) -> Self {
        Self { table, events: EventMask::ALL, eq: None }
    }

    pub fn events(mut self, events: EventMask) -> Self {
        self.events = events;
        self
    }

    pub fn eq(mut self, column: &'static str, value: impl ToString) -> Self {
        self.eq = Some((column, value.to_string()));
        self
    }

    pub fn matches(&self, change: &RowChange) -> bool {
        if change.table != self.table || !self.events.contains(change.event) {
            return false;
        }
        match &self.eq {
            None => true,
            Some((column, value)) => change
                .row()
                .and_then(|row| row.column(column))
                .is_some_and(|v| &v == value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The receiver fell behind and `n` changes were dropped.
    #[error("change stream lagged by {0} events")]
    Lagged(u64),
    #[error("change stream closed")]
    Closed,
}

/// Filtered view over a store's change feed.
pub struct ChangeStream {
    rx: broadcast::Receiver<RowChange>,
    filter: ChangeFilter,
}

impl ChangeStream {
    pub fn new(rx: broadcast::Receiver<RowChange>, filter: ChangeFilter) -> Self {
        Self { rx, filter }
    }

    /// Wait for the next change matching the filter.
    pub async fn recv(&mut self) -> Result<RowChange, StreamError> {
        loop {
            match self.rx.recv().await {
                Ok(change) => {
                    if self.filter.matches(&change) {
                        return Ok(change);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => return Err(StreamError::Lagged(n)),
                Err(broadcast::error::RecvError::Closed) => return Err(StreamError::Closed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn message(conversation_id: Uuid) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id,
            user_id: Uuid::new_v4(),
            content: "hi".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn filter_matches_table_event_and_column() {
        let c = Uuid::new_v4();
        let filter = ChangeFilter::table(Table::Messages)
            .events(EventMask::INSERT)
            .eq("conversation_id", c);

        assert!(filter.matches(&RowChange::insert(Row::Message(message(c)))));
        assert!(!filter.matches(&RowChange::insert(Row::Message(message(Uuid::new_v4())))));
        assert!(!filter.matches(&RowChange::delete(Row::Message(message(c)))));
    }

    #[test]
    fn delete_matches_on_old_row() {
        let c = Uuid::new_v4();
        let filter = ChangeFilter::table(Table::TypingIndicators).eq("conversation_id", c);
        let row = Row::Typing(TypingIndicator::new(c, Uuid::new_v4(), true, Utc::now()));
        assert!(filter.matches(&RowChange::delete(row)));
    }

    #[test]
    fn user_inserts_can_be_watched() {
        let user = User {
            id: Uuid::new_v4(),
            username: "dave".into(),
            email: String::new(),
            phone_number: String::new(),
            created_at: Utc::now(),
        };
        let filter = ChangeFilter::table(Table::Users).events(EventMask::INSERT);
        assert!(filter.matches(&RowChange::insert(Row::User(user.clone()))));
        assert!(!filter.matches(&RowChange::insert(Row::Message(message(user.id)))));
        assert!(ChangeFilter::table(Table::Users).eq("username", "dave").matches(&RowChange::insert(Row::User(user))));
    }

    #[test]
    fn unknown_column_never_matches() {
        let c = Uuid::new_v4();
        let filter = ChangeFilter::table(Table::Messages).eq("nope", c);
        assert!(!filter.matches(&RowChange::insert(Row::Message(message(c)))));
    }

    #[tokio::test]
    async fn stream_skips_unmatched_and_reports_close() {
        let (tx, rx) = broadcast::channel(8);
        let c = Uuid::new_v4();
        let mut stream = ChangeStream::new(rx, ChangeFilter::table(Table::Messages).eq("conversation_id", c));

        tx.send(RowChange::insert(Row::Message(message(Uuid::new_v4())))).unwrap();
        let wanted = message(c);
        tx.send(RowChange::insert(Row::Message(wanted.clone()))).unwrap();
        drop(tx);

        let got = stream.recv().await.unwrap();
        assert_eq!(got.new, Some(Row::Message(wanted)));
        assert_eq!(stream.recv().await, Err(StreamError::Closed));
    }
}
