use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;
use uuid::Uuid;

use parley_types::{Conversation, Message, ParticipantLink, Row, RowChange, TypingIndicator, User};

use crate::Database;
use crate::rows::{self, format_ts};

impl Database {
    // -- Users --

    pub fn create_user(&self, username: &str, email: &str, phone_number: &str) -> Result<User> {
        self.with_conn_mut(|conn| {
            let user = User {
                id: Uuid::new_v4(),
                username: username.to_string(),
                email: email.to_string(),
                phone_number: phone_number.to_string(),
                created_at: rows::now(),
            };
            conn.execute(
                "INSERT INTO users (id, username, email, phone_number, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user.id.to_string(),
                    user.username,
                    user.email,
                    user.phone_number,
                    format_ts(&user.created_at)
                ],
            )?;
            let change = RowChange::insert(Row::User(user.clone()));
            Ok((user, vec![change]))
        })
    }

    /// Get-or-create by username. A concurrent creation of the same name is
    /// absorbed by `INSERT OR IGNORE`. Only an actual creation is published.
    pub fn login_user(&self, username: &str, email: &str, phone_number: &str) -> Result<User> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO users (id, username, email, phone_number, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    Uuid::new_v4().to_string(),
                    username,
                    email,
                    phone_number,
                    format_ts(&rows::now())
                ],
            )?;
            let user = query_user_by_username(conn, username)?
                .ok_or_else(|| anyhow::anyhow!("User vanished after insert: {}", username))?;
            let changes = if inserted > 0 {
                info!("Created user {}", user.username);
                vec![RowChange::insert(Row::User(user.clone()))]
            } else {
                vec![]
            };
            Ok((user, changes))
        })
    }

    /// All users, optionally leaving one out (the caller's own row).
    pub fn list_users(&self, exclude: Option<Uuid>) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, email, phone_number, created_at FROM users
                 WHERE ?1 IS NULL OR id != ?1
                 ORDER BY username",
            )?;
            let users = stmt
                .query_map([exclude.map(|id| id.to_string())], rows::user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(users)
        })
    }

    // -- Conversations --

    pub fn conversations_for_user(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT conversation_id FROM conversation_participants WHERE user_id = ?1",
            )?;
            let ids = stmt
                .query_map([user_id.to_string()], |row| rows::uuid_at(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    pub fn get_conversation_by_pair_key(&self, pair_key: &str) -> Result<Option<Conversation>> {
        self.with_conn(|conn| {
            let conversation = conn
                .query_row(
                    "SELECT id, pair_key, created_at FROM conversations WHERE pair_key = ?1",
                    [pair_key],
                    rows::conversation,
                )
                .optional()?;
            Ok(conversation)
        })
    }

    /// Conversation row plus both participant links, all or nothing.
    pub fn create_conversation(&self, pair_key: Option<&str>, user_a: Uuid, user_b: Uuid) -> Result<Conversation> {
        self.with_conn_mut(|conn| {
            let conversation = Conversation {
                id: Uuid::new_v4(),
                pair_key: pair_key.map(str::to_string),
                created_at: rows::now(),
            };

            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO conversations (id, pair_key, created_at) VALUES (?1, ?2, ?3)",
                params![conversation.id.to_string(), conversation.pair_key, format_ts(&conversation.created_at)],
            )?;
            let mut changes = vec![RowChange::insert(Row::Conversation(conversation.clone()))];
            for user_id in [user_a, user_b] {
                tx.execute(
                    "INSERT INTO conversation_participants (conversation_id, user_id) VALUES (?1, ?2)",
                    params![conversation.id.to_string(), user_id.to_string()],
                )?;
                changes.push(RowChange::insert(Row::Participant(ParticipantLink {
                    conversation_id: conversation.id,
                    user_id,
                })));
            }
            tx.commit()?;

            info!("Created conversation {} for {} and {}", conversation.id, user_a, user_b);
            Ok((conversation, changes))
        })
    }

    pub fn is_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM conversation_participants WHERE conversation_id = ?1 AND user_id = ?2",
                    [conversation_id.to_string(), user_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn get_participants(&self, conversation_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM conversation_participants WHERE conversation_id = ?1 ORDER BY user_id",
            )?;
            let ids = stmt
                .query_map([conversation_id.to_string()], |row| rows::uuid_at(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    // -- Messages --

    /// Append a message. `created_at` is strictly greater than every earlier
    /// message in the same conversation, so insertion order is the read order.
    pub fn insert_message(&self, conversation_id: Uuid, user_id: Uuid, content: &str) -> Result<Message> {
        self.with_conn_mut(|conn| {
            let latest: Option<String> = conn.query_row(
                "SELECT MAX(created_at) FROM messages WHERE conversation_id = ?1",
                [conversation_id.to_string()],
                |row| row.get(0),
            )?;

            let mut created_at = rows::now();
            if let Some(latest) = latest.map(|raw| rows::parse_ts(0, &raw)).transpose()? {
                if created_at <= latest {
                    created_at = latest + Duration::microseconds(1);
                }
            }

            let message = Message {
                id: Uuid::new_v4(),
                conversation_id,
                user_id,
                content: content.to_string(),
                created_at,
            };
            conn.execute(
                "INSERT INTO messages (id, conversation_id, user_id, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    message.id.to_string(),
                    conversation_id.to_string(),
                    user_id.to_string(),
                    message.content,
                    format_ts(&message.created_at)
                ],
            )?;

            let change = RowChange::insert(Row::Message(message.clone()));
            Ok((message, vec![change]))
        })
    }

    pub fn get_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, user_id, content, created_at
                 FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY created_at ASC, id ASC",
            )?;
            let messages = stmt
                .query_map([conversation_id.to_string()], rows::message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(messages)
        })
    }

    // -- Typing indicators --

    /// Insert or replace by composite key. Publishes an insert for a new row
    /// and an update (with the previous row) otherwise.
    pub fn upsert_typing(&self, indicator: &TypingIndicator) -> Result<TypingIndicator> {
        self.with_conn_mut(|conn| {
            let previous = conn
                .query_row(
                    "SELECT composite_key, conversation_id, user_id, is_typing, last_updated
                     FROM typing_indicators WHERE composite_key = ?1",
                    [&indicator.composite_key],
                    rows::typing,
                )
                .optional()?;

            conn.execute(
                "INSERT INTO typing_indicators (composite_key, conversation_id, user_id, is_typing, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(composite_key) DO UPDATE SET
                     is_typing = excluded.is_typing,
                     last_updated = excluded.last_updated",
                params![
                    indicator.composite_key,
                    indicator.conversation_id.to_string(),
                    indicator.user_id.to_string(),
                    indicator.is_typing,
                    format_ts(&indicator.last_updated)
                ],
            )?;

            let row = Row::Typing(indicator.clone());
            let change = match previous {
                Some(old) => RowChange::update(Some(Row::Typing(old)), row),
                None => RowChange::insert(row),
            };
            Ok((indicator.clone(), vec![change]))
        })
    }

    pub fn get_typing(&self, conversation_id: Uuid) -> Result<Vec<TypingIndicator>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT composite_key, conversation_id, user_id, is_typing, last_updated
                 FROM typing_indicators WHERE conversation_id = ?1
                 ORDER BY composite_key",
            )?;
            let indicators = stmt
                .query_map([conversation_id.to_string()], rows::typing)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(indicators)
        })
    }

    pub fn delete_typing_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<TypingIndicator>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let stale = {
                let mut stmt = tx.prepare(
                    "SELECT composite_key, conversation_id, user_id, is_typing, last_updated
                     FROM typing_indicators WHERE last_updated < ?1",
                )?;
                let found = stmt
                    .query_map([format_ts(&cutoff)], rows::typing)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                found
            };
            tx.execute(
                "DELETE FROM typing_indicators WHERE last_updated < ?1",
                [format_ts(&cutoff)],
            )?;
            tx.commit()?;

            let changes = stale
                .iter()
                .cloned()
                .map(|row| RowChange::delete(Row::Typing(row)))
                .collect();
            Ok((stale, changes))
        })
    }
}

fn query_user_by_username(conn: &Connection, username: &str) -> Result<Option<User>> {
    let user = conn
        .query_row(
            "SELECT id, username, email, phone_number, created_at FROM users WHERE username = ?1",
            [username],
            rows::user,
        )
        .optional()?;
    Ok(user)
}
