//! Row decoding. Ids and timestamps are stored as TEXT; a value that fails
//! to parse surfaces as `FromSqlConversionFailure` so callers can tell a
//! corrupt row from an unavailable store.
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use rusqlite::types::Type;
use uuid::Uuid;

use parley_types::{Conversation, Message, TypingIndicator, User};

/// Fixed-width microsecond format so TEXT ordering matches time ordering.
const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

/// Current time at the precision the store keeps.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Rows written by sqlite's datetime('now') carry no timezone.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_uuid(idx: usize, raw: &str) -> rusqlite::Result<Uuid> {
    raw.parse::<Uuid>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub fn uuid_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    parse_uuid(idx, &raw)
}

fn ts_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(idx, &raw)
}

/// `SELECT id, username, email, phone_number, created_at`
pub fn user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_at(row, 0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        phone_number: row.get(3)?,
        created_at: ts_at(row, 4)?,
    })
}

/// `SELECT id, pair_key, created_at`
pub fn conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: uuid_at(row, 0)?,
        pair_key: row.get(1)?,
        created_at: ts_at(row, 2)?,
    })
}

/// `SELECT id, conversation_id, user_id, content, created_at`
pub fn message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: uuid_at(row, 0)?,
        conversation_id: uuid_at(row, 1)?,
        user_id: uuid_at(row, 2)?,
        content: row.get(3)?,
        created_at: ts_at(row, 4)?,
    })
}

/// `SELECT composite_key, conversation_id, user_id, is_typing, last_updated`
pub fn typing(row: &rusqlite::Row<'_>) -> rusqlite::Result<TypingIndicator> {
    Ok(TypingIndicator {
        composite_key: row.get(0)?,
        conversation_id: uuid_at(row, 1)?,
        user_id: uuid_at(row, 2)?,
        is_typing: row.get(3)?,
        last_updated: ts_at(row, 4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_text_sorts_chronologically() {
        let early = "2026-01-01T09:00:00.5Z".parse::<DateTime<Utc>>().unwrap();
        let late = "2026-01-01T09:00:00.123456Z".parse::<DateTime<Utc>>().unwrap();
        assert!(early > late);
        assert!(format_ts(&early) > format_ts(&late));
    }

    #[test]
    fn format_then_parse_keeps_microseconds() {
        let ts = now();
        assert_eq!(parse_ts(0, &format_ts(&ts)).unwrap(), ts);
    }

    #[test]
    fn parses_sqlite_datetime() {
        let ts = parse_ts(0, "2026-03-04 05:06:07").unwrap();
        assert_eq!(format_ts(&ts), "2026-03-04T05:06:07.000000Z");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_ts(0, "yesterday").is_err());
        assert!(parse_uuid(0, "not-a-uuid").is_err());
    }
}
