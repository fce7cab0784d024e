//! Parley shared types.
//!
//! The data model owned by the messaging core, the row-change events a
//! realtime store pushes, and the `Backend` contract every store
//! implementation satisfies. Kept free of any storage engine so the core
//! can be driven by SQLite in production and by test doubles in tests.

pub mod api;
pub mod backend;
pub mod events;
pub mod models;

pub use backend::{Backend, BackendError};
pub use events::{ChangeEvent, ChangeFilter, ChangeStream, EventMask, Row, RowChange, StreamError, Table};
pub use models::{
    Conversation, ConversationId, Message, MessageId, ParticipantLink, TypingIndicator, User,
    UserId, pair_key,
};
