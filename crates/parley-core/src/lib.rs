//! Parley messaging core.
//!
//! Resolves the unique conversation between two users, delivers messages
//! in order with at-least-once semantics, and propagates typing presence
//! with expiry. Storage and realtime push are delegated to a
//! [`parley_types::Backend`].
//!
//! - `ConversationResolver`: find-or-create, race-free via a unique pair key
//! - `MessageStore`: validated appends, ordered history, catch-up subscriptions
//! - `PresenceTracker`: typing rows, presence subscriptions, stale sweeper
//! - `ChatSession`: per-user actor wiring the three to a selected peer

pub mod clock;
pub mod config;
pub mod error;
pub mod message_store;
pub mod presence;
pub mod resolver;
pub mod retry;
pub mod session;
pub mod subscription;

pub use clock::Clock;
pub use config::CoreConfig;
pub use error::{ChatError, Result};
pub use message_store::{Cursor, MessageStore};
pub use presence::{PresenceEvent, PresenceTracker, TypingView};
pub use resolver::ConversationResolver;
pub use session::{ChatSession, Phase, SessionHandle, SessionView};
pub use subscription::Subscription;
