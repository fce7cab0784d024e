pub mod conversations;
pub mod error;
pub mod messages;
pub mod typing;
pub mod users;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use parley_core::{Clock, ConversationResolver, CoreConfig, MessageStore, PresenceTracker};
use parley_db::Database;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub resolver: ConversationResolver<Database>,
    pub store: MessageStore<Database>,
    pub presence: PresenceTracker<Database>,
}

impl AppStateInner {
    pub fn new(db: Database, config: CoreConfig) -> AppState {
        Arc::new(Self {
            resolver: ConversationResolver::new(db.clone(), config.resolve_attempts),
            store: MessageStore::new(db.clone(), config.clone()),
            presence: PresenceTracker::new(db.clone(), config, Clock::new()),
            db,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/users", post(users::login).get(users::list_users))
        .route("/conversations", post(conversations::resolve))
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route(
            "/conversations/{conversation_id}/typing",
            get(typing::get_typing).put(typing::set_typing),
        )
        .with_state(state)
}
