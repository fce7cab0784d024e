use std::collections::HashSet;

use tracing::{debug, error, info, warn};

use parley_types::{Backend, BackendError, ConversationId, UserId, pair_key};

use crate::error::{ChatError, Result};

/// Finds or creates the single conversation shared by two users.
///
/// Uniqueness does not rest on the intersection alone: every created
/// conversation carries the canonical pair key, which the store keeps
/// unique. When two first contacts race, the loser's insert fails with a
/// conflict and it adopts the winner's row.
#[derive(Clone)]
pub struct ConversationResolver<B> {
    backend: B,
    attempts: u32,
}

impl<B: Backend> ConversationResolver<B> {
    pub fn new(backend: B, attempts: u32) -> Self {
        Self { backend, attempts: attempts.max(1) }
    }

    pub async fn resolve(&self, user_a: UserId, user_b: UserId) -> Result<ConversationId> {
        if user_a == user_b {
            return Err(ChatError::SelfConversation(user_a));
        }
        let key = pair_key(user_a, user_b);

        for attempt in 1..=self.attempts {
            if let Some(existing) = self.find_shared(user_a, user_b).await? {
                return Ok(existing);
            }

            match self.backend.create_conversation(&key, user_a, user_b).await {
                Ok(conversation) => {
                    info!("Resolved {} <-> {} to new conversation {}", user_a, user_b, conversation.id);
                    return Ok(conversation.id);
                }
                Err(BackendError::Conflict(detail)) => {
                    debug!("Lost conversation creation race ({}), attempt {}", detail, attempt);
                    if let Some(winner) = self.backend.conversation_by_pair_key(&key).await? {
                        return Ok(winner.id);
                    }
                    warn!("Pair key conflict for {} <-> {} but no row found, retrying", user_a, user_b);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ChatError::StoreUnavailable(format!(
            "could not resolve conversation for {} and {} after {} attempts",
            user_a, user_b, self.attempts
        )))
    }

    /// Intersection of both users' participations. More than one shared
    /// conversation is an integrity violation and is reported, not papered over.
    async fn find_shared(&self, user_a: UserId, user_b: UserId) -> Result<Option<ConversationId>> {
        let of_a = self.backend.participant_conversations(user_a).await?;
        if of_a.is_empty() {
            return Ok(None);
        }
        let of_b: HashSet<ConversationId> = self.backend.participant_conversations(user_b).await?.into_iter().collect();

        let mut shared: Vec<ConversationId> = of_a.into_iter().filter(|id| of_b.contains(id)).collect();
        shared.sort();
        shared.dedup();

        match shared.len() {
            0 => Ok(None),
            1 => Ok(Some(shared[0])),
            _ => {
                error!(
                    user_a = %user_a,
                    user_b = %user_b,
                    conversations = ?shared,
                    "Duplicate conversations for one participant pair"
                );
                Err(ChatError::DuplicateConversation {
                    user_a,
                    user_b,
                    conversations: shared,
                })
            }
        }
    }
}
