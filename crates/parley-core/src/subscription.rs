use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use parley_types::ConversationId;

/// Cancellable handle over a conversation-scoped event pump.
///
/// Events arrive in the order the pump observed them. Closing or dropping
/// the handle aborts the pump; nothing is delivered afterwards.
pub struct Subscription<T> {
    conversation_id: ConversationId,
    rx: mpsc::Receiver<T>,
    pump: JoinHandle<()>,
}

impl<T> Subscription<T> {
    pub(crate) fn new(conversation_id: ConversationId, rx: mpsc::Receiver<T>, pump: JoinHandle<()>) -> Self {
        Self { conversation_id, rx, pump }
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// Next event, or `None` once the pump has stopped.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn close(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.pump.abort();
        self.rx.close();
    }
}
