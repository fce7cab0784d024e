use std::collections::HashSet;
use std::future::pending;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use parley_types::{Backend, ConversationId, Message, MessageId, UserId};

use crate::clock::Clock;
use crate::config::CoreConfig;
use crate::error::{ChatError, Result};
use crate::message_store::MessageStore;
use crate::presence::{PresenceEvent, PresenceTracker, TypingView};
use crate::resolver::ConversationResolver;
use crate::subscription::Subscription;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Resolving {
        peer: UserId,
    },
    Active {
        peer: UserId,
        conversation_id: ConversationId,
    },
}

impl Phase {
    pub fn peer(&self) -> Option<UserId> {
        match self {
            Phase::Idle => None,
            Phase::Resolving { peer } | Phase::Active { peer, .. } => Some(*peer),
        }
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        match self {
            Phase::Active { conversation_id, .. } => Some(*conversation_id),
            _ => None,
        }
    }
}

/// What a UI renders for the session.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionView {
    pub phase: Phase,
    /// Messages of the active conversation, ascending, without duplicates.
    pub messages: Vec<Message>,
    pub peer_typing: bool,
    pub draft: String,
    pub last_error: Option<ChatError>,
}

enum Command {
    SelectPeer(UserId),
    Deselect,
    Input(String),
    Send(oneshot::Sender<Result<Message>>),
    Shutdown(oneshot::Sender<()>),
}

/// Results of work spawned off the session task, tagged with the
/// selection epoch that started it.
enum Completion {
    Resolved {
        epoch: u64,
        peer: UserId,
        result: Result<ConversationId>,
    },
    History {
        epoch: u64,
        conversation_id: ConversationId,
        result: Result<Vec<Message>>,
    },
}

/// Binds the current user and a selected peer to a live conversation.
///
/// Runs as a single task that owns all session state; the
/// [`SessionHandle`] feeds it commands and observes a [`SessionView`].
pub struct ChatSession<B: Backend> {
    current_user: UserId,
    config: CoreConfig,
    clock: Clock,
    resolver: ConversationResolver<B>,
    store: MessageStore<B>,
    presence: PresenceTracker<B>,

    view: watch::Sender<SessionView>,
    completions: mpsc::UnboundedSender<Completion>,

    epoch: u64,
    phase: Phase,
    pending: Option<JoinHandle<()>>,
    seen: HashSet<MessageId>,
    messages_sub: Option<Subscription<Message>>,
    presence_sub: Option<Subscription<PresenceEvent>>,

    peer_typing: TypingView,
    peer_typing_deadline: Option<Instant>,

    local_typing: bool,
    last_typing_write: Option<Instant>,
    stop_typing_deadline: Option<Instant>,
}

impl<B: Backend> ChatSession<B> {
    pub fn spawn(backend: B, config: CoreConfig, current_user: UserId) -> SessionHandle {
        let clock = Clock::new();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(SessionView::default());

        let session = Self {
            current_user,
            resolver: ConversationResolver::new(backend.clone(), config.resolve_attempts),
            store: MessageStore::new(backend.clone(), config.clone()),
            presence: PresenceTracker::new(backend, config.clone(), clock),
            peer_typing: TypingView::new(config.typing_window),
            config,
            clock,
            view: view_tx,
            completions: completions_tx,
            epoch: 0,
            phase: Phase::Idle,
            pending: None,
            seen: HashSet::new(),
            messages_sub: None,
            presence_sub: None,
            peer_typing_deadline: None,
            local_typing: false,
            last_typing_write: None,
            stop_typing_deadline: None,
        };

        let task = tokio::spawn(session.run(commands_rx, completions_rx));
        SessionHandle {
            commands: commands_tx,
            view: view_rx,
            task,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        info!("Chat session for {} started", self.current_user);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(done)) => {
                        self.leave().await;
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.leave().await;
                        break;
                    }
                },
                Some(completion) = completions.recv() => self.handle_completion(completion),
                message = next_event(&mut self.messages_sub) => self.on_message(message),
                event = next_event(&mut self.presence_sub) => self.on_presence(event),
                _ = sleep_until(self.stop_typing_deadline) => self.on_idle_timeout().await,
                _ = sleep_until(self.peer_typing_deadline) => self.refresh_peer_typing(),
            }
        }

        info!("Chat session for {} stopped", self.current_user);
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SelectPeer(peer) => self.select_peer(peer).await,
            Command::Deselect => self.leave().await,
            Command::Input(text) => self.on_input(text).await,
            Command::Send(reply) => {
                let result = self.send().await;
                let _ = reply.send(result);
            }
            // Handled by the run loop.
            Command::Shutdown(_) => {}
        }
    }

    async fn select_peer(&mut self, peer: UserId) {
        if self.phase.peer() == Some(peer) {
            debug!("Peer {} already selected", peer);
            return;
        }

        self.leave().await;

        let epoch = self.epoch;
        self.phase = Phase::Resolving { peer };
        self.view.send_modify(|v| {
            v.phase = Phase::Resolving { peer };
            v.last_error = None;
        });
        debug!("Resolving conversation with {} (epoch {})", peer, epoch);

        let resolver = self.resolver.clone();
        let completions = self.completions.clone();
        let me = self.current_user;
        self.pending = Some(tokio::spawn(async move {
            let result = resolver.resolve(me, peer).await;
            let _ = completions.send(Completion::Resolved { epoch, peer, result });
        }));
    }

    /// Tear down everything bound to the current selection and return to
    /// `Idle`. In-flight work of the old selection is aborted, and anything
    /// that still completes carries a stale epoch.
    async fn leave(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
        self.epoch += 1;

        self.messages_sub = None;
        self.presence_sub = None;
        self.seen.clear();
        self.peer_typing.clear();
        self.peer_typing_deadline = None;

        if let Some(conversation_id) = self.phase.conversation_id() {
            self.stop_typing(conversation_id, false).await;
        }
        self.stop_typing_deadline = None;

        if self.phase != Phase::Idle {
            info!("Left {:?}", self.phase);
        }
        self.phase = Phase::Idle;
        self.view.send_modify(|v| {
            v.phase = Phase::Idle;
            v.messages.clear();
            v.peer_typing = false;
        });
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Resolved { epoch, peer, result } => {
                if epoch != self.epoch {
                    debug!("Discarding stale resolve for {} (epoch {})", peer, epoch);
                    return;
                }
                match result {
                    Ok(conversation_id) => self.activate(peer, conversation_id),
                    Err(e) => {
                        warn!("Could not resolve conversation with {}: {}", peer, e);
                        self.pending = None;
                        self.phase = Phase::Idle;
                        self.view.send_modify(|v| {
                            v.phase = Phase::Idle;
                            v.last_error = Some(e);
                        });
                    }
                }
            }
            Completion::History {
                epoch,
                conversation_id,
                result,
            } => {
                if epoch != self.epoch || self.phase.conversation_id() != Some(conversation_id) {
                    debug!("Discarding stale history for {}", conversation_id);
                    return;
                }
                self.pending = None;
                self.attach(conversation_id, result);
            }
        }
    }

    /// Enter `Active`: clear what the previous conversation left behind
    /// and fetch history. Subscriptions are wired once history is in.
    fn activate(&mut self, peer: UserId, conversation_id: ConversationId) {
        info!("Conversation {} active with {}", conversation_id, peer);
        self.phase = Phase::Active { peer, conversation_id };
        self.seen.clear();
        self.peer_typing.clear();
        self.view.send_modify(|v| {
            v.phase = Phase::Active { peer, conversation_id };
            v.messages.clear();
            v.peer_typing = false;
        });

        let epoch = self.epoch;
        let store = self.store.clone();
        let completions = self.completions.clone();
        self.pending = Some(tokio::spawn(async move {
            let result = store.history(conversation_id).await;
            let _ = completions.send(Completion::History {
                epoch,
                conversation_id,
                result,
            });
        }));
    }

    fn attach(&mut self, conversation_id: ConversationId, history: Result<Vec<Message>>) {
        let cursor = match history {
            Ok(history) => {
                let cursor = history.last().map(Message::order_key);
                for message in history {
                    self.accept_message(message);
                }
                cursor
            }
            Err(e) => {
                // The subscription replays the whole log instead.
                warn!("History fetch for {} failed: {}", conversation_id, e);
                self.view.send_modify(|v| v.last_error = Some(e));
                None
            }
        };

        self.messages_sub = Some(self.store.subscribe_after(conversation_id, cursor));
        self.presence_sub = Some(self.presence.subscribe(conversation_id, self.current_user));
    }

    /// Add a message to the view unless its id was already seen.
    fn accept_message(&mut self, message: Message) {
        if !self.seen.insert(message.id) {
            debug!("Dropping duplicate delivery of {}", message.id);
            return;
        }
        self.view.send_modify(|v| {
            let key = message.order_key();
            let at = v.messages.partition_point(|m| m.order_key() <= key);
            v.messages.insert(at, message);
        });
    }

    fn on_message(&mut self, message: Option<Message>) {
        let Some(message) = message else {
            warn!("Message subscription ended unexpectedly");
            self.messages_sub = None;
            return;
        };
        if Some(message.conversation_id) != self.phase.conversation_id() {
            debug!("Ignoring message {} for inactive conversation", message.id);
            return;
        }
        self.accept_message(message);
    }

    fn on_presence(&mut self, event: Option<PresenceEvent>) {
        let Some(event) = event else {
            warn!("Presence subscription ended unexpectedly");
            self.presence_sub = None;
            return;
        };
        if event.user_id == self.current_user {
            return;
        }
        self.peer_typing.apply(&event);
        self.refresh_peer_typing();
    }

    /// Re-evaluate the peer's typing flag against the clock and schedule
    /// the next expiry check.
    fn refresh_peer_typing(&mut self) {
        let now = self.clock.now();
        let typing = self.peer_typing.anyone_typing(now);
        self.peer_typing_deadline = self.peer_typing.next_expiry(now).map(|at| self.clock.instant_at(at));
        self.view.send_if_modified(|v| {
            let changed = v.peer_typing != typing;
            v.peer_typing = typing;
            changed
        });
    }

    async fn on_input(&mut self, text: String) {
        let empty = text.is_empty();
        self.view.send_modify(|v| v.draft = text);

        let Some(conversation_id) = self.phase.conversation_id() else {
            return;
        };

        if empty {
            self.stop_typing(conversation_id, false).await;
            return;
        }

        let now = Instant::now();
        let refresh_due = self
            .last_typing_write
            .is_none_or(|at| now.duration_since(at) >= self.config.typing_refresh);
        if !self.local_typing || refresh_due {
            self.local_typing = true;
            self.last_typing_write = Some(now);
            if let Err(e) = self.presence.set_typing(conversation_id, self.current_user, true).await {
                warn!("Failed to publish typing state: {}", e);
            }
        }
        // Re-arming replaces the previous timer.
        self.stop_typing_deadline = Some(now + self.config.typing_window);
    }

    async fn on_idle_timeout(&mut self) {
        self.stop_typing_deadline = None;
        if let Some(conversation_id) = self.phase.conversation_id() {
            self.stop_typing(conversation_id, false).await;
        }
    }

    /// Cancel the idle timer and clear the typing flag. Without `force`,
    /// nothing is written unless the flag is currently set.
    async fn stop_typing(&mut self, conversation_id: ConversationId, force: bool) {
        self.stop_typing_deadline = None;
        if !self.local_typing && !force {
            return;
        }
        self.local_typing = false;
        self.last_typing_write = None;
        if let Err(e) = self.presence.set_typing(conversation_id, self.current_user, false).await {
            warn!("Failed to clear typing state: {}", e);
        }
    }

    async fn send(&mut self) -> Result<Message> {
        let draft = self.view.borrow().draft.clone();
        self.store.validate(&draft)?;

        let conversation_id = self.phase.conversation_id().ok_or(ChatError::NoActiveConversation)?;

        self.stop_typing(conversation_id, true).await;

        match self.store.append(conversation_id, self.current_user, &draft).await {
            Ok(message) => {
                self.view.send_modify(|v| {
                    v.draft.clear();
                    v.last_error = None;
                });
                self.accept_message(message.clone());
                Ok(message)
            }
            Err(e) => {
                warn!("Send to {} failed: {}", conversation_id, e);
                self.view.send_modify(|v| v.last_error = Some(e.clone()));
                Err(e)
            }
        }
    }
}

async fn next_event<T>(subscription: &mut Option<Subscription<T>>) -> Option<T> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}

/// Client side of a [`ChatSession`]. Dropping it shuts the session down.
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<SessionView>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn select_peer(&self, peer: UserId) -> Result<()> {
        self.command(Command::SelectPeer(peer))
    }

    pub fn deselect(&self) -> Result<()> {
        self.command(Command::Deselect)
    }

    /// The draft changed. Drives the local typing indicator.
    pub fn input(&self, text: impl Into<String>) -> Result<()> {
        self.command(Command::Input(text.into()))
    }

    /// Send the current draft. Blank drafts are rejected without a store
    /// call; on failure the draft is kept.
    pub async fn send(&self) -> Result<Message> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Send(tx))?;
        rx.await.map_err(|_| ChatError::SessionClosed)?
    }

    pub fn state(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    pub fn snapshot(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// Wait until the view satisfies `predicate`.
    pub async fn wait_for(&self, mut predicate: impl FnMut(&SessionView) -> bool) -> Result<SessionView> {
        let mut view = self.view.clone();
        let matched = view.wait_for(|v| predicate(v)).await.map_err(|_| ChatError::SessionClosed)?;
        Ok(matched.clone())
    }

    /// Leave the active conversation (clearing the typing flag) and stop.
    pub async fn shutdown(self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
        let _ = self.task.await;
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| ChatError::SessionClosed)
    }
}
