//! Client-side real-time synchronization engine for the three-service chat
//! backend (user, group, message). Owns the channel lifecycles, merges push
//! events with pulled snapshots, and exposes the conversation state plus a
//! typed action surface to whatever layer renders it.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use shared::{
    domain::{GroupId, InviteId, UserId},
    protocol::{
        ChatMessage, ClientFrame, GroupFrame, GroupInfo, GroupSummary, MessageFrame,
        PendingInvite, ReplyPreview, UserFrame, UserSummary,
    },
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
    time,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

pub mod channel;
pub mod dispatch;
pub mod snapshot;
pub mod store;
mod typing;

pub use channel::{ChannelKind, ConnectionState, ReconnectPolicy};
pub use dispatch::Command;
pub use snapshot::SnapshotClient;
pub use store::{ActiveConversation, ConversationKey, ConversationStore, LastMessagePreview};

use typing::{TypingCoordinator, TypingTarget};

/// Content placeholder carried by image messages alongside their URL.
pub const IMAGE_PLACEHOLDER: &str = "[image]";

/// The authenticated principal. Created at login; logout destroys it, which
/// tears down every channel and all in-memory state.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: UserId,
    pub username: String,
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    base_url: String,
}

impl ClientConfig {
    pub fn new(base_url: impl AsRef<str>) -> Result<Self> {
        let parsed = Url::parse(base_url.as_ref()).context("invalid base url")?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(anyhow!("base url must use http or https"));
        }
        Ok(Self {
            base_url: base_url.as_ref().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Events pushed to subscribers. The store itself is read via
/// [`ChatClient::store`] snapshots; `StoreUpdated` just says "render again".
#[derive(Debug, Clone)]
pub enum ClientEvent {
    StoreUpdated,
    /// An inbound message outside the active conversation was addressed to
    /// this user; the UI layer should play its notification sound.
    Notification,
    Channel {
        kind: ChannelKind,
        state: ConnectionState,
    },
    Error(String),
}

#[derive(Debug, Error)]
pub enum SendMessageError {
    #[error("no active conversation selected")]
    NoActiveConversation,
    #[error("message channel is not connected")]
    ChannelClosed,
}

struct ChannelHandle {
    task: JoinHandle<()>,
    outbound: mpsc::UnboundedSender<ClientFrame>,
}

impl ChannelHandle {
    fn abort(&self) {
        self.task.abort();
    }
}

struct ClientState {
    session: Option<Identity>,
    store: ConversationStore,
    message_channel: Option<ChannelHandle>,
    user_channel: Option<ChannelHandle>,
    group_channel: Option<ChannelHandle>,
    typing: TypingCoordinator,
    refresh_seq: u64,
}

impl ClientState {
    fn new() -> Self {
        Self {
            session: None,
            store: ConversationStore::default(),
            message_channel: None,
            user_channel: None,
            group_channel: None,
            typing: TypingCoordinator::default(),
            refresh_seq: 0,
        }
    }

    fn teardown(&mut self) {
        for handle in [
            self.message_channel.take(),
            self.user_channel.take(),
            self.group_channel.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
        self.typing.reset();
        self.store = ConversationStore::default();
        self.session = None;
    }

    fn message_outbound(&self) -> Option<mpsc::UnboundedSender<ClientFrame>> {
        self.message_channel
            .as_ref()
            .map(|handle| handle.outbound.clone())
    }
}

pub struct ChatClient {
    http: reqwest::Client,
    config: ClientConfig,
    inner: Mutex<ClientState>,
    events: broadcast::Sender<ClientEvent>,
}

impl ChatClient {
    pub fn new(config: ClientConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            http: reqwest::Client::new(),
            config,
            inner: Mutex::new(ClientState::new()),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Cloned snapshot of the conversation state for rendering.
    pub async fn store(&self) -> ConversationStore {
        self.inner.lock().await.store.clone()
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    async fn identity(&self) -> Result<Identity> {
        self.inner
            .lock()
            .await
            .session
            .clone()
            .ok_or_else(|| anyhow!("not logged in"))
    }

    fn snapshot_for(&self, identity: &Identity) -> SnapshotClient {
        SnapshotClient::new(
            self.http.clone(),
            self.config.base_url().to_string(),
            identity.token.clone(),
        )
    }

    async fn snapshot(&self) -> Result<SnapshotClient> {
        let identity = self.identity().await?;
        Ok(self.snapshot_for(&identity))
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<UserSummary> {
        snapshot::register(&self.http, self.config.base_url(), username, password).await
    }

    /// Authenticate, open the three channels and seed the store with one
    /// reconciliation plus the contact/group/invite rosters.
    pub async fn login(self: &Arc<Self>, username: &str, password: &str) -> Result<Identity> {
        let response =
            snapshot::login(&self.http, self.config.base_url(), username, password).await?;
        let identity = Identity {
            id: response.user.id,
            username: response.user.username,
            token: response.access_token,
        };
        info!(user_id = identity.id.0, "logged in");

        {
            let mut state = self.inner.lock().await;
            state.teardown();
            state.session = Some(identity.clone());
        }
        self.open_channels(&identity).await;
        self.seed_state().await;
        Ok(identity)
    }

    pub async fn logout(&self) {
        self.inner.lock().await.teardown();
        self.emit(ClientEvent::StoreUpdated);
    }

    /// Delete (anonymize) the account on the backend, then end the session.
    pub async fn delete_account(&self) -> Result<()> {
        let identity = self.identity().await?;
        self.snapshot_for(&identity)
            .delete_account(identity.id)
            .await?;
        self.logout().await;
        Ok(())
    }

    fn channel_url(&self, kind: ChannelKind, identity: &Identity) -> Result<String> {
        let path = match kind {
            ChannelKind::Message => format!("/api/message/ws/{}", identity.id),
            ChannelKind::User => "/api/user/ws/users".to_string(),
            ChannelKind::Group => format!("/api/group/ws/groups/{}", identity.id),
        };
        channel::websocket_url(self.config.base_url(), &path, &identity.token)
    }

    async fn open_channels(self: &Arc<Self>, identity: &Identity) {
        let mut handles = Vec::new();
        for kind in [ChannelKind::Message, ChannelKind::User, ChannelKind::Group] {
            match self.channel_url(kind, identity) {
                Ok(url) => handles.push((kind, self.spawn_channel(kind, url))),
                Err(err) => warn!(channel = kind.as_str(), %err, "cannot build channel url"),
            }
        }
        let mut state = self.inner.lock().await;
        for (kind, handle) in handles {
            let slot = match kind {
                ChannelKind::Message => &mut state.message_channel,
                ChannelKind::User => &mut state.user_channel,
                ChannelKind::Group => &mut state.group_channel,
            };
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
    }

    /// The message channel is bound to the active conversation context:
    /// changing the selection closes the old socket and opens a fresh one.
    async fn rebind_message_channel(self: &Arc<Self>, identity: &Identity) {
        let url = match self.channel_url(ChannelKind::Message, identity) {
            Ok(url) => url,
            Err(err) => {
                warn!(%err, "cannot build message channel url");
                return;
            }
        };
        let handle = self.spawn_channel(ChannelKind::Message, url);
        let mut state = self.inner.lock().await;
        if let Some(previous) = state.message_channel.replace(handle) {
            previous.abort();
        }
    }

    /// Supervisor for one channel: connect, pump frames in arrival order,
    /// and on any disconnect retry with exponential backoff and jitter. Every
    /// re-established connection forces a reconciliation to cover the gap.
    fn spawn_channel(self: &Arc<Self>, kind: ChannelKind, url: String) -> ChannelHandle {
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientFrame>();
        let client = Arc::clone(self);
        let task = tokio::spawn(async move {
            let policy = ReconnectPolicy::default();
            let mut attempt: u32 = 0;
            let mut resynchronize = false;
            loop {
                client.emit(ClientEvent::Channel {
                    kind,
                    state: ConnectionState::Connecting,
                });
                let stream = match connect_async(&url).await {
                    Ok((stream, _)) => stream,
                    Err(err) => {
                        warn!(channel = kind.as_str(), %err, "websocket connect failed");
                        client.emit(ClientEvent::Channel {
                            kind,
                            state: ConnectionState::Closed,
                        });
                        let delay = policy.delay(attempt);
                        attempt = attempt.saturating_add(1);
                        time::sleep(delay).await;
                        continue;
                    }
                };
                attempt = 0;
                info!(channel = kind.as_str(), "websocket connected");
                client.emit(ClientEvent::Channel {
                    kind,
                    state: ConnectionState::Open,
                });
                if resynchronize {
                    client.reconcile().await;
                }
                resynchronize = true;

                let (mut sink, mut source) = stream.split();
                loop {
                    tokio::select! {
                        outgoing = outbound_rx.recv() => {
                            let Some(frame) = outgoing else { return };
                            let text = match serde_json::to_string(&frame) {
                                Ok(text) => text,
                                Err(err) => {
                                    warn!(channel = kind.as_str(), %err, "failed to encode outbound frame");
                                    continue;
                                }
                            };
                            if let Err(err) = sink.send(Message::Text(text)).await {
                                warn!(channel = kind.as_str(), %err, "websocket send failed");
                                break;
                            }
                        }
                        incoming = source.next() => {
                            match incoming {
                                Some(Ok(Message::Text(text))) => client.handle_frame(kind, &text).await,
                                Some(Ok(Message::Close(_))) | None => {
                                    info!(channel = kind.as_str(), "websocket closed");
                                    break;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(err)) => {
                                    warn!(channel = kind.as_str(), %err, "websocket receive failed");
                                    break;
                                }
                            }
                        }
                    }
                }
                client.emit(ClientEvent::Channel {
                    kind,
                    state: ConnectionState::Closed,
                });
                let delay = policy.delay(attempt);
                attempt = attempt.saturating_add(1);
                time::sleep(delay).await;
            }
        });
        ChannelHandle {
            task,
            outbound: outbound_tx,
        }
    }

    /// Parse one inbound frame, run the pure dispatcher against the store and
    /// execute the commands it returns. A malformed frame is dropped without
    /// touching the channel or other state.
    async fn handle_frame(&self, kind: ChannelKind, text: &str) {
        let commands = {
            let mut state = self.inner.lock().await;
            let Some(identity) = state.session.clone() else {
                return;
            };
            let decoded = match kind {
                ChannelKind::Message => serde_json::from_str::<MessageFrame>(text)
                    .map(|frame| dispatch::apply_message_frame(&mut state.store, &identity, frame)),
                ChannelKind::User => serde_json::from_str::<UserFrame>(text)
                    .map(|frame| dispatch::apply_user_frame(&mut state.store, &identity, frame)),
                ChannelKind::Group => serde_json::from_str::<GroupFrame>(text)
                    .map(|frame| dispatch::apply_group_frame(&mut state.store, &identity, frame)),
            };
            match decoded {
                Ok(commands) => commands,
                Err(err) => {
                    warn!(channel = kind.as_str(), %err, "dropping malformed frame");
                    self.emit(ClientEvent::Error(format!(
                        "invalid {} frame: {err}",
                        kind.as_str()
                    )));
                    return;
                }
            }
        };
        self.emit(ClientEvent::StoreUpdated);
        self.run_commands(commands).await;
    }

    async fn run_commands(&self, commands: Vec<Command>) {
        if commands.is_empty() {
            return;
        }
        let Ok(identity) = self.identity().await else {
            return;
        };
        let snapshot = self.snapshot_for(&identity);
        for command in commands {
            match command {
                Command::MarkDirectRead(contact) => {
                    if let Err(err) = snapshot.mark_direct_read(identity.id, contact).await {
                        warn!(contact = contact.0, %err, "failed to mark direct conversation read");
                    }
                }
                Command::MarkGroupRead(group) => {
                    if let Err(err) = snapshot.mark_group_read(identity.id, group).await {
                        warn!(group = group.0, %err, "failed to mark group conversation read");
                    }
                }
                Command::Reconcile => self.reconcile().await,
                Command::PlayNotification => self.emit(ClientEvent::Notification),
            }
        }
    }

    /// Re-pull unread counts and conversation previews in parallel and apply
    /// them atomically. Concurrent reconciliations are not cancelled; the
    /// sequence number makes sure an older pull can never clobber a newer one.
    pub async fn reconcile(&self) {
        let (snapshot, user_id, seq) = {
            let mut state = self.inner.lock().await;
            let Some(identity) = state.session.clone() else {
                return;
            };
            state.refresh_seq += 1;
            (self.snapshot_for(&identity), identity.id, state.refresh_seq)
        };
        let (unread, conversations) = tokio::join!(
            snapshot.unread_counts(user_id),
            snapshot.conversations(user_id)
        );
        let (unread, conversations) = match (unread, conversations) {
            (Ok(unread), Ok(conversations)) => (unread, conversations),
            (Err(err), _) | (_, Err(err)) => {
                warn!(%err, "reconciliation pull failed; keeping cached state");
                return;
            }
        };
        let mut state = self.inner.lock().await;
        if state.session.is_none() {
            return;
        }
        if state.store.apply_refresh(seq, unread, conversations) {
            drop(state);
            self.emit(ClientEvent::StoreUpdated);
        } else {
            debug!(seq, "discarding stale reconciliation response");
        }
    }

    async fn seed_state(self: &Arc<Self>) {
        self.reconcile().await;
        let Ok(identity) = self.identity().await else {
            return;
        };
        let snapshot = self.snapshot_for(&identity);
        let (contacts, groups, invites) = tokio::join!(
            snapshot.contacts(identity.id),
            snapshot.groups(identity.id),
            snapshot.pending_invites(identity.id)
        );
        // The invites snapshot carries no usernames; resolve them up front so
        // the store always holds displayable invites.
        let invites = match invites {
            Ok(records) => {
                let mut pending = Vec::with_capacity(records.len());
                for record in records {
                    let from_username = match snapshot.user(record.from_user_id).await {
                        Ok(user) => user.username,
                        Err(err) => {
                            warn!(inviter = record.from_user_id.0, %err, "failed to resolve inviter");
                            String::new()
                        }
                    };
                    pending.push(PendingInvite {
                        id: record.id,
                        from_user_id: record.from_user_id,
                        from_username,
                    });
                }
                Some(pending)
            }
            Err(err) => {
                warn!(%err, "failed to fetch pending invites");
                None
            }
        };

        let mut state = self.inner.lock().await;
        if state.session.is_none() {
            return;
        }
        match contacts {
            Ok(contacts) => state.store.contacts = contacts,
            Err(err) => warn!(%err, "failed to fetch contacts"),
        }
        match groups {
            Ok(groups) => state.store.groups = groups,
            Err(err) => warn!(%err, "failed to fetch groups"),
        }
        if let Some(pending) = invites {
            state.store.pending_invites = pending;
        }
        drop(state);
        self.emit(ClientEvent::StoreUpdated);
    }

    /// Activate a direct conversation: load its history, mark it read and
    /// reconcile so the unread badge reflects the zeroed state.
    pub async fn select_direct(self: &Arc<Self>, contact: UserSummary) -> Result<()> {
        let identity = self.identity().await?;
        {
            let mut state = self.inner.lock().await;
            state.typing.reset();
            state.store.select_direct(contact.clone());
        }
        self.emit(ClientEvent::StoreUpdated);
        self.rebind_message_channel(&identity).await;

        let snapshot = self.snapshot_for(&identity);
        match snapshot.direct_history(identity.id, contact.id).await {
            Ok(history) => {
                let mut state = self.inner.lock().await;
                if state.store.active.is_direct_with(&contact.username) {
                    state.store.set_timeline(history);
                }
                drop(state);
                self.emit(ClientEvent::StoreUpdated);
            }
            Err(err) => warn!(contact = contact.id.0, %err, "failed to fetch direct history"),
        }
        if let Err(err) = snapshot.mark_direct_read(identity.id, contact.id).await {
            warn!(contact = contact.id.0, %err, "failed to mark conversation read");
        }
        self.reconcile().await;
        Ok(())
    }

    pub async fn select_group(self: &Arc<Self>, group: GroupSummary) -> Result<()> {
        let identity = self.identity().await?;
        {
            let mut state = self.inner.lock().await;
            state.typing.reset();
            state.store.select_group(group.clone());
        }
        self.emit(ClientEvent::StoreUpdated);
        self.rebind_message_channel(&identity).await;

        let snapshot = self.snapshot_for(&identity);
        match snapshot.group_history(group.id).await {
            Ok(history) => {
                let mut state = self.inner.lock().await;
                if state.store.active.is_group(group.id) {
                    state.store.set_timeline(history);
                }
                drop(state);
                self.emit(ClientEvent::StoreUpdated);
            }
            Err(err) => warn!(group = group.id.0, %err, "failed to fetch group history"),
        }
        if let Err(err) = snapshot.mark_group_read(identity.id, group.id).await {
            warn!(group = group.id.0, %err, "failed to mark group read");
        }
        self.reconcile().await;
        Ok(())
    }

    pub async fn clear_selection(self: &Arc<Self>) {
        let identity = {
            let mut state = self.inner.lock().await;
            state.typing.reset();
            state.store.clear_active();
            state.session.clone()
        };
        self.emit(ClientEvent::StoreUpdated);
        if let Some(identity) = identity {
            self.rebind_message_channel(&identity).await;
        }
    }

    /// Send a text message on the message channel. The timeline is NOT
    /// updated here: the backend's echo of this message is the sole append
    /// trigger, for the sender exactly like for every other participant. Only
    /// the last-message preview is updated optimistically.
    pub async fn send_text(&self, content: &str, reply_to: Option<ReplyPreview>) -> Result<()> {
        let identity = self.identity().await?;
        let now = Utc::now();
        let mut state = self.inner.lock().await;
        let frame = match &state.store.active {
            ActiveConversation::Direct(contact) => ClientFrame::Direct {
                to: contact.id,
                content: content.to_string(),
                timestamp: now,
                image_url: None,
                reply_to,
            },
            ActiveConversation::Group(group) => ClientFrame::Group {
                group: group.id,
                content: content.to_string(),
                timestamp: now,
                image_url: None,
                reply_to,
            },
            ActiveConversation::None => return Err(SendMessageError::NoActiveConversation.into()),
        };
        let outbound = state
            .message_outbound()
            .ok_or(SendMessageError::ChannelClosed)?;
        outbound
            .send(frame)
            .map_err(|_| SendMessageError::ChannelClosed)?;
        state.store.note_sent_preview(&identity.username, content, now);
        drop(state);
        self.emit(ClientEvent::StoreUpdated);
        Ok(())
    }

    /// Upload an image, then send a frame referencing the returned URL.
    pub async fn send_image(&self, filename: &str, mime_type: &str, bytes: Vec<u8>) -> Result<()> {
        let snapshot = self.snapshot().await?;
        let url = snapshot.upload_image(filename, mime_type, bytes).await?;
        let now = Utc::now();
        let state = self.inner.lock().await;
        let frame = match &state.store.active {
            ActiveConversation::Direct(contact) => ClientFrame::Direct {
                to: contact.id,
                content: IMAGE_PLACEHOLDER.to_string(),
                timestamp: now,
                image_url: Some(url),
                reply_to: None,
            },
            ActiveConversation::Group(group) => ClientFrame::Group {
                group: group.id,
                content: IMAGE_PLACEHOLDER.to_string(),
                timestamp: now,
                image_url: Some(url),
                reply_to: None,
            },
            ActiveConversation::None => return Err(SendMessageError::NoActiveConversation.into()),
        };
        state
            .message_outbound()
            .ok_or(SendMessageError::ChannelClosed)?
            .send(frame)
            .map_err(|_| SendMessageError::ChannelClosed)?;
        Ok(())
    }

    /// Report one local input change; the coordinator debounces the wire
    /// traffic (one `typing` per burst, one `stop_typing` 1000 ms after the
    /// last input).
    pub async fn notify_typing(&self) -> Result<()> {
        let mut state = self.inner.lock().await;
        let target = match &state.store.active {
            ActiveConversation::Direct(contact) => TypingTarget::Direct(contact.id),
            ActiveConversation::Group(group) => TypingTarget::Group(group.id),
            ActiveConversation::None => return Ok(()),
        };
        let Some(outbound) = state.message_outbound() else {
            return Ok(());
        };
        state.typing.input(target, &outbound);
        Ok(())
    }

    /// Ask the backend to delete a message. Removal from the timeline and the
    /// preview recompute happen when the `delete` frame comes back over the
    /// message channel.
    pub async fn delete_message(&self, message: &ChatMessage) -> Result<()> {
        let snapshot = self.snapshot().await?;
        if message.group.is_some() {
            snapshot.delete_group_message(message.id).await
        } else {
            snapshot.delete_direct_message(message.id).await
        }
    }

    pub async fn delete_active_conversation(&self) -> Result<()> {
        let identity = self.identity().await?;
        let active = self.inner.lock().await.store.active.clone();
        let snapshot = self.snapshot_for(&identity);
        match active {
            ActiveConversation::Direct(contact) => {
                snapshot
                    .delete_direct_conversation(identity.id, contact.id)
                    .await?
            }
            ActiveConversation::Group(group) => {
                snapshot.delete_group_conversation(group.id).await?
            }
            ActiveConversation::None => return Ok(()),
        }
        let mut state = self.inner.lock().await;
        state.typing.reset();
        state.store.clear_active();
        drop(state);
        self.emit(ClientEvent::StoreUpdated);
        Ok(())
    }

    /// User search for the add-contact flow: everyone except the caller,
    /// existing contacts and anonymized accounts, filtered by substring.
    pub async fn search_users(&self, query: &str) -> Result<Vec<UserSummary>> {
        let identity = self.identity().await?;
        let users = self.snapshot_for(&identity).users().await?;
        let contacts = self.inner.lock().await.store.contacts.clone();
        let query = query.to_lowercase();
        Ok(users
            .into_iter()
            .filter(|user| user.id != identity.id)
            .filter(|user| !contacts.iter().any(|contact| contact.id == user.id))
            .filter(|user| !user.username.to_lowercase().contains("unknownuser"))
            .filter(|user| user.username.to_lowercase().contains(&query))
            .collect())
    }

    pub async fn send_contact_invite(&self, to: UserId) -> Result<()> {
        let identity = self.identity().await?;
        self.snapshot_for(&identity)
            .send_invite(identity.id, to)
            .await
    }

    pub async fn respond_invite(&self, invite: InviteId, accept: bool) -> Result<()> {
        let snapshot = self.snapshot().await?;
        snapshot.respond_invite(invite, accept).await?;
        // The contact itself arrives as a `contact_added` push on accept.
        self.inner.lock().await.store.remove_invite(invite);
        self.emit(ClientEvent::StoreUpdated);
        Ok(())
    }

    pub async fn remove_contact(&self, contact: UserId) -> Result<()> {
        let identity = self.identity().await?;
        self.snapshot_for(&identity)
            .remove_contact(identity.id, contact)
            .await?;
        self.inner.lock().await.store.remove_contact(contact);
        self.emit(ClientEvent::StoreUpdated);
        Ok(())
    }

    pub async fn create_group(&self, name: &str, member_ids: Vec<UserId>) -> Result<GroupSummary> {
        let snapshot = self.snapshot().await?;
        let group = snapshot.create_group(name, member_ids).await?;
        self.inner.lock().await.store.upsert_group(group.clone());
        self.emit(ClientEvent::StoreUpdated);
        Ok(group)
    }

    pub async fn group_info(&self, group: GroupId) -> Result<GroupInfo> {
        self.snapshot().await?.group_info(group).await
    }

    /// Fetch a group's member roster into the store. From here on the roster
    /// is kept current by `member_added`/`member_removed` pushes alone.
    pub async fn open_group_members(&self, group: GroupId) -> Result<Vec<String>> {
        let snapshot = self.snapshot().await?;
        let members = snapshot.group_members(group).await?;
        let usernames: Vec<String> = members.into_iter().map(|member| member.username).collect();
        self.inner
            .lock()
            .await
            .store
            .set_group_members(group, usernames.clone());
        self.emit(ClientEvent::StoreUpdated);
        Ok(usernames)
    }

    pub async fn add_group_member(&self, group: GroupId, username: &str) -> Result<()> {
        let snapshot = self.snapshot().await?;
        let user = snapshot.add_group_member(group, username).await?;
        self.inner
            .lock()
            .await
            .store
            .member_added(group, user.username);
        self.emit(ClientEvent::StoreUpdated);
        Ok(())
    }

    pub async fn remove_group_member(&self, group: GroupId, username: &str) -> Result<()> {
        let snapshot = self.snapshot().await?;
        snapshot.remove_group_member(group, username).await?;
        self.inner
            .lock()
            .await
            .store
            .member_removed(group, username);
        self.emit(ClientEvent::StoreUpdated);
        Ok(())
    }

    pub async fn leave_group(&self, group: GroupId) -> Result<()> {
        let identity = self.identity().await?;
        self.snapshot_for(&identity)
            .leave_group(group, identity.id)
            .await?;
        let mut state = self.inner.lock().await;
        state.store.remove_group(group);
        if state.store.active.is_group(group) {
            state.typing.reset();
            state.store.clear_active();
        }
        drop(state);
        self.emit(ClientEvent::StoreUpdated);
        Ok(())
    }

    /// Owner-only on the backend; the `group_deleted` broadcast clears local
    /// state for every member including the caller.
    pub async fn delete_group(&self, group: GroupId) -> Result<()> {
        let identity = self.identity().await?;
        self.snapshot_for(&identity)
            .delete_group(group, identity.id)
            .await
    }
}

/// Action surface for UI layers, implemented by `Arc<ChatClient>` so drivers
/// can depend on the trait alone.
#[async_trait]
pub trait ChatHandle: Send + Sync {
    async fn register(&self, username: &str, password: &str) -> Result<UserSummary>;
    async fn login(&self, username: &str, password: &str) -> Result<Identity>;
    async fn logout(&self);
    async fn delete_account(&self) -> Result<()>;
    async fn select_direct(&self, contact: UserSummary) -> Result<()>;
    async fn select_group(&self, group: GroupSummary) -> Result<()>;
    async fn clear_selection(&self);
    async fn send_text(&self, content: &str, reply_to: Option<ReplyPreview>) -> Result<()>;
    async fn send_image(&self, filename: &str, mime_type: &str, bytes: Vec<u8>) -> Result<()>;
    async fn notify_typing(&self) -> Result<()>;
    async fn delete_message(&self, message: &ChatMessage) -> Result<()>;
    async fn delete_active_conversation(&self) -> Result<()>;
    async fn search_users(&self, query: &str) -> Result<Vec<UserSummary>>;
    async fn send_contact_invite(&self, to: UserId) -> Result<()>;
    async fn respond_invite(&self, invite: InviteId, accept: bool) -> Result<()>;
    async fn remove_contact(&self, contact: UserId) -> Result<()>;
    async fn create_group(&self, name: &str, member_ids: Vec<UserId>) -> Result<GroupSummary>;
    async fn group_info(&self, group: GroupId) -> Result<GroupInfo>;
    async fn open_group_members(&self, group: GroupId) -> Result<Vec<String>>;
    async fn add_group_member(&self, group: GroupId, username: &str) -> Result<()>;
    async fn remove_group_member(&self, group: GroupId, username: &str) -> Result<()>;
    async fn leave_group(&self, group: GroupId) -> Result<()>;
    async fn delete_group(&self, group: GroupId) -> Result<()>;
    async fn store(&self) -> ConversationStore;
    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent>;
}

#[async_trait]
impl ChatHandle for Arc<ChatClient> {
    async fn register(&self, username: &str, password: &str) -> Result<UserSummary> {
        ChatClient::register(self, username, password).await
    }

    async fn login(&self, username: &str, password: &str) -> Result<Identity> {
        ChatClient::login(self, username, password).await
    }

    async fn logout(&self) {
        ChatClient::logout(self).await
    }

    async fn delete_account(&self) -> Result<()> {
        ChatClient::delete_account(self).await
    }

    async fn select_direct(&self, contact: UserSummary) -> Result<()> {
        ChatClient::select_direct(self, contact).await
    }

    async fn select_group(&self, group: GroupSummary) -> Result<()> {
        ChatClient::select_group(self, group).await
    }

    async fn clear_selection(&self) {
        ChatClient::clear_selection(self).await
    }

    async fn send_text(&self, content: &str, reply_to: Option<ReplyPreview>) -> Result<()> {
        ChatClient::send_text(self, content, reply_to).await
    }

    async fn send_image(&self, filename: &str, mime_type: &str, bytes: Vec<u8>) -> Result<()> {
        ChatClient::send_image(self, filename, mime_type, bytes).await
    }

    async fn notify_typing(&self) -> Result<()> {
        ChatClient::notify_typing(self).await
    }

    async fn delete_message(&self, message: &ChatMessage) -> Result<()> {
        ChatClient::delete_message(self, message).await
    }

    async fn delete_active_conversation(&self) -> Result<()> {
        ChatClient::delete_active_conversation(self).await
    }

    async fn search_users(&self, query: &str) -> Result<Vec<UserSummary>> {
        ChatClient::search_users(self, query).await
    }

    async fn send_contact_invite(&self, to: UserId) -> Result<()> {
        ChatClient::send_contact_invite(self, to).await
    }

    async fn respond_invite(&self, invite: InviteId, accept: bool) -> Result<()> {
        ChatClient::respond_invite(self, invite, accept).await
    }

    async fn remove_contact(&self, contact: UserId) -> Result<()> {
        ChatClient::remove_contact(self, contact).await
    }

    async fn create_group(&self, name: &str, member_ids: Vec<UserId>) -> Result<GroupSummary> {
        ChatClient::create_group(self, name, member_ids).await
    }

    async fn group_info(&self, group: GroupId) -> Result<GroupInfo> {
        ChatClient::group_info(self, group).await
    }

    async fn open_group_members(&self, group: GroupId) -> Result<Vec<String>> {
        ChatClient::open_group_members(self, group).await
    }

    async fn add_group_member(&self, group: GroupId, username: &str) -> Result<()> {
        ChatClient::add_group_member(self, group, username).await
    }

    async fn remove_group_member(&self, group: GroupId, username: &str) -> Result<()> {
        ChatClient::remove_group_member(self, group, username).await
    }

    async fn leave_group(&self, group: GroupId) -> Result<()> {
        ChatClient::leave_group(self, group).await
    }

    async fn delete_group(&self, group: GroupId) -> Result<()> {
        ChatClient::delete_group(self, group).await
    }

    async fn store(&self) -> ConversationStore {
        ChatClient::store(self).await
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        ChatClient::subscribe_events(self)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
