use super::*;
use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex as StdMutex,
    },
    time::Duration,
};

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::TimeZone;
use serde_json::json;
use shared::{
    domain::MessageId,
    protocol::{ConversationsResponse, DirectConversation, InviteRecord, LoginResponse, UnreadCounts},
};
use tokio::net::TcpListener;

#[derive(Clone)]
struct BackendState {
    unread: Arc<StdMutex<UnreadCounts>>,
    conversations: Arc<StdMutex<ConversationsResponse>>,
    members: Arc<StdMutex<Vec<UserSummary>>>,
    sent_frames: mpsc::UnboundedSender<String>,
    message_push: broadcast::Sender<String>,
    group_push: broadcast::Sender<String>,
    close_message_sockets: broadcast::Sender<()>,
    message_connections: Arc<AtomicUsize>,
    group_connections: Arc<AtomicUsize>,
    unread_calls: Arc<AtomicUsize>,
    read_calls: Arc<AtomicUsize>,
    members_calls: Arc<AtomicUsize>,
}

struct TestBackend {
    base_url: String,
    state: BackendState,
    sent: Mutex<mpsc::UnboundedReceiver<String>>,
}

async fn handle_login() -> Json<LoginResponse> {
    Json(LoginResponse {
        access_token: "token-1".to_string(),
        token_type: "bearer".to_string(),
        user: UserSummary {
            id: UserId(1),
            username: "alice".to_string(),
        },
    })
}

async fn handle_conversations(State(state): State<BackendState>) -> Json<ConversationsResponse> {
    Json(state.conversations.lock().unwrap().clone())
}

async fn handle_unread(State(state): State<BackendState>) -> Json<UnreadCounts> {
    state.unread_calls.fetch_add(1, Ordering::SeqCst);
    Json(state.unread.lock().unwrap().clone())
}

async fn handle_mark_direct_read(State(state): State<BackendState>) -> Json<serde_json::Value> {
    state.read_calls.fetch_add(1, Ordering::SeqCst);
    state.unread.lock().unwrap().direct.clear();
    Json(json!({"status": "ok"}))
}

async fn handle_mark_group_read(State(state): State<BackendState>) -> Json<serde_json::Value> {
    state.read_calls.fetch_add(1, Ordering::SeqCst);
    state.unread.lock().unwrap().groups.clear();
    Json(json!({"status": "ok"}))
}

async fn handle_history() -> Json<Vec<ChatMessage>> {
    Json(Vec::new())
}

async fn handle_contacts() -> Json<Vec<UserSummary>> {
    Json(vec![UserSummary {
        id: UserId(2),
        username: "bob".to_string(),
    }])
}

async fn handle_invites() -> Json<Vec<InviteRecord>> {
    Json(Vec::new())
}

async fn handle_users_list() -> Json<Vec<UserSummary>> {
    Json(vec![
        UserSummary {
            id: UserId(1),
            username: "alice".to_string(),
        },
        UserSummary {
            id: UserId(2),
            username: "bob".to_string(),
        },
        UserSummary {
            id: UserId(3),
            username: "carol".to_string(),
        },
        UserSummary {
            id: UserId(4),
            username: "UnknownUser_4".to_string(),
        },
    ])
}

async fn handle_user() -> Json<UserSummary> {
    Json(UserSummary {
        id: UserId(7),
        username: "dave".to_string(),
    })
}

async fn handle_groups() -> Json<Vec<GroupSummary>> {
    Json(Vec::new())
}

async fn handle_members(State(state): State<BackendState>) -> Json<Vec<UserSummary>> {
    state.members_calls.fetch_add(1, Ordering::SeqCst);
    Json(state.members.lock().unwrap().clone())
}

async fn handle_message_ws(
    State(state): State<BackendState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| message_socket(socket, state))
}

async fn message_socket(socket: WebSocket, state: BackendState) {
    let (mut sender, mut receiver) = socket.split();
    let mut push = state.message_push.subscribe();
    let mut close = state.close_message_sockets.subscribe();
    state.message_connections.fetch_add(1, Ordering::SeqCst);
    loop {
        tokio::select! {
            pushed = push.recv() => {
                let Ok(text) = pushed else { break };
                if sender.send(WsMessage::Text(text)).await.is_err() {
                    break;
                }
            }
            _ = close.recv() => break,
            frame = receiver.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        let _ = state.sent_frames.send(text);
                    }
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}

async fn handle_user_ws(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|mut socket| async move {
        // the user channel pushes a presence snapshot unprompted
        let snapshot = json!({"type": "online_users", "user_ids": [1]}).to_string();
        let _ = socket.send(WsMessage::Text(snapshot)).await;
        while let Some(Ok(_)) = socket.recv().await {}
    })
}

async fn handle_group_ws(
    State(state): State<BackendState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let (mut sender, mut receiver) = socket.split();
        let mut push = state.group_push.subscribe();
        state.group_connections.fetch_add(1, Ordering::SeqCst);
        loop {
            tokio::select! {
                pushed = push.recv() => {
                    let Ok(text) = pushed else { break };
                    if sender.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                frame = receiver.next() => {
                    if !matches!(frame, Some(Ok(_))) {
                        break;
                    }
                }
            }
        }
    })
}

async fn spawn_backend() -> TestBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let (message_push, _) = broadcast::channel(64);
    let (group_push, _) = broadcast::channel(64);
    let (close_message_sockets, _) = broadcast::channel(8);
    let state = BackendState {
        unread: Arc::new(StdMutex::new(UnreadCounts::default())),
        conversations: Arc::new(StdMutex::new(ConversationsResponse::default())),
        members: Arc::new(StdMutex::new(Vec::new())),
        sent_frames: sent_tx,
        message_push,
        group_push,
        close_message_sockets,
        message_connections: Arc::new(AtomicUsize::new(0)),
        group_connections: Arc::new(AtomicUsize::new(0)),
        unread_calls: Arc::new(AtomicUsize::new(0)),
        read_calls: Arc::new(AtomicUsize::new(0)),
        members_calls: Arc::new(AtomicUsize::new(0)),
    };
    let app = Router::new()
        .route("/api/user/login", post(handle_login))
        .route("/api/user/contacts/:id", get(handle_contacts))
        .route("/api/user/contacts/invites/:id", get(handle_invites))
        .route("/api/user/users", get(handle_users_list))
        .route("/api/user/users/:id", get(handle_user))
        .route("/api/user/ws/users", get(handle_user_ws))
        .route("/api/message/conversations/:id", get(handle_conversations))
        .route("/api/message/conversations/:id/unread", get(handle_unread))
        .route(
            "/api/message/conversations/:id/read/:other",
            post(handle_mark_direct_read),
        )
        .route(
            "/api/message/conversations/:id/groups/:gid/read",
            post(handle_mark_group_read),
        )
        .route("/api/message/messages/:a/:b", get(handle_history))
        .route("/api/message/group_messages/:gid", get(handle_history))
        .route("/api/message/ws/:id", get(handle_message_ws))
        .route("/api/group/groups/:id", get(handle_groups))
        .route("/api/group/groups/:gid/members", get(handle_members))
        .route("/api/group/ws/groups/:id", get(handle_group_ws))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    TestBackend {
        base_url: format!("http://{addr}"),
        state,
        sent: Mutex::new(sent_rx),
    }
}

impl TestBackend {
    fn set_unread_direct(&self, contact: i64, count: u32) {
        self.state
            .unread
            .lock()
            .unwrap()
            .direct
            .insert(contact.to_string(), count);
    }

    fn set_direct_conversation(&self, contact: i64, username: &str, last_message: Option<&str>) {
        self.state.conversations.lock().unwrap().users = vec![DirectConversation {
            id: UserId(contact),
            username: username.to_string(),
            last_message: last_message.map(str::to_string),
            last_timestamp: last_message
                .map(|_| Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
        }];
    }

    fn push_message_frame(&self, frame: serde_json::Value) {
        let _ = self.state.message_push.send(frame.to_string());
    }

    fn push_group_frame(&self, frame: serde_json::Value) {
        let _ = self.state.group_push.send(frame.to_string());
    }

    async fn next_sent_frame(&self) -> ClientFrame {
        let mut sent = self.sent.lock().await;
        let text = time::timeout(Duration::from_secs(5), sent.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("frame channel closed");
        serde_json::from_str(&text).expect("client frame")
    }

    async fn wait_message_connections(&self, at_least: usize) {
        let connections = Arc::clone(&self.state.message_connections);
        eventually(|| {
            let connections = Arc::clone(&connections);
            async move { connections.load(Ordering::SeqCst) >= at_least }
        })
        .await;
    }

    /// Wait out `window`, then return everything the client sent so far.
    async fn drain_sent_frames(&self, window: Duration) -> Vec<ClientFrame> {
        time::sleep(window).await;
        let mut sent = self.sent.lock().await;
        let mut frames = Vec::new();
        while let Ok(text) = sent.try_recv() {
            frames.push(serde_json::from_str(&text).expect("client frame"));
        }
        frames
    }
}

async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not met within timeout");
}

fn bob() -> UserSummary {
    UserSummary {
        id: UserId(2),
        username: "bob".to_string(),
    }
}

#[tokio::test]
async fn login_seeds_unread_previews_and_presence() {
    let backend = spawn_backend().await;
    backend.set_unread_direct(2, 3);
    backend.set_direct_conversation(2, "bob", Some("see you"));

    let client = ChatClient::new(ClientConfig::new(&backend.base_url).expect("config"));
    let identity = client.login("alice", "secret").await.expect("login");
    assert_eq!(identity.id, UserId(1));
    assert_eq!(identity.username, "alice");

    let store = client.store().await;
    assert_eq!(store.unread.direct_for(UserId(2)), 3);
    assert_eq!(
        store
            .previews
            .get(&ConversationKey::Direct(UserId(2)))
            .map(|preview| preview.text.clone()),
        Some("see you".to_string())
    );
    assert_eq!(store.contacts, vec![bob()]);

    // presence snapshot arrives over the user channel, unprompted
    eventually(|| async { client.store().await.online.contains(&UserId(1)) }).await;
}

#[tokio::test]
async fn sent_message_appears_only_via_the_echo() {
    let backend = spawn_backend().await;
    let client = ChatClient::new(ClientConfig::new(&backend.base_url).expect("config"));
    client.login("alice", "secret").await.expect("login");
    backend.wait_message_connections(1).await;
    client.select_direct(bob()).await.expect("select");

    // selection rebinds the message channel; wait for the fresh socket
    backend.wait_message_connections(2).await;

    client.send_text("hi", None).await.expect("send");

    let frame = backend.next_sent_frame().await;
    match frame {
        ClientFrame::Direct { to, content, .. } => {
            assert_eq!(to, UserId(2));
            assert_eq!(content, "hi");
        }
        other => panic!("unexpected frame: {other:?}"),
    }

    // no optimistic append, but the preview updates right away
    let store = client.store().await;
    assert!(store.timeline.is_empty());
    assert_eq!(
        store
            .previews
            .get(&ConversationKey::Direct(UserId(2)))
            .map(|preview| preview.text.clone()),
        Some("hi".to_string())
    );

    backend.push_message_frame(json!({
        "type": "direct",
        "id": 501,
        "from": "alice",
        "to": "bob",
        "content": "hi",
        "timestamp": "2024-05-01T12:00:00Z"
    }));

    eventually(|| async {
        let store = client.store().await;
        store.timeline.len() == 1 && store.timeline[0].id == MessageId(501)
    })
    .await;
}

#[tokio::test]
async fn message_in_active_conversation_marks_read_and_zeroes_badge() {
    let backend = spawn_backend().await;
    backend.set_unread_direct(2, 3);

    let client = ChatClient::new(ClientConfig::new(&backend.base_url).expect("config"));
    client.login("alice", "secret").await.expect("login");
    backend.wait_message_connections(1).await;
    client.select_direct(bob()).await.expect("select");

    // selecting already issued one mark-read and reconciled the badge away
    assert!(backend.state.read_calls.load(Ordering::SeqCst) >= 1);
    eventually(|| async { client.store().await.unread.direct_for(UserId(2)) == 0 }).await;

    // a new unread appears, then a message lands in the open conversation
    backend.set_unread_direct(2, 1);
    let reads_before = backend.state.read_calls.load(Ordering::SeqCst);
    backend.wait_message_connections(2).await;
    backend.push_message_frame(json!({
        "type": "direct",
        "id": 600,
        "from": "bob",
        "to": "alice",
        "content": "ping",
        "timestamp": "2024-05-01T12:01:00Z"
    }));

    eventually(|| async {
        let store = client.store().await;
        store.timeline.iter().any(|message| message.id == MessageId(600))
            && store.unread.direct_for(UserId(2)) == 0
    })
    .await;
    assert!(backend.state.read_calls.load(Ordering::SeqCst) > reads_before);
}

#[tokio::test]
async fn typing_burst_puts_one_typing_and_one_stop_on_the_wire() {
    let backend = spawn_backend().await;
    let client = ChatClient::new(ClientConfig::new(&backend.base_url).expect("config"));
    client.login("alice", "secret").await.expect("login");
    backend.wait_message_connections(1).await;
    client.select_direct(bob()).await.expect("select");
    backend.wait_message_connections(2).await;

    for _ in 0..3 {
        client.notify_typing().await.expect("typing");
        time::sleep(Duration::from_millis(100)).await;
    }

    let frames = backend.drain_sent_frames(Duration::from_millis(1500)).await;
    let typing: Vec<&ClientFrame> = frames
        .iter()
        .filter(|frame| matches!(frame, ClientFrame::Typing { .. } | ClientFrame::StopTyping { .. }))
        .collect();
    assert_eq!(typing.len(), 2, "expected one typing and one stop: {frames:?}");
    assert!(matches!(typing[0], ClientFrame::Typing { to } if *to == UserId(2)));
    assert!(matches!(typing[1], ClientFrame::StopTyping { to } if *to == UserId(2)));
}

#[tokio::test]
async fn member_removed_updates_open_roster_without_extra_rest() {
    let backend = spawn_backend().await;
    *backend.state.members.lock().unwrap() = vec![
        UserSummary {
            id: UserId(1),
            username: "alice".to_string(),
        },
        bob(),
    ];

    let client = ChatClient::new(ClientConfig::new(&backend.base_url).expect("config"));
    client.login("alice", "secret").await.expect("login");

    let members = client.open_group_members(GroupId(9)).await.expect("members");
    assert_eq!(members, vec!["alice".to_string(), "bob".to_string()]);
    assert_eq!(backend.state.members_calls.load(Ordering::SeqCst), 1);

    let group_connections = Arc::clone(&backend.state.group_connections);
    eventually(|| {
        let group_connections = Arc::clone(&group_connections);
        async move { group_connections.load(Ordering::SeqCst) >= 1 }
    })
    .await;
    backend.push_group_frame(json!({
        "type": "member_removed",
        "group_id": 9,
        "username": "bob"
    }));

    eventually(|| async {
        client
            .store()
            .await
            .group_members
            .get(&GroupId(9))
            .is_some_and(|members| members == &vec!["alice".to_string()])
    })
    .await;
    assert_eq!(backend.state.members_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn user_search_excludes_self_contacts_and_anonymized() {
    let backend = spawn_backend().await;
    let client = ChatClient::new(ClientConfig::new(&backend.base_url).expect("config"));
    client.login("alice", "secret").await.expect("login");

    // alice is the caller, bob is already a contact, UnknownUser_4 is deleted
    let results = client.search_users("").await.expect("search");
    assert_eq!(
        results,
        vec![UserSummary {
            id: UserId(3),
            username: "carol".to_string(),
        }]
    );

    assert_eq!(client.search_users("car").await.expect("search").len(), 1);
    assert!(client.search_users("zzz").await.expect("search").is_empty());
}

#[tokio::test]
async fn reconnect_forces_a_reconciliation_pass() {
    let backend = spawn_backend().await;
    let client = ChatClient::new(ClientConfig::new(&backend.base_url).expect("config"));
    client.login("alice", "secret").await.expect("login");

    backend.wait_message_connections(1).await;
    let pulls_before = backend.state.unread_calls.load(Ordering::SeqCst);

    let _ = backend.state.close_message_sockets.send(());

    backend.wait_message_connections(2).await;
    eventually(|| async {
        backend.state.unread_calls.load(Ordering::SeqCst) > pulls_before
    })
    .await;
}
