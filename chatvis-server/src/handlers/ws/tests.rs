use super::*;
use crate::services::testing::{MemoryGroupDirectory, MemoryMessageStore};
use chrono::Utc;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use shared::{config::server::AuthConfig, models::User};
use tokio::task::JoinHandle;

const USER: i64 = 7;

struct Fixture {
    hub: Arc<Hub>,
    tokens: Arc<TokenService>,
    directory: Arc<MemoryGroupDirectory>,
    store: Arc<MemoryMessageStore>,
    _intake: crate::hub::IntakeStream,
}

impl Fixture {
    fn new() -> Self {
        let (hub, intake) = Hub::new();
        let directory = Arc::new(MemoryGroupDirectory::new());
        directory.add_group("g1", 1);
        directory.add_group("g2", 2);
        directory.add_user(USER, &["g1"]);
        Self {
            hub: Arc::new(hub),
            tokens: Arc::new(TokenService::from_config(&AuthConfig::default())),
            directory,
            store: Arc::new(MemoryMessageStore::new()),
            _intake: intake,
        }
    }

    fn session(&self) -> Session {
        Session {
            hub: Arc::clone(&self.hub),
            tokens: Arc::clone(&self.tokens),
            directory: self.directory.clone(),
            store: Some(self.store.clone()),
            config: WebSocketConfig::default(),
        }
    }

    fn token_for(&self, id: i64) -> String {
        let user = User {
            id,
            name: "Ada".into(),
            nickname: None,
            email: "ada@example.com".into(),
            is_llm: false,
            created_at: Utc::now(),
        };
        self.tokens.issue(&user).unwrap()
    }

    fn open(&self) -> Client {
        let (to_server, server_in) = unbounded::<Result<Message, String>>();
        let (server_out, from_server) = unbounded::<Message>();
        let task = tokio::spawn(self.session().run(server_out, server_in));
        Client {
            to_server,
            from_server,
            task,
        }
    }

    async fn open_authenticated(&self) -> Client {
        let mut client = self.open();
        client.send_text(&serde_json::json!({ "token": self.token_for(USER) }).to_string());
        assert_eq!(client.next_frame().await, Message::Text(AUTH_SUCCEEDED.into()));
        client
    }
}

struct Client {
    to_server: UnboundedSender<Result<Message, String>>,
    from_server: UnboundedReceiver<Message>,
    task: JoinHandle<()>,
}

impl Client {
    fn send_text(&self, text: &str) {
        self.to_server
            .unbounded_send(Ok(Message::Text(text.to_string().into())))
            .unwrap();
    }

    async fn next_frame(&mut self) -> Message {
        timeout(Duration::from_secs(2), self.from_server.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("server side closed without a frame")
    }

    async fn next_message(&mut self) -> ChatMessage {
        match self.next_frame().await {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    async fn finished(self) {
        timeout(Duration::from_secs(2), self.task)
            .await
            .expect("session did not end")
            .unwrap();
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn invalid_token_is_rejected_and_closed() {
    let fixture = Fixture::new();
    let mut client = fixture.open();
    client.send_text(r#"{"token":"not-a-jwt"}"#);

    assert_eq!(client.next_frame().await, Message::Text(AUTH_FAILED.into()));
    assert_eq!(client.next_frame().await, Message::Close(None));
    client.finished().await;
    assert!(!fixture.hub.is_connected(USER));
}

#[tokio::test]
async fn non_text_first_frame_is_rejected() {
    let fixture = Fixture::new();
    let mut client = fixture.open();
    client
        .to_server
        .unbounded_send(Ok(Message::Binary(Bytes::from_static(b"\x00"))))
        .unwrap();

    assert_eq!(client.next_frame().await, Message::Text(AUTH_FAILED.into()));
    assert_eq!(client.next_frame().await, Message::Close(None));
}

#[tokio::test]
async fn valid_token_registers_connection_and_membership() {
    let fixture = Fixture::new();
    let _client = fixture.open_authenticated().await;

    wait_until(|| fixture.hub.is_connected(USER)).await;
    assert!(fixture.hub.is_member(USER, "g1"));
    assert!(!fixture.hub.is_member(USER, "g2"));
}

#[tokio::test]
async fn id_less_frame_is_persisted_and_echoed_with_its_id() {
    let fixture = Fixture::new();
    let mut client = fixture.open_authenticated().await;

    // The sender id on the frame is ignored in favor of the token's user.
    client.send_text(r#"{"groupId":"g1","content":"hello","senderId":999}"#);
    let echoed = client.next_message().await;

    assert_eq!(echoed.id, Some(1));
    assert_eq!(echoed.sender_id, USER);
    assert_eq!(echoed.group_id, "g1");
    assert_eq!(echoed.content, "hello");
    let stored = fixture.store.all_messages();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].group_id, 1);
    assert_eq!(stored[0].sender_id, USER);
}

#[tokio::test]
async fn frame_with_id_is_relayed_without_persisting() {
    let fixture = Fixture::new();
    let mut client = fixture.open_authenticated().await;

    client.send_text(r#"{"id":41,"groupId":"g1","content":"already stored"}"#);
    let relayed = client.next_message().await;

    assert_eq!(relayed.id, Some(41));
    assert!(fixture.store.all_messages().is_empty());
}

#[tokio::test]
async fn frames_for_foreign_groups_and_garbage_are_ignored() {
    let fixture = Fixture::new();
    let mut client = fixture.open_authenticated().await;

    client.send_text(r#"{"groupId":"g2","content":"not mine"}"#);
    client.send_text("{ not json");
    client.send_text(r#"{"groupId":"g1","content":"mine"}"#);

    let next = client.next_message().await;
    assert_eq!(next.content, "mine");
    assert_eq!(fixture.store.all_messages().len(), 1);
}

#[tokio::test]
async fn store_failure_still_broadcasts_the_frame() {
    let fixture = Fixture::new();
    fixture.store.fail_appends(true);
    let mut client = fixture.open_authenticated().await;

    client.send_text(r#"{"groupId":"g1","content":"unsaved"}"#);
    let echoed = client.next_message().await;
    assert_eq!(echoed.id, None);
    assert_eq!(echoed.content, "unsaved");
}

#[tokio::test]
async fn closing_the_stream_unregisters_the_user() {
    let fixture = Fixture::new();
    let mut client = fixture.open_authenticated().await;
    wait_until(|| fixture.hub.is_connected(USER)).await;

    client.to_server.close_channel();
    assert_eq!(client.next_frame().await, Message::Close(None));
    client.finished().await;
    assert!(!fixture.hub.is_connected(USER));
    // Membership outlives the connection.
    assert!(fixture.hub.is_member(USER, "g1"));
}

#[tokio::test]
async fn directory_failure_closes_the_socket() {
    let fixture = Fixture::new();
    fixture.directory.set_unavailable(true);
    let mut client = fixture.open_authenticated().await;

    assert_eq!(client.next_frame().await, Message::Close(None));
    client.finished().await;
    assert!(!fixture.hub.is_connected(USER));
}

#[tokio::test]
async fn second_session_takes_over_the_first() {
    let fixture = Fixture::new();
    let mut first = fixture.open_authenticated().await;
    wait_until(|| fixture.hub.is_connected(USER)).await;

    let mut second = fixture.open_authenticated().await;
    assert_eq!(first.next_frame().await, Message::Close(None));
    first.finished().await;

    // The old session's cleanup must not evict its successor.
    assert!(fixture.hub.is_connected(USER));
    second.send_text(r#"{"groupId":"g1","content":"after takeover"}"#);
    assert_eq!(second.next_message().await.content, "after takeover");
}
