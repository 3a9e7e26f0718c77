//! 端到端集成测试 / End-to-end flows over in-process channels
//!
//! 每个 `Session` 背后是一个 mpsc 通道，代替真实 socket 的写端。
//! Each `Session` writes into an mpsc channel standing in for the socket writer.

use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use v_realtime::comm::config_validator::RealtimeSettings;
use v_realtime::realtime::identity::SharedSecretIdentity;
use v_realtime::realtime::notification::{EventKind, NotificationPayload};
use v_realtime::realtime::pagination::{PageRequest, SortOrder};
use v_realtime::realtime::store::MemoryStore;
use v_realtime::ws::Session;
use v_realtime::RealtimeServer;

const SECRET: &str = "integration-secret";

fn server() -> (RealtimeServer, Arc<MemoryStore>) {
    let mut settings = RealtimeSettings::default();
    settings.auth.shared_secret = SECRET.to_string();
    settings.delivery.flush_batch = 3;
    let store = Arc::new(MemoryStore::new());
    let identity = Arc::new(SharedSecretIdentity::new(SECRET));
    (RealtimeServer::with_parts(settings, store.clone(), identity), store)
}

struct Client {
    session: Session,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Client {
    async fn connect(server: &RealtimeServer, connection_id: &str, uid: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut session = Session::new(server.clone(), connection_id, tx);
        let token = SharedSecretIdentity::new(SECRET).issue(uid).unwrap();
        session
            .handle_text(&json!({"kind": "connect", "body": {"uid": uid, "token": token}}).to_string())
            .await;
        Self { session, rx }
    }

    async fn send(&mut self, frame: Value) {
        self.session.handle_text(&frame.to_string()).await;
    }

    fn frames(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            if let Message::Text(text) = msg {
                frames.push(serde_json::from_str(&text).unwrap());
            }
        }
        frames
    }

    fn of_kind(&mut self, kind: &str) -> Vec<Value> {
        self.frames().into_iter().filter(|f| f["kind"] == kind).collect()
    }
}

fn seqs(frames: &[Value]) -> Vec<u64> {
    frames.iter().map(|f| f["body"]["seq"].as_u64().unwrap()).collect()
}

#[tokio::test]
async fn offline_user_receives_backlog_in_order_on_connect() {
    let (server, _store) = server();
    for i in 0..7 {
        let payload = NotificationPayload::targeted(EventKind::NewBid, "supplier", &format!("bid {}", i), ["buyer"]);
        let result = server.dispatcher.dispatch(&payload).await.unwrap();
        assert_eq!(result.pending, vec!["buyer".to_string()]);
    }

    let mut buyer = Client::connect(&server, "b1", "buyer").await;
    let frames = buyer.frames();
    assert_eq!(frames[0]["kind"], "connected");
    assert_eq!(frames[1]["kind"], "chat.rooms");
    let pushed: Vec<Value> = frames.into_iter().filter(|f| f["kind"] == "notification").collect();
    assert_eq!(seqs(&pushed), (1..=7).collect::<Vec<_>>());

    // 已投递的记录不会重复推送 / delivered records are not pushed twice
    buyer.send(json!({"kind": "sync", "body": {"collection": "notifications", "limit": 5}})).await;
    let page = buyer.frames();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0]["body"]["items"].as_array().unwrap().len(), 5);
    assert_eq!(page[0]["body"]["items"][0]["state"], "delivered");
    assert_eq!(page[0]["body"]["nextCursor"], "s:3");
}

#[tokio::test]
async fn every_device_of_a_user_gets_the_push() {
    let (server, _store) = server();
    let mut phone = Client::connect(&server, "phone", "buyer").await;
    let mut laptop = Client::connect(&server, "laptop", "buyer").await;
    phone.frames();
    laptop.frames();

    let payload = NotificationPayload::targeted(EventKind::WinningBid, "buyer-admin", "you won", ["buyer"]);
    let result = server.dispatcher.dispatch(&payload).await.unwrap();
    assert_eq!(result.delivered, vec!["buyer".to_string()]);
    assert_eq!(seqs(&phone.of_kind("notification")), vec![1]);
    assert_eq!(seqs(&laptop.of_kind("notification")), vec![1]);

    // 一台设备断开不影响另一台 / one device leaving does not affect the other
    phone.session.close();
    let payload = NotificationPayload::targeted(EventKind::BidLocked, "buyer-admin", "locked", ["buyer"]);
    server.dispatcher.dispatch(&payload).await.unwrap();
    assert_eq!(seqs(&laptop.of_kind("notification")), vec![2]);
    assert!(server.registry.is_online("buyer"));
}

#[tokio::test]
async fn public_notification_skips_creator() {
    let (server, _store) = server();
    let mut alice = Client::connect(&server, "a", "alice").await;
    let mut bob = Client::connect(&server, "b", "bob").await;
    let mut carol = Client::connect(&server, "c", "carol").await;
    for client in [&mut alice, &mut bob, &mut carol] {
        client.frames();
    }

    let payload = NotificationPayload::public(EventKind::NewPurchaseRequest, "alice", "new request");
    let result = server.dispatcher.dispatch(&payload).await.unwrap();
    let recipients: HashSet<String> = result.recipients.into_iter().collect();
    assert_eq!(recipients, ["bob".to_string(), "carol".to_string()].into_iter().collect());

    assert!(alice.of_kind("notification").is_empty());
    assert_eq!(bob.of_kind("notification").len(), 1);
    assert_eq!(carol.of_kind("notification").len(), 1);
}

#[tokio::test]
async fn presence_and_typing_between_room_members() {
    let (server, _store) = server();
    let mut alice = Client::connect(&server, "a", "alice").await;
    alice.frames();
    let mut bob = Client::connect(&server, "b", "bob").await;
    bob.frames();

    let online = alice.of_kind("presence.changed");
    assert_eq!(online, vec![json!({"kind": "presence.changed", "body": {"userId": "bob", "status": "online"}})]);

    alice.send(json!({"kind": "chat.join", "body": {"roomId": "deal-7"}})).await;
    bob.send(json!({"kind": "chat.join", "body": {"roomId": "deal-7"}})).await;
    alice.frames();
    bob.frames();

    alice.send(json!({"kind": "chat.typing", "body": {"roomId": "deal-7", "isTyping": true}})).await;
    assert!(alice.frames().is_empty());
    assert_eq!(
        bob.of_kind("chat.typing"),
        vec![json!({"kind": "chat.typing", "body": {"roomId": "deal-7", "userId": "alice", "isTyping": true}})]
    );

    bob.session.close();
    let offline = alice.of_kind("presence.changed");
    assert_eq!(offline[0]["body"]["status"], "offline");
}

#[tokio::test]
async fn concurrent_posts_get_gapless_sequence_numbers() {
    let (server, _store) = server();
    let senders: Vec<String> = (0..8).map(|i| format!("user{}", i)).collect();
    for sender in &senders {
        server.chat.join("busy", sender).await.unwrap();
    }
    let mut watcher = Client::connect(&server, "w", "watcher").await;
    watcher.send(json!({"kind": "chat.join", "body": {"roomId": "busy"}})).await;
    watcher.frames();

    let mut handles = Vec::new();
    for sender in senders {
        let server = server.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..10 {
                server.chat.post_message("busy", &sender, &format!("{} #{}", sender, i)).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // 推送顺序与序号一致且无缺口 / push order matches seq order with no gaps
    let pushed = watcher.of_kind("chat.message");
    assert_eq!(seqs(&pushed), (1..=80).collect::<Vec<_>>());
}

#[tokio::test]
async fn watermark_pages_never_repeat_under_concurrent_inserts() {
    let (server, _store) = server();
    for _ in 0..10 {
        let payload = NotificationPayload::targeted(EventKind::Feedback, "ops", "note", ["reader"]);
        server.dispatcher.dispatch(&payload).await.unwrap();
    }

    let first = server
        .notifications_page("reader", &PageRequest::first(4, SortOrder::Desc))
        .await
        .unwrap();
    assert_eq!(first.items.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![10, 9, 8, 7]);

    // 新记录插入头部 / new records land at the head between page reads
    for _ in 0..3 {
        let payload = NotificationPayload::targeted(EventKind::Feedback, "ops", "late", ["reader"]);
        server.dispatcher.dispatch(&payload).await.unwrap();
    }

    let mut seen: Vec<u64> = first.items.iter().map(|r| r.seq).collect();
    let mut cursor = first.next_cursor;
    while let Some(next) = cursor {
        let page = server
            .notifications_page("reader", &PageRequest::after(next, 4, SortOrder::Desc))
            .await
            .unwrap();
        seen.extend(page.items.iter().map(|r| r.seq));
        cursor = page.next_cursor;
    }
    assert_eq!(seen, (1..=10).rev().collect::<Vec<_>>());
}

#[tokio::test]
async fn store_outage_leaves_no_partial_state() {
    let (server, store) = server();
    let mut buyer = Client::connect(&server, "b", "buyer").await;
    buyer.frames();

    store.set_unavailable(true);
    let payload = NotificationPayload::targeted(EventKind::NewBid, "supplier", "bid", ["buyer"]);
    let err = server.dispatcher.dispatch(&payload).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(buyer.of_kind("notification").is_empty());

    buyer.send(json!({"kind": "chat.join", "body": {"roomId": "R1"}})).await;
    assert_eq!(buyer.frames()[0]["error"], "store_unavailable");
    assert!(!server.chat.is_member("R1", "buyer"));

    store.set_unavailable(false);
    server.dispatcher.dispatch(&payload).await.unwrap();
    assert_eq!(seqs(&buyer.of_kind("notification")), vec![1]);
}
