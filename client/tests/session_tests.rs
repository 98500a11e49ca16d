//! Chat session against a canned relay
//!
//! A bare TCP listener plays the relay: it records each request body and
//! answers with a fixed event-stream body.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use deepchat_client::{Attachment, ChatSession, RelayClient, StreamObserver};
use relay_core::{
    ConversationStore, JsonFileStore, MemoryStore, MessageRole, StoreError, StoreState,
    StreamStatus,
};
use tokio::sync::watch;

/// Serve `responses` in order, one per connection; request bodies come out of the receiver
async fn fake_relay(responses: Vec<(u16, String)>) -> (String, mpsc::UnboundedReceiver<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for (status, body) in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let _ = tx.send(serde_json::from_slice(&request).unwrap_or(Value::Null));

            let reason = if status == 200 { "OK" } else { "Internal Server Error" };
            let head = format!(
                "HTTP/1.1 {status} {reason}\r\ncontent-type: text/event-stream\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        }
    });

    (url, rx)
}

/// Read one request and return its body
async fn read_request(socket: &mut tokio::net::TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let length: usize = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .map_or(0, |v| v.trim().parse().unwrap());
            let body_start = end + 4;
            while buf.len() < body_start + length {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "request body cut short");
                buf.extend_from_slice(&chunk[..n]);
            }
            return buf[body_start..body_start + length].to_vec();
        }
        assert!(n > 0, "connection closed before headers");
    }
}

#[derive(Default)]
struct Recorder {
    updates: Vec<String>,
    done: Vec<StreamStatus>,
}

impl StreamObserver for Recorder {
    fn on_update(&mut self, content: &str) {
        self.updates.push(content.to_string());
    }
    fn on_done(&mut self, status: StreamStatus) {
        self.done.push(status);
    }
}

fn ok(body: &str) -> (u16, String) {
    (200, body.to_string())
}

#[tokio::test]
async fn test_turn_is_streamed_into_placeholder() {
    let (url, mut requests) = fake_relay(vec![ok(
        "data: {\"content\":\"He\"}\n\ndata: {\"content\":\"llo\"}\n\ndata: [DONE]\n\n",
    )])
    .await;
    let store = Arc::new(MemoryStore::default());
    let session = ChatSession::new(store.clone(), RelayClient::new(url));

    let mut recorder = Recorder::default();
    let outcome = session
        .send("Hi", None, CancellationToken::new(), &mut recorder)
        .await
        .unwrap();

    assert_eq!(outcome.content, "Hello");
    assert_eq!(outcome.status, StreamStatus::Completed);
    assert_eq!(recorder.updates, vec!["He", "Hello"]);
    assert_eq!(recorder.done, vec![StreamStatus::Completed]);

    let request = requests.recv().await.unwrap();
    assert_eq!(request["prompt"], "Hi");
    assert_eq!(request["history"], Value::Array(vec![]));

    let state = store.snapshot();
    let messages = state.conversations.active().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role(), MessageRole::User);
    assert_eq!(messages[1].content(), "Hello");
    assert_eq!(messages[1].status(), Some(StreamStatus::Completed));
}

#[tokio::test]
async fn test_second_turn_sends_history() {
    let (url, mut requests) = fake_relay(vec![
        ok("data: {\"content\":\"Hello\"}\n\ndata: [DONE]\n\n"),
        ok("data: {\"content\":\"Fine\"}\n\ndata: [DONE]\n\n"),
    ])
    .await;
    let session = ChatSession::new(Arc::new(MemoryStore::default()), RelayClient::new(url));

    session
        .send("Hi", None, CancellationToken::new(), &mut ())
        .await
        .unwrap();
    session
        .send("How are you?", None, CancellationToken::new(), &mut ())
        .await
        .unwrap();

    let _first = requests.recv().await.unwrap();
    let second = requests.recv().await.unwrap();
    assert_eq!(
        second["history"],
        serde_json::json!([
            {"role": "user", "content": "Hi"},
            {"role": "assistant", "content": "Hello"},
        ])
    );
}

#[tokio::test]
async fn test_error_frame_recorded_in_placeholder() {
    let (url, _requests) = fake_relay(vec![ok(
        "data: {\"content\":\"Part\"}\n\ndata: {\"error\":\"model crashed\"}\n\n",
    )])
    .await;
    let store = Arc::new(MemoryStore::default());
    let session = ChatSession::new(store.clone(), RelayClient::new(url));

    let outcome = session
        .send("Hi", None, CancellationToken::new(), &mut ())
        .await
        .unwrap();

    assert_eq!(outcome.status, StreamStatus::Error);
    let state = store.snapshot();
    let reply = &state.conversations.active().messages()[1];
    assert_eq!(reply.content(), "Part\nError: model crashed");
    assert_eq!(reply.status(), Some(StreamStatus::Error));
}

#[tokio::test]
async fn test_relay_500_is_transport_failure() {
    let (url, _requests) =
        fake_relay(vec![(500, "{\"error\":\"Internal Server Error\"}".to_string())]).await;
    let session = ChatSession::new(Arc::new(MemoryStore::default()), RelayClient::new(url));

    let mut recorder = Recorder::default();
    let outcome = session
        .send("Hi", None, CancellationToken::new(), &mut recorder)
        .await
        .unwrap();

    assert_eq!(outcome.status, StreamStatus::Error);
    assert!(recorder.updates.is_empty());
    assert_eq!(recorder.done, vec![StreamStatus::Error]);
}

#[tokio::test]
async fn test_document_attachment_sent_as_pdfdoc() {
    let (url, mut requests) =
        fake_relay(vec![ok("data: {\"content\":\"ok\"}\n\ndata: [DONE]\n\n")]).await;
    let store = Arc::new(MemoryStore::default());
    let session = ChatSession::new(store.clone(), RelayClient::new(url));

    let attachment = Attachment::Document {
        name: "notes.txt".into(),
        text: "page one^^^".into(),
    };
    session
        .send("Summarise", Some(attachment), CancellationToken::new(), &mut ())
        .await
        .unwrap();

    let request = requests.recv().await.unwrap();
    assert_eq!(request["pdfdoc"], "page one^^^");
    assert_eq!(request["image"], Value::Null);
    let state = store.snapshot();
    assert_eq!(
        state.conversations.active().messages()[0].pdf.as_deref(),
        Some("notes.txt")
    );
}

#[tokio::test]
async fn test_turns_survive_reopening_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("conversations.json");
    let (url, _requests) =
        fake_relay(vec![ok("data: {\"content\":\"Hello\"}\n\ndata: [DONE]\n\n")]).await;

    {
        let store = Arc::new(JsonFileStore::open(&path).unwrap());
        let session = ChatSession::new(store, RelayClient::new(url));
        session
            .send("Hi", None, CancellationToken::new(), &mut ())
            .await
            .unwrap();
    }

    let reopened: StoreState = JsonFileStore::open(&path).unwrap().snapshot();
    let messages = reopened.conversations.active().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content(), "Hello");
    assert_eq!(messages[1].status(), Some(StreamStatus::Completed));
}

/// File store that counts how often it writes to disk
struct CountingStore {
    inner: JsonFileStore,
    writes: AtomicUsize,
}

impl ConversationStore for CountingStore {
    fn snapshot(&self) -> StoreState {
        self.inner.snapshot()
    }

    fn modify(&self, change: &mut dyn FnMut(&mut StoreState) -> bool) -> Result<bool, StoreError> {
        let changed = self.inner.modify(change)?;
        if changed {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(changed)
    }

    fn modify_transient(
        &self,
        change: &mut dyn FnMut(&mut StoreState) -> bool,
    ) -> Result<bool, StoreError> {
        self.inner.modify_transient(change)
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.flush()
    }

    fn subscribe(&self) -> watch::Receiver<StoreState> {
        self.inner.subscribe()
    }
}

#[tokio::test]
async fn test_long_answer_written_to_disk_per_turn_not_per_fragment() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("conversations.json");
    let mut body: String = (0..200)
        .map(|i| format!("data: {{\"content\":\"w{i} \"}}\n\n"))
        .collect();
    body.push_str("data: [DONE]\n\n");
    let (url, _requests) = fake_relay(vec![ok(&body)]).await;

    let store = Arc::new(CountingStore {
        inner: JsonFileStore::open(&path).unwrap(),
        writes: AtomicUsize::new(0),
    });
    let session = ChatSession::new(store.clone(), RelayClient::new(url));
    let mut recorder = Recorder::default();
    let outcome = session
        .send("Count", None, CancellationToken::new(), &mut recorder)
        .await
        .unwrap();

    assert_eq!(outcome.status, StreamStatus::Completed);
    assert_eq!(recorder.updates.len(), 200);
    // One write for the new turn, one once it finished
    assert_eq!(store.writes.load(Ordering::SeqCst), 2);

    let reopened = JsonFileStore::open(&path).unwrap().snapshot();
    let reply = &reopened.conversations.active().messages()[1];
    assert!(reply.content().starts_with("w0 w1 "));
    assert!(reply.content().ends_with("w199 "));
    assert_eq!(reply.status(), Some(StreamStatus::Completed));
}
