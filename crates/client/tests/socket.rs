//! Socket client and client actor against a real WebSocket server.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use analyst_client::identity::SESSION_ID_KEY;
use analyst_client::{
    ClientHandle, ConnectionPhase, KvStore, Location, ReconnectPolicy, SessionIdentity,
    SocketClient, Timings,
};
use analyst_protocol::{ArtifactSyncStatus, Envelope};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use url::Url;

const WAIT: Duration = Duration::from_secs(5);

struct Accepted {
    path: String,
    ws: WebSocketStream<TcpStream>,
}

impl Accepted {
    async fn send_json(&mut self, json: &str) {
        self.ws
            .send(Message::Text(json.to_string().into()))
            .await
            .expect("server send");
    }

    async fn next_text(&mut self) -> String {
        loop {
            let frame = timeout(WAIT, self.ws.next())
                .await
                .expect("frame in time")
                .expect("stream open")
                .expect("frame ok");
            if let Message::Text(text) = frame {
                return text.as_str().to_string();
            }
        }
    }
}

struct TestServer {
    addr: SocketAddr,
    accepted: mpsc::UnboundedReceiver<Accepted>,
}

impl TestServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (tx, accepted) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut path = String::new();
                    let ws = accept_hdr_async(
                        stream,
                        |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                            path = req.uri().to_string();
                            Ok(resp)
                        },
                    )
                    .await;
                    if let Ok(ws) = ws {
                        let _ = tx.send(Accepted { path, ws });
                    }
                });
            }
        });

        Self { addr, accepted }
    }

    fn url(&self, path: &str) -> Url {
        Url::parse(&format!("ws://{}{}", self.addr, path)).expect("url")
    }

    fn base(&self) -> String {
        format!("ws://{}", self.addr)
    }

    async fn accept(&mut self) -> Accepted {
        timeout(WAIT, self.accepted.recv())
            .await
            .expect("connection in time")
            .expect("server running")
    }

    async fn expect_no_connection(&mut self, within: Duration) {
        assert!(
            timeout(within, self.accepted.recv()).await.is_err(),
            "unexpected connection"
        );
    }
}

async fn wait_for_phase(socket: &SocketClient, phase: ConnectionPhase) {
    timeout(WAIT, async {
        while socket.state() != phase {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("phase reached in time");
}

fn fast_socket() -> SocketClient {
    SocketClient::new(ReconnectPolicy::fixed(Duration::from_millis(50)))
}

#[tokio::test]
async fn dispatches_parsed_frames_and_drops_garbage() {
    let mut server = TestServer::start().await;
    let socket = fast_socket();
    let (tx, mut received) = mpsc::unbounded_channel::<Envelope>();
    let _sub = socket.on_message(move |envelope| {
        let _ = tx.send(envelope.clone());
    });

    socket.connect(server.url("/ws/client_abc"));
    let mut conn = server.accept().await;
    assert_eq!(conn.path, "/ws/client_abc");

    conn.send_json(r#"{"type":"CHAT_DELTA","payload":"Hel"}"#).await;
    conn.send_json("{not json").await;
    conn.send_json(r#"{"payload":"no type"}"#).await;
    conn.send_json(r#"{"type":"STATUS_UPDATE","payload":"idle"}"#).await;

    let first = timeout(WAIT, received.recv()).await.expect("first").expect("open");
    let second = timeout(WAIT, received.recv()).await.expect("second").expect("open");
    assert_eq!(first.kind, "CHAT_DELTA");
    assert_eq!(first.payload, serde_json::json!("Hel"));
    assert_eq!(second.kind, "STATUS_UPDATE");
    assert_eq!(socket.state(), ConnectionPhase::Open);
}

#[tokio::test]
async fn send_reaches_server_only_when_open() {
    let mut server = TestServer::start().await;
    let socket = fast_socket();
    assert!(!socket.send_user_message("too early"));

    socket.connect(server.url("/ws/client_abc"));
    let mut conn = server.accept().await;
    wait_for_phase(&socket, ConnectionPhase::Open).await;

    assert!(socket.send_user_message("hello"));
    assert_eq!(
        conn.next_text().await,
        r#"{"type":"USER_MESSAGE","payload":"hello"}"#
    );
}

#[tokio::test]
async fn reconnects_after_unexpected_close() {
    let mut server = TestServer::start().await;
    let socket = fast_socket();
    socket.connect(server.url("/ws/client_abc"));

    let conn = server.accept().await;
    wait_for_phase(&socket, ConnectionPhase::Open).await;
    drop(conn);

    let again = server.accept().await;
    assert_eq!(again.path, "/ws/client_abc");
    wait_for_phase(&socket, ConnectionPhase::Open).await;
}

#[tokio::test]
async fn explicit_disconnect_never_reconnects() {
    let mut server = TestServer::start().await;
    let socket = fast_socket();
    socket.connect(server.url("/ws/client_abc"));
    let _conn = server.accept().await;
    wait_for_phase(&socket, ConnectionPhase::Open).await;

    socket.disconnect();
    assert_eq!(socket.state(), ConnectionPhase::Idle);
    server.expect_no_connection(Duration::from_millis(400)).await;
    assert_eq!(socket.state(), ConnectionPhase::Idle);
    assert!(!socket.send_user_message("after disconnect"));
}

#[tokio::test]
async fn connect_is_idempotent_for_the_same_url() {
    let mut server = TestServer::start().await;
    let socket = fast_socket();
    let url = server.url("/ws/client_abc");

    socket.connect(url.clone());
    socket.connect(url.clone());
    let _conn = server.accept().await;
    wait_for_phase(&socket, ConnectionPhase::Open).await;
    socket.connect(url);

    server.expect_no_connection(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn switching_url_replaces_the_connection() {
    let mut server = TestServer::start().await;
    let socket = fast_socket();

    socket.connect(server.url("/ws/first"));
    let _first = server.accept().await;
    wait_for_phase(&socket, ConnectionPhase::Open).await;

    socket.connect(server.url("/ws/second"));
    let second = server.accept().await;
    assert_eq!(second.path, "/ws/second");

    // The retired connection must not come back
    server.expect_no_connection(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn unsubscribed_listener_stops_receiving() {
    let mut server = TestServer::start().await;
    let socket = fast_socket();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    let sub = socket.on_message(move |envelope| {
        sink.lock().expect("lock").push(envelope.kind.clone());
    });
    let (tx, mut witness) = mpsc::unbounded_channel::<String>();
    let _witness = socket.on_message(move |envelope| {
        let _ = tx.send(envelope.kind.clone());
    });

    socket.connect(server.url("/ws/client_abc"));
    let mut conn = server.accept().await;

    conn.send_json(r#"{"type":"FIRST","payload":null}"#).await;
    timeout(WAIT, witness.recv()).await.expect("first");
    sub.unsubscribe();
    conn.send_json(r#"{"type":"SECOND","payload":null}"#).await;
    timeout(WAIT, witness.recv()).await.expect("second");

    assert_eq!(*seen.lock().expect("lock"), vec!["FIRST".to_string()]);
}

#[tokio::test]
async fn client_round_trip_with_session_resume() {
    let mut server = TestServer::start().await;
    let store = KvStore::in_memory().expect("store");
    let identity = SessionIdentity::new(
        store.clone(),
        Location::parse("http://localhost:5173/").expect("location"),
    );
    let client = ClientHandle::spawn(
        identity,
        server.base(),
        Timings {
            reconnect: ReconnectPolicy::fixed(Duration::from_millis(50)),
            save_debounce: Duration::from_millis(30),
            status_dismiss: Duration::from_secs(5),
        },
    )
    .expect("spawn");

    let mut conn = server.accept().await;
    assert!(conn.path.starts_with("/ws/client_"));
    assert!(!conn.path.contains("session_id"));

    conn.send_json(r#"{"type":"SESSION_ESTABLISHED","payload":{"sessionId":"s-1","isNew":true}}"#)
        .await;
    conn.send_json(
        r#"{"type":"ARTIFACT_OPEN","payload":{"id":"a1","type":"mermaid","title":"Flow","content":"graph TD; A-->B"}}"#,
    )
    .await;

    let mut revisions = client.subscribe();
    timeout(WAIT, async {
        while client.snapshot().artifacts.active_id() != Some("a1") {
            revisions.changed().await.expect("actor running");
        }
    })
    .await
    .expect("artifact opened");
    assert_eq!(store.get(SESSION_ID_KEY).expect("get").as_deref(), Some("s-1"));

    client.edit_artifact("a1", "graph TD; A-->C").expect("edit");
    client.edit_artifact("a1", "graph TD; A-->B-->C").expect("edit");
    client.flush().await.expect("flush");
    assert_eq!(
        client.snapshot().artifacts.get("a1").expect("a1").sync_status,
        ArtifactSyncStatus::Saving
    );
    assert_eq!(
        conn.next_text().await,
        r#"{"type":"ARTIFACT_EDIT","payload":{"id":"a1","content":"graph TD; A-->B-->C"}}"#
    );

    // Reconnect carries the session the server assigned
    drop(conn);
    let resumed = server.accept().await;
    assert!(resumed.path.ends_with("?session_id=s-1"), "{}", resumed.path);

    client.shutdown();
}
