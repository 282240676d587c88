//! WebSocket client with automatic reconnection.
//!
//! One `SocketClient` owns at most one live transport. Every connection
//! attempt runs in its own task tagged with a generation number; tasks from
//! a superseded generation never touch shared state.
//!
//! Phases: `Idle -> Connecting -> Open`. An unexpected close moves to
//! `ReconnectWait` and a timer re-enters `Connecting`. `disconnect()` forces
//! `Idle` from any phase and cancels the timer.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use analyst_protocol::{ClientMessage, Envelope};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use url::Url;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Idle,
    Connecting,
    Open,
    ReconnectWait,
}

/// Delay between reconnect attempts. Retries are unlimited.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    /// 1.0 keeps the delay fixed
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            multiplier: 1.0,
            max_delay: delay,
        }
    }

    /// Capped exponential growth, reset on every successful open
    pub fn exponential(delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            delay,
            multiplier,
            max_delay: max_delay.max(delay),
        }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.multiplier <= 1.0 {
            return self.delay;
        }
        let factor = self.multiplier.powi(attempt.min(32) as i32);
        let millis = (self.delay.as_millis() as f64 * factor).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECONNECT_DELAY)
    }
}

type Listener = Arc<dyn Fn(&Envelope) + Send + Sync>;

struct Connection {
    url: Option<Url>,
    phase: ConnectionPhase,
    explicit_disconnect: bool,
    generation: u64,
    attempts: u32,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    task: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
}

struct Inner {
    policy: ReconnectPolicy,
    connection: Mutex<Connection>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener_id: AtomicU64,
}

impl Inner {
    fn connection(&self) -> MutexGuard<'_, Connection> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<(u64, Listener)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a registered message listener.
///
/// Dropping it leaves the listener attached; call [`Subscription::unsubscribe`]
/// to detach.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    inner: Weak<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.listeners().retain(|(id, _)| *id != self.id);
        }
    }
}

/// Cheap to clone; clones share the same connection and listeners.
#[derive(Clone)]
pub struct SocketClient {
    inner: Arc<Inner>,
}

impl Default for SocketClient {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}

impl std::fmt::Debug for SocketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let conn = self.inner.connection();
        f.debug_struct("SocketClient")
            .field("url", &conn.url.as_ref().map(Url::as_str))
            .field("phase", &conn.phase)
            .finish()
    }
}

impl SocketClient {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                policy,
                connection: Mutex::new(Connection {
                    url: None,
                    phase: ConnectionPhase::Idle,
                    explicit_disconnect: false,
                    generation: 0,
                    attempts: 0,
                    outbound: None,
                    task: None,
                    reconnect_timer: None,
                }),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn state(&self) -> ConnectionPhase {
        self.inner.connection().phase
    }

    pub fn url(&self) -> Option<Url> {
        self.inner.connection().url.clone()
    }

    /// Open a connection. A no-op when already connecting or open to the
    /// same URL; a live connection to another URL is closed first without
    /// triggering a reconnect. Must be called inside a tokio runtime.
    pub fn connect(&self, url: Url) {
        let mut conn = self.inner.connection();
        let live = matches!(
            conn.phase,
            ConnectionPhase::Connecting | ConnectionPhase::Open
        );

        if live && conn.url.as_ref() == Some(&url) {
            debug!(
                component = "socket",
                event = "socket.connect.already_active",
                url = %url,
                "Already connected or connecting"
            );
            return;
        }

        if live {
            info!(
                component = "socket",
                event = "socket.connect.replacing",
                from = %conn.url.as_ref().map(Url::as_str).unwrap_or_default(),
                to = %url,
                "Closing existing connection before switching URL"
            );
            close_transport(&mut conn);
        }

        cancel_reconnect(&mut conn);
        conn.explicit_disconnect = false;
        conn.attempts = 0;
        conn.url = Some(url);
        start(&self.inner, &mut conn);
    }

    /// Close the connection and stop reconnecting until the next `connect`
    pub fn disconnect(&self) {
        let mut conn = self.inner.connection();
        conn.explicit_disconnect = true;
        cancel_reconnect(&mut conn);
        if matches!(
            conn.phase,
            ConnectionPhase::Connecting | ConnectionPhase::Open
        ) {
            close_transport(&mut conn);
        }
        conn.phase = ConnectionPhase::Idle;
        info!(
            component = "socket",
            event = "socket.disconnected",
            "Socket disconnected by client"
        );
    }

    /// Change the URL future reconnects use without touching the live
    /// connection.
    pub fn retarget(&self, url: Url) {
        let mut conn = self.inner.connection();
        debug!(
            component = "socket",
            event = "socket.retarget",
            url = %url,
            "Reconnect URL updated"
        );
        conn.url = Some(url);
    }

    /// Send a typed message. Returns false (and logs) when the socket is not
    /// open; nothing is queued.
    pub fn send(&self, message: &ClientMessage) -> bool {
        match serde_json::to_string(message) {
            Ok(text) => self.transmit(message.kind(), text),
            Err(e) => {
                error!(
                    component = "socket",
                    event = "socket.send.serialize_failed",
                    kind = message.kind(),
                    error = %e,
                    "Failed to serialize client message"
                );
                false
            }
        }
    }

    /// Send an arbitrary `{type, payload}` frame
    pub fn send_raw(&self, kind: &str, payload: Value) -> bool {
        match serde_json::to_string(&Envelope::new(kind, payload)) {
            Ok(text) => self.transmit(kind, text),
            Err(e) => {
                error!(
                    component = "socket",
                    event = "socket.send.serialize_failed",
                    kind = kind,
                    error = %e,
                    "Failed to serialize envelope"
                );
                false
            }
        }
    }

    pub fn send_user_message(&self, text: impl Into<String>) -> bool {
        self.send(&ClientMessage::UserMessage(text.into()))
    }

    fn transmit(&self, kind: &str, text: String) -> bool {
        let conn = self.inner.connection();
        match (conn.phase, conn.outbound.as_ref()) {
            (ConnectionPhase::Open, Some(tx)) => {
                debug!(
                    component = "socket",
                    event = "socket.send",
                    kind = kind,
                    bytes = text.len(),
                    "Sending message"
                );
                tx.send(Message::Text(text.into())).is_ok()
            }
            (phase, _) => {
                warn!(
                    component = "socket",
                    event = "socket.send.not_open",
                    kind = kind,
                    phase = ?phase,
                    "Socket not open, dropping message"
                );
                false
            }
        }
    }

    /// Register a listener for every inbound envelope. Listeners run on the
    /// connection task, in registration order; a panicking listener is
    /// logged and does not affect the others.
    pub fn on_message<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners().push((id, Arc::new(listener)));
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners().len()
    }
}

fn cancel_reconnect(conn: &mut Connection) {
    if let Some(timer) = conn.reconnect_timer.take() {
        timer.abort();
    }
}

/// Retire the current transport. Bumping the generation makes its task's
/// close handling a no-op, so no reconnect is scheduled for it.
fn close_transport(conn: &mut Connection) {
    conn.generation += 1;
    match conn.outbound.take() {
        Some(tx) => {
            let _ = tx.send(Message::Close(None));
            conn.task = None;
        }
        None => {
            if let Some(task) = conn.task.take() {
                task.abort();
            }
        }
    }
}

fn start(inner: &Arc<Inner>, conn: &mut Connection) {
    let Some(url) = conn.url.clone() else {
        return;
    };
    conn.generation += 1;
    conn.phase = ConnectionPhase::Connecting;
    conn.outbound = None;
    let generation = conn.generation;

    info!(
        component = "socket",
        event = "socket.connecting",
        url = %url,
        generation = generation,
        attempt = conn.attempts,
        "Connecting"
    );

    conn.task = Some(tokio::spawn(run_connection(
        Arc::downgrade(inner),
        generation,
        url,
    )));
}

async fn run_connection(inner: Weak<Inner>, generation: u64, url: Url) {
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            warn!(
                component = "socket",
                event = "socket.connect.failed",
                url = %url,
                error = %e,
                "WebSocket connection failed"
            );
            handle_close(&inner, generation);
            return;
        }
    };

    let (tx, mut outbound) = mpsc::unbounded_channel::<Message>();
    if !mark_open(&inner, generation, tx) {
        return;
    }

    let (mut sink, mut incoming) = stream.split();

    loop {
        tokio::select! {
            next = outbound.recv() => match next {
                Some(Message::Close(frame)) => {
                    let _ = sink.send(Message::Close(frame)).await;
                    break;
                }
                Some(message) => {
                    if let Err(e) = sink.send(message).await {
                        warn!(
                            component = "socket",
                            event = "socket.send.failed",
                            error = %e,
                            "WebSocket send failed"
                        );
                        break;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    break;
                }
            },
            frame = incoming.next() => match frame {
                Some(Ok(Message::Text(text))) => dispatch(&inner, text.as_str()),
                Some(Ok(Message::Binary(data))) => {
                    debug!(
                        component = "socket",
                        event = "socket.message.binary_ignored",
                        bytes = data.len(),
                        "Ignoring binary frame"
                    );
                }
                Some(Ok(Message::Close(_))) => {
                    info!(
                        component = "socket",
                        event = "socket.connection.close_frame",
                        "Server sent close frame"
                    );
                    break;
                }
                // Ping replies are queued by tungstenite itself
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(
                        component = "socket",
                        event = "socket.connection.error",
                        error = %e,
                        "WebSocket error"
                    );
                    break;
                }
                None => break,
            },
        }
    }

    handle_close(&inner, generation);
}

fn mark_open(inner: &Weak<Inner>, generation: u64, tx: mpsc::UnboundedSender<Message>) -> bool {
    let Some(inner) = inner.upgrade() else {
        return false;
    };
    let mut conn = inner.connection();
    if conn.generation != generation {
        debug!(
            component = "socket",
            event = "socket.connect.superseded",
            generation = generation,
            "Connection opened after being superseded"
        );
        return false;
    }
    conn.phase = ConnectionPhase::Open;
    conn.attempts = 0;
    conn.outbound = Some(tx);
    info!(
        component = "socket",
        event = "socket.connection.opened",
        url = %conn.url.as_ref().map(Url::as_str).unwrap_or_default(),
        generation = generation,
        "WebSocket connection opened"
    );
    true
}

/// Single place that decides whether to reconnect
fn handle_close(inner: &Weak<Inner>, generation: u64) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let mut conn = inner.connection();
    if conn.generation != generation {
        return;
    }
    conn.outbound = None;
    conn.task = None;

    if conn.explicit_disconnect {
        conn.phase = ConnectionPhase::Idle;
        return;
    }

    let delay = inner.policy.delay_for(conn.attempts);
    conn.attempts = conn.attempts.saturating_add(1);
    conn.phase = ConnectionPhase::ReconnectWait;
    info!(
        component = "socket",
        event = "socket.reconnect.scheduled",
        delay_ms = delay.as_millis() as u64,
        attempt = conn.attempts,
        "Connection closed, reconnect scheduled"
    );

    let weak = Arc::downgrade(&inner);
    conn.reconnect_timer = Some(tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        reconnect(&weak, generation);
    }));
}

fn reconnect(inner: &Weak<Inner>, generation: u64) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let mut conn = inner.connection();
    if conn.generation != generation
        || conn.explicit_disconnect
        || conn.phase != ConnectionPhase::ReconnectWait
    {
        return;
    }
    conn.reconnect_timer = None;
    start(&inner, &mut conn);
}

fn dispatch(inner: &Weak<Inner>, text: &str) {
    let envelope = match Envelope::parse(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(
                component = "socket",
                event = "socket.message.parse_failed",
                error = %e,
                payload_bytes = text.len(),
                payload_preview = %truncate_for_log(text, 240),
                "Failed to parse server message"
            );
            return;
        }
    };

    let Some(inner) = inner.upgrade() else {
        return;
    };
    // Snapshot so listeners may subscribe or unsubscribe while running
    let listeners: Vec<Listener> = inner
        .listeners()
        .iter()
        .map(|(_, listener)| Arc::clone(listener))
        .collect();

    for listener in listeners {
        if catch_unwind(AssertUnwindSafe(|| listener(&envelope))).is_err() {
            error!(
                component = "socket",
                event = "socket.listener.panicked",
                kind = %envelope.kind,
                "Message listener panicked"
            );
        }
    }
}

fn truncate_for_log(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_policy_never_grows() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(3000));
        assert_eq!(policy.delay_for(50), Duration::from_millis(3000));
    }

    #[test]
    fn exponential_policy_is_capped() {
        let policy = ReconnectPolicy::exponential(
            Duration::from_millis(100),
            2.0,
            Duration::from_millis(1000),
        );
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(4), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn send_while_idle_is_dropped() {
        let socket = SocketClient::default();
        assert_eq!(socket.state(), ConnectionPhase::Idle);
        assert!(!socket.send_user_message("hello"));
        assert!(!socket.send_raw("PING", Value::Null));
    }

    #[test]
    fn unsubscribe_detaches_only_that_listener() {
        let socket = SocketClient::default();
        let first = socket.on_message(|_| {});
        let _second = socket.on_message(|_| {});
        assert_eq!(socket.listener_count(), 2);
        first.unsubscribe();
        assert_eq!(socket.listener_count(), 1);
    }

    #[test]
    fn malformed_frames_never_reach_listeners() {
        let socket = SocketClient::default();
        let hits = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&hits);
        let _sub = socket.on_message(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let weak = Arc::downgrade(&socket.inner);

        dispatch(&weak, "not json");
        dispatch(&weak, r#"{"payload":1}"#);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        dispatch(&weak, r#"{"type":"CHAT_DELTA","payload":"hi"}"#);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_does_not_stop_others() {
        let socket = SocketClient::default();
        let hits = Arc::new(AtomicU64::new(0));
        let _boom = socket.on_message(|_| panic!("listener failure"));
        let counter = Arc::clone(&hits);
        let _ok = socket.on_message(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        dispatch(
            &Arc::downgrade(&socket.inner),
            r#"{"type":"STATUS_UPDATE","payload":"idle"}"#,
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disconnect_from_connecting_goes_idle() {
        let socket = SocketClient::new(ReconnectPolicy::fixed(Duration::from_millis(10)));
        // Port 9 on loopback has nothing listening
        socket.connect(Url::parse("ws://127.0.0.1:9/ws/client_x").expect("url"));
        assert_eq!(socket.state(), ConnectionPhase::Connecting);
        socket.disconnect();
        assert_eq!(socket.state(), ConnectionPhase::Idle);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(socket.state(), ConnectionPhase::Idle);
    }
}
