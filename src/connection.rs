//! Single WebSocket to the backend with an always-retry, fixed-delay reconnect policy.
//!
//! The socket lives on a tokio task. The session loop talks to it through a
//! [`ConnectionHandle`] (outbound frames) and a crossbeam channel of
//! [`ConnectionEvent`]s (inbound frames and lifecycle changes), so the UI side
//! stays a plain synchronous event loop.
//!
//! Policy: every close (including a failed connect or a read/write error)
//! schedules exactly one reconnect after the configured delay. There is no
//! backoff growth and no retry cap. Manual teardown cancels the pending timer.

use crate::log_debug;
use crate::protocol::{OutboundFrame, ServerFrame};
use crossbeam_channel::Sender;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;

/// Lifecycle and data events delivered to the session loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected,
    Frame(ServerFrame),
    /// A text frame that did not decode; carries the decode error.
    Undecodable(String),
    /// Socket closed; one reconnect is scheduled after `reconnect_in`.
    Closed { reconnect_in: Duration },
}

/// Reconnect scheduling state: at most one pending timer, cancelled on teardown.
#[derive(Debug, Clone)]
pub struct ReconnectTimer {
    delay: Duration,
    deadline: Option<Instant>,
    torn_down: bool,
    scheduled_total: u64,
}

impl ReconnectTimer {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
            torn_down: false,
            scheduled_total: 0,
        }
    }

    /// Record a close. Returns `true` when this call scheduled the reconnect.
    ///
    /// A close reported while a reconnect is already pending (error followed
    /// by close for the same socket) does not stack a second timer.
    pub fn on_close(&mut self, now: Instant) -> bool {
        if self.torn_down || self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(now + self.delay);
        self.scheduled_total = self.scheduled_total.saturating_add(1);
        true
    }

    #[must_use]
    pub fn pending(&self) -> Option<Instant> {
        self.deadline
    }

    /// Consume the timer once it is due; the caller then attempts to connect.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Drop the pending reconnect without refusing future ones.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Manual teardown: cancel any pending reconnect and refuse new ones.
    pub fn teardown(&mut self) {
        self.torn_down = true;
        self.deadline = None;
    }

    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Number of reconnects scheduled over the timer's lifetime.
    #[must_use]
    pub fn scheduled_total(&self) -> u64 {
        self.scheduled_total
    }
}

/// Sender side of the connection owned by the session.
pub struct ConnectionHandle {
    outbound_tx: mpsc::UnboundedSender<OutboundFrame>,
    shutdown_tx: watch::Sender<bool>,
    connected: Arc<AtomicBool>,
}

impl ConnectionHandle {
    /// Queue a frame for the socket. Returns `false` once the manager has stopped.
    pub fn send(&self, frame: OutboundFrame) -> bool {
        self.outbound_tx.send(frame).is_ok()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Manual teardown: close the socket and cancel the reconnect timer.
    pub fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Open the backend socket on `runtime` and keep it open until shutdown.
pub fn establish(
    runtime: &Handle,
    url: impl Into<String>,
    reconnect_delay: Duration,
    events: Sender<ConnectionEvent>,
) -> ConnectionHandle {
    let url = url.into();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let connected = Arc::new(AtomicBool::new(false));
    runtime.spawn(run_connection_loop(
        url,
        ReconnectTimer::new(reconnect_delay),
        outbound_rx,
        shutdown_rx,
        events,
        Arc::clone(&connected),
    ));
    ConnectionHandle {
        outbound_tx,
        shutdown_tx,
        connected,
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Closed,
    Shutdown,
}

async fn run_connection_loop(
    url: String,
    mut timer: ReconnectTimer,
    mut outbound_rx: mpsc::UnboundedReceiver<OutboundFrame>,
    mut shutdown_rx: watch::Receiver<bool>,
    events: Sender<ConnectionEvent>,
    connected: Arc<AtomicBool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let attempt = tokio::select! {
            result = connect_async(url.as_str()) => Some(result),
            _ = shutdown_rx.changed() => None,
        };
        let end = match attempt {
            None => SessionEnd::Shutdown,
            Some(Ok((socket, _response))) => {
                connected.store(true, Ordering::Relaxed);
                tracing::info!(url = %url, "backend socket connected");
                log_debug(&format!("Connected to {url}"));
                let end = if events.send(ConnectionEvent::Connected).is_err() {
                    SessionEnd::Shutdown
                } else {
                    run_session(socket, &mut outbound_rx, &mut shutdown_rx, &events).await
                };
                connected.store(false, Ordering::Relaxed);
                end
            }
            Some(Err(err)) => {
                log_debug(&format!("Connect to {url} failed: {err}"));
                SessionEnd::Closed
            }
        };

        if end == SessionEnd::Shutdown || *shutdown_rx.borrow() {
            break;
        }

        if !timer.on_close(Instant::now()) {
            break;
        }
        tracing::info!(
            delay_ms = timer.delay().as_millis() as u64,
            "backend socket closed; reconnect scheduled"
        );
        if events
            .send(ConnectionEvent::Closed {
                reconnect_in: timer.delay(),
            })
            .is_err()
        {
            break;
        }

        if !wait_for_reconnect(&mut timer, &mut outbound_rx, &mut shutdown_rx).await {
            break;
        }
    }
    timer.teardown();
    connected.store(false, Ordering::Relaxed);
    log_debug("Connection manager stopped");
}

/// Sleep until the reconnect timer is due. Frames queued meanwhile are dropped.
/// Returns `false` on teardown.
async fn wait_for_reconnect(
    timer: &mut ReconnectTimer,
    outbound_rx: &mut mpsc::UnboundedReceiver<OutboundFrame>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> bool {
    let Some(deadline) = timer.pending() else {
        return true;
    };
    let sleep = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline));
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => {
                // Timer wheel granularity can land a hair early against std time.
                if !timer.take_due(Instant::now()) {
                    timer.cancel();
                }
                return true;
            }
            _ = shutdown_rx.changed() => {
                timer.teardown();
                return false;
            }
            dropped = outbound_rx.recv() => match dropped {
                Some(frame) => log_debug(&format!("Dropped {} frame while disconnected", frame.kind())),
                None => {
                    timer.teardown();
                    return false;
                }
            }
        }
    }
}

async fn run_session(
    socket: Socket,
    outbound_rx: &mut mpsc::UnboundedReceiver<OutboundFrame>,
    shutdown_rx: &mut watch::Receiver<bool>,
    events: &Sender<ConnectionEvent>,
) -> SessionEnd {
    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                return SessionEnd::Shutdown;
            }
            outbound = outbound_rx.recv() => {
                let Some(frame) = outbound else {
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                };
                let kind = frame.kind();
                match frame.into_message() {
                    Ok(message) => {
                        if let Err(err) = sink.send(message).await {
                            log_debug(&format!("Send {kind} failed: {err}"));
                            return SessionEnd::Closed;
                        }
                    }
                    Err(err) => log_debug(&format!("Encode {kind} failed: {err:#}")),
                }
            }
            incoming = stream.next() => {
                let event = match incoming {
                    Some(Ok(Message::Text(text))) => match ServerFrame::parse(&text) {
                        Ok(frame) => ConnectionEvent::Frame(frame),
                        Err(err) => ConnectionEvent::Undecodable(format!("{err:#}")),
                    },
                    Some(Ok(Message::Close(_))) | None => return SessionEnd::Closed,
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        log_debug(&format!("Socket error: {err}"));
                        return SessionEnd::Closed;
                    }
                };
                if events.send(event).is_err() {
                    return SessionEnd::Shutdown;
                }
            }
        }
    }
}
