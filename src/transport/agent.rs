//! Point-to-point agent channel over WebSocket
//!
//! Robots and auxiliary devices exchange JSON frames with the coordinator
//! through a message relay. Inbound frames are classified by the dispatcher;
//! outbound commands queue on a bounded channel so callers never block on a
//! dead link. Commands queued while disconnected are stale by the time the
//! link returns, so each new session drains them instead of replaying them.

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use tracing::{debug, info, warn};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{connect, Message, WebSocket};

use crate::config::AgentSettings;
use crate::core::constants::{
    AGENT_POLL_SLEEP, AGENT_READ_TIMEOUT, COMMAND_QUEUE_CAPACITY, DEFAULT_MESSAGE_KIND,
};
use crate::core::dispatch::{AgentMessage, Dispatcher};
use crate::core::logbook::Logbook;
use crate::core::protocol::{AgentFrame, CommandFrame};
use crate::core::status::HealthFlag;
use crate::core::supervisor::{Connector, Session, TransportError};

type AgentSocket = WebSocket<MaybeTlsStream<TcpStream>>;

// =============================================================================
// COMMAND HANDLE
// =============================================================================

/// Sending side of the agent channel, handed to command senders. Clones
/// share one bounded queue drained by the session thread.
#[derive(Clone)]
pub struct AgentHandle {
    tx: Sender<CommandFrame>,
    health: HealthFlag,
}

impl AgentHandle {
    /// Build the handle and the receiver the connector drains.
    pub fn channel(health: HealthFlag) -> (Self, Receiver<CommandFrame>) {
        let (tx, rx) = bounded::<CommandFrame>(COMMAND_QUEUE_CAPACITY);
        (Self { tx, health }, rx)
    }

    pub fn is_connected(&self) -> bool {
        self.health.get()
    }

    /// Queue a log-typed message for a robot.
    pub fn send(&self, to: &str, body: &str) {
        self.send_typed(to, DEFAULT_MESSAGE_KIND, body);
    }

    pub fn send_typed(&self, to: &str, kind: &str, body: &str) {
        let frame = CommandFrame::typed(to, kind, body);
        match self.tx.try_send(frame) {
            Ok(()) => {
                info!(to, kind, body, "[AGENT] Command queued");
            }
            Err(TrySendError::Full(_)) => {
                warn!(to, kind, "[AGENT] Command queue full, dropping");
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!(to, kind, "[AGENT] Command channel closed");
            }
        }
    }
}

// =============================================================================
// CONNECTOR / SESSION
// =============================================================================

pub struct AgentConnector {
    settings: AgentSettings,
    health: HealthFlag,
    dispatcher: Arc<Dispatcher>,
    logbook: Arc<Logbook>,
    commands: Receiver<CommandFrame>,
}

impl AgentConnector {
    pub fn new(
        settings: AgentSettings,
        health: HealthFlag,
        dispatcher: Arc<Dispatcher>,
        logbook: Arc<Logbook>,
        commands: Receiver<CommandFrame>,
    ) -> Self {
        Self {
            settings,
            health,
            dispatcher,
            logbook,
            commands,
        }
    }
}

impl Connector for AgentConnector {
    type Session = AgentSession;

    fn transport_name(&self) -> &'static str {
        "agent"
    }

    fn connect(&mut self) -> Result<AgentSession, TransportError> {
        info!(url = %self.settings.url, "[AGENT] Connecting...");
        let (mut socket, _) = connect(self.settings.url.as_str())
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        // Announce ourselves so the relay can route robot traffic here
        let hello = CommandFrame::typed("server", "hello", &self.settings.client_id);
        let json =
            serde_json::to_string(&hello).map_err(|e| TransportError::Connect(e.to_string()))?;
        socket
            .send(Message::Text(json))
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        set_nonblocking(&mut socket);

        // Commands queued while disconnected are stale
        let mut drained = 0u32;
        while self.commands.try_recv().is_ok() {
            drained += 1;
        }
        if drained > 0 {
            info!(count = drained, "[AGENT] Drained stale queued commands");
        }

        let stop = Arc::new(AtomicBool::new(false));
        let alive = Arc::new(AtomicBool::new(true));
        let thread = spawn_session_thread(
            socket,
            self.commands.clone(),
            self.dispatcher.clone(),
            self.logbook.clone(),
            self.health.clone(),
            stop.clone(),
            alive.clone(),
        );

        Ok(AgentSession {
            stop,
            alive,
            thread: Some(thread),
        })
    }
}

fn set_nonblocking(socket: &mut AgentSocket) {
    match socket.get_ref() {
        MaybeTlsStream::Plain(tcp) => {
            let _ = tcp.set_nonblocking(true);
        }
        MaybeTlsStream::NativeTls(tls) => {
            let _ = tls.get_ref().set_nonblocking(true);
        }
        _ => {}
    }
}

fn spawn_session_thread(
    mut socket: AgentSocket,
    commands: Receiver<CommandFrame>,
    dispatcher: Arc<Dispatcher>,
    logbook: Arc<Logbook>,
    health: HealthFlag,
    stop: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let result = session_loop(&mut socket, &commands, &dispatcher, &logbook, &stop);
        if let Err(e) = result {
            info!(error = %e, "[AGENT] Disconnected");
        }
        let _ = socket.close(None);
        health.set(false);
        alive.store(false, Ordering::SeqCst);
    })
}

fn session_loop(
    socket: &mut AgentSocket,
    commands: &Receiver<CommandFrame>,
    dispatcher: &Dispatcher,
    logbook: &Logbook,
    stop: &Arc<AtomicBool>,
) -> Result<(), String> {
    let mut last_message = Instant::now();

    loop {
        if stop.load(Ordering::SeqCst) {
            return Ok(());
        }

        // Outbound commands
        match commands.try_recv() {
            Ok(frame) => {
                let json = serde_json::to_string(&frame).map_err(|e| e.to_string())?;
                socket
                    .send(Message::Text(json))
                    .map_err(|e| e.to_string())?;
                info!(to = %frame.to, kind = %frame.kind, "[AGENT] Command sent");
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => return Err("Command channel closed".to_string()),
        }

        // Inbound frames
        match socket.read() {
            Ok(Message::Text(text)) => {
                last_message = Instant::now();
                match serde_json::from_str::<AgentFrame>(&text) {
                    Ok(frame) => {
                        let message = AgentMessage {
                            sender: frame.sender,
                            kind: frame.kind,
                            body: frame.body,
                        };
                        dispatcher.dispatch(logbook, &message);
                    }
                    Err(e) => {
                        warn!(error = %e, "[AGENT] Unreadable frame");
                    }
                }
            }
            Ok(Message::Close(_)) => return Err("Relay closed the connection".to_string()),
            Ok(_) => {}
            Err(tungstenite::Error::Io(ref e)) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if last_message.elapsed() > AGENT_READ_TIMEOUT {
                    debug!(
                        secs = AGENT_READ_TIMEOUT.as_secs(),
                        "[AGENT] No message received, still waiting"
                    );
                    last_message = Instant::now();
                }
            }
            Err(e) => return Err(format!("Read error: {}", e)),
        }

        thread::sleep(AGENT_POLL_SLEEP);
    }
}

pub struct AgentSession {
    stop: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Session for AgentSession {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

impl Drop for AgentSession {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_queues_typed_commands() {
        let health = HealthFlag::new("agent");
        let (handle, rx) = AgentHandle::channel(health);

        handle.send("gerald", "start");
        handle.send_typed("top_camera", "command", "take_picture");

        let first = rx.recv().unwrap();
        assert_eq!(first.to, "gerald");
        assert_eq!(first.kind, "log");
        assert_eq!(first.body, "start");

        let second = rx.recv().unwrap();
        assert_eq!(second.to, "top_camera");
        assert_eq!(second.kind, "command");
    }

    #[test]
    fn test_handle_drops_when_queue_full() {
        let health = HealthFlag::new("agent");
        let (handle, rx) = AgentHandle::channel(health);

        for i in 0..(COMMAND_QUEUE_CAPACITY + 10) {
            handle.send("gerald", &format!("msg {i}"));
        }
        // Overflow was dropped, not blocked on
        assert_eq!(rx.len(), COMMAND_QUEUE_CAPACITY);
    }

    #[test]
    fn test_handle_reports_link_health() {
        let health = HealthFlag::new("agent");
        let (handle, _rx) = AgentHandle::channel(health.clone());
        assert!(!handle.is_connected());
        health.set(true);
        assert!(handle.is_connected());
    }

    #[test]
    fn test_stale_commands_would_be_drained() {
        // The connector drains the receiver before starting a session;
        // verify the drain loop empties a shared crossbeam receiver.
        let health = HealthFlag::new("agent");
        let (handle, rx) = AgentHandle::channel(health);
        handle.send("gerald", "stale 1");
        handle.send("gerald", "stale 2");

        let mut drained = 0;
        while rx.try_recv().is_ok() {
            drained += 1;
        }
        assert_eq!(drained, 2);
        assert!(rx.is_empty());
    }
}
