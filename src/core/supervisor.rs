//! Connection supervision
//!
//! One supervisor per transport. Each owns the connect/retry/health-flag
//! lifecycle for its link: no session means a bounded connect attempt this
//! tick, a session whose health flag dropped means the session is discarded
//! and redialed next tick (drop-and-redial, applied uniformly). Connect
//! failures are logged and retried forever; the only externally visible
//! effect is the health flag staying false.

use std::fmt;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{info, warn};

use crate::core::status::HealthFlag;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug)]
pub enum TransportError {
    Connect(String),
    Closed(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Connect(msg) => write!(f, "connect failed: {}", msg),
            TransportError::Closed(msg) => write!(f, "connection closed: {}", msg),
        }
    }
}

/// Lifecycle state of a supervised link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// A live connection. Real sessions own a receive thread that clears the
/// health flag and dies on any transport failure; the supervisor only has
/// to notice.
pub trait Session {
    fn is_alive(&self) -> bool;
}

/// Factory for sessions on one transport. `connect` must be bounded - it
/// either yields a working session or an error, it never blocks forever.
pub trait Connector {
    type Session: Session;

    fn transport_name(&self) -> &'static str;

    fn connect(&mut self) -> Result<Self::Session, TransportError>;
}

// =============================================================================
// SUPERVISOR
// =============================================================================

pub struct Supervisor<C: Connector> {
    connector: C,
    session: Option<C::Session>,
    health: HealthFlag,
    state: LinkState,
}

impl<C: Connector> Supervisor<C> {
    pub fn new(connector: C, health: HealthFlag) -> Self {
        Self {
            connector,
            session: None,
            health,
            state: LinkState::Disconnected,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// One supervision step: dial when there is no session, discard a
    /// session whose link went bad. Never propagates an error.
    pub fn tick(&mut self) {
        match &self.session {
            None => {
                self.state = LinkState::Connecting;
                match self.connector.connect() {
                    Ok(session) => {
                        info!(
                            transport = self.connector.transport_name(),
                            "[SUP] connected"
                        );
                        self.health.set(true);
                        self.session = Some(session);
                        self.state = LinkState::Connected;
                    }
                    Err(e) => {
                        warn!(
                            transport = self.connector.transport_name(),
                            error = %e,
                            "[SUP] connect attempt failed, will retry"
                        );
                        self.health.set(false);
                        self.state = LinkState::Disconnected;
                    }
                }
            }
            Some(session) => {
                if !self.health.get() || !session.is_alive() {
                    info!(
                        transport = self.connector.transport_name(),
                        "[SUP] link lost, dropping session"
                    );
                    self.health.set(false);
                    self.session = None;
                    self.state = LinkState::Disconnected;
                }
            }
        }
    }

    /// Supervision loop: tick, then sleep the fixed interval or stop when
    /// the shutdown channel fires (or its senders are gone).
    pub fn run(mut self, interval: Duration, shutdown: Receiver<()>) {
        loop {
            self.tick();
            match shutdown.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.session = None;
        self.health.set(false);
        info!(
            transport = self.connector.transport_name(),
            "[SUP] supervisor stopped"
        );
    }
}

// =============================================================================
// MOCKS
// =============================================================================

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    pub struct MockSession {
        pub alive: Arc<AtomicBool>,
    }

    impl Session for MockSession {
        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
    }

    /// Connector driven by a script of planned connect results. All sessions
    /// it hands out share one alive handle, so tests can flip liveness after
    /// the connector has moved into the supervisor.
    pub struct MockConnector {
        pub script: VecDeque<bool>,
        pub alive: Arc<AtomicBool>,
    }

    impl MockConnector {
        pub fn with_script(script: impl IntoIterator<Item = bool>) -> Self {
            Self {
                script: script.into_iter().collect(),
                alive: Arc::new(AtomicBool::new(true)),
            }
        }

        pub fn alive_handle(&self) -> Arc<AtomicBool> {
            self.alive.clone()
        }
    }

    impl Connector for MockConnector {
        type Session = MockSession;

        fn transport_name(&self) -> &'static str {
            "mock"
        }

        fn connect(&mut self) -> Result<MockSession, TransportError> {
            if self.script.pop_front().unwrap_or(false) {
                self.alive.store(true, Ordering::SeqCst);
                Ok(MockSession {
                    alive: self.alive.clone(),
                })
            } else {
                Err(TransportError::Connect("planned failure".to_string()))
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::mocks::*;
    use super::*;
    use crossbeam_channel::bounded;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_repeated_failures_keep_flag_false() {
        let health = HealthFlag::new("mock");
        let mut sup = Supervisor::new(MockConnector::with_script([false; 5]), health.clone());

        for _ in 0..5 {
            sup.tick();
            assert!(!health.get());
            assert_eq!(sup.state(), LinkState::Disconnected);
        }
    }

    #[test]
    fn test_success_raises_flag_and_state() {
        let health = HealthFlag::new("mock");
        let mut sup = Supervisor::new(
            MockConnector::with_script([false, true]),
            health.clone(),
        );

        sup.tick();
        assert!(!health.get());

        sup.tick();
        assert!(health.get());
        assert_eq!(sup.state(), LinkState::Connected);
    }

    #[test]
    fn test_connected_tick_is_a_no_op() {
        let health = HealthFlag::new("mock");
        let mut sup = Supervisor::new(MockConnector::with_script([true]), health.clone());

        sup.tick();
        sup.tick();
        sup.tick();
        assert!(health.get());
        assert_eq!(sup.state(), LinkState::Connected);
    }

    #[test]
    fn test_flag_drop_discards_session_then_redials() {
        let health = HealthFlag::new("mock");
        let mut sup = Supervisor::new(
            MockConnector::with_script([true, true]),
            health.clone(),
        );

        sup.tick();
        assert_eq!(sup.state(), LinkState::Connected);

        // A failed send (or disconnect callback) cleared the flag
        health.set(false);
        sup.tick();
        assert_eq!(sup.state(), LinkState::Disconnected);
        assert!(!health.get());

        // Next tick dials again
        sup.tick();
        assert_eq!(sup.state(), LinkState::Connected);
        assert!(health.get());
    }

    #[test]
    fn test_dead_session_discarded_even_with_flag_up() {
        let health = HealthFlag::new("mock");
        let connector = MockConnector::with_script([true, true]);
        let alive = connector.alive_handle();
        let mut sup = Supervisor::new(connector, health.clone());

        sup.tick();
        assert_eq!(sup.state(), LinkState::Connected);

        // Receive thread exited without lowering the flag
        alive.store(false, Ordering::SeqCst);
        sup.tick();
        assert_eq!(sup.state(), LinkState::Disconnected);
        assert!(!health.get());

        sup.tick();
        assert_eq!(sup.state(), LinkState::Connected);
    }

    #[test]
    fn test_run_stops_on_shutdown_signal() {
        let health = HealthFlag::new("mock");
        let sup = Supervisor::new(MockConnector::with_script([false; 64]), health.clone());
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let handle = std::thread::spawn(move || {
            sup.run(Duration::from_millis(5), shutdown_rx);
        });
        shutdown_tx.send(()).unwrap();
        handle.join().unwrap();
        assert!(!health.get());
    }

    #[test]
    fn test_run_stops_when_shutdown_sender_dropped() {
        let health = HealthFlag::new("mock");
        let sup = Supervisor::new(MockConnector::with_script([true]), health.clone());
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        drop(shutdown_tx);

        sup.run(Duration::from_millis(5), shutdown_rx);
        // Teardown lowers the flag even after a successful connect
        assert!(!health.get());
    }

    #[test]
    fn test_session_alive_handle_tracks_liveness() {
        let mut connector = MockConnector::with_script([true]);
        let alive = connector.alive_handle();
        let session = connector.connect().unwrap();
        assert!(session.is_alive());
        alive.store(false, Ordering::SeqCst);
        assert!(!session.is_alive());
    }
}
