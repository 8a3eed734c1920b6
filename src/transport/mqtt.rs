//! Pub/sub transport for gate events
//!
//! One subscriber connection owns gate-event intake; a cloned client handle
//! doubles as the publisher, parked in a shared slot so command senders can
//! publish while the receive thread drives the event loop. Any connection
//! error tears the session down; the supervisor redials.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rumqttc::{Client, Connection, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::MqttSettings;
use crate::core::constants::CLEAR_PAYLOAD;
use crate::core::logbook::Logbook;
use crate::core::race::SharedRace;
use crate::core::status::{GateStatusBoard, HealthFlag};
use crate::core::supervisor::{Connector, Session, TransportError};

/// Shared slot holding the live publish handle, empty while disconnected.
pub type PublisherSlot = Arc<Mutex<Option<Client>>>;

// =============================================================================
// PUBLISHER
// =============================================================================

/// Publish-side handle. Cheap to clone; all clones share the slot, so a
/// reconnect by the subscriber session refreshes every publisher at once.
#[derive(Clone)]
pub struct MqttPublisher {
    slot: PublisherSlot,
    health: HealthFlag,
}

impl MqttPublisher {
    pub fn new(slot: PublisherSlot, health: HealthFlag) -> Self {
        Self { slot, health }
    }

    /// Publish a raw payload. A send failure empties the slot and lowers
    /// the health flag so the supervisor redials.
    pub fn publish(&self, topic: &str, payload: &str) {
        let mut slot = self.slot.lock();
        match slot.as_ref() {
            Some(client) => {
                match client.publish(topic, QoS::AtLeastOnce, false, payload.as_bytes()) {
                    Ok(()) => {
                        info!(topic, payload, "[MQTT] Published");
                    }
                    Err(e) => {
                        warn!(topic, error = %e, "[MQTT] Publish failed");
                        *slot = None;
                        self.health.set(false);
                    }
                }
            }
            None => {
                warn!(topic, payload, "[MQTT] Publisher not available");
            }
        }
    }

    pub fn publish_json<T: Serialize>(&self, topic: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(json) => self.publish(topic, &json),
            Err(e) => warn!(topic, error = %e, "[MQTT] Failed to encode payload"),
        }
    }
}

// =============================================================================
// MESSAGE HANDLING
// =============================================================================

/// Record one inbound publish: note the gate as alive, log the raw traffic
/// (except "clear" keep-alives) and feed start/finish topics to the race.
/// The race machine itself ignores non-detection payloads, so keep-alives
/// refresh gate presence without ever starting or finishing a race.
fn handle_publish(
    race: &SharedRace,
    logbook: &Logbook,
    gates: &GateStatusBoard,
    topic: &str,
    payload: &str,
) {
    if let Some(gate) = gate_of_topic(topic) {
        gates.set_gate(gate, true);
    }

    let line = format!("[MQTT:{}] {}", topic, payload);
    info!("{}", line);
    if payload != CLEAR_PAYLOAD {
        logbook.push_race(line);
    }

    if let Some(outcome) = race.lock().handle_gate_event(topic, payload, Utc::now()) {
        logbook.push_race(outcome.log_line());
    }
}

/// Gate identifier is the topic's first segment when it names a gate
/// ("gate1/start" -> "gate1").
fn gate_of_topic(topic: &str) -> Option<&str> {
    let head = topic.split('/').next()?;
    if head.starts_with("gate") {
        Some(head)
    } else {
        None
    }
}

// =============================================================================
// CONNECTOR / SESSION
// =============================================================================

pub struct MqttConnector {
    settings: MqttSettings,
    health: HealthFlag,
    race: SharedRace,
    logbook: Arc<Logbook>,
    gates: Arc<GateStatusBoard>,
    publisher_slot: PublisherSlot,
}

impl MqttConnector {
    pub fn new(
        settings: MqttSettings,
        health: HealthFlag,
        race: SharedRace,
        logbook: Arc<Logbook>,
        gates: Arc<GateStatusBoard>,
        publisher_slot: PublisherSlot,
    ) -> Self {
        Self {
            settings,
            health,
            race,
            logbook,
            gates,
            publisher_slot,
        }
    }
}

impl Connector for MqttConnector {
    type Session = MqttSession;

    fn transport_name(&self) -> &'static str {
        "mqtt"
    }

    fn connect(&mut self) -> Result<MqttSession, TransportError> {
        let mut options = MqttOptions::new(
            &self.settings.client_id,
            &self.settings.host,
            self.settings.port,
        );
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);

        let (client, mut connection) = Client::new(options, 100);

        for topic in &self.settings.topics {
            client
                .subscribe(topic, QoS::AtMostOnce)
                .map_err(|e| TransportError::Connect(format!("subscribe {}: {}", topic, e)))?;
        }

        // The first event must be the broker's ConnAck; anything else means
        // the dial failed.
        match connection.iter().next() {
            Some(Ok(Event::Incoming(Packet::ConnAck(_)))) => {}
            Some(Ok(event)) => {
                return Err(TransportError::Connect(format!(
                    "unexpected first event: {:?}",
                    event
                )))
            }
            Some(Err(e)) => return Err(TransportError::Connect(e.to_string())),
            None => return Err(TransportError::Connect("event loop closed".to_string())),
        }

        for topic in &self.settings.topics {
            info!(topic, "[MQTT] Subscribed");
        }

        *self.publisher_slot.lock() = Some(client.clone());

        let alive = Arc::new(AtomicBool::new(true));
        let thread = spawn_receive_thread(
            connection,
            self.race.clone(),
            self.logbook.clone(),
            self.gates.clone(),
            self.health.clone(),
            self.publisher_slot.clone(),
            alive.clone(),
        );

        Ok(MqttSession {
            client,
            alive,
            thread: Some(thread),
            publisher_slot: self.publisher_slot.clone(),
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_receive_thread(
    mut connection: Connection,
    race: SharedRace,
    logbook: Arc<Logbook>,
    gates: Arc<GateStatusBoard>,
    health: HealthFlag,
    publisher_slot: PublisherSlot,
    alive: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let payload = String::from_utf8_lossy(&publish.payload).to_string();
                    handle_publish(&race, &logbook, &gates, &publish.topic, &payload);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "[MQTT] Connection lost");
                    break;
                }
            }
        }
        *publisher_slot.lock() = None;
        health.set(false);
        alive.store(false, Ordering::SeqCst);
    })
}

pub struct MqttSession {
    client: Client,
    alive: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    publisher_slot: PublisherSlot,
}

impl Session for MqttSession {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        *self.publisher_slot.lock() = None;
        let _ = self.client.disconnect();
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
    use crate::core::constants::DEFAULT_PENALTY_SECONDS;
    use crate::core::race::{RaceMachine, StartPolicy};

    fn fixtures() -> (SharedRace, Logbook, GateStatusBoard) {
        let competitors = vec!["gerald".to_string()];
        let race = RaceMachine::new(
            &competitors,
            DEFAULT_PENALTY_SECONDS,
            StartPolicy::RejectUntilReset,
        )
        .into_shared();
        let logbook = Logbook::new(&competitors);
        (race, logbook, GateStatusBoard::new())
    }

    #[test]
    fn test_gate_of_topic() {
        assert_eq!(gate_of_topic("gate1/start"), Some("gate1"));
        assert_eq!(gate_of_topic("gate2/finish"), Some("gate2"));
        assert_eq!(gate_of_topic("gate/ir"), Some("gate"));
        assert_eq!(gate_of_topic("robots/gerald"), None);
    }

    #[test]
    fn test_publish_logged_and_gate_marked_up() {
        let (race, logbook, gates) = fixtures();
        handle_publish(&race, &logbook, &gates, "gate1/ir", "presence");

        assert!(gates.is_up("gate1"));
        assert_eq!(logbook.race_log(), vec!["[MQTT:gate1/ir] presence"]);
    }

    #[test]
    fn test_clear_payload_marks_gate_but_skips_log() {
        let (race, logbook, gates) = fixtures();
        handle_publish(&race, &logbook, &gates, "gate2/ir", "clear");

        assert!(gates.is_up("gate2"));
        assert!(logbook.race_log().is_empty());
    }

    #[test]
    fn test_clear_on_start_topic_does_not_start_race() {
        let (race, logbook, gates) = fixtures();
        handle_publish(&race, &logbook, &gates, "gate1/start", "clear");

        assert!(!race.lock().state().running);
        assert!(logbook.race_log().is_empty());
        assert!(gates.is_up("gate1"));
    }

    #[test]
    fn test_start_event_produces_outcome_line() {
        let (race, logbook, gates) = fixtures();
        handle_publish(
            &race,
            &logbook,
            &gates,
            "gate1/start",
            "2026-03-14T10:00:00.000Z",
        );

        let log = logbook.race_log();
        // Newest first: outcome line, then the raw traffic line
        assert_eq!(log.len(), 2);
        assert!(log[0].starts_with("[RACE]"));
        assert!(log[1].starts_with("[MQTT:gate1/start]"));
        assert!(race.lock().state().running);
    }

    #[test]
    fn test_full_race_over_publishes() {
        let (race, logbook, gates) = fixtures();
        handle_publish(&race, &logbook, &gates, "gate1/start", "2026-03-14T10:00:00.000Z");
        handle_publish(&race, &logbook, &gates, "gate1/finish", "2026-03-14T10:00:10.000Z");
        handle_publish(&race, &logbook, &gates, "gate2/finish", "2026-03-14T10:00:10.400Z");

        let machine = race.lock();
        assert!(!machine.state().running);
        assert!((machine.state().elapsed - 10.4).abs() < 1e-9);
        assert!(gates.is_up("gate1"));
        assert!(gates.is_up("gate2"));
    }

    #[test]
    fn test_non_gate_topic_only_logs_traffic() {
        let (race, logbook, gates) = fixtures();
        handle_publish(&race, &logbook, &gates, "robots/gerald", "hello");

        assert_eq!(logbook.race_log(), vec!["[MQTT:robots/gerald] hello"]);
        assert!(!race.lock().state().running);
        assert!(gates.snapshot().is_empty());
    }
}
