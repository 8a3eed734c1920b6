// Gatehouse - race coordination server for the robotics track

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use gatehouse::config::{Config, LoggingSettings};
use gatehouse::core::constants::PENALTY_COOLDOWN;
use gatehouse::core::dispatch::Dispatcher;
use gatehouse::core::format::{format_delta, format_seconds};
use gatehouse::core::logbook::Logbook;
use gatehouse::core::protocol::GateMacConfig;
use gatehouse::core::race::{RaceMachine, SharedRace};
use gatehouse::core::status::{GateStatusBoard, HealthFlag};
use gatehouse::core::supervisor::Supervisor;
use gatehouse::transport::agent::{AgentConnector, AgentHandle};
use gatehouse::transport::mqtt::{MqttConnector, MqttPublisher, PublisherSlot};

const DEFAULT_CONFIG_PATH: &str = "gatehouse.toml";

// =============================================================================
// LOGGING
// =============================================================================

/// The returned guard keeps the non-blocking file writer alive; drop it and
/// buffered lines are lost.
fn init_logging(settings: &LoggingSettings) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if settings.log_file.is_empty() {
        fmt().with_env_filter(filter).init();
        return None;
    }

    let path = Path::new(&settings.log_file);
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "gatehouse.log".to_string());

    let file_appender = tracing_appender::rolling::never(dir, file);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let subscriber = Registry::default()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false));
    tracing::subscriber::set_global_default(subscriber).ok();
    Some(guard)
}

// =============================================================================
// OPERATOR CONSOLE
// =============================================================================

/// Commands the operator can type on stdin, mirroring the dashboard's
/// buttons: race control, robot control, camera capture, gate sensor
/// pairing.
#[derive(Debug, Clone, PartialEq)]
enum ConsoleCommand {
    Reset,
    Penalty(String),
    Robot { to: String, action: String },
    Capture,
    GateReset,
    Mac {
        gate: String,
        start_mac: String,
        finish_mac: String,
    },
    Status,
    Log,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Option<ConsoleCommand> {
    let mut words = line.split_whitespace();
    let command = match (words.next()?, words.next(), words.next(), words.next()) {
        ("reset", None, ..) => ConsoleCommand::Reset,
        ("penalty", Some(who), None, _) => ConsoleCommand::Penalty(who.to_string()),
        (action @ ("start" | "stop"), Some(who), None, _) => ConsoleCommand::Robot {
            to: who.to_string(),
            action: action.to_string(),
        },
        ("capture", None, ..) => ConsoleCommand::Capture,
        ("gate-reset", None, ..) => ConsoleCommand::GateReset,
        ("mac", Some(gate), Some(start_mac), Some(finish_mac)) => ConsoleCommand::Mac {
            gate: gate.to_string(),
            start_mac: start_mac.to_string(),
            finish_mac: finish_mac.to_string(),
        },
        ("status", None, ..) => ConsoleCommand::Status,
        ("log", None, ..) => ConsoleCommand::Log,
        ("help", None, ..) => ConsoleCommand::Help,
        ("quit" | "exit", None, ..) => ConsoleCommand::Quit,
        _ => return None,
    };
    Some(command)
}

const CONSOLE_HELP: &str = "\
commands:
  status                      transports, gates and race timer
  log                         recent race log
  reset                       reset the race to idle
  penalty <robot>             apply a time penalty
  start <robot> | stop <robot>
  capture                     request a fresh top-camera image
  gate-reset                  tell the gates to re-arm
  mac <gate> <start> <finish> push sensor MACs to a gate
  quit";

fn spawn_console_reader(tx: Sender<ConsoleCommand>) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse_command(&line) {
                Some(command) => {
                    let quit = command == ConsoleCommand::Quit;
                    if tx.send(command).is_err() || quit {
                        break;
                    }
                }
                None => println!("unknown command, try 'help'"),
            }
        }
    });
}

// =============================================================================
// COMMAND HANDLING
// =============================================================================

struct Coordinator {
    race: SharedRace,
    logbook: Arc<Logbook>,
    gates: Arc<GateStatusBoard>,
    mqtt_health: HealthFlag,
    agent_health: HealthFlag,
    publisher: MqttPublisher,
    agent: AgentHandle,
    top_camera: String,
    cooldown_stop: Receiver<()>,
    cooldown_threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

/// Clear a competitor's penalty cooldown once the interval elapses. The
/// wait sits on the shutdown channel, so closing it (or sending on it)
/// ends the thread early without clearing.
fn spawn_cooldown_clear(
    race: SharedRace,
    who: String,
    cooldown: Duration,
    shutdown: Receiver<()>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        if let Err(RecvTimeoutError::Timeout) = shutdown.recv_timeout(cooldown) {
            race.lock().clear_penalty_cooldown(&who);
        }
    })
}

impl Coordinator {
    fn handle(&self, command: ConsoleCommand) {
        match command {
            ConsoleCommand::Reset => {
                self.race.lock().reset();
                self.logbook.push_race("[RACE] Race has been reset");
                info!("[RACE] Race has been reset");
                println!("race reset");
            }
            ConsoleCommand::Penalty(who) => {
                let outcome = {
                    let mut machine = self.race.lock();
                    if machine.penalty_cooldown(&who) {
                        println!("penalty for {} still cooling down", who);
                        return;
                    }
                    machine.apply_penalty(&who)
                };
                let line = outcome.log_line();
                self.logbook.push_race(line.clone());
                info!("{}", line);
                println!("{}", line);
                if outcome.accepted() {
                    self.agent.send(&who, "penalty");
                    let handle = spawn_cooldown_clear(
                        self.race.clone(),
                        who,
                        PENALTY_COOLDOWN,
                        self.cooldown_stop.clone(),
                    );
                    self.cooldown_threads.lock().push(handle);
                }
            }
            ConsoleCommand::Robot { to, action } => {
                self.agent.send(&to, &action);
                println!("sent '{}' to {}", action, to);
            }
            ConsoleCommand::Capture => {
                self.agent.send(&self.top_camera, "take_picture");
                println!("capture request sent");
            }
            ConsoleCommand::GateReset => {
                self.publisher.publish("gate/ir", "reset");
                println!("gate re-arm requested");
            }
            ConsoleCommand::Mac {
                gate,
                start_mac,
                finish_mac,
            } => {
                let payload = GateMacConfig {
                    start_mac,
                    finish_mac,
                };
                self.publisher
                    .publish_json(&format!("{}/mac_config", gate), &payload);
                println!("MAC configuration sent to {}", gate);
            }
            ConsoleCommand::Status => self.print_status(),
            ConsoleCommand::Log => {
                for line in self.logbook.race_log() {
                    println!("{}", line);
                }
            }
            ConsoleCommand::Help => println!("{}", CONSOLE_HELP),
            // Quit is intercepted by the main loop
            ConsoleCommand::Quit => {}
        }
    }

    /// Wait for outstanding cooldown threads; call after closing
    /// `cooldown_stop` so none of them sleeps the full interval.
    fn join_cooldown_threads(&self) {
        for handle in self.cooldown_threads.lock().drain(..) {
            let _ = handle.join();
        }
    }

    fn print_status(&self) {
        let now = Utc::now();
        let machine = self.race.lock();
        println!(
            "mqtt: {}  agent: {}",
            link_word(self.mqtt_health.get()),
            link_word(self.agent_health.get())
        );
        println!(
            "race: {:?}  elapsed: {}  delta: {}",
            machine.phase(),
            format_seconds(machine.live_elapsed(now)),
            format_delta(machine.live_delta(now))
        );
        drop(machine);
        for (gate, up) in self.gates.snapshot() {
            println!("{}: {}", gate, link_word(up));
        }
    }
}

fn link_word(up: bool) -> &'static str {
    if up {
        "connected"
    } else {
        "disconnected"
    }
}

// =============================================================================
// MAIN
// =============================================================================

fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = match Config::load(Path::new(&config_path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let _log_guard = init_logging(&config.logging);
    info!(path = %config_path, "[config] Configuration loaded");

    // Shared state
    let race = RaceMachine::new(
        &config.race.competitors,
        config.race.penalty_seconds,
        config.race.start_policy,
    )
    .into_shared();
    let logbook = Arc::new(Logbook::new(&config.race.competitors));
    let dispatcher = Arc::new(Dispatcher::with_builtin_handlers());
    let gates = Arc::new(GateStatusBoard::new());

    let mqtt_health = HealthFlag::new("mqtt");
    let agent_health = HealthFlag::new("agent");
    let publisher_slot: PublisherSlot = PublisherSlot::default();
    let publisher = MqttPublisher::new(publisher_slot.clone(), mqtt_health.clone());
    let (agent_handle, commands_rx) = AgentHandle::channel(agent_health.clone());

    // Shutdown fan-out: one channel per loop that must stop
    let (mqtt_shutdown_tx, mqtt_shutdown_rx) = bounded::<()>(1);
    let (agent_shutdown_tx, agent_shutdown_rx) = bounded::<()>(1);
    let (main_shutdown_tx, main_shutdown_rx) = bounded::<()>(1);
    let supervisor_stops = [mqtt_shutdown_tx.clone(), agent_shutdown_tx.clone()];
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = mqtt_shutdown_tx.try_send(());
        let _ = agent_shutdown_tx.try_send(());
        let _ = main_shutdown_tx.try_send(());
    }) {
        error!(error = %e, "Failed to install Ctrl-C handler");
    }

    // Transport supervisors
    let mqtt_supervisor = Supervisor::new(
        MqttConnector::new(
            config.mqtt.clone(),
            mqtt_health.clone(),
            race.clone(),
            logbook.clone(),
            gates.clone(),
            publisher_slot,
        ),
        mqtt_health.clone(),
    );
    let mqtt_interval = Duration::from_secs(config.mqtt.retry_interval_secs);
    let mqtt_thread = thread::spawn(move || mqtt_supervisor.run(mqtt_interval, mqtt_shutdown_rx));

    let agent_supervisor = Supervisor::new(
        AgentConnector::new(
            config.agent.clone(),
            agent_health.clone(),
            dispatcher,
            logbook.clone(),
            commands_rx,
        ),
        agent_health.clone(),
    );
    let agent_interval = Duration::from_secs(config.agent.retry_interval_secs);
    let agent_thread =
        thread::spawn(move || agent_supervisor.run(agent_interval, agent_shutdown_rx));

    // Never written to; dropping the sender wakes every cooldown thread
    let (cooldown_stop_tx, cooldown_stop_rx) = bounded::<()>(1);
    let coordinator = Coordinator {
        race,
        logbook,
        gates,
        mqtt_health,
        agent_health,
        publisher,
        agent: agent_handle,
        top_camera: config.race.top_camera.clone(),
        cooldown_stop: cooldown_stop_rx,
        cooldown_threads: Mutex::new(Vec::new()),
    };

    let (console_tx, console_rx): (Sender<ConsoleCommand>, Receiver<ConsoleCommand>) = bounded(16);
    spawn_console_reader(console_tx);
    println!("gatehouse up, type 'help' for commands");

    loop {
        select! {
            recv(console_rx) -> command => match command {
                Ok(ConsoleCommand::Quit) => break,
                Ok(command) => coordinator.handle(command),
                // stdin closed; keep coordinating until Ctrl-C
                Err(_) => {
                    let _ = main_shutdown_rx.recv();
                    break;
                }
            },
            recv(main_shutdown_rx) -> _ => break,
        }
    }

    info!("Shutting down");
    for stop in &supervisor_stops {
        let _ = stop.try_send(());
    }
    drop(cooldown_stop_tx);
    coordinator.join_cooldown_threads();
    drop(coordinator);
    let _ = mqtt_thread.join();
    let _ = agent_thread.join();
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse::core::race::StartPolicy;

    #[test]
    fn test_parse_race_commands() {
        assert_eq!(parse_command("reset"), Some(ConsoleCommand::Reset));
        assert_eq!(
            parse_command("penalty gerald"),
            Some(ConsoleCommand::Penalty("gerald".to_string()))
        );
        assert_eq!(
            parse_command("  start mael "),
            Some(ConsoleCommand::Robot {
                to: "mael".to_string(),
                action: "start".to_string()
            })
        );
    }

    #[test]
    fn test_parse_mac_command() {
        assert_eq!(
            parse_command("mac gate1 AA:BB:CC:00:11:22 AA:BB:CC:00:11:33"),
            Some(ConsoleCommand::Mac {
                gate: "gate1".to_string(),
                start_mac: "AA:BB:CC:00:11:22".to_string(),
                finish_mac: "AA:BB:CC:00:11:33".to_string(),
            })
        );
        // Both MACs are required
        assert_eq!(parse_command("mac gate1 AA:BB:CC:00:11:22"), None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_command("launch the robots"), None);
        assert_eq!(parse_command("penalty"), None);
        assert_eq!(parse_command("reset now"), None);
    }

    #[test]
    fn test_parse_quit_aliases() {
        assert_eq!(parse_command("quit"), Some(ConsoleCommand::Quit));
        assert_eq!(parse_command("exit"), Some(ConsoleCommand::Quit));
    }

    // A running race with gerald's cooldown flag set
    fn penalized_race() -> SharedRace {
        let competitors = vec!["gerald".to_string(), "mael".to_string()];
        let race =
            RaceMachine::new(&competitors, 5.0, StartPolicy::RejectUntilReset).into_shared();
        {
            let mut machine = race.lock();
            let _ = machine.handle_gate_event("gate1/start", "object_detected", Utc::now());
            let _ = machine.apply_penalty("gerald");
        }
        assert!(race.lock().penalty_cooldown("gerald"));
        race
    }

    #[test]
    fn test_cooldown_clears_after_interval() {
        let race = penalized_race();
        let (_keep_open, stop_rx) = bounded::<()>(1);

        let handle = spawn_cooldown_clear(
            race.clone(),
            "gerald".to_string(),
            Duration::from_millis(10),
            stop_rx,
        );
        handle.join().unwrap();

        assert!(!race.lock().penalty_cooldown("gerald"));
    }

    #[test]
    fn test_cooldown_thread_stops_on_shutdown() {
        let race = penalized_race();
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = spawn_cooldown_clear(
            race.clone(),
            "gerald".to_string(),
            Duration::from_secs(60),
            stop_rx,
        );
        // Closing the channel ends the wait without clearing the flag
        drop(stop_tx);
        handle.join().unwrap();

        assert!(race.lock().penalty_cooldown("gerald"));
    }
}
