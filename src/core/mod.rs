//! Core module - transport-independent coordination logic

pub mod constants;
pub mod dispatch;
pub mod format;
pub mod logbook;
pub mod protocol;
pub mod race;
pub mod status;
pub mod supervisor;
pub mod timestamp;

pub use dispatch::{AgentMessage, Dispatcher};
pub use format::{format_delta, format_seconds};
pub use logbook::Logbook;
pub use protocol::{AgentFrame, CommandFrame, GateMacConfig};
pub use race::{GateOutcome, RaceMachine, RacePhase, SharedRace, StartPolicy};
pub use status::{GateStatusBoard, HealthFlag};
pub use supervisor::{Connector, Session, Supervisor, TransportError};
pub use timestamp::decode_timestamp;
