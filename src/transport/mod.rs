//! Transport module - supervised links to the outside world

pub mod agent;
pub mod mqtt;

pub use agent::{AgentConnector, AgentHandle};
pub use mqtt::{MqttConnector, MqttPublisher, PublisherSlot};
