//! Wire types for the agent channel and structured command payloads
//!
//! The agent channel carries JSON frames: inbound frames have a sender
//! identity, a type tag and an opaque body; outbound frames add a
//! destination. Structured pub/sub payloads (gate configuration pushes)
//! also live here.

use serde::{Deserialize, Serialize};

use crate::core::constants::DEFAULT_MESSAGE_KIND;

// =============================================================================
// AGENT FRAMES
// =============================================================================

fn unknown() -> String {
    "unknown".to_string()
}

/// Inbound agent frame. Missing metadata decodes to `"unknown"` rather
/// than failing the whole frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentFrame {
    #[serde(default = "unknown")]
    pub sender: String,
    #[serde(rename = "type", default = "unknown")]
    pub kind: String,
    #[serde(default)]
    pub body: String,
}

/// Outbound agent frame: destination, type tag and body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandFrame {
    pub to: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub body: String,
}

impl CommandFrame {
    /// Plain log-typed message (the default type tag).
    pub fn log(to: &str, body: &str) -> Self {
        Self::typed(to, DEFAULT_MESSAGE_KIND, body)
    }

    pub fn typed(to: &str, kind: &str, body: &str) -> Self {
        Self {
            to: to.to_string(),
            kind: kind.to_string(),
            body: body.to_string(),
        }
    }
}

// =============================================================================
// STRUCTURED BODIES
// =============================================================================

/// Body of a `detection` frame: what a robot believes it saw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub label: String,
    #[serde(default)]
    pub confidence: f64,
}

/// Gate sensor pairing pushed to `gateN/mac_config` topics as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateMacConfig {
    pub start_mac: String,
    pub finish_mac: String,
}

// =============================================================================
// TESTS
// =============================================================================
