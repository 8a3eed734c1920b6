//! Fixed constants - gate topic keys, timing windows, buffer capacities
//!
//! Values that are part of the track-side contract (topic naming, the
//! detection token) live here; everything tunable sits in the config module.

use std::time::Duration;

// =============================================================================
// GATE TOPIC CLASSIFICATION
// =============================================================================

/// Substring identifying a start gate topic (case-sensitive)
pub const START_TOPIC_KEY: &str = "start";

/// Substring identifying a finish gate topic (case-sensitive)
pub const FINISH_TOPIC_KEY: &str = "finish";

/// Payload token a gate publishes when it has no clock of its own
pub const OBJECT_DETECTED: &str = "object_detected";

/// Payload used by gates to wipe the displayed log, never recorded
pub const CLEAR_PAYLOAD: &str = "clear";

// =============================================================================
// RACE RULES
// =============================================================================

/// A race is over once this many distinct finish gates have fired
pub const MAX_FINISH_GATES: usize = 2;

/// Seconds added to the final time per penalty
pub const DEFAULT_PENALTY_SECONDS: f64 = 5.0;

/// Quiescent window after a penalty before the same competitor can take another
pub const PENALTY_COOLDOWN: Duration = Duration::from_secs(3);

// =============================================================================
// TIMING
// =============================================================================

/// Default pause between supervisor connect/health checks (pub/sub link)
pub const MQTT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Default pause between supervisor connect/health checks (agent link)
pub const AGENT_RETRY_INTERVAL: Duration = Duration::from_secs(15);

/// How long the agent receive loop stays quiet before logging about it
pub const AGENT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Sleep between non-blocking socket polls in the agent session loop
pub const AGENT_POLL_SLEEP: Duration = Duration::from_millis(10);

// =============================================================================
// BUFFER CAPACITIES
// =============================================================================

/// Race log entries kept for display
pub const RACE_LOG_CAPACITY: usize = 20;

/// Per-competitor log entries kept for display
pub const COMPETITOR_LOG_CAPACITY: usize = 10;

/// Outbound command frames queued while a transport is down
pub const COMMAND_QUEUE_CAPACITY: usize = 128;

/// Type tag applied to outbound agent messages when none is given
pub const DEFAULT_MESSAGE_KIND: &str = "log";
