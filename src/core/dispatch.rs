//! Inbound agent message dispatch
//!
//! Classifies each point-to-point message by its type tag and routes it to
//! exactly one handler from a registry validated at registration time.
//! Unknown tags fall through to a default path that logs and records a
//! generic entry keyed by sender - a message is never silently dropped.
//! Handlers are plain functions writing one logbook slot; they must not
//! block, since dispatch runs inline with message receipt.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, warn};

use crate::core::logbook::Logbook;
use crate::core::protocol::DetectionReport;

// =============================================================================
// TYPES
// =============================================================================

/// A normalized inbound point-to-point message.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentMessage {
    pub sender: String,
    pub kind: String,
    pub body: String,
}

/// Non-blocking side effect on the shared display state.
pub type Handler = fn(&Logbook, &AgentMessage);

#[derive(Debug, PartialEq, Eq)]
pub enum DispatchError {
    DuplicateTag(String),
    EmptyTag,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::DuplicateTag(tag) => {
                write!(f, "handler already registered for tag '{}'", tag)
            }
            DispatchError::EmptyTag => write!(f, "handler tag must not be empty"),
        }
    }
}

// =============================================================================
// DISPATCHER
// =============================================================================

/// Registry mapping type tags to handlers, open to extension.
pub struct Dispatcher {
    handlers: HashMap<String, Handler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry preloaded with the tags the robots speak today.
    pub fn with_builtin_handlers() -> Self {
        let mut dispatcher = Self::new();
        // Registration of the builtin set cannot collide
        let builtin: [(&str, Handler); 5] = [
            ("image", handle_image),
            ("log", handle_log),
            ("detection", handle_detection),
            ("arm_log", handle_arm_log),
            ("path_image", handle_path_image),
        ];
        for (tag, handler) in builtin {
            dispatcher
                .register(tag, handler)
                .unwrap_or_else(|e| panic!("builtin registry: {e}"));
        }
        dispatcher
    }

    /// Add a handler for a tag. Duplicate or empty tags are rejected here,
    /// not at dispatch time.
    pub fn register(&mut self, tag: &str, handler: Handler) -> Result<(), DispatchError> {
        if tag.is_empty() {
            return Err(DispatchError::EmptyTag);
        }
        if self.handlers.contains_key(tag) {
            return Err(DispatchError::DuplicateTag(tag.to_string()));
        }
        self.handlers.insert(tag.to_string(), handler);
        Ok(())
    }

    pub fn knows(&self, tag: &str) -> bool {
        self.handlers.contains_key(tag)
    }

    /// Route one message to its handler by exact tag match, or to the
    /// unknown-type default.
    pub fn dispatch(&self, logbook: &Logbook, message: &AgentMessage) {
        match self.handlers.get(&message.kind) {
            Some(handler) => handler(logbook, message),
            None => {
                warn!(
                    sender = %message.sender,
                    kind = %message.kind,
                    "[AGENT] Unknown message type"
                );
                logbook.push_competitor(
                    &message.sender,
                    format!("Unknown message type: {}", message.kind),
                );
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::with_builtin_handlers()
    }
}

// =============================================================================
// BUILTIN HANDLERS
// =============================================================================

fn handle_image(logbook: &Logbook, message: &AgentMessage) {
    debug!(sender = %message.sender, bytes = message.body.len(), "[AGENT] Image received");
    logbook.set_frame(&message.sender, message.body.clone());
    logbook.push_competitor(
        &message.sender,
        format!("Image received from {}", message.sender),
    );
}

fn handle_path_image(logbook: &Logbook, message: &AgentMessage) {
    debug!(sender = %message.sender, "[AGENT] Path image received");
    logbook.set_frame(&format!("{}:path", message.sender), message.body.clone());
    logbook.push_competitor(
        &message.sender,
        format!("Path image received from {}", message.sender),
    );
}

fn handle_log(logbook: &Logbook, message: &AgentMessage) {
    debug!(sender = %message.sender, "[AGENT] Log entry");
    logbook.push_competitor(
        &message.sender,
        format!("From {}: {}", message.sender, message.body),
    );
}

fn handle_detection(logbook: &Logbook, message: &AgentMessage) {
    match serde_json::from_str::<DetectionReport>(&message.body) {
        Ok(report) => {
            debug!(sender = %message.sender, label = %report.label, "[AGENT] Detection");
            logbook.push_competitor(
                &message.sender,
                format!("Detected {} ({:.2})", report.label, report.confidence),
            );
        }
        Err(e) => {
            warn!(sender = %message.sender, error = %e, "[AGENT] Malformed detection body");
            logbook.push_competitor(
                &message.sender,
                format!("Unreadable detection report: {}", message.body),
            );
        }
    }
}

fn handle_arm_log(logbook: &Logbook, message: &AgentMessage) {
    logbook.push_arm(format!("[{}] {}", message.sender, message.body));
}

// =============================================================================
// TESTS
// =============================================================================
