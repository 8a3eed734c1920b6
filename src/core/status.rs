//! Transport health flags and per-gate link status
//!
//! One `HealthFlag` per transport. The transport's supervisor and session
//! own the writes; anyone may read. The display layer polls these every
//! refresh tick to decide whether to show a warning banner.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

// =============================================================================
// HEALTH FLAG
// =============================================================================

/// Boolean liveness signal for a single transport.
#[derive(Clone)]
pub struct HealthFlag {
    name: Arc<str>,
    flag: Arc<AtomicBool>,
}

impl HealthFlag {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the flag, logging transitions only.
    pub fn set(&self, connected: bool) {
        let previous = self.flag.swap(connected, Ordering::SeqCst);
        if previous != connected {
            info!(
                transport = %self.name,
                connected,
                "[SUP] connection status changed"
            );
        }
    }

    pub fn get(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// =============================================================================
// GATE LINK STATUS
// =============================================================================

/// Per-gate link health, keyed by gate identifier (e.g. "gate1"). Updated
/// whenever traffic is seen from a gate, independent of the race lifecycle.
#[derive(Default)]
pub struct GateStatusBoard {
    inner: Mutex<HashMap<String, bool>>,
}

impl GateStatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_gate(&self, gate: &str, up: bool) {
        self.inner.lock().insert(gate.to_string(), up);
    }

    pub fn is_up(&self, gate: &str) -> bool {
        self.inner.lock().get(gate).copied().unwrap_or(false)
    }

    pub fn snapshot(&self) -> Vec<(String, bool)> {
        let mut entries: Vec<(String, bool)> = self
            .inner
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        entries.sort();
        entries
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_flag_starts_down() {
        let flag = HealthFlag::new("mqtt");
        assert!(!flag.get());
        assert_eq!(flag.name(), "mqtt");
    }

    #[test]
    fn test_health_flag_set_and_clear() {
        let flag = HealthFlag::new("agent");
        flag.set(true);
        assert!(flag.get());
        flag.set(false);
        assert!(!flag.get());
    }

    #[test]
    fn test_health_flag_clones_share_state() {
        let flag = HealthFlag::new("mqtt");
        let reader = flag.clone();
        flag.set(true);
        assert!(reader.get());
    }

    #[test]
    fn test_gate_status_board() {
        let board = GateStatusBoard::new();
        assert!(!board.is_up("gate1"));
        board.set_gate("gate1", true);
        board.set_gate("gate2", false);
        assert!(board.is_up("gate1"));
        assert!(!board.is_up("gate2"));
        assert_eq!(
            board.snapshot(),
            vec![("gate1".to_string(), true), ("gate2".to_string(), false)]
        );
    }
}
