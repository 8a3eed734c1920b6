//! Bounded display buffers - race log, per-competitor logs, latest frames
//!
//! The dashboard layer polls these on every refresh tick, so all buffers
//! are hard-capped and newest-first. Writers come from several threads;
//! one lock guards the whole book.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::core::constants::{COMPETITOR_LOG_CAPACITY, RACE_LOG_CAPACITY};

/// Shared display state: every entry the UI can show, nothing more.
pub struct Logbook {
    inner: Mutex<Inner>,
    race_capacity: usize,
    competitor_capacity: usize,
}

struct Inner {
    race_log: VecDeque<String>,
    competitor_logs: HashMap<String, VecDeque<String>>,
    arm_log: VecDeque<String>,
    latest_frames: HashMap<String, String>,
}

impl Logbook {
    pub fn new(competitors: &[String]) -> Self {
        let mut competitor_logs = HashMap::new();
        for competitor in competitors {
            competitor_logs.insert(
                competitor.clone(),
                VecDeque::with_capacity(COMPETITOR_LOG_CAPACITY),
            );
        }
        Self {
            inner: Mutex::new(Inner {
                race_log: VecDeque::with_capacity(RACE_LOG_CAPACITY),
                competitor_logs,
                arm_log: VecDeque::with_capacity(COMPETITOR_LOG_CAPACITY),
                latest_frames: HashMap::new(),
            }),
            race_capacity: RACE_LOG_CAPACITY,
            competitor_capacity: COMPETITOR_LOG_CAPACITY,
        }
    }

    // -------------------------------------------------------------------------
    // Writers
    // -------------------------------------------------------------------------

    pub fn push_race(&self, line: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner.race_log.push_front(line.into());
        inner.race_log.truncate(self.race_capacity);
    }

    /// Append to a competitor's log lane, creating the lane on first use so
    /// no message is ever dropped for an unknown sender.
    pub fn push_competitor(&self, competitor: &str, line: impl Into<String>) {
        let mut inner = self.inner.lock();
        let lane = inner
            .competitor_logs
            .entry(competitor.to_string())
            .or_default();
        lane.push_front(line.into());
        lane.truncate(self.competitor_capacity);
    }

    pub fn push_arm(&self, line: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner.arm_log.push_front(line.into());
        inner.arm_log.truncate(self.competitor_capacity);
    }

    /// Replace the latest frame for a named slot (competitor camera,
    /// top camera, path overlay).
    pub fn set_frame(&self, slot: &str, payload: impl Into<String>) {
        self.inner
            .lock()
            .latest_frames
            .insert(slot.to_string(), payload.into());
    }

    // -------------------------------------------------------------------------
    // Readers (snapshots, never borrows across the lock)
    // -------------------------------------------------------------------------

    pub fn race_log(&self) -> Vec<String> {
        self.inner.lock().race_log.iter().cloned().collect()
    }

    pub fn competitor_log(&self, competitor: &str) -> Vec<String> {
        self.inner
            .lock()
            .competitor_logs
            .get(competitor)
            .map(|lane| lane.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn arm_log(&self) -> Vec<String> {
        self.inner.lock().arm_log.iter().cloned().collect()
    }

    pub fn latest_frame(&self, slot: &str) -> Option<String> {
        self.inner.lock().latest_frames.get(slot).cloned()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> Logbook {
        Logbook::new(&["gerald".to_string(), "mael".to_string()])
    }

    #[test]
    fn test_race_log_newest_first() {
        let book = book();
        book.push_race("first");
        book.push_race("second");
        assert_eq!(book.race_log(), vec!["second", "first"]);
    }

    #[test]
    fn test_race_log_bounded() {
        let book = book();
        for i in 0..(RACE_LOG_CAPACITY + 5) {
            book.push_race(format!("entry {i}"));
        }
        let log = book.race_log();
        assert_eq!(log.len(), RACE_LOG_CAPACITY);
        // Oldest entries were evicted
        assert_eq!(log[0], format!("entry {}", RACE_LOG_CAPACITY + 4));
    }

    #[test]
    fn test_competitor_log_bounded() {
        let book = book();
        for i in 0..(COMPETITOR_LOG_CAPACITY + 3) {
            book.push_competitor("gerald", format!("line {i}"));
        }
        assert_eq!(book.competitor_log("gerald").len(), COMPETITOR_LOG_CAPACITY);
        assert!(book.competitor_log("mael").is_empty());
    }

    #[test]
    fn test_unknown_competitor_gets_a_lane() {
        let book = book();
        book.push_competitor("newcomer", "hello");
        assert_eq!(book.competitor_log("newcomer"), vec!["hello"]);
    }

    #[test]
    fn test_latest_frame_replaced() {
        let book = book();
        assert!(book.latest_frame("gerald").is_none());
        book.set_frame("gerald", "frame-1");
        book.set_frame("gerald", "frame-2");
        assert_eq!(book.latest_frame("gerald").as_deref(), Some("frame-2"));
    }

    #[test]
    fn test_arm_log_independent_of_race_log() {
        let book = book();
        book.push_arm("joint moved");
        assert_eq!(book.arm_log(), vec!["joint moved"]);
        assert!(book.race_log().is_empty());
    }
}
