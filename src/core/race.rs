//! Race timing state machine
//!
//! Converts the stream of gate-crossing events into race lifecycle
//! transitions (idle -> running -> finished), computing elapsed time, the
//! pairwise finish delta and the penalty-adjusted total. Gates may redeliver
//! an event; every mutating operation checks current state before applying
//! an effect, so duplicate delivery is always a logged no-op.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::constants::{
    FINISH_TOPIC_KEY, MAX_FINISH_GATES, OBJECT_DETECTED, START_TOPIC_KEY,
};
use crate::core::timestamp::decode_timestamp;

/// Shared handle to the race machine; all mutation goes through its methods
/// under this single lock.
pub type SharedRace = Arc<Mutex<RaceMachine>>;

// =============================================================================
// POLICY AND PHASE
// =============================================================================

/// What to do with a start gate event while a race is already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPolicy {
    /// Reject every start until an explicit reset (the default)
    #[default]
    RejectUntilReset,
    /// Re-arm the start gate: restart timing from the new crossing
    AllowRestart,
}

/// Race lifecycle phase, derived from the recorded state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RacePhase {
    Idle,
    Running,
    Finished,
}

// =============================================================================
// STATE
// =============================================================================

/// Mutable race state. Lives for the whole process, cleared on reset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RaceState {
    /// Set once per race; `None` means the race has not started yet
    pub start_time: Option<DateTime<Utc>>,
    /// At most one entry per distinct finish gate, never more than two
    pub finish_times: HashMap<String, DateTime<Utc>>,
    /// True strictly between an accepted start and the second distinct finish
    pub running: bool,
    /// Frozen final time in seconds once finished; 0.0 before that
    pub elapsed: f64,
    /// Absolute difference between the two finish timestamps, in seconds
    pub delta: Option<f64>,
    /// Penalty count per competitor
    pub penalties: HashMap<String, u32>,
    /// True while a competitor's penalty button is in its quiescent window
    pub penalty_cooldown: HashMap<String, bool>,
}

// =============================================================================
// OUTCOMES
// =============================================================================

/// Result of feeding one gate event to the machine. Each outcome renders
/// exactly one human-readable race log line.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    StartAccepted {
        at: DateTime<Utc>,
    },
    /// `AllowRestart` policy only: start gate fired again mid-race
    StartRestarted {
        at: DateTime<Utc>,
    },
    StartAlreadyRunning,
    StartNeedsReset,
    /// First distinct finish recorded; the race keeps running
    FinishAccepted {
        gate: String,
        at: DateTime<Utc>,
    },
    /// Second distinct finish: the race is over and the totals are frozen
    RaceFinished {
        gate: String,
        at: DateTime<Utc>,
        base_elapsed: f64,
        penalty_seconds: f64,
        total: f64,
        delta: f64,
    },
    FinishDuplicate {
        gate: String,
    },
    FinishNotRunning {
        gate: String,
    },
}

impl GateOutcome {
    /// The single race log line this outcome produces.
    pub fn log_line(&self) -> String {
        match self {
            GateOutcome::StartAccepted { at } => {
                format!("[RACE] Start triggered at {}", at.format("%H:%M:%S%.3f"))
            }
            GateOutcome::StartRestarted { at } => {
                format!("[RACE] Start re-armed at {}", at.format("%H:%M:%S%.3f"))
            }
            GateOutcome::StartAlreadyRunning => {
                "[RACE] Start gate already triggered".to_string()
            }
            GateOutcome::StartNeedsReset => {
                "[RACE] Already started, need to reset to restart".to_string()
            }
            GateOutcome::FinishAccepted { gate, at } => {
                format!("[RACE] Finish {} at {}", gate, at.format("%H:%M:%S%.3f"))
            }
            GateOutcome::RaceFinished {
                gate,
                base_elapsed,
                penalty_seconds,
                total,
                delta,
                ..
            } => format!(
                "[RACE] Finish {} | Base: {:.3}s + Penalty: {:.3}s = Total: {:.3}s | Delta: {:.3}s",
                gate, base_elapsed, penalty_seconds, total, delta
            ),
            GateOutcome::FinishDuplicate { gate } => {
                format!("[RACE] Finish gate {} already triggered", gate)
            }
            GateOutcome::FinishNotRunning { gate } => {
                format!("[RACE] Finish {} ignored, race not running", gate)
            }
        }
    }

    /// Whether the event mutated race state.
    pub fn accepted(&self) -> bool {
        matches!(
            self,
            GateOutcome::StartAccepted { .. }
                | GateOutcome::StartRestarted { .. }
                | GateOutcome::FinishAccepted { .. }
                | GateOutcome::RaceFinished { .. }
        )
    }
}

/// Result of a penalty request.
#[derive(Debug, Clone, PartialEq)]
pub enum PenaltyOutcome {
    Applied { competitor: String, count: u32 },
    NotRunning { competitor: String },
}

impl PenaltyOutcome {
    pub fn log_line(&self) -> String {
        match self {
            PenaltyOutcome::Applied { competitor, count } => {
                format!("[RACE] Penalty #{} for {}", count, competitor)
            }
            PenaltyOutcome::NotRunning { competitor } => {
                format!("[RACE] Penalty for {} ignored, race not running", competitor)
            }
        }
    }

    pub fn accepted(&self) -> bool {
        matches!(self, PenaltyOutcome::Applied { .. })
    }
}

// =============================================================================
// RACE MACHINE
// =============================================================================

/// The race timing state machine.
pub struct RaceMachine {
    state: RaceState,
    policy: StartPolicy,
    penalty_seconds: f64,
}

impl RaceMachine {
    pub fn new(competitors: &[String], penalty_seconds: f64, policy: StartPolicy) -> Self {
        let mut state = RaceState::default();
        for competitor in competitors {
            state.penalties.insert(competitor.clone(), 0);
            state.penalty_cooldown.insert(competitor.clone(), false);
        }
        Self {
            state,
            policy,
            penalty_seconds,
        }
    }

    /// Wrap a machine in the shared handle used across threads.
    pub fn into_shared(self) -> SharedRace {
        Arc::new(Mutex::new(self))
    }

    pub fn state(&self) -> &RaceState {
        &self.state
    }

    pub fn phase(&self) -> RacePhase {
        if self.state.running {
            RacePhase::Running
        } else if self.state.start_time.is_some() {
            RacePhase::Finished
        } else {
            RacePhase::Idle
        }
    }

    /// Feed one gate event. Returns `None` when the topic names neither a
    /// start nor a finish gate, or when the payload is not a detection.
    /// A detection is either the bare `object_detected` token (timed at
    /// `received_at`) or a sensor timestamp; keep-alives like `clear`
    /// never reach the race state. Otherwise exactly one outcome,
    /// accepted or rejected.
    pub fn handle_gate_event(
        &mut self,
        topic: &str,
        payload: &str,
        received_at: DateTime<Utc>,
    ) -> Option<GateOutcome> {
        let is_start = topic.contains(START_TOPIC_KEY);
        let is_finish = topic.contains(FINISH_TOPIC_KEY);
        if !is_start && !is_finish {
            return None;
        }

        let at = if payload.trim() == OBJECT_DETECTED {
            received_at
        } else {
            let decoded = decode_timestamp(payload, received_at);
            if !decoded.parsed {
                return None;
            }
            decoded.at
        };

        if is_start {
            Some(self.handle_start(at))
        } else {
            Some(self.handle_finish(topic, at))
        }
    }

    fn handle_start(&mut self, at: DateTime<Utc>) -> GateOutcome {
        match self.phase() {
            RacePhase::Idle => {
                self.arm(at);
                GateOutcome::StartAccepted { at }
            }
            RacePhase::Running => match self.policy {
                StartPolicy::AllowRestart => {
                    self.arm(at);
                    GateOutcome::StartRestarted { at }
                }
                StartPolicy::RejectUntilReset => GateOutcome::StartAlreadyRunning,
            },
            RacePhase::Finished => GateOutcome::StartNeedsReset,
        }
    }

    fn arm(&mut self, at: DateTime<Utc>) {
        self.state.start_time = Some(at);
        self.state.running = true;
        self.state.delta = None;
        self.state.finish_times.clear();
    }

    fn handle_finish(&mut self, gate: &str, at: DateTime<Utc>) -> GateOutcome {
        if !self.state.running {
            return GateOutcome::FinishNotRunning {
                gate: gate.to_string(),
            };
        }
        if self.state.finish_times.contains_key(gate) {
            return GateOutcome::FinishDuplicate {
                gate: gate.to_string(),
            };
        }

        self.state.finish_times.insert(gate.to_string(), at);

        if self.state.finish_times.len() < MAX_FINISH_GATES {
            return GateOutcome::FinishAccepted {
                gate: gate.to_string(),
                at,
            };
        }

        // Second distinct finish: freeze delta and total exactly once.
        let mut times: Vec<DateTime<Utc>> = self.state.finish_times.values().copied().collect();
        times.sort();
        let (first, last) = (times[0], times[times.len() - 1]);
        let delta = seconds_between(first, last);

        // running is only ever set together with start_time
        let start = self.state.start_time.unwrap_or(first);
        let base_elapsed = seconds_between(start, last);
        let penalty_seconds = self.penalty_total_seconds();
        let total = base_elapsed + penalty_seconds;

        self.state.delta = Some(delta);
        self.state.elapsed = total;
        self.state.running = false;

        GateOutcome::RaceFinished {
            gate: gate.to_string(),
            at,
            base_elapsed,
            penalty_seconds,
            total,
            delta,
        }
    }

    /// Apply a penalty to a competitor. Accepted only while running; the
    /// live elapsed estimate reflects it immediately. The caller clears the
    /// cooldown flag after its debounce window.
    pub fn apply_penalty(&mut self, competitor: &str) -> PenaltyOutcome {
        if !self.state.running {
            return PenaltyOutcome::NotRunning {
                competitor: competitor.to_string(),
            };
        }
        let count = self
            .state
            .penalties
            .entry(competitor.to_string())
            .and_modify(|c| *c += 1)
            .or_insert(1);
        let count = *count;
        self.state
            .penalty_cooldown
            .insert(competitor.to_string(), true);
        PenaltyOutcome::Applied {
            competitor: competitor.to_string(),
            count,
        }
    }

    /// Lower a competitor's penalty cooldown flag (debounce window elapsed).
    pub fn clear_penalty_cooldown(&mut self, competitor: &str) {
        if let Some(flag) = self.state.penalty_cooldown.get_mut(competitor) {
            *flag = false;
        }
    }

    pub fn penalty_cooldown(&self, competitor: &str) -> bool {
        self.state
            .penalty_cooldown
            .get(competitor)
            .copied()
            .unwrap_or(false)
    }

    /// Live race timer in seconds. Pure read: running yields the ticking
    /// penalty-adjusted estimate, finished yields the frozen total, idle
    /// yields zero.
    pub fn live_elapsed(&self, now: DateTime<Utc>) -> f64 {
        match self.phase() {
            RacePhase::Running => match self.state.start_time {
                Some(start) => seconds_between(start, now) + self.penalty_total_seconds(),
                None => 0.0,
            },
            RacePhase::Finished => self.state.elapsed,
            RacePhase::Idle => 0.0,
        }
    }

    /// Live finish gap in seconds. While running with exactly one finish
    /// recorded this is the provisional gap to `now`; once finished it is
    /// the frozen delta; otherwise `None`.
    pub fn live_delta(&self, now: DateTime<Utc>) -> Option<f64> {
        if self.state.running && self.state.finish_times.len() == 1 {
            let first = self.state.finish_times.values().next().copied()?;
            return Some(seconds_between(first, now).abs());
        }
        self.state.delta
    }

    /// Return unconditionally to idle: all timing fields and penalty
    /// counters back to their initial values. Idempotent.
    pub fn reset(&mut self) {
        self.state.start_time = None;
        self.state.finish_times.clear();
        self.state.running = false;
        self.state.elapsed = 0.0;
        self.state.delta = None;
        for count in self.state.penalties.values_mut() {
            *count = 0;
        }
        for flag in self.state.penalty_cooldown.values_mut() {
            *flag = false;
        }
    }

    fn penalty_total_seconds(&self) -> f64 {
        let count: u32 = self.state.penalties.values().sum();
        f64::from(count) * self.penalty_seconds
    }
}

fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 1000.0
}

// =============================================================================
// TESTS
// =============================================================================
