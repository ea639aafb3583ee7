//! Frame gate.
//!
//! Decides, per camera frame, whether the frame is worth sending to the
//! detection engine. Devices deliver frames at 30-60 Hz; the engine needs far
//! fewer, so the gate enforces:
//!
//! - forwarding only while a scan is active,
//! - no forwarding after a single-shot detection resolved,
//! - at most one frame in flight,
//! - a minimum spacing (throttle interval) between forwarded frames.
//!
//! The gate never advances its own timestamp while evaluating. The caller
//! records the forward with `record_forwarded` in the same step that hands the
//! frame to the engine, so a frame that fails acquisition does not consume a
//! throttle window.

use serde::Serialize;
use std::time::Duration;

use crate::{ResolutionMode, SessionState};

/// Default minimum spacing between forwarded frames.
pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(1000);

/// Snapshot of controller and engine state taken for one frame.
#[derive(Clone, Copy, Debug)]
pub struct GateInput {
    pub state: SessionState,
    pub mode: ResolutionMode,
    /// Controller requested scanning and the engine reports it is scanning.
    pub scan_active: bool,
    /// Engine is still working on a previously forwarded frame.
    pub engine_processing: bool,
    /// Engine reports a detection.
    pub engine_detected: bool,
}

/// Outcome of evaluating one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    Forward,
    NotScanning,
    AlreadyResolved,
    InFlight,
    Throttled { remaining_micros: u64 },
}

impl GateDecision {
    pub fn is_forward(&self) -> bool {
        matches!(self, GateDecision::Forward)
    }
}

/// Throttling frame filter.
#[derive(Clone, Debug)]
pub struct FrameGate {
    throttle_micros: u64,
    last_forwarded_micros: Option<u64>,
}

impl FrameGate {
    pub fn new(throttle: Duration) -> Self {
        Self {
            throttle_micros: u64::try_from(throttle.as_micros()).unwrap_or(u64::MAX),
            last_forwarded_micros: None,
        }
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_micros(self.throttle_micros)
    }

    pub fn last_forwarded_micros(&self) -> Option<u64> {
        self.last_forwarded_micros
    }

    pub fn should_forward(&self, input: &GateInput, now_micros: u64) -> bool {
        self.evaluate(input, now_micros).is_forward()
    }

    pub fn evaluate(&self, input: &GateInput, now_micros: u64) -> GateDecision {
        if !input.scan_active {
            return GateDecision::NotScanning;
        }
        let single_shot = input.mode == ResolutionMode::SingleShot;
        match input.state {
            SessionState::Scanning => {}
            SessionState::Resolved if !single_shot => {}
            SessionState::Resolved => return GateDecision::AlreadyResolved,
            _ => return GateDecision::NotScanning,
        }
        if single_shot && input.engine_detected {
            return GateDecision::AlreadyResolved;
        }
        if input.engine_processing {
            return GateDecision::InFlight;
        }
        if let Some(last) = self.last_forwarded_micros {
            // A clock that steps backwards reads as zero elapsed.
            let elapsed = now_micros.saturating_sub(last);
            if elapsed < self.throttle_micros {
                return GateDecision::Throttled {
                    remaining_micros: self.throttle_micros - elapsed,
                };
            }
        }
        GateDecision::Forward
    }

    /// Record that a frame was handed to the engine at `now_micros`.
    pub fn record_forwarded(&mut self, now_micros: u64) {
        self.last_forwarded_micros = Some(now_micros);
    }

    /// Forget the last forward so the first frame of a new scan goes through
    /// immediately.
    pub fn reset(&mut self) {
        self.last_forwarded_micros = None;
    }
}

impl Default for FrameGate {
    fn default() -> Self {
        Self::new(DEFAULT_THROTTLE)
    }
}
