//! Scan Session
//!
//! This crate implements the control logic that sits between a live AR camera
//! feed and an object detection engine.
//!
//! # Architecture
//!
//! The session controller owns the detection engine and reconciles its
//! asynchronous callbacks with the per-frame host loop:
//!
//! 1. **Frame gating**: camera frames are forwarded only while scanning, one at a
//!    time, and no more often than the throttle interval.
//! 2. **Lazy intrinsics**: camera intrinsics are fetched until one fetch
//!    succeeds, then handed to the engine exactly once.
//! 3. **Pose decoding**: the engine's row-major 4x4 transformation becomes a
//!    position and a unit quaternion.
//! 4. **Single anchor**: a new detection destroys the previous world anchor
//!    before attaching the next one.
//! 5. **Preview overlays**: a tick-driven fade-in, hold, fade-out and grace
//!    period for the translucent preview model.
//!
//! # Module Structure
//!
//! - `session`: the state machine (`SessionController`)
//! - `engine`: detection engine boundary, typed event channel, registry
//! - `ingest`: camera frame and intrinsics sources
//! - `gate`, `intrinsics`, `pose`, `anchor`, `overlay`, `preview`: leaf components
//! - Core types: `SessionState`, `ResolutionMode`, `FaultKind`, `SessionEvent`

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod anchor;
pub mod config;
pub mod engine;
pub mod frame;
pub mod gate;
pub mod ingest;
pub mod intrinsics;
pub mod overlay;
pub mod pose;
pub mod preview;
pub mod session;

pub use anchor::{AnchorHandle, AnchorId, AnchorManager, AnchorOp, AnchorSystem, InMemoryAnchors};
pub use config::{PreviewSettings, SessionConfig};
pub use engine::{
    DetectionEngine, EngineCall, EngineEvent, EngineEvents, EngineFactory, EngineRegistry,
    EngineScript, ScriptedEngine, ScriptedProbe,
};
pub use frame::{CameraFrame, FrameView};
pub use gate::{FrameGate, GateDecision, GateInput, DEFAULT_THROTTLE};
pub use ingest::{FrameSource, IntrinsicsSource, SyntheticCamera, SyntheticCameraConfig};
pub use intrinsics::{Intrinsics, IntrinsicsCache, IntrinsicsStatus};
pub use overlay::{FadeSettings, OverlayAnimator, OverlayId, OverlayPhase, OverlayUpdate};
pub use pose::{decode, Pose, Transformation};
pub use preview::{
    fit_preview, Aabb, DrawablePart, Material, ModelLoader, PreviewModel, StaticModelLoader,
};
pub use session::{FrameOutcome, SessionCollaborators, SessionController, SessionStats};

// -------------------- Session State --------------------

/// Lifecycle state of a detection session.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, engine not constructed yet.
    #[default]
    Idle,
    /// Engine constructed, asynchronous init in progress.
    Initializing,
    /// Engine initialized and configured; not scanning.
    Ready,
    /// Frames are being forwarded to the engine.
    Scanning,
    /// A detection has been accepted and placed.
    Resolved,
    /// Init or runtime failure; left only by an explicit retry or re-init.
    Failed,
    /// Torn down; engine released.
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Scanning => "scanning",
            SessionState::Resolved => "resolved",
            SessionState::Failed => "failed",
            SessionState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

// -------------------- Resolution Mode --------------------

/// What happens after the first accepted detection.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionMode {
    /// `Resolved` is terminal for the scan: frame forwarding stops.
    #[default]
    SingleShot,
    /// Frames keep flowing and transformation updates keep moving the placement.
    Continuous,
}

impl FromStr for ResolutionMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "single-shot" | "single_shot" | "once" => Ok(ResolutionMode::SingleShot),
            "continuous" | "tracking" => Ok(ResolutionMode::Continuous),
            other => Err(anyhow!(
                "unknown resolution mode '{}' (expected single-shot or continuous)",
                other
            )),
        }
    }
}

// -------------------- Faults --------------------

/// Failure taxonomy surfaced through `SessionEvent::Fault`.
///
/// Acquisition misses and intrinsics misses are logged only; they never
/// become fault events.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    ConfigurationError,
    InitializationFailure,
    DetectionFailure,
    AnchorCreationFailure,
}

// -------------------- Output Events --------------------

/// Output of the session controller. This is the only coupling to UI and
/// rendering; hosts drain these with `SessionController::drain_events`.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// Human-readable status line.
    Status { text: String },
    /// Interactability of the scan and retry controls.
    Controls {
        scan_enabled: bool,
        retry_enabled: bool,
    },
    /// Decoded placement of the detected object. `anchor` is `None` when the
    /// anchoring subsystem could not create one.
    Placement {
        pose: Pose,
        anchor: Option<AnchorHandle>,
    },
    PreviewReady { url: String, scale: f32 },
    OverlayAlpha { id: OverlayId, color: [f32; 4] },
    OverlayRemoved { id: OverlayId },
    Fault { kind: FaultKind, message: String },
}

impl SessionEvent {
    pub(crate) fn status(text: impl Into<String>) -> Self {
        SessionEvent::Status { text: text.into() }
    }

    pub(crate) fn fault(kind: FaultKind, message: impl Into<String>) -> Self {
        SessionEvent::Fault {
            kind,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_mode_parses_aliases() {
        assert_eq!(
            "single-shot".parse::<ResolutionMode>().unwrap(),
            ResolutionMode::SingleShot
        );
        assert_eq!(
            " Continuous ".parse::<ResolutionMode>().unwrap(),
            ResolutionMode::Continuous
        );
        assert!("sometimes".parse::<ResolutionMode>().is_err());
    }

    #[test]
    fn session_events_serialize_with_tag() {
        let ev = SessionEvent::Controls {
            scan_enabled: true,
            retry_enabled: false,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "controls");
        assert_eq!(json["scan_enabled"], true);

        let ev = SessionEvent::StateChanged {
            from: SessionState::Ready,
            to: SessionState::Scanning,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["to"], "scanning");
    }
}
