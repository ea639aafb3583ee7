use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;

use crate::pose::Transformation;

/// Asynchronous notifications from a detection engine.
///
/// Engines may emit from any thread; the session controller drains them on
/// its own tick, one at a time.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum EngineEvent {
    Initialized,
    Failed(String),
    /// First detection of the object in the current scan.
    Detected(Transformation),
    /// Subsequent pose update while tracking.
    TransformationUpdated(Transformation),
    /// Free-form progress text from the engine.
    Status(String),
    /// Answer to `request_preview_model`.
    PreviewModelUrl(Option<String>),
}

/// Sending half of an engine's event channel, handed to the engine when it
/// is constructed.
#[derive(Clone, Debug)]
pub struct EngineEvents {
    tx: Sender<EngineEvent>,
}

impl EngineEvents {
    /// Create a connected sender/receiver pair.
    pub fn channel() -> (Self, Receiver<EngineEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }

    /// Deliver an event. A dropped receiver means the session is gone; the
    /// event is discarded.
    pub fn emit(&self, event: EngineEvent) {
        if let Err(err) = self.tx.send(event) {
            log::debug!("engine event dropped, session closed: {:?}", err.into_inner());
        }
    }
}
