use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::engine::backend::{DetectionEngine, EngineFactory};
use crate::engine::event::{EngineEvent, EngineEvents};
use crate::frame::FrameView;
use crate::intrinsics::Intrinsics;
use crate::pose::{Pose, Transformation};

/// Behavior of a `ScriptedEngine`.
#[derive(Clone, Debug)]
pub struct EngineScript {
    /// Number of `init` calls (across rebuilt engines) that fail before one
    /// succeeds.
    pub init_failures: u32,
    /// Text carried by every `Failed` event this engine emits.
    pub failure_message: String,
    /// Reject an empty model id or access key with a `Failed` event.
    pub require_credentials: bool,
    /// Report a detection on the n-th frame of a scan; `None` never detects.
    pub frames_until_detection: Option<u32>,
    pub transformation: Transformation,
    /// Keep emitting `TransformationUpdated` for frames after the detection.
    pub continuous_updates: bool,
    /// Emit a runtime failure on the n-th frame of a scan.
    pub fail_after_frames: Option<u32>,
    /// Answer to `request_preview_model`.
    pub preview_url: Option<String>,
}

impl Default for EngineScript {
    fn default() -> Self {
        Self {
            init_failures: 0,
            failure_message: "detection engine failure".to_string(),
            require_credentials: true,
            frames_until_detection: Some(3),
            transformation: Transformation::from_row_major([
                1.0, 0.0, 0.0, 0.25, //
                0.0, 1.0, 0.0, 0.0, //
                0.0, 0.0, 1.0, -1.5, //
                0.0, 0.0, 0.0, 1.0,
            ]),
            continuous_updates: false,
            fail_after_frames: None,
            preview_url: Some("stub://preview/model.glb".to_string()),
        }
    }
}

/// One command received by a scripted engine.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineCall {
    Init,
    SetConfig { model_id: String, access_key: String },
    StartScan,
    StopScan,
    Frame { timestamp_micros: u64 },
    Intrinsics(Intrinsics),
    RequestPreview,
    Dispose,
}

/// Most recent calls kept by a probe; older ones are dropped.
pub const PROBE_CALL_CAPACITY: usize = 4096;

#[derive(Debug, Default)]
struct ProbeState {
    calls: VecDeque<EngineCall>,
    engines_built: u32,
    init_attempts: u32,
    processing: bool,
}

/// Observes and steers every engine built by one scripted factory.
#[derive(Clone, Debug, Default)]
pub struct ScriptedProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl ScriptedProbe {
    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.iter().cloned().collect()
    }

    pub fn count(&self, pred: impl Fn(&EngineCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    /// Capture timestamps of frames handed to the engines, in order.
    pub fn forwarded_frames(&self) -> Vec<u64> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                EngineCall::Frame { timestamp_micros } => Some(*timestamp_micros),
                _ => None,
            })
            .collect()
    }

    pub fn engines_built(&self) -> u32 {
        self.lock().engines_built
    }

    /// Pretend the engine is still analyzing a frame.
    pub fn set_processing(&self, processing: bool) {
        self.lock().processing = processing;
    }

    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: EngineCall) {
        let mut state = self.lock();
        if state.calls.len() == PROBE_CALL_CAPACITY {
            state.calls.pop_front();
        }
        state.calls.push_back(call);
    }
}

/// Deterministic in-process detection engine.
///
/// Events are queued on the channel during the command call and observed by
/// the controller on its next tick, which models asynchronous delivery.
pub struct ScriptedEngine {
    script: EngineScript,
    events: EngineEvents,
    probe: ScriptedProbe,
    connected: bool,
    scanning: bool,
    detected: bool,
    disposed: bool,
    frames_in_scan: u32,
    updates_sent: u32,
}

impl ScriptedEngine {
    pub fn new(script: EngineScript, events: EngineEvents, probe: ScriptedProbe) -> Self {
        probe.lock().engines_built += 1;
        Self {
            script,
            events,
            probe,
            connected: false,
            scanning: false,
            detected: false,
            disposed: false,
            frames_in_scan: 0,
            updates_sent: 0,
        }
    }

    /// Factory for the registry plus a probe shared by every engine it builds.
    pub fn factory(script: EngineScript) -> (EngineFactory, ScriptedProbe) {
        let probe = ScriptedProbe::default();
        let shared = probe.clone();
        let factory: EngineFactory = Arc::new(move |events| {
            Box::new(ScriptedEngine::new(script.clone(), events, shared.clone()))
                as Box<dyn DetectionEngine>
        });
        (factory, probe)
    }

    fn fail(&mut self) {
        self.scanning = false;
        self.events
            .emit(EngineEvent::Failed(self.script.failure_message.clone()));
    }

    fn shifted_transformation(&self) -> Transformation {
        let mut m = *self.script.transformation.as_row_major();
        m[3] += 0.01 * self.updates_sent as f32;
        Transformation::from_row_major(m)
    }
}

impl DetectionEngine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn init(&mut self) {
        self.probe.record(EngineCall::Init);
        let attempt = {
            let mut state = self.probe.lock();
            state.init_attempts += 1;
            state.init_attempts
        };
        if attempt <= self.script.init_failures {
            self.events
                .emit(EngineEvent::Failed(self.script.failure_message.clone()));
            return;
        }
        self.connected = true;
        self.events.emit(EngineEvent::Initialized);
    }

    fn set_config(&mut self, model_id: &str, access_key: &str) {
        self.probe.record(EngineCall::SetConfig {
            model_id: model_id.to_string(),
            access_key: access_key.to_string(),
        });
        if self.script.require_credentials && (model_id.is_empty() || access_key.is_empty()) {
            self.connected = false;
            self.events.emit(EngineEvent::Failed(
                "model id and access key are required".to_string(),
            ));
        }
    }

    fn start_scan(&mut self) {
        self.probe.record(EngineCall::StartScan);
        if !self.connected {
            return;
        }
        self.scanning = true;
        self.detected = false;
        self.frames_in_scan = 0;
        self.events
            .emit(EngineEvent::Status("Looking for object".to_string()));
    }

    fn stop_scan(&mut self) {
        self.probe.record(EngineCall::StopScan);
        self.scanning = false;
    }

    fn update_camera_frame(&mut self, frame: FrameView<'_>, _camera_pose: &Pose) {
        self.probe.record(EngineCall::Frame {
            timestamp_micros: frame.timestamp_micros(),
        });
        if !self.scanning {
            return;
        }
        self.frames_in_scan += 1;

        if self.script.fail_after_frames == Some(self.frames_in_scan) {
            self.fail();
            return;
        }
        if self.detected {
            if self.script.continuous_updates {
                self.updates_sent += 1;
                let update = self.shifted_transformation();
                self.events.emit(EngineEvent::TransformationUpdated(update));
            }
        } else if self.script.frames_until_detection == Some(self.frames_in_scan) {
            self.detected = true;
            self.events
                .emit(EngineEvent::Detected(self.script.transformation));
        }
    }

    fn update_camera_intrinsics(&mut self, intrinsics: &Intrinsics) {
        self.probe.record(EngineCall::Intrinsics(*intrinsics));
    }

    fn request_preview_model(&mut self) {
        self.probe.record(EngineCall::RequestPreview);
        self.events
            .emit(EngineEvent::PreviewModelUrl(self.script.preview_url.clone()));
    }

    fn is_scanning(&self) -> bool {
        self.scanning
    }

    fn is_processing(&self) -> bool {
        self.probe.lock().processing
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn is_detected(&self) -> bool {
        self.detected
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.probe.record(EngineCall::Dispose);
        self.connected = false;
        self.scanning = false;
    }
}
