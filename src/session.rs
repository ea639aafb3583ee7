//! Session controller.
//!
//! Owns the detection engine and drives one detection session:
//!
//! ```text
//! Idle -> Initializing -> Ready -> Scanning -> Resolved
//!              |                     |           |
//!              +------> Failed <-----+-----------+
//! any state -> Terminated (teardown)
//! ```
//!
//! The host calls `on_camera_frame` for every camera frame and `tick` once
//! per rendered frame. Engine events are drained on `tick`, so every state
//! change happens on the host's thread and the controller needs no locking.
//! Everything the UI or renderer must show is queued as `SessionEvent`s and
//! collected with `drain_events`.

use anyhow::{anyhow, Result};
use crossbeam_channel::Receiver;
use serde::Serialize;

use crate::anchor::{AnchorHandle, AnchorManager, AnchorSystem};
use crate::config::SessionConfig;
use crate::engine::{DetectionEngine, EngineEvent, EngineEvents, EngineFactory};
use crate::gate::{FrameGate, GateDecision, GateInput};
use crate::ingest::{FrameSource, IntrinsicsSource};
use crate::intrinsics::{IntrinsicsCache, IntrinsicsStatus};
use crate::overlay::{OverlayAnimator, OverlayUpdate};
use crate::pose::{Pose, Transformation};
use crate::preview::{fit_preview, ModelLoader, PreviewModel};
use crate::{FaultKind, ResolutionMode, SessionEvent, SessionState};

const STATUS_INITIALIZING: &str = "Initializing...";
const STATUS_READY: &str = "Ready";
const STATUS_SCANNING: &str = "Scanning...";
const STATUS_DETECTED: &str = "Detected";

/// Platform and engine dependencies injected into the controller.
pub struct SessionCollaborators {
    pub engine_factory: EngineFactory,
    pub frames: Box<dyn FrameSource>,
    pub intrinsics: Box<dyn IntrinsicsSource>,
    pub anchors: Box<dyn AnchorSystem>,
    /// Renderer-side loader for the preview model; `None` disables preview.
    pub model_loader: Option<Box<dyn ModelLoader>>,
}

/// Session counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub frames_offered: u64,
    pub frames_forwarded: u64,
    pub frames_throttled: u64,
    /// Frames dropped because no scan was active, a frame was in flight, or
    /// the scan already resolved.
    pub frames_gated: u64,
    pub acquisition_misses: u64,
    pub intrinsics_forwarded: u64,
    pub detections: u64,
    pub transformation_updates: u64,
    pub anchor_failures: u64,
    pub engine_failures: u64,
    pub overlays_spawned: u64,
}

/// What happened to one camera frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Forwarded { timestamp_micros: u64 },
    Gated(GateDecision),
    /// The gate passed but the platform had no image ready.
    NoImage,
}

pub struct SessionController {
    config: SessionConfig,
    state: SessionState,
    engine_factory: EngineFactory,
    engine: Option<Box<dyn DetectionEngine>>,
    engine_events: Option<Receiver<EngineEvent>>,
    frames: Box<dyn FrameSource>,
    intrinsics_source: Box<dyn IntrinsicsSource>,
    gate: FrameGate,
    intrinsics: IntrinsicsCache,
    anchors: AnchorManager,
    overlays: OverlayAnimator,
    model_loader: Option<Box<dyn ModelLoader>>,
    preview: Option<PreviewModel>,
    scan_requested: bool,
    /// The engine still reported a detection from the previous scan when this
    /// one began. Engines need not clear the flag on `start_scan`, so it is
    /// ignored until the engine reads undetected once.
    stale_detection: bool,
    last_placement: Option<Pose>,
    outbox: Vec<SessionEvent>,
    stats: SessionStats,
}

impl SessionController {
    pub fn new(config: SessionConfig, collaborators: SessionCollaborators) -> Self {
        let gate = FrameGate::new(config.throttle);
        let overlays = OverlayAnimator::new(config.preview.fade);
        Self {
            config,
            state: SessionState::Idle,
            engine_factory: collaborators.engine_factory,
            engine: None,
            engine_events: None,
            frames: collaborators.frames,
            intrinsics_source: collaborators.intrinsics,
            gate,
            intrinsics: IntrinsicsCache::new(),
            anchors: AnchorManager::new(collaborators.anchors),
            overlays,
            model_loader: collaborators.model_loader,
            preview: None,
            scan_requested: false,
            stale_detection: false,
            last_placement: None,
            outbox: Vec::new(),
            stats: SessionStats::default(),
        }
    }

    // ---- Lifecycle ----

    /// Construct the engine and begin initialization.
    ///
    /// Missing credentials are reported as a configuration fault, but the
    /// engine is still initialized; it is expected to fail on its own.
    pub fn activate(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(anyhow!("cannot activate session in state {}", self.state));
        }
        self.start_engine();
        Ok(())
    }

    /// Dispose the current engine and start a fresh initialization.
    pub fn reinitialize(&mut self) -> Result<()> {
        if self.state == SessionState::Terminated {
            return Err(anyhow!("cannot reinitialize a terminated session"));
        }
        log::info!("reinitializing detection session");
        self.release_engine();
        self.release_preview();
        self.anchors.release();
        self.intrinsics.reset();
        self.gate.reset();
        self.start_engine();
        Ok(())
    }

    /// Manual retry after a failure.
    ///
    /// With the engine still connected (a runtime failure) scanning resumes;
    /// otherwise the engine is rebuilt.
    pub fn retry(&mut self) -> Result<()> {
        if self.state != SessionState::Failed {
            return Err(anyhow!("retry is only available after a failure"));
        }
        let connected = self
            .engine
            .as_ref()
            .map(|engine| engine.is_connected())
            .unwrap_or(false);
        if connected {
            log::info!("retrying scan after runtime failure");
            self.begin_scan();
            Ok(())
        } else {
            self.reinitialize()
        }
    }

    /// Stop scanning, release the engine, the anchor, overlays and the
    /// preview model. Safe at any point, including before initialization
    /// completed, and safe to call more than once.
    pub fn teardown(&mut self) {
        if self.state == SessionState::Terminated {
            return;
        }
        log::info!("tearing down detection session in state {}", self.state);
        self.release_engine();
        self.anchors.release();
        for id in self.overlays.clear() {
            self.outbox.push(SessionEvent::OverlayRemoved { id });
        }
        self.release_preview();
        self.transition(SessionState::Terminated);
        self.emit_controls(false, false);
        log::info!(
            "session stats: forwarded={} throttled={} misses={} detections={}",
            self.stats.frames_forwarded,
            self.stats.frames_throttled,
            self.stats.acquisition_misses,
            self.stats.detections
        );
    }

    // ---- Scan control ----

    /// Request scanning. Returns whether the scan started.
    ///
    /// Ignored unless the session is `Ready` (or `Resolved` with no scan
    /// running), and ignored while the engine is still processing a frame.
    pub fn start_scan(&mut self) -> bool {
        let allowed = match self.state {
            SessionState::Ready => true,
            SessionState::Resolved => !self.scan_requested,
            _ => false,
        };
        if !allowed {
            log::warn!("scan request ignored in state {}", self.state);
            return false;
        }
        let Some(engine) = self.engine.as_ref() else {
            log::warn!("scan request ignored: no detection engine");
            return false;
        };
        if engine.is_processing() {
            log::debug!("scan request ignored while engine is processing a frame");
            return false;
        }
        self.begin_scan();
        true
    }

    /// Stop scanning. Safe mid-throttle-window; an in-flight frame is not
    /// awaited.
    pub fn stop_scan(&mut self) {
        if !self.scan_requested {
            return;
        }
        self.scan_requested = false;
        if let Some(engine) = self.engine.as_mut() {
            engine.stop_scan();
        }
        log::info!("scan stopped");
        if self.state == SessionState::Scanning {
            self.transition(SessionState::Ready);
            self.emit_status(STATUS_READY);
        }
        self.emit_controls(true, false);
    }

    // ---- Host loop ----

    /// Offer the current camera frame. Acquires the image only when the gate
    /// lets the frame through; the image is released before returning.
    pub fn on_camera_frame(&mut self, now_micros: u64) -> FrameOutcome {
        self.stats.frames_offered += 1;
        let Some(engine) = self.engine.as_mut() else {
            self.stats.frames_gated += 1;
            return FrameOutcome::Gated(GateDecision::NotScanning);
        };

        let detected = engine.is_detected();
        if !detected {
            self.stale_detection = false;
        }
        let input = GateInput {
            state: self.state,
            mode: self.config.resolution,
            scan_active: self.scan_requested && engine.is_scanning(),
            engine_processing: engine.is_processing(),
            engine_detected: detected && !self.stale_detection,
        };
        let decision = self.gate.evaluate(&input, now_micros);
        match decision {
            GateDecision::Forward => {}
            GateDecision::Throttled { remaining_micros } => {
                log::trace!("frame throttled, {} us remaining", remaining_micros);
                self.stats.frames_throttled += 1;
                return FrameOutcome::Gated(decision);
            }
            other => {
                log::trace!("frame gated: {:?}", other);
                self.stats.frames_gated += 1;
                return FrameOutcome::Gated(decision);
            }
        }

        let Some(frame) = self.frames.try_acquire_latest() else {
            log::debug!("no camera image available");
            self.stats.acquisition_misses += 1;
            return FrameOutcome::NoImage;
        };

        if let IntrinsicsStatus::Fetched(intrinsics) =
            self.intrinsics.ensure(self.intrinsics_source.as_mut())
        {
            engine.update_camera_intrinsics(&intrinsics);
            self.stats.intrinsics_forwarded += 1;
        }

        self.gate.record_forwarded(now_micros);
        engine.update_camera_frame(frame.view(), &frame.camera_pose);
        self.stats.frames_forwarded += 1;
        log::debug!("forwarded frame captured at {} us", frame.timestamp_micros);
        FrameOutcome::Forwarded {
            timestamp_micros: frame.timestamp_micros,
        }
    }

    /// Deliver pending engine events, then advance overlays by one step.
    pub fn tick(&mut self, now_micros: u64) {
        let pending: Vec<EngineEvent> = match &self.engine_events {
            Some(rx) => rx.try_iter().collect(),
            None => Vec::new(),
        };
        for event in pending {
            self.handle_engine_event(event, now_micros);
        }
        for update in self.overlays.tick(now_micros) {
            self.outbox.push(match update {
                OverlayUpdate::Alpha { id, color } => SessionEvent::OverlayAlpha { id, color },
                OverlayUpdate::Removed { id } => SessionEvent::OverlayRemoved { id },
            });
        }
    }

    /// Take all queued output events.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.outbox)
    }

    // ---- Accessors ----

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn is_scan_active(&self) -> bool {
        self.scan_requested
    }

    pub fn current_anchor(&self) -> Option<&AnchorHandle> {
        self.anchors.current()
    }

    pub fn last_placement(&self) -> Option<&Pose> {
        self.last_placement.as_ref()
    }

    pub fn preview_model(&self) -> Option<&PreviewModel> {
        self.preview.as_ref()
    }

    pub fn intrinsics_cached(&self) -> bool {
        self.intrinsics.is_cached()
    }

    pub fn overlays(&self) -> &OverlayAnimator {
        &self.overlays
    }

    // ---- Engine events ----

    fn handle_engine_event(&mut self, event: EngineEvent, now_micros: u64) {
        if self.state == SessionState::Terminated {
            return;
        }
        log::debug!("engine event: {:?}", event);
        match event {
            EngineEvent::Initialized => self.on_initialized(),
            EngineEvent::Failed(message) => self.on_failed(message),
            EngineEvent::Detected(transformation) => self.on_detected(transformation, now_micros),
            EngineEvent::TransformationUpdated(transformation) => {
                self.on_transformation_updated(transformation)
            }
            EngineEvent::Status(text) => {
                log::info!("engine status: {}", text);
                self.emit_status(text);
            }
            EngineEvent::PreviewModelUrl(url) => self.on_preview_url(url),
        }
    }

    fn on_initialized(&mut self) {
        if self.state != SessionState::Initializing {
            log::warn!("ignoring engine initialization in state {}", self.state);
            return;
        }
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        log::info!("detection engine {} initialized", engine.name());
        engine.set_config(&self.config.model_id, &self.config.access_key);
        if self.config.preview.enabled && self.model_loader.is_some() && self.preview.is_none() {
            engine.request_preview_model();
        }
        self.transition(SessionState::Ready);
        self.emit_status(STATUS_READY);
        if self.config.auto_scan {
            self.begin_scan();
        } else {
            self.emit_controls(true, false);
        }
    }

    fn on_failed(&mut self, message: String) {
        let connected = self
            .engine
            .as_ref()
            .map(|engine| engine.is_connected())
            .unwrap_or(false);
        let kind = if self.state == SessionState::Initializing || !connected {
            FaultKind::InitializationFailure
        } else {
            FaultKind::DetectionFailure
        };
        log::error!("detection engine failed ({:?}): {}", kind, message);
        self.stats.engine_failures += 1;

        if self.scan_requested {
            self.scan_requested = false;
            if let Some(engine) = self.engine.as_mut() {
                engine.stop_scan();
            }
        }
        self.transition(SessionState::Failed);
        self.emit_status(message.clone());
        self.outbox.push(SessionEvent::fault(kind, message));
        self.emit_controls(false, true);
    }

    fn on_detected(&mut self, transformation: Transformation, now_micros: u64) {
        let tracking = self.config.resolution == ResolutionMode::Continuous && self.scan_requested;
        match self.state {
            SessionState::Scanning => {}
            SessionState::Resolved if tracking => {
                // Repeated detections while tracking move the placement only.
                self.stats.detections += 1;
                self.place(transformation.decode());
                return;
            }
            state => {
                log::warn!("ignoring detection in state {}", state);
                return;
            }
        }
        let pose = transformation.decode();
        self.stats.detections += 1;
        self.place(pose);
        self.resolve();

        if !self.config.preview.enabled {
            return;
        }
        if self.preview.is_some() {
            self.overlays.spawn(pose, now_micros);
            self.stats.overlays_spawned += 1;
        } else {
            log::error!("preview model not loaded; skipping detection overlay");
        }
    }

    fn on_transformation_updated(&mut self, transformation: Transformation) {
        let tracking = self.config.resolution == ResolutionMode::Continuous && self.scan_requested;
        match self.state {
            SessionState::Resolved if tracking => {
                self.stats.transformation_updates += 1;
                self.place(transformation.decode());
            }
            SessionState::Scanning => {
                self.stats.transformation_updates += 1;
                self.place(transformation.decode());
                self.resolve();
            }
            state => log::debug!("ignoring transformation update in state {}", state),
        }
    }

    fn on_preview_url(&mut self, url: Option<String>) {
        let Some(url) = url.filter(|url| !url.trim().is_empty()) else {
            log::error!("detection engine returned no preview model url");
            return;
        };
        let Some(loader) = self.model_loader.as_mut() else {
            return;
        };
        match loader.load(&url) {
            Ok(mut model) => {
                let scale = fit_preview(&mut model, self.config.preview.target_size_m)
                    .unwrap_or(model.scale);
                log::info!("preview model {} loaded, scale {:.3}", url, scale);
                if let Some(previous) = self.preview.replace(model) {
                    loader.release(previous);
                }
                self.outbox.push(SessionEvent::PreviewReady { url, scale });
            }
            Err(err) => log::error!("failed to load preview model {}: {:#}", url, err),
        }
    }

    // ---- Internals ----

    fn start_engine(&mut self) {
        let missing = self.config.missing_credentials();
        if !missing.is_empty() {
            let message = format!("missing {}", missing.join(" and "));
            log::error!("ConfigurationError: {}", message);
            self.outbox
                .push(SessionEvent::fault(FaultKind::ConfigurationError, message));
        }

        let (events, rx) = EngineEvents::channel();
        let mut engine = (self.engine_factory)(events);
        log::info!("initializing detection engine {}", engine.name());
        self.transition(SessionState::Initializing);
        self.emit_status(STATUS_INITIALIZING);
        self.emit_controls(false, false);
        engine.init();
        self.engine = Some(engine);
        self.engine_events = Some(rx);
    }

    fn release_engine(&mut self) {
        self.scan_requested = false;
        self.stale_detection = false;
        self.engine_events = None;
        if let Some(mut engine) = self.engine.take() {
            engine.stop_scan();
            engine.dispose();
            log::debug!("detection engine {} disposed", engine.name());
        }
    }

    fn release_preview(&mut self) {
        if let (Some(model), Some(loader)) = (self.preview.take(), self.model_loader.as_mut()) {
            loader.release(model);
        }
    }

    fn begin_scan(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            engine.start_scan();
            self.stale_detection = engine.is_detected();
        }
        self.scan_requested = true;
        self.gate.reset();
        self.transition(SessionState::Scanning);
        self.emit_status(STATUS_SCANNING);
        self.emit_controls(false, false);
    }

    /// Attach the anchor and publish the placement. An anchor failure still
    /// publishes the pose.
    fn place(&mut self, pose: Pose) {
        let anchor = match self.anchors.attach(pose) {
            Ok(handle) => Some(handle),
            Err(err) => {
                log::error!("{:#}", err);
                self.stats.anchor_failures += 1;
                self.outbox.push(SessionEvent::fault(
                    FaultKind::AnchorCreationFailure,
                    format!("{:#}", err),
                ));
                None
            }
        };
        self.last_placement = Some(pose);
        self.outbox.push(SessionEvent::Placement { pose, anchor });
    }

    fn resolve(&mut self) {
        self.transition(SessionState::Resolved);
        self.emit_status(STATUS_DETECTED);
        match self.config.resolution {
            ResolutionMode::SingleShot => {
                self.scan_requested = false;
                if let Some(engine) = self.engine.as_mut() {
                    engine.stop_scan();
                }
                self.emit_controls(true, false);
            }
            ResolutionMode::Continuous => self.emit_controls(false, false),
        }
    }

    fn transition(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        log::info!("session {} -> {}", from, to);
        self.state = to;
        self.outbox.push(SessionEvent::StateChanged { from, to });
    }

    fn emit_status(&mut self, text: impl Into<String>) {
        self.outbox.push(SessionEvent::status(text));
    }

    fn emit_controls(&mut self, scan_enabled: bool, retry_enabled: bool) {
        self.outbox.push(SessionEvent::Controls {
            scan_enabled,
            retry_enabled,
        });
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::InMemoryAnchors;
    use crate::engine::{EngineCall, EngineScript, ScriptedEngine, ScriptedProbe};
    use crate::ingest::{SyntheticCamera, SyntheticCameraConfig};
    use crate::preview::StaticModelLoader;

    const SECOND: u64 = 1_000_000;

    fn controller(script: EngineScript, config: SessionConfig) -> (SessionController, ScriptedProbe) {
        let (factory, probe) = ScriptedEngine::factory(script);
        let camera = SyntheticCamera::new(SyntheticCameraConfig::default());
        let collaborators = SessionCollaborators {
            engine_factory: factory,
            frames: Box::new(camera.clone()),
            intrinsics: Box::new(camera),
            anchors: Box::new(InMemoryAnchors::new()),
            model_loader: Some(Box::new(StaticModelLoader::cube(1.0))),
        };
        (SessionController::new(config, collaborators), probe)
    }

    fn ready(script: EngineScript) -> (SessionController, ScriptedProbe) {
        let config = SessionConfig::default().with_credentials("model", "key");
        let (mut session, probe) = controller(script, config);
        session.activate().unwrap();
        session.tick(0);
        assert_eq!(session.state(), SessionState::Ready);
        (session, probe)
    }

    #[test]
    fn activation_configures_engine_and_requests_preview() {
        let (mut session, probe) = ready(EngineScript::default());
        session.tick(1);

        assert!(probe.calls().contains(&EngineCall::SetConfig {
            model_id: "model".into(),
            access_key: "key".into()
        }));
        assert_eq!(probe.count(|c| *c == EngineCall::RequestPreview), 1);
        let scale = session.preview_model().map(|m| m.scale);
        assert_eq!(scale, Some(0.5));
    }

    #[test]
    fn frames_are_gated_until_scan_starts() {
        let (mut session, probe) = ready(EngineScript::default());
        assert_eq!(
            session.on_camera_frame(0),
            FrameOutcome::Gated(GateDecision::NotScanning)
        );
        assert!(session.start_scan());
        assert!(matches!(
            session.on_camera_frame(0),
            FrameOutcome::Forwarded { .. }
        ));
        assert_eq!(probe.forwarded_frames().len(), 1);
    }

    #[test]
    fn start_scan_is_ignored_while_engine_processing() {
        let (mut session, probe) = ready(EngineScript::default());
        probe.set_processing(true);
        assert!(!session.start_scan());
        assert_eq!(session.state(), SessionState::Ready);

        probe.set_processing(false);
        assert!(session.start_scan());
        assert_eq!(session.state(), SessionState::Scanning);
    }

    #[test]
    fn in_flight_frame_blocks_forwarding() {
        let (mut session, probe) = ready(EngineScript::default());
        session.start_scan();
        probe.set_processing(true);
        assert_eq!(
            session.on_camera_frame(5 * SECOND),
            FrameOutcome::Gated(GateDecision::InFlight)
        );
        probe.set_processing(false);
        assert!(matches!(
            session.on_camera_frame(5 * SECOND),
            FrameOutcome::Forwarded { .. }
        ));
    }

    #[test]
    fn stop_scan_mid_throttle_window_returns_to_ready() {
        let (mut session, probe) = ready(EngineScript::default());
        session.start_scan();
        session.on_camera_frame(0);
        session.stop_scan();

        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(
            session.on_camera_frame(SECOND / 2),
            FrameOutcome::Gated(GateDecision::NotScanning)
        );
        assert_eq!(probe.count(|c| *c == EngineCall::StopScan), 1);
    }

    #[test]
    fn failed_state_refuses_start_scan() {
        let script = EngineScript {
            init_failures: 1,
            failure_message: "license rejected".into(),
            ..EngineScript::default()
        };
        let config = SessionConfig::default().with_credentials("model", "key");
        let (mut session, _) = controller(script, config);
        session.activate().unwrap();
        session.tick(0);

        assert_eq!(session.state(), SessionState::Failed);
        assert!(!session.start_scan());
        assert!(session.activate().is_err());
    }

    #[test]
    fn teardown_is_idempotent() {
        let (mut session, probe) = ready(EngineScript::default());
        session.teardown();
        session.teardown();
        drop(session);
        assert_eq!(probe.count(|c| *c == EngineCall::Dispose), 1);
    }
}
