use std::sync::Arc;

use crate::frame::FrameView;
use crate::intrinsics::Intrinsics;
use crate::pose::Pose;

use super::event::EngineEvents;

/// Detection engine boundary.
///
/// # Contract
///
/// Commands are synchronous calls; results come back as `EngineEvent`s on the
/// channel the engine was constructed with. Implementations:
/// - Report `init` success or failure with `Initialized` / `Failed`, never by
///   panicking or blocking the caller
/// - Treat the frame view as borrowed for the duration of the call only
/// - Make `dispose` idempotent and safe before `init` completed
///
/// The session controller is the only owner of an engine instance.
pub trait DetectionEngine: Send {
    /// Engine identifier.
    fn name(&self) -> &'static str;

    /// Begin asynchronous initialization.
    fn init(&mut self);

    fn set_config(&mut self, model_id: &str, access_key: &str);

    fn start_scan(&mut self);

    fn stop_scan(&mut self);

    /// Hand one camera frame and the camera world pose at capture time.
    fn update_camera_frame(&mut self, frame: FrameView<'_>, camera_pose: &Pose);

    fn update_camera_intrinsics(&mut self, intrinsics: &Intrinsics);

    /// Ask for the preview model location; answered with `PreviewModelUrl`.
    fn request_preview_model(&mut self) {}

    fn is_scanning(&self) -> bool;

    /// A forwarded frame is still being analyzed.
    fn is_processing(&self) -> bool;

    fn is_connected(&self) -> bool;

    fn is_detected(&self) -> bool;

    fn dispose(&mut self);
}

/// Builds an engine wired to the given event sender.
pub type EngineFactory = Arc<dyn Fn(EngineEvents) -> Box<dyn DetectionEngine> + Send + Sync>;
