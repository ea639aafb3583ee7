//! Camera frame and intrinsics sources.
//!
//! The session controller receives these at construction; it never looks up
//! a camera on its own. Platform integrations implement the two traits:
//! - `FrameSource`: acquire the latest CPU image, if one is ready
//! - `IntrinsicsSource`: query the camera intrinsics, if known yet
//!
//! `SyntheticCamera` implements both for tests and the demo binary.
//!
//! Sources are responsible for:
//! - Stamping frames with the capture time and the camera world pose
//! - Attaching a release hook so the platform buffer returns on drop
//!
//! Sources MUST NOT:
//! - Block waiting for a frame (a miss is reported as `None`)
//! - Retain frames after handing them out

pub mod synthetic;

pub use synthetic::{SyntheticCamera, SyntheticCameraConfig, SyntheticStats};

use crate::frame::CameraFrame;
use crate::intrinsics::Intrinsics;

/// Source of camera frames.
pub trait FrameSource {
    /// Acquire the most recent image. `None` means no image was ready; it is
    /// not an error.
    fn try_acquire_latest(&mut self) -> Option<CameraFrame>;
}

/// Source of camera intrinsics.
pub trait IntrinsicsSource {
    fn try_intrinsics(&mut self) -> Option<Intrinsics>;
}
