//! Camera frame handles.
//!
//! - `CameraFrame`: opaque handle to an acquired sensor image. Bytes are private.
//! - `FrameView`: borrowed view the detection engine receives while forwarding.
//!
//! Dropping a `CameraFrame` runs its release hook, which hands the image buffer
//! back to the platform. Because release is tied to ownership, every path that
//! acquires a frame (forwarded, throttled after acquisition, early return)
//! releases it exactly once.

use std::fmt;

use crate::pose::Pose;

type ReleaseHook = Box<dyn FnOnce() + Send>;

// ----------------------------------------------------------------------------
// CameraFrame: acquired sensor image
// ----------------------------------------------------------------------------

/// Acquired camera image. There is no `Clone`: one acquisition, one release.
pub struct CameraFrame {
    /// Private pixel data; only readable through `FrameView`.
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,

    /// Capture time on the session clock.
    pub timestamp_micros: u64,

    /// World pose of the capturing camera at acquisition time.
    pub camera_pose: Pose,

    release: Option<ReleaseHook>,
}

impl CameraFrame {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        timestamp_micros: u64,
        camera_pose: Pose,
    ) -> Self {
        Self {
            data,
            width,
            height,
            timestamp_micros,
            camera_pose,
            release: None,
        }
    }

    /// Attach the platform release callback, run once when the frame drops.
    pub fn with_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    pub fn view(&self) -> FrameView<'_> {
        FrameView { frame: self }
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

impl fmt::Debug for CameraFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp_micros", &self.timestamp_micros)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Drop for CameraFrame {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

// ----------------------------------------------------------------------------
// FrameView: what the engine sees
// ----------------------------------------------------------------------------

/// Borrowed view of a frame. The lifetime keeps engines from holding on to the
/// pixels after `update_camera_frame` returns.
#[derive(Clone, Copy)]
pub struct FrameView<'a> {
    frame: &'a CameraFrame,
}

impl<'a> FrameView<'a> {
    pub fn width(&self) -> u32 {
        self.frame.width
    }

    pub fn height(&self) -> u32 {
        self.frame.height
    }

    pub fn timestamp_micros(&self) -> u64 {
        self.frame.timestamp_micros
    }

    pub fn camera_pose(&self) -> &'a Pose {
        &self.frame.camera_pose
    }

    pub fn pixels(&self) -> &'a [u8] {
        &self.frame.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counted_frame(counter: &Arc<AtomicUsize>) -> CameraFrame {
        let counter = Arc::clone(counter);
        CameraFrame::new(vec![7u8; 12], 4, 3, 1_000, Pose::identity()).with_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn drop_releases_exactly_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let frame = counted_frame(&released);
        assert_eq!(released.load(Ordering::SeqCst), 0);

        drop(frame);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn early_return_still_releases() {
        let released = Arc::new(AtomicUsize::new(0));

        let inspect = |frame: CameraFrame| -> Option<u32> {
            if frame.width < 10 {
                return None;
            }
            Some(frame.width)
        };

        assert_eq!(inspect(counted_frame(&released)), None);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn view_exposes_metadata_and_pixels() {
        let frame = CameraFrame::new(vec![1, 2, 3, 4], 2, 2, 42, Pose::identity());
        let view = frame.view();

        assert_eq!(view.width(), 2);
        assert_eq!(view.height(), 2);
        assert_eq!(view.timestamp_micros(), 42);
        assert_eq!(view.pixels(), &[1, 2, 3, 4]);
        assert_eq!(frame.byte_len(), 4);
    }
}
