//! Camera intrinsics and the once-per-session cache.

use serde::{Deserialize, Serialize};

use crate::ingest::IntrinsicsSource;

/// Pinhole camera intrinsics in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
    pub width: u32,
    pub height: u32,
}

impl Intrinsics {
    /// Values the platform sometimes reports before the camera is configured
    /// (zero focal length or resolution) are not usable.
    pub fn is_plausible(&self) -> bool {
        self.fx.is_finite()
            && self.fy.is_finite()
            && self.cx.is_finite()
            && self.cy.is_finite()
            && self.fx > 0.0
            && self.fy > 0.0
            && self.width > 0
            && self.height > 0
    }
}

/// Result of `IntrinsicsCache::ensure`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum IntrinsicsStatus {
    /// Fetched on this call; forward to the engine now.
    Fetched(Intrinsics),
    /// Fetched earlier; nothing to do.
    AlreadyCached,
    /// Fetch failed; try again on the next frame.
    Unavailable,
}

/// Caches intrinsics after the first successful fetch.
///
/// Failed fetches leave the cache empty, so the next frame retries. There is
/// no permanent failure state.
#[derive(Clone, Debug, Default)]
pub struct IntrinsicsCache {
    cached: Option<Intrinsics>,
    failed_attempts: u32,
}

impl IntrinsicsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure(&mut self, source: &mut dyn IntrinsicsSource) -> IntrinsicsStatus {
        if self.cached.is_some() {
            return IntrinsicsStatus::AlreadyCached;
        }
        match source.try_intrinsics() {
            Some(intrinsics) if intrinsics.is_plausible() => {
                log::info!(
                    "camera intrinsics cached after {} failed attempt(s): fx={:.1} fy={:.1} {}x{}",
                    self.failed_attempts,
                    intrinsics.fx,
                    intrinsics.fy,
                    intrinsics.width,
                    intrinsics.height
                );
                self.cached = Some(intrinsics);
                IntrinsicsStatus::Fetched(intrinsics)
            }
            Some(intrinsics) => {
                self.failed_attempts += 1;
                log::warn!("discarding implausible camera intrinsics {:?}", intrinsics);
                IntrinsicsStatus::Unavailable
            }
            None => {
                self.failed_attempts += 1;
                log::warn!(
                    "failed to acquire camera intrinsics (attempt {})",
                    self.failed_attempts
                );
                IntrinsicsStatus::Unavailable
            }
        }
    }

    pub fn cached(&self) -> Option<&Intrinsics> {
        self.cached.as_ref()
    }

    pub fn is_cached(&self) -> bool {
        self.cached.is_some()
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// Start over for a new session.
    pub fn reset(&mut self) {
        self.cached = None;
        self.failed_attempts = 0;
    }
}
