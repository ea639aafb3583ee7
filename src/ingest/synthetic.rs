//! Synthetic camera for tests and the demo binary.
//!
//! Produces small gradient images stamped with a steady capture clock and a
//! jittered camera pose. Acquisition misses and intrinsics failures can be
//! scripted to exercise the controller's retry paths.

use nalgebra::{UnitQuaternion, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{FrameSource, IntrinsicsSource};
use crate::frame::CameraFrame;
use crate::intrinsics::Intrinsics;
use crate::pose::Pose;

/// Configuration for a synthetic camera.
#[derive(Clone, Debug)]
pub struct SyntheticCameraConfig {
    pub width: u32,
    pub height: u32,
    /// Capture rate; sets the spacing of frame timestamps.
    pub fps: u32,
    pub intrinsics: Intrinsics,
    /// Seed for pose jitter.
    pub seed: u64,
    /// Maximum per-axis camera position jitter in meters.
    pub pose_jitter_m: f32,
}

impl Default for SyntheticCameraConfig {
    fn default() -> Self {
        Self {
            width: 160,
            height: 120,
            fps: 30,
            intrinsics: Intrinsics {
                fx: 140.0,
                fy: 140.0,
                cx: 80.0,
                cy: 60.0,
                width: 160,
                height: 120,
            },
            seed: 7,
            pose_jitter_m: 0.01,
        }
    }
}

/// Capture statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyntheticStats {
    pub acquisition_attempts: u64,
    pub frames_acquired: u64,
    pub frames_released: u64,
    pub acquisition_misses: u64,
    pub intrinsics_requests: u64,
}

/// Cloneable handle to one synthetic camera. Clones share state, so the same
/// camera can be injected as frame source and intrinsics source while the
/// caller keeps a handle for stats.
#[derive(Clone)]
pub struct SyntheticCamera {
    inner: Arc<Mutex<SyntheticInner>>,
    released: Arc<AtomicU64>,
}

struct SyntheticInner {
    config: SyntheticCameraConfig,
    rng: StdRng,
    attempts: u64,
    acquired: u64,
    misses: u64,
    scripted_misses: BTreeSet<u64>,
    intrinsics_failures_remaining: u32,
    intrinsics_requests: u64,
    scene_state: u8,
}

impl SyntheticCamera {
    pub fn new(config: SyntheticCameraConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            inner: Arc::new(Mutex::new(SyntheticInner {
                config,
                rng,
                attempts: 0,
                acquired: 0,
                misses: 0,
                scripted_misses: BTreeSet::new(),
                intrinsics_failures_remaining: 0,
                intrinsics_requests: 0,
                scene_state: 0,
            })),
            released: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Acquisition attempts (1-based) that report no image.
    pub fn with_acquisition_misses(self, attempts: impl IntoIterator<Item = u64>) -> Self {
        self.lock().scripted_misses.extend(attempts);
        self
    }

    /// Number of intrinsics queries that fail before one succeeds.
    pub fn with_intrinsics_failures(self, failures: u32) -> Self {
        self.lock().intrinsics_failures_remaining = failures;
        self
    }

    pub fn stats(&self) -> SyntheticStats {
        let inner = self.lock();
        SyntheticStats {
            acquisition_attempts: inner.attempts,
            frames_acquired: inner.acquired,
            frames_released: self.released.load(Ordering::SeqCst),
            acquisition_misses: inner.misses,
            intrinsics_requests: inner.intrinsics_requests,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SyntheticInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FrameSource for SyntheticCamera {
    fn try_acquire_latest(&mut self) -> Option<CameraFrame> {
        let mut inner = self.lock();
        inner.attempts += 1;
        let attempt = inner.attempts;
        if inner.scripted_misses.contains(&attempt) {
            inner.misses += 1;
            return None;
        }
        inner.acquired += 1;

        let interval_micros = 1_000_000 / u64::from(inner.config.fps.max(1));
        let timestamp_micros = (attempt - 1) * interval_micros;
        let pixels = inner.generate_pixels();
        let pose = inner.jittered_pose();
        let (width, height) = (inner.config.width, inner.config.height);
        drop(inner);

        let released = Arc::clone(&self.released);
        Some(
            CameraFrame::new(pixels, width, height, timestamp_micros, pose).with_release(
                move || {
                    released.fetch_add(1, Ordering::SeqCst);
                },
            ),
        )
    }
}

impl IntrinsicsSource for SyntheticCamera {
    fn try_intrinsics(&mut self) -> Option<Intrinsics> {
        let mut inner = self.lock();
        inner.intrinsics_requests += 1;
        if inner.intrinsics_failures_remaining > 0 {
            inner.intrinsics_failures_remaining -= 1;
            return None;
        }
        Some(inner.config.intrinsics)
    }
}

impl SyntheticInner {
    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.config.width * self.config.height) as usize;
        if self.acquired % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        (0..pixel_count)
            .map(|i| ((i as u64 + self.acquired + self.scene_state as u64) % 256) as u8)
            .collect()
    }

    fn jittered_pose(&mut self) -> Pose {
        let jitter = self.config.pose_jitter_m.abs();
        let mut offset = || {
            if jitter > 0.0 {
                self.rng.gen_range(-jitter..=jitter)
            } else {
                0.0
            }
        };
        let position = Vector3::new(offset(), 1.4 + offset(), offset());
        let yaw = self.rng.gen_range(-0.05f32..=0.05);
        Pose::new(position, UnitQuaternion::from_euler_angles(0.0, yaw, 0.0))
    }
}
