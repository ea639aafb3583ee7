//! Tick-driven preview overlay animation.
//!
//! Each overlay runs fade-in, hold, fade-out, then lingers for a grace period
//! before it is removed. Fade steps advance once per tick, so fade duration
//! follows the host frame rate; hold and grace are wall-clock.
//!
//! Overlays are independent. A new detection spawns a new overlay even while
//! earlier ones are still animating.

use serde::Serialize;
use std::time::Duration;

use crate::pose::Pose;

/// Grey tint of the translucent preview model.
pub const PREVIEW_TINT: [f32; 3] = [0.5, 0.5, 0.5];

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FadeSettings {
    /// Ticks in each of fade-in and fade-out.
    pub steps: u32,
    /// Alpha change per step.
    pub increment: f32,
    pub hold: Duration,
    /// Delay between the end of fade-out and removal.
    pub grace: Duration,
}

impl Default for FadeSettings {
    fn default() -> Self {
        Self {
            steps: 15,
            increment: 0.03,
            hold: Duration::from_secs(1),
            grace: Duration::from_secs(5),
        }
    }
}

impl FadeSettings {
    /// Alpha after `step` fade-in steps.
    pub fn alpha_at(&self, step: u32) -> f32 {
        (step as f32 * self.increment).clamp(0.0, 1.0)
    }

    pub fn peak_alpha(&self) -> f32 {
        self.alpha_at(self.steps)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct OverlayId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlayPhase {
    /// `step` fade-in steps done.
    FadingIn { step: u32 },
    Holding,
    /// `step` fade-out steps done.
    FadingOut { step: u32 },
    Lingering,
    Finished,
}

#[derive(Clone, Debug, PartialEq)]
pub enum OverlayUpdate {
    Alpha { id: OverlayId, color: [f32; 4] },
    Removed { id: OverlayId },
}

#[derive(Clone, Debug)]
struct Overlay {
    id: OverlayId,
    pose: Pose,
    phase: OverlayPhase,
    /// Start of the current wall-clock phase (hold or grace).
    phase_started_micros: u64,
}

/// Advances all live overlays once per tick.
#[derive(Clone, Debug)]
pub struct OverlayAnimator {
    settings: FadeSettings,
    next_id: u64,
    overlays: Vec<Overlay>,
}

impl OverlayAnimator {
    pub fn new(settings: FadeSettings) -> Self {
        Self {
            settings,
            next_id: 0,
            overlays: Vec::new(),
        }
    }

    pub fn settings(&self) -> &FadeSettings {
        &self.settings
    }

    /// Start a new overlay at `pose`. The first fade-in step is applied by
    /// the first `tick` call after the spawn, which may carry the same
    /// timestamp.
    pub fn spawn(&mut self, pose: Pose, now_micros: u64) -> OverlayId {
        self.next_id += 1;
        let id = OverlayId(self.next_id);
        self.overlays.push(Overlay {
            id,
            pose,
            phase: OverlayPhase::FadingIn { step: 0 },
            phase_started_micros: now_micros,
        });
        log::debug!("overlay {:?} spawned", id);
        id
    }

    pub fn tick(&mut self, now_micros: u64) -> Vec<OverlayUpdate> {
        let settings = self.settings;
        let mut updates = Vec::new();
        for overlay in &mut self.overlays {
            if let Some(alpha) = overlay.advance(&settings, now_micros) {
                updates.push(OverlayUpdate::Alpha {
                    id: overlay.id,
                    color: tinted(alpha),
                });
            }
            if overlay.phase == OverlayPhase::Finished {
                updates.push(OverlayUpdate::Removed { id: overlay.id });
            }
        }
        self.overlays
            .retain(|overlay| overlay.phase != OverlayPhase::Finished);
        updates
    }

    pub fn phase(&self, id: OverlayId) -> Option<OverlayPhase> {
        self.find(id).map(|overlay| overlay.phase)
    }

    pub fn pose(&self, id: OverlayId) -> Option<&Pose> {
        self.find(id).map(|overlay| &overlay.pose)
    }

    pub fn active(&self) -> usize {
        self.overlays.len()
    }

    /// Drop every overlay immediately, returning the removed ids.
    pub fn clear(&mut self) -> Vec<OverlayId> {
        self.overlays.drain(..).map(|overlay| overlay.id).collect()
    }

    fn find(&self, id: OverlayId) -> Option<&Overlay> {
        self.overlays.iter().find(|overlay| overlay.id == id)
    }
}

impl Overlay {
    /// Advance one tick; returns the new alpha when it changed.
    fn advance(&mut self, settings: &FadeSettings, now_micros: u64) -> Option<f32> {
        match self.phase {
            OverlayPhase::FadingIn { step } => {
                let step = step + 1;
                if step >= settings.steps {
                    self.phase = OverlayPhase::Holding;
                    self.phase_started_micros = now_micros;
                } else {
                    self.phase = OverlayPhase::FadingIn { step };
                }
                Some(settings.alpha_at(step))
            }
            OverlayPhase::Holding => {
                if !elapsed(self.phase_started_micros, now_micros, settings.hold) {
                    return None;
                }
                self.phase = OverlayPhase::FadingOut { step: 0 };
                self.advance(settings, now_micros)
            }
            OverlayPhase::FadingOut { step } => {
                let step = step + 1;
                if step >= settings.steps {
                    self.phase = OverlayPhase::Lingering;
                    self.phase_started_micros = now_micros;
                } else {
                    self.phase = OverlayPhase::FadingOut { step };
                }
                Some(settings.alpha_at(settings.steps.saturating_sub(step)))
            }
            OverlayPhase::Lingering => {
                if elapsed(self.phase_started_micros, now_micros, settings.grace) {
                    self.phase = OverlayPhase::Finished;
                }
                None
            }
            OverlayPhase::Finished => None,
        }
    }
}

fn elapsed(since_micros: u64, now_micros: u64, period: Duration) -> bool {
    let period = u64::try_from(period.as_micros()).unwrap_or(u64::MAX);
    now_micros.saturating_sub(since_micros) >= period
}

fn tinted(alpha: f32) -> [f32; 4] {
    [PREVIEW_TINT[0], PREVIEW_TINT[1], PREVIEW_TINT[2], alpha]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const TICK: u64 = 16_667;
    const SECOND: u64 = 1_000_000;

    fn alphas(updates: &[OverlayUpdate]) -> Vec<f32> {
        updates
            .iter()
            .filter_map(|u| match u {
                OverlayUpdate::Alpha { color, .. } => Some(color[3]),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn fades_in_over_fifteen_ticks_then_holds() {
        let mut animator = OverlayAnimator::new(FadeSettings::default());
        let id = animator.spawn(Pose::identity(), 0);

        let mut now = 0;
        let mut seen = Vec::new();
        for _ in 0..15 {
            now += TICK;
            seen.extend(alphas(&animator.tick(now)));
        }

        assert_eq!(seen.len(), 15);
        assert_relative_eq!(seen[0], 0.03, epsilon = 1e-6);
        assert_relative_eq!(seen[14], 0.45, epsilon = 1e-6);
        assert_eq!(animator.phase(id), Some(OverlayPhase::Holding));

        // Still holding just before one second has passed.
        assert!(animator.tick(now + SECOND - 1).is_empty());
        assert_eq!(animator.phase(id), Some(OverlayPhase::Holding));
    }

    #[test]
    fn full_lifecycle_ends_with_removal_after_grace() {
        let settings = FadeSettings::default();
        let mut animator = OverlayAnimator::new(settings);
        let id = animator.spawn(Pose::identity(), 0);

        let mut now = 0;
        for _ in 0..15 {
            now += TICK;
            animator.tick(now);
        }
        let hold_started = now;

        now = hold_started + SECOND;
        let first_out = alphas(&animator.tick(now));
        assert_eq!(first_out.len(), 1);
        assert_relative_eq!(first_out[0], 0.42, epsilon = 1e-6);

        let mut last = first_out[0];
        for _ in 0..14 {
            now += TICK;
            last = alphas(&animator.tick(now))[0];
        }
        assert_relative_eq!(last, 0.0, epsilon = 1e-6);
        assert_eq!(animator.phase(id), Some(OverlayPhase::Lingering));

        let fade_out_done = now;
        assert!(animator.tick(fade_out_done + 5 * SECOND - 1).is_empty());
        assert_eq!(
            animator.tick(fade_out_done + 5 * SECOND),
            vec![OverlayUpdate::Removed { id }]
        );
        assert_eq!(animator.active(), 0);
        assert_eq!(animator.phase(id), None);
    }

    #[test]
    fn overlapping_overlays_run_independently() {
        let mut animator = OverlayAnimator::new(FadeSettings::default());
        let first = animator.spawn(Pose::identity(), 0);
        animator.tick(TICK);
        animator.tick(2 * TICK);
        let second = animator.spawn(Pose::identity(), 2 * TICK);

        animator.tick(3 * TICK);
        assert_eq!(animator.phase(first), Some(OverlayPhase::FadingIn { step: 3 }));
        assert_eq!(animator.phase(second), Some(OverlayPhase::FadingIn { step: 1 }));
        assert_eq!(animator.active(), 2);
    }

    #[test]
    fn tick_at_spawn_time_applies_first_step() {
        let mut animator = OverlayAnimator::new(FadeSettings::default());
        let id = animator.spawn(Pose::identity(), 5 * TICK);
        assert_eq!(animator.phase(id), Some(OverlayPhase::FadingIn { step: 0 }));

        assert_eq!(alphas(&animator.tick(5 * TICK)).len(), 1);
        assert_eq!(animator.phase(id), Some(OverlayPhase::FadingIn { step: 1 }));
    }

    #[test]
    fn overlays_use_grey_tint() {
        let mut animator = OverlayAnimator::new(FadeSettings::default());
        let id = animator.spawn(Pose::identity(), 0);
        match animator.tick(TICK).as_slice() {
            [OverlayUpdate::Alpha { id: got, color }] => {
                assert_eq!(*got, id);
                assert_eq!(&color[..3], &PREVIEW_TINT);
            }
            other => panic!("unexpected updates {:?}", other),
        }
    }

    #[test]
    fn clear_returns_live_ids() {
        let mut animator = OverlayAnimator::new(FadeSettings::default());
        let a = animator.spawn(Pose::identity(), 0);
        let b = animator.spawn(Pose::identity(), 0);
        assert_eq!(animator.clear(), vec![a, b]);
        assert_eq!(animator.active(), 0);
    }
}
