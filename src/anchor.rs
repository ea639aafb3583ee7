//! World anchor management.
//!
//! The anchor manager owns at most one live anchor. Attaching a new one
//! destroys the previous anchor first, so two anchors for the same physical
//! object never coexist. Creation can fail when the platform's anchoring
//! subsystem is unavailable; the caller still gets the decoded pose and
//! decides how to report the missing anchor.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::pose::Pose;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AnchorId(pub u64);

/// The live anchor and the pose it was created at.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct AnchorHandle {
    pub id: AnchorId,
    pub pose: Pose,
}

/// Platform anchoring subsystem.
pub trait AnchorSystem {
    fn create_anchor(&mut self, pose: &Pose) -> Result<AnchorId>;

    /// Release an anchor. Must tolerate ids it no longer knows.
    fn destroy_anchor(&mut self, id: AnchorId);
}

/// Owns the single active anchor.
pub struct AnchorManager {
    system: Box<dyn AnchorSystem>,
    current: Option<AnchorHandle>,
}

impl AnchorManager {
    pub fn new(system: Box<dyn AnchorSystem>) -> Self {
        Self {
            system,
            current: None,
        }
    }

    /// Replace the current anchor with one at `pose`.
    ///
    /// The previous anchor is destroyed before creation is attempted, so on
    /// failure no anchor is live.
    pub fn attach(&mut self, pose: Pose) -> Result<AnchorHandle> {
        if let Some(previous) = self.current.take() {
            log::debug!("destroying anchor {:?}", previous.id);
            self.system.destroy_anchor(previous.id);
        }
        let id = self
            .system
            .create_anchor(&pose)
            .context("failed to create anchor at detected position")?;
        let handle = AnchorHandle { id, pose };
        self.current = Some(handle);
        log::info!("anchor {:?} created at detected position", id);
        Ok(handle)
    }

    pub fn current(&self) -> Option<&AnchorHandle> {
        self.current.as_ref()
    }

    /// Destroy the current anchor, if any. Safe to call repeatedly.
    pub fn release(&mut self) {
        if let Some(previous) = self.current.take() {
            log::debug!("releasing anchor {:?}", previous.id);
            self.system.destroy_anchor(previous.id);
        }
    }
}

impl Drop for AnchorManager {
    fn drop(&mut self) {
        self.release();
    }
}

// ----------------------------------------------------------------------------
// InMemoryAnchors: reference anchoring subsystem
// ----------------------------------------------------------------------------

/// One call into the anchoring subsystem, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnchorOp {
    Create(AnchorId),
    CreateFailed,
    Destroy(AnchorId),
}

/// Most recent operations kept by an `InMemoryAnchors` ledger.
pub const ANCHOR_LOG_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct AnchorLedger {
    next_id: u64,
    live: BTreeSet<AnchorId>,
    ops: VecDeque<AnchorOp>,
    unavailable: bool,
}

impl AnchorLedger {
    fn log(&mut self, op: AnchorOp) {
        if self.ops.len() == ANCHOR_LOG_CAPACITY {
            self.ops.pop_front();
        }
        self.ops.push_back(op);
    }
}

/// In-memory anchoring subsystem. Clones share one ledger, so a clone kept by
/// the caller observes what the manager did with the boxed original.
#[derive(Clone, Debug, Default)]
pub struct InMemoryAnchors {
    ledger: Arc<Mutex<AnchorLedger>>,
}

impl InMemoryAnchors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the subsystem going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.lock().unavailable = !available;
    }

    pub fn live(&self) -> Vec<AnchorId> {
        self.lock().live.iter().copied().collect()
    }

    pub fn ops(&self) -> Vec<AnchorOp> {
        self.lock().ops.iter().copied().collect()
    }

    fn lock(&self) -> MutexGuard<'_, AnchorLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AnchorSystem for InMemoryAnchors {
    fn create_anchor(&mut self, _pose: &Pose) -> Result<AnchorId> {
        let mut ledger = self.lock();
        if ledger.unavailable {
            ledger.log(AnchorOp::CreateFailed);
            return Err(anyhow!("anchoring subsystem unavailable"));
        }
        ledger.next_id += 1;
        let id = AnchorId(ledger.next_id);
        ledger.live.insert(id);
        ledger.log(AnchorOp::Create(id));
        Ok(id)
    }

    fn destroy_anchor(&mut self, id: AnchorId) {
        let mut ledger = self.lock();
        if ledger.live.remove(&id) {
            ledger.log(AnchorOp::Destroy(id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn pose_at(x: f32) -> Pose {
        Pose::new(Vector3::new(x, 0.0, 0.0), Default::default())
    }

    #[test]
    fn second_attach_destroys_first_before_creating() {
        let anchors = InMemoryAnchors::new();
        let mut manager = AnchorManager::new(Box::new(anchors.clone()));

        let first = manager.attach(pose_at(1.0)).unwrap();
        let second = manager.attach(pose_at(2.0)).unwrap();

        assert_eq!(anchors.live(), vec![second.id]);
        assert_eq!(
            anchors.ops(),
            vec![
                AnchorOp::Create(first.id),
                AnchorOp::Destroy(first.id),
                AnchorOp::Create(second.id),
            ]
        );
        assert_eq!(manager.current().map(|h| h.pose.position.x), Some(2.0));
    }

    #[test]
    fn failed_creation_leaves_no_anchor() {
        let anchors = InMemoryAnchors::new();
        let mut manager = AnchorManager::new(Box::new(anchors.clone()));
        manager.attach(pose_at(1.0)).unwrap();

        anchors.set_available(false);
        let err = manager.attach(pose_at(2.0)).unwrap_err();

        assert!(err.to_string().contains("failed to create anchor"));
        assert!(manager.current().is_none());
        assert!(anchors.live().is_empty());
    }

    #[test]
    fn release_is_idempotent_and_runs_on_drop() {
        let anchors = InMemoryAnchors::new();
        let mut manager = AnchorManager::new(Box::new(anchors.clone()));
        manager.attach(pose_at(1.0)).unwrap();

        manager.release();
        manager.release();
        assert!(anchors.live().is_empty());

        manager.attach(pose_at(3.0)).unwrap();
        drop(manager);
        assert!(anchors.live().is_empty());
    }

    #[test]
    fn operation_log_is_bounded() {
        let anchors = InMemoryAnchors::new();
        let mut manager = AnchorManager::new(Box::new(anchors.clone()));
        for i in 0..ANCHOR_LOG_CAPACITY {
            manager.attach(pose_at(i as f32)).unwrap();
        }

        let ops = anchors.ops();
        assert_eq!(ops.len(), ANCHOR_LOG_CAPACITY);
        assert_eq!(anchors.live().len(), 1);
        assert!(matches!(ops.last(), Some(AnchorOp::Create(_))));
    }
}
