//! Preview model loading and fitting.
//!
//! The renderer side is external. The controller only needs the loaded
//! model's drawable parts (bounds plus an overridable material) to tint the
//! model translucent and scale it to a fixed display size.

use anyhow::{anyhow, Result};
use nalgebra::{Point3, Vector3};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Largest dimension of a fitted preview model, in meters.
pub const DEFAULT_TARGET_SIZE_M: f32 = 0.5;

/// Axis-aligned bounding box in model space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

impl Aabb {
    pub fn new(min: Point3<f32>, max: Point3<f32>) -> Self {
        Self { min, max }
    }

    pub fn from_center_size(center: Point3<f32>, size: Vector3<f32>) -> Self {
        let half = size / 2.0;
        Self::new(center - half, center + half)
    }

    pub fn size(&self) -> Vector3<f32> {
        self.max - self.min
    }

    pub fn largest_dimension(&self) -> f32 {
        self.size().max()
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb::new(self.min.inf(&other.min), self.max.sup(&other.max))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Material {
    /// Material shipped with the model asset.
    Source(String),
    /// Translucent grey used for previews.
    TranslucentPreview,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DrawablePart {
    pub name: String,
    pub bounds: Aabb,
    pub material: Material,
}

/// A loaded preview model.
#[derive(Clone, Debug, PartialEq)]
pub struct PreviewModel {
    pub url: String,
    pub parts: Vec<DrawablePart>,
    /// Uniform display scale.
    pub scale: f32,
}

impl PreviewModel {
    pub fn new(url: impl Into<String>, parts: Vec<DrawablePart>) -> Self {
        Self {
            url: url.into(),
            parts,
            scale: 1.0,
        }
    }

    /// Union of all part bounds; `None` without parts.
    pub fn combined_bounds(&self) -> Option<Aabb> {
        let mut parts = self.parts.iter();
        let first = parts.next()?.bounds;
        Some(parts.fold(first, |acc, part| acc.union(&part.bounds)))
    }
}

/// Apply the preview material to every part and scale the model so its largest
/// dimension equals `target_size`.
///
/// Returns the scale, or `None` when the model has no usable bounds (the
/// model keeps scale 1).
pub fn fit_preview(model: &mut PreviewModel, target_size: f32) -> Option<f32> {
    for part in &mut model.parts {
        part.material = Material::TranslucentPreview;
    }
    model.scale = 1.0;

    let Some(bounds) = model.combined_bounds() else {
        log::warn!("preview model {} has no drawable parts", model.url);
        return None;
    };
    let largest = bounds.largest_dimension();
    if largest <= 0.0 || !largest.is_finite() {
        log::warn!(
            "preview model {} has degenerate bounds (largest dimension {})",
            model.url,
            largest
        );
        return None;
    }
    model.scale = target_size / largest;
    log::debug!(
        "preview model {} fitted: largest dimension {:.3} m, scale {:.3}",
        model.url,
        largest,
        model.scale
    );
    Some(model.scale)
}

/// Renderer-side model loader. The caller owns the returned model and hands
/// it back through `release`.
pub trait ModelLoader {
    fn load(&mut self, url: &str) -> Result<PreviewModel>;

    fn release(&mut self, _model: PreviewModel) {}
}

/// Loader that returns a fixed set of parts for any URL.
#[derive(Clone, Debug)]
pub struct StaticModelLoader {
    parts: Vec<DrawablePart>,
    failure: Option<String>,
    loads: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl StaticModelLoader {
    pub fn new(parts: Vec<DrawablePart>) -> Self {
        Self {
            parts,
            failure: None,
            loads: Arc::new(AtomicUsize::new(0)),
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A single cube part with the given edge length.
    pub fn cube(edge_m: f32) -> Self {
        Self::new(vec![DrawablePart {
            name: "body".to_string(),
            bounds: Aabb::from_center_size(Point3::origin(), Vector3::repeat(edge_m)),
            material: Material::Source("default".to_string()),
        }])
    }

    /// Every load fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::new(Vec::new())
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl ModelLoader for StaticModelLoader {
    fn load(&mut self, url: &str) -> Result<PreviewModel> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(anyhow!("failed to load {}: {}", url, message));
        }
        Ok(PreviewModel::new(url, self.parts.clone()))
    }

    fn release(&mut self, _model: PreviewModel) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}
