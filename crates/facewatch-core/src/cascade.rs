//! Classical cascade face detector (SeetaFace funnel-structured cascade).

use crate::types::BoundingBox;
use rustface::{Detector, ImageData};
use std::path::Path;
use thiserror::Error;

const SCORE_THRESHOLD: f64 = 2.0;
const PYRAMID_SCALE_FACTOR: f32 = 0.8;
const WINDOW_STEP: u32 = 4;

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("cascade model not found: {0}")]
    ModelNotFound(String),
    #[error("failed to load cascade model {path}: {reason}")]
    LoadFailed { path: String, reason: String },
}

/// Size limits applied to raw cascade hits.
#[derive(Debug, Clone, Copy)]
pub struct CascadeLimits {
    pub min_face: u32,
    pub max_face: u32,
}

/// Cascade detector over grayscale frames.
pub struct CascadeDetector {
    inner: Box<dyn Detector>,
    limits: CascadeLimits,
}

impl CascadeDetector {
    pub fn load(model_path: &Path, limits: CascadeLimits) -> Result<Self, CascadeError> {
        if !model_path.exists() {
            return Err(CascadeError::ModelNotFound(model_path.display().to_string()));
        }
        let path = model_path.to_string_lossy();
        let mut inner = rustface::create_detector(&path).map_err(|e| CascadeError::LoadFailed {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        inner.set_min_face_size(limits.min_face);
        inner.set_score_thresh(SCORE_THRESHOLD);
        inner.set_pyramid_scale_factor(PYRAMID_SCALE_FACTOR);
        inner.set_slide_window_step(WINDOW_STEP, WINDOW_STEP);

        tracing::info!(path = %model_path.display(), min_face = limits.min_face, "loaded cascade detector");
        Ok(Self { inner, limits })
    }

    /// Detect faces, dropping hits larger than the configured maximum.
    pub fn detect(&mut self, frame: &[u8], width: u32, height: u32) -> Vec<BoundingBox> {
        if frame.len() < width as usize * height as usize {
            return Vec::new();
        }
        let mut image = ImageData::new(frame, width, height);
        let max = self.limits.max_face;
        self.inner
            .detect(&mut image)
            .into_iter()
            .map(|face| {
                let b = face.bbox();
                BoundingBox::new(b.x() as f32, b.y() as f32, b.width() as f32, b.height() as f32, face.score() as f32)
            })
            .filter(|b| b.width <= max as f32 && b.height <= max as f32)
            .collect()
    }
}
