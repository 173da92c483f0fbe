//! Face matching strategies.
//!
//! A [`FaceMatcher`] turns a grayscale frame into detections with descriptors;
//! its [`IdentityMetric`] decides whether a descriptor is authorized and
//! whether two descriptors belong to the same person. Two strategies exist:
//! SCRFD + ArcFace embeddings, and cascade detection + binary local features.

use crate::cascade::{CascadeDetector, CascadeError, CascadeLimits};
use crate::detector::{DetectorError, FaceDetector};
use crate::features::{self, FeatureSet};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Detection, Embedding};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatcherError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("cascade: {0}")]
    Cascade(#[from] CascadeError),
}

/// Which strategy produced a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Embedding,
    Features,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::Embedding => "embedding",
            Backend::Features => "features",
        })
    }
}

/// Similarity rules over one descriptor type.
pub trait IdentityMetric {
    type Descriptor: Clone + fmt::Debug;

    /// True if `probe` matches any member of `authorized`. An empty set never matches.
    fn is_authorized(&self, probe: &Self::Descriptor, authorized: &[Self::Descriptor]) -> bool;

    /// True if `probe` and `known` are close enough to be the same unknown person.
    fn same_identity(&self, probe: &Self::Descriptor, known: &Self::Descriptor) -> bool;
}

/// Descriptor type produced by a matcher.
pub type DescriptorOf<M> = <<M as FaceMatcher>::Metric as IdentityMetric>::Descriptor;

/// Detection + description strategy, chosen once at startup.
pub trait FaceMatcher {
    type Metric: IdentityMetric;

    fn backend(&self) -> Backend;

    fn metric(&self) -> &Self::Metric;

    /// Detect faces in a live frame and describe every region that passes the
    /// shape filter. Regions whose description fails are left out.
    fn detect_and_describe(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Vec<Detection<<Self::Metric as IdentityMetric>::Descriptor>>;

    /// Describe the largest face of a reference still, without the live-frame
    /// shape filter.
    fn describe_reference(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Option<<Self::Metric as IdentityMetric>::Descriptor>;
}

/// Shape constraints that reject non-face-shaped detections. Bounds are exclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionFilter {
    pub min_aspect: f32,
    pub max_aspect: f32,
    pub min_area: f32,
    pub max_area: Option<f32>,
    pub min_side: f32,
}

impl RegionFilter {
    /// Limits for SCRFD detections.
    pub const EMBEDDING: Self = Self {
        min_aspect: 0.6,
        max_aspect: 1.4,
        min_area: 2000.0,
        max_area: Some(120_000.0),
        min_side: 40.0,
    };

    /// Limits for cascade detections.
    pub const FEATURES: Self = Self {
        min_aspect: 0.6,
        max_aspect: 1.5,
        min_area: 2500.0,
        max_area: None,
        min_side: 0.0,
    };

    pub fn accepts(&self, region: &BoundingBox) -> bool {
        let aspect = region.aspect_ratio();
        let area = region.area();
        aspect > self.min_aspect
            && aspect < self.max_aspect
            && area > self.min_area
            && self.max_area.map_or(true, |max| area < max)
            && region.width > self.min_side
            && region.height > self.min_side
    }
}

fn largest(regions: Vec<BoundingBox>) -> Option<BoundingBox> {
    regions.into_iter().max_by(|a, b| a.area().total_cmp(&b.area()))
}

// --- Embedding strategy ---

/// ArcFace cosine similarity above which a face matches the authorized set.
pub const AUTHORIZED_COSINE: f32 = 0.40;
/// ArcFace cosine similarity above which two unknown faces are one person.
pub const SAME_IDENTITY_COSINE: f32 = 0.45;

/// Euclidean distance between two unit vectors with cosine similarity `cos`.
///
/// `d = sqrt(2 - 2·cos)`, so `d < distance_for_cosine(c)` exactly when the
/// similarity exceeds `c`.
pub fn distance_for_cosine(cos: f32) -> f32 {
    (2.0 - 2.0 * cos.clamp(-1.0, 1.0)).sqrt()
}

/// Euclidean-distance rules over L2-normalised embeddings.
///
/// Defaults are calibrated for ArcFace, where genuine pairs sit around
/// cosine 0.5 to 0.8. The 0.65 / 0.6 distances used with 128-d dlib
/// embeddings would reject most genuine ArcFace pairs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmbeddingMetric {
    pub authorized_distance: f32,
    pub same_identity_distance: f32,
}

impl Default for EmbeddingMetric {
    fn default() -> Self {
        Self {
            authorized_distance: distance_for_cosine(AUTHORIZED_COSINE),
            same_identity_distance: distance_for_cosine(SAME_IDENTITY_COSINE),
        }
    }
}

impl IdentityMetric for EmbeddingMetric {
    type Descriptor = Embedding;

    fn is_authorized(&self, probe: &Embedding, authorized: &[Embedding]) -> bool {
        let closest = authorized
            .iter()
            .map(|a| probe.euclidean_distance(a))
            .fold(f32::INFINITY, f32::min);
        closest < self.authorized_distance
    }

    fn same_identity(&self, probe: &Embedding, known: &Embedding) -> bool {
        probe.euclidean_distance(known) < self.same_identity_distance
    }
}

/// SCRFD detection + ArcFace embeddings.
pub struct EmbeddingMatcher {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    filter: RegionFilter,
    metric: EmbeddingMetric,
}

impl EmbeddingMatcher {
    pub fn load(scrfd_path: &Path, arcface_path: &Path, metric: EmbeddingMetric) -> Result<Self, MatcherError> {
        Ok(Self {
            detector: FaceDetector::load(scrfd_path)?,
            recognizer: FaceRecognizer::load(arcface_path)?,
            filter: RegionFilter::EMBEDDING,
            metric,
        })
    }

    fn detect(&mut self, frame: &[u8], width: u32, height: u32) -> Vec<BoundingBox> {
        self.detector.detect(frame, width, height).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "SCRFD detection failed; treating frame as empty");
            Vec::new()
        })
    }

    fn embed(&mut self, frame: &[u8], width: u32, height: u32, region: &BoundingBox) -> Option<Embedding> {
        self.recognizer
            .extract(frame, width, height, region)
            .map_err(|e| tracing::debug!(error = %e, "dropping region without embedding"))
            .ok()
    }
}

impl FaceMatcher for EmbeddingMatcher {
    type Metric = EmbeddingMetric;

    fn backend(&self) -> Backend {
        Backend::Embedding
    }

    fn metric(&self) -> &EmbeddingMetric {
        &self.metric
    }

    fn detect_and_describe(&mut self, frame: &[u8], width: u32, height: u32) -> Vec<Detection<Embedding>> {
        let filter = self.filter;
        self.detect(frame, width, height)
            .into_iter()
            .filter(|region| filter.accepts(region))
            .filter_map(|region| {
                let descriptor = self.embed(frame, width, height, &region)?;
                Some(Detection { region, descriptor })
            })
            .collect()
    }

    fn describe_reference(&mut self, frame: &[u8], width: u32, height: u32) -> Option<Embedding> {
        let face = largest(self.detect(frame, width, height))?;
        self.embed(frame, width, height, &face)
    }
}

// --- Feature-descriptor strategy ---

/// Mutual-match ratio rules over binary feature sets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureMetric {
    /// Hamming distance below which a mutual match counts as good.
    pub max_match_distance: u32,
    pub authorized_ratio: f32,
    pub same_identity_ratio: f32,
}

impl Default for FeatureMetric {
    fn default() -> Self {
        Self {
            max_match_distance: 60,
            authorized_ratio: 0.15,
            same_identity_ratio: 0.35,
        }
    }
}

impl FeatureMetric {
    pub fn ratio(&self, a: &FeatureSet, b: &FeatureSet) -> f32 {
        features::match_ratio(a, b, self.max_match_distance)
    }
}

impl IdentityMetric for FeatureMetric {
    type Descriptor = FeatureSet;

    fn is_authorized(&self, probe: &FeatureSet, authorized: &[FeatureSet]) -> bool {
        let best = authorized.iter().map(|a| self.ratio(a, probe)).fold(0.0, f32::max);
        best > self.authorized_ratio
    }

    fn same_identity(&self, probe: &FeatureSet, known: &FeatureSet) -> bool {
        self.ratio(known, probe) > self.same_identity_ratio
    }
}

/// Cascade detection + binary local features on a normalised 200×200 patch.
pub struct FeatureMatcher {
    cascade: CascadeDetector,
    filter: RegionFilter,
    metric: FeatureMetric,
}

impl FeatureMatcher {
    pub const LIMITS: CascadeLimits = CascadeLimits { min_face: 50, max_face: 500 };

    pub fn load(cascade_path: &Path, metric: FeatureMetric) -> Result<Self, MatcherError> {
        Ok(Self {
            cascade: CascadeDetector::load(cascade_path, Self::LIMITS)?,
            filter: RegionFilter::FEATURES,
            metric,
        })
    }

    fn describe(frame: &[u8], width: u32, height: u32, region: &BoundingBox) -> Option<FeatureSet> {
        let rect = region.clip_to(width, height)?;
        let described = features::describe_region(frame, width, height, rect);
        if described.is_none() {
            tracing::debug!(?rect, "dropping region without keypoints");
        }
        described
    }
}

impl FaceMatcher for FeatureMatcher {
    type Metric = FeatureMetric;

    fn backend(&self) -> Backend {
        Backend::Features
    }

    fn metric(&self) -> &FeatureMetric {
        &self.metric
    }

    fn detect_and_describe(&mut self, frame: &[u8], width: u32, height: u32) -> Vec<Detection<FeatureSet>> {
        self.cascade
            .detect(frame, width, height)
            .into_iter()
            .filter(|region| self.filter.accepts(region))
            .filter_map(|region| {
                let descriptor = Self::describe(frame, width, height, &region)?;
                Some(Detection { region, descriptor })
            })
            .collect()
    }

    fn describe_reference(&mut self, frame: &[u8], width: u32, height: u32) -> Option<FeatureSet> {
        let face = largest(self.cascade.detect(frame, width, height))?;
        Self::describe(frame, width, height, &face)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::tests::blocks_patch;

    fn bbox(w: f32, h: f32) -> BoundingBox {
        BoundingBox::new(0.0, 0.0, w, h, 1.0)
    }

    #[test]
    fn test_embedding_filter_bounds() {
        let f = RegionFilter::EMBEDDING;
        assert!(f.accepts(&bbox(100.0, 100.0)));
        // aspect too wide / too tall
        assert!(!f.accepts(&bbox(150.0, 100.0)));
        assert!(!f.accepts(&bbox(60.0, 100.0)));
        // tiny
        assert!(!f.accepts(&bbox(40.0, 45.0)));
        // area above 120000
        assert!(!f.accepts(&bbox(360.0, 350.0)));
        // side must exceed 40 even when area passes
        assert!(!f.accepts(&bbox(40.0, 55.0)));
    }

    #[test]
    fn test_feature_filter_bounds() {
        let f = RegionFilter::FEATURES;
        assert!(f.accepts(&bbox(60.0, 60.0)));
        assert!(f.accepts(&bbox(700.0, 700.0)));
        assert!(!f.accepts(&bbox(50.0, 50.0))); // area == 2500 is not > 2500
        assert!(!f.accepts(&bbox(150.0, 100.0)));
        assert!(f.accepts(&bbox(140.0, 100.0)));
    }

    /// Unit vector at cosine `cos` from `[1, 0]`.
    fn at_cosine(cos: f32) -> Embedding {
        Embedding::new(vec![cos, (1.0 - cos * cos).sqrt()])
    }

    #[test]
    fn test_cosine_distance_mapping() {
        assert!((distance_for_cosine(1.0)).abs() < 1e-6);
        assert!((distance_for_cosine(0.0) - 2f32.sqrt()).abs() < 1e-6);
        assert!((distance_for_cosine(-1.0) - 2.0).abs() < 1e-6);
        assert!((distance_for_cosine(0.40) - 1.0954).abs() < 1e-3);

        let a = Embedding::new(vec![1.0, 0.0]);
        for cos in [0.9, 0.6, 0.4, 0.1] {
            let d = a.euclidean_distance(&at_cosine(cos));
            assert!((d - distance_for_cosine(cos)).abs() < 1e-5, "cos {cos}: {d}");
        }

        let m = EmbeddingMetric::default();
        assert!((m.authorized_distance - distance_for_cosine(AUTHORIZED_COSINE)).abs() < 1e-6);
        assert!(m.same_identity_distance < m.authorized_distance);
    }

    #[test]
    fn test_embedding_metric_thresholds() {
        let m = EmbeddingMetric::default();
        let a = Embedding::new(vec![1.0, 0.0]);
        let genuine = at_cosine(0.6); // distance ~0.894
        let borderline = at_cosine(0.42); // distance ~1.077
        let impostor = at_cosine(0.2);
        let far = Embedding::new(vec![0.0, 1.0]);

        assert!(m.is_authorized(&genuine, &[far.clone(), a.clone()]));
        assert!(m.is_authorized(&borderline, &[a.clone()]));
        assert!(!m.is_authorized(&impostor, &[a.clone()]));
        assert!(!m.is_authorized(&far, &[a.clone()]));
        assert!(m.same_identity(&genuine, &a));
        assert!(!m.same_identity(&borderline, &a));
    }

    #[test]
    fn test_empty_authorized_set_never_matches() {
        let e = Embedding::new(vec![1.0, 0.0]);
        assert!(!EmbeddingMetric::default().is_authorized(&e, &[]));

        let f = features::extract(&blocks_patch(1)).unwrap();
        assert!(!FeatureMetric::default().is_authorized(&f, &[]));
    }

    #[test]
    fn test_feature_metric_thresholds() {
        let m = FeatureMetric::default();
        let a = features::extract(&blocks_patch(11)).unwrap();
        let b = features::extract(&blocks_patch(12)).unwrap();

        assert!(m.is_authorized(&a, &[b.clone(), a.clone()]));
        assert!(m.same_identity(&a, &a));

        // A stricter metric rejects everything.
        let strict = FeatureMetric { authorized_ratio: 1.0, same_identity_ratio: 1.0, ..m };
        assert!(!strict.is_authorized(&a, &[a.clone()]));
        assert!(!strict.same_identity(&a, &a));
    }

    #[test]
    fn test_largest_picks_max_area() {
        let picked = largest(vec![bbox(10.0, 10.0), bbox(30.0, 20.0), bbox(20.0, 20.0)]).unwrap();
        assert_eq!((picked.width, picked.height), (30.0, 20.0));
        assert!(largest(Vec::new()).is_none());
    }

    #[test]
    fn test_backend_display() {
        assert_eq!(Backend::Embedding.to_string(), "embedding");
        assert_eq!(Backend::Features.to_string(), "features");
    }
}
