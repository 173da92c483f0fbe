//! Binary local features for the classical matching backend.
//!
//! Face crops are normalised to a 200×200 patch, FAST-9 corners are kept
//! after non-maximum suppression, each corner gets an intensity-centroid
//! orientation, and a steered 256-bit BRIEF descriptor is sampled from the
//! smoothed patch. Matching is brute-force Hamming with a mutual
//! nearest-neighbour check.

use crate::types::PixelRect;
use image::imageops::{self, FilterType};
use image::GrayImage;
use imageproc::corners::corners_fast9;
use imageproc::filter::gaussian_blur_f32;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::OnceLock;

/// Side of the normalised face patch.
pub const PATCH_SIZE: u32 = 200;
pub const MAX_KEYPOINTS: usize = 500;
const FAST_THRESHOLD: u8 = 20;
/// Radius of the orientation moment window.
const ORIENTATION_RADIUS: i32 = 15;
/// Half-extent of the BRIEF sampling square.
const PATTERN_EXTENT: i32 = 13;
/// Keypoints closer than this to the patch edge cannot be described.
const BORDER: u32 = 22;
const DESCRIPTOR_BITS: usize = 256;
const PATTERN_SEED: u64 = 0x5EED_0B1F;

/// Packed 256-bit binary descriptor.
pub type BinaryDescriptor = [u8; DESCRIPTOR_BITS / 8];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: u32,
    pub y: u32,
    pub score: f32,
    /// Orientation in radians.
    pub angle: f32,
}

/// Keypoints of one face patch with their descriptors (same order).
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<BinaryDescriptor>,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Crop `rect` out of a grayscale frame, resize to the normalised patch and
/// extract features. `None` when the region is empty or has no usable corners.
pub fn describe_region(frame: &[u8], width: u32, height: u32, rect: PixelRect) -> Option<FeatureSet> {
    let image = GrayImage::from_raw(width, height, frame.to_vec())?;
    if rect.width == 0 || rect.height == 0 || rect.x + rect.width > width || rect.y + rect.height > height {
        return None;
    }
    let crop = imageops::crop_imm(&image, rect.x, rect.y, rect.width, rect.height).to_image();
    let patch = imageops::resize(&crop, PATCH_SIZE, PATCH_SIZE, FilterType::Triangle);
    extract(&patch)
}

/// Detect, orient and describe keypoints of an already-normalised patch.
pub fn extract(patch: &GrayImage) -> Option<FeatureSet> {
    let keypoints = detect_keypoints(patch);
    if keypoints.is_empty() {
        return None;
    }

    let smoothed = gaussian_blur_f32(patch, 2.0);
    let descriptors = keypoints.iter().map(|kp| steered_brief(&smoothed, kp)).collect();
    Some(FeatureSet { keypoints, descriptors })
}

/// FAST-9 corners with 3×3 non-maximum suppression, strongest first.
fn detect_keypoints(patch: &GrayImage) -> Vec<Keypoint> {
    let (w, h) = patch.dimensions();
    if w <= 2 * BORDER || h <= 2 * BORDER {
        return Vec::new();
    }

    let corners = corners_fast9(patch, FAST_THRESHOLD);
    let mut scores = vec![0f32; (w * h) as usize];
    for c in &corners {
        scores[(c.y * w + c.x) as usize] = c.score;
    }
    let is_local_max = |x: u32, y: u32, score: f32| {
        (y - 1..=y + 1).all(|ny| {
            (x - 1..=x + 1).all(|nx| (nx, ny) == (x, y) || scores[(ny * w + nx) as usize] < score)
        })
    };

    let mut keypoints: Vec<Keypoint> = corners
        .iter()
        .filter(|c| c.x >= BORDER && c.y >= BORDER && c.x < w - BORDER && c.y < h - BORDER)
        .filter(|c| is_local_max(c.x, c.y, c.score))
        .map(|c| Keypoint {
            x: c.x,
            y: c.y,
            score: c.score,
            angle: intensity_centroid_angle(patch, c.x, c.y),
        })
        .collect();

    keypoints.sort_by(|a, b| b.score.total_cmp(&a.score));
    keypoints.truncate(MAX_KEYPOINTS);
    keypoints
}

/// Orientation from the first-order moments of a disc around the keypoint.
fn intensity_centroid_angle(patch: &GrayImage, x: u32, y: u32) -> f32 {
    let (mut m10, mut m01) = (0f32, 0f32);
    let r = ORIENTATION_RADIUS;
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy > r * r {
                continue;
            }
            let px = patch.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)[0] as f32;
            m10 += dx as f32 * px;
            m01 += dy as f32 * px;
        }
    }
    m01.atan2(m10)
}

/// Fixed BRIEF test pairs, identical across runs.
fn sampling_pattern() -> &'static [[(f32, f32); 2]; DESCRIPTOR_BITS] {
    static PATTERN: OnceLock<[[(f32, f32); 2]; DESCRIPTOR_BITS]> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
        let mut point = || {
            (
                rng.gen_range(-PATTERN_EXTENT..=PATTERN_EXTENT) as f32,
                rng.gen_range(-PATTERN_EXTENT..=PATTERN_EXTENT) as f32,
            )
        };
        std::array::from_fn(|_| [point(), point()])
    })
}

fn steered_brief(smoothed: &GrayImage, kp: &Keypoint) -> BinaryDescriptor {
    let (sin, cos) = kp.angle.sin_cos();
    let sample = |(px, py): (f32, f32)| {
        let x = (kp.x as f32 + px * cos - py * sin).round() as u32;
        let y = (kp.y as f32 + px * sin + py * cos).round() as u32;
        smoothed.get_pixel(x, y)[0]
    };

    let mut descriptor = [0u8; DESCRIPTOR_BITS / 8];
    for (bit, &[p, q]) in sampling_pattern().iter().enumerate() {
        if sample(p) < sample(q) {
            descriptor[bit / 8] |= 1 << (bit % 8);
        }
    }
    descriptor
}

pub fn hamming(a: &BinaryDescriptor, b: &BinaryDescriptor) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Index and distance of the closest descriptor in `set` (first on ties).
fn nearest(query: &BinaryDescriptor, set: &[BinaryDescriptor]) -> Option<(usize, u32)> {
    set.iter()
        .enumerate()
        .map(|(i, d)| (i, hamming(query, d)))
        .min_by_key(|&(i, dist)| (dist, i))
}

/// Mutual nearest-neighbour matches `(index_in_a, index_in_b, distance)`.
pub fn cross_check_matches(a: &FeatureSet, b: &FeatureSet) -> Vec<(usize, usize, u32)> {
    a.descriptors
        .iter()
        .enumerate()
        .filter_map(|(i, da)| {
            let (j, dist) = nearest(da, &b.descriptors)?;
            let (back, _) = nearest(&b.descriptors[j], &a.descriptors)?;
            (back == i).then_some((i, j, dist))
        })
        .collect()
}

/// Good mutual matches over the smaller keypoint count, in [0, 1].
pub fn match_ratio(a: &FeatureSet, b: &FeatureSet, max_distance: u32) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let good = cross_check_matches(a, b)
        .into_iter()
        .filter(|&(_, _, dist)| dist < max_distance)
        .count();
    good as f32 / a.len().min(b.len()).max(1) as f32
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::Luma;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    /// Random blocks on a mid-grey background; rich in corners.
    pub(crate) fn blocks_patch(seed: u64) -> GrayImage {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut img = GrayImage::from_pixel(PATCH_SIZE, PATCH_SIZE, Luma([128]));
        for _ in 0..60 {
            let x = rng.gen_range(0..180) as i32;
            let y = rng.gen_range(0..180) as i32;
            let w = rng.gen_range(8..40);
            let h = rng.gen_range(8..40);
            let v = if rng.gen_bool(0.5) { rng.gen_range(0..60) } else { rng.gen_range(196..=255) };
            draw_filled_rect_mut(&mut img, Rect::at(x, y).of_size(w, h), Luma([v]));
        }
        img
    }

    #[test]
    fn test_hamming() {
        let a = [0u8; 32];
        let mut b = [0u8; 32];
        b[0] = 0b1011;
        b[31] = 0xFF;
        assert_eq!(hamming(&a, &b), 11);
        assert_eq!(hamming(&b, &b), 0);
    }

    #[test]
    fn test_flat_patch_has_no_features() {
        let flat = GrayImage::from_pixel(PATCH_SIZE, PATCH_SIZE, Luma([90]));
        assert!(extract(&flat).is_none());
    }

    #[test]
    fn test_extract_is_deterministic_and_bounded() {
        let patch = blocks_patch(7);
        let a = extract(&patch).expect("textured patch must yield features");
        let b = extract(&patch).unwrap();
        assert_eq!(a, b);
        assert!(a.len() <= MAX_KEYPOINTS);
        assert_eq!(a.keypoints.len(), a.descriptors.len());
        assert!(a.keypoints.iter().all(|k| k.x >= BORDER && k.y >= BORDER));
        assert!(a.keypoints.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_identical_patches_match_strongly() {
        let a = extract(&blocks_patch(7)).unwrap();
        assert!(match_ratio(&a, &a, 60) > 0.8);
    }

    /// 4×4 cells of random intensity; corners everywhere, no shared structure.
    fn noise_patch(seed: u64) -> GrayImage {
        let mut rng = StdRng::seed_from_u64(seed);
        let cells: Vec<u8> = (0..(PATCH_SIZE / 4) * (PATCH_SIZE / 4)).map(|_| rng.gen()).collect();
        GrayImage::from_fn(PATCH_SIZE, PATCH_SIZE, |x, y| Luma([cells[((y / 4) * (PATCH_SIZE / 4) + x / 4) as usize]]))
    }

    #[test]
    fn test_different_patches_match_weakly() {
        let a = extract(&blocks_patch(7)).unwrap();
        let b = extract(&noise_patch(99)).unwrap();
        let unrelated = match_ratio(&a, &b, 60);
        assert!(unrelated < 0.15, "unrelated ratio {unrelated}");
        assert!(unrelated < match_ratio(&a, &a, 60));
    }

    #[test]
    fn test_cross_check_requires_mutual_nearest() {
        let kp = Keypoint { x: 0, y: 0, score: 1.0, angle: 0.0 };
        let mut close = [0u8; 32];
        close[0] = 1;
        let a = FeatureSet { keypoints: vec![kp, kp], descriptors: vec![[0u8; 32], close] };
        let b = FeatureSet { keypoints: vec![kp], descriptors: vec![[0u8; 32]] };

        // Both descriptors of `a` prefer b[0], but b[0] only points back at a[0].
        assert_eq!(cross_check_matches(&a, &b), vec![(0, 0, 0)]);
        // One good match over min(2, 1) keypoints.
        assert!((match_ratio(&a, &b, 60) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_describe_region_resizes_crop() {
        let patch = blocks_patch(3);
        let (w, h) = patch.dimensions();
        let rect = PixelRect { x: 0, y: 0, width: w, height: h };
        let direct = extract(&imageops::resize(&patch, PATCH_SIZE, PATCH_SIZE, FilterType::Triangle));
        assert_eq!(describe_region(patch.as_raw(), w, h, rect), direct);

        let outside = PixelRect { x: 150, y: 150, width: 100, height: 100 };
        assert!(describe_region(patch.as_raw(), w, h, outside).is_none());
    }
}
