//! Face alignment via 4-DOF similarity transform.
//!
//! Warps a detected face so its five landmarks land on the InsightFace
//! reference positions of a 112×112 crop.

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: usize = 112;

/// `dst = [a -b; b a] * src + [tx; ty]`
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Least-squares similarity from `src` to `dst` (closed form on centred points).
    fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let (mut norm, mut dot, mut cross) = (0.0f32, 0.0f32, 0.0f32);
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (sx, sy, dx, dy) = (sx - msx, sy - msy, dx - mdx, dy - mdy);
            norm += sx * sx + sy * sy;
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
        }
        if norm < 1e-9 {
            return None;
        }

        let (a, b) = (dot / norm, cross / norm);
        Some(Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        })
    }

    /// Map a destination point back into source coordinates.
    fn invert(&self, x: f32, y: f32) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let (dx, dy) = (x - self.tx, y - self.ty);
        Some(((self.a * dx + self.b * dy) / det, (-self.b * dx + self.a * dy) / det))
    }
}

/// Bilinear sample with zero outside the image.
fn sample_bilinear(frame: &[u8], width: usize, height: usize, sx: f32, sy: f32) -> f32 {
    let (x0, y0) = (sx.floor() as i64, sy.floor() as i64);
    let (fx, fy) = (sx - x0 as f32, sy - y0 as f32);
    let px = |x: i64, y: i64| -> f32 {
        if x >= 0 && y >= 0 && (x as usize) < width && (y as usize) < height {
            frame[y as usize * width + x as usize] as f32
        } else {
            0.0
        }
    };
    px(x0, y0) * (1.0 - fx) * (1.0 - fy)
        + px(x0 + 1, y0) * fx * (1.0 - fy)
        + px(x0, y0 + 1) * (1.0 - fx) * fy
        + px(x0 + 1, y0 + 1) * fx * fy
}

/// Align a detected face to a canonical 112×112 grayscale crop.
///
/// Returns `None` for degenerate landmarks (all coincident), which have no
/// invertible similarity.
pub fn align_face(frame: &[u8], width: u32, height: u32, landmarks: &[(f32, f32); 5]) -> Option<Vec<u8>> {
    let transform = Similarity::estimate(landmarks, &REFERENCE_LANDMARKS_112)?;
    let mut out = vec![0u8; ALIGNED_SIZE * ALIGNED_SIZE];
    for oy in 0..ALIGNED_SIZE {
        for ox in 0..ALIGNED_SIZE {
            let (sx, sy) = transform.invert(ox as f32, oy as f32)?;
            let v = sample_bilinear(frame, width as usize, height as usize, sx, sy);
            out[oy * ALIGNED_SIZE + ox] = v.round().clamp(0.0, 255.0) as u8;
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let t = Similarity::estimate(&REFERENCE_LANDMARKS_112, &REFERENCE_LANDMARKS_112).unwrap();
        assert!((t.a - 1.0).abs() < 1e-4, "a = {}", t.a);
        assert!(t.b.abs() < 1e-4, "b = {}", t.b);
        assert!(t.tx.abs() < 1e-3 && t.ty.abs() < 1e-3);
    }

    #[test]
    fn test_scaled_transform() {
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * 2.0, y * 2.0));
        let t = Similarity::estimate(&src, &REFERENCE_LANDMARKS_112).unwrap();
        assert!((t.a - 0.5).abs() < 1e-3, "a = {}", t.a);
    }

    #[test]
    fn test_recovers_rotation_and_translation() {
        // 90° rotation plus shift: (x, y) -> (-y + 200, x + 10)
        let src = REFERENCE_LANDMARKS_112;
        let dst = src.map(|(x, y)| (-y + 200.0, x + 10.0));
        let t = Similarity::estimate(&src, &dst).unwrap();
        assert!(t.a.abs() < 1e-3, "a = {}", t.a);
        assert!((t.b - 1.0).abs() < 1e-3, "b = {}", t.b);
        assert!((t.tx - 200.0).abs() < 1e-2);
        assert!((t.ty - 10.0).abs() < 1e-2);

        let (x, y) = t.invert(dst[2].0, dst[2].1).unwrap();
        assert!((x - src[2].0).abs() < 1e-2 && (y - src[2].1).abs() < 1e-2);
    }

    #[test]
    fn test_degenerate_landmarks() {
        let frame = vec![200u8; 64 * 64];
        assert!(align_face(&frame, 64, 64, &[(5.0, 5.0); 5]).is_none());
    }

    #[test]
    fn test_landmark_roundtrip() {
        let (w, h) = (200usize, 200usize);
        let mut frame = vec![0u8; w * h];
        let src: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];

        // 5x5 bright patch at the left eye
        for dy in 0..5 {
            for dx in 0..5 {
                frame[(58 + dy) * w + 78 + dx] = 255;
            }
        }

        let aligned = align_face(&frame, w as u32, h as u32, &src).unwrap();
        let (rx, ry) = (
            REFERENCE_LANDMARKS_112[0].0.round() as usize,
            REFERENCE_LANDMARKS_112[0].1.round() as usize,
        );
        let brightest = (ry - 1..=ry + 1)
            .flat_map(|y| (rx - 1..=rx + 1).map(move |x| (x, y)))
            .map(|(x, y)| aligned[y * ALIGNED_SIZE + x])
            .max()
            .unwrap();
        assert!(brightest > 100, "expected bright patch near ({rx}, {ry}), max={brightest}");
    }
}
