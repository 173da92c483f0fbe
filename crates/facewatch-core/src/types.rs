use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Box without landmarks, as produced by the cascade detector.
    pub fn new(x: f32, y: f32, width: f32, height: f32, confidence: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence,
            landmarks: None,
        }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Width over height; zero for a degenerate box.
    pub fn aspect_ratio(&self) -> f32 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            0.0
        }
    }

    /// Integer pixel rectangle clipped to a `frame_w`×`frame_h` image.
    ///
    /// Returns `None` when nothing of the box lies inside the image.
    pub fn clip_to(&self, frame_w: u32, frame_h: u32) -> Option<PixelRect> {
        let x0 = self.x.max(0.0).floor() as u32;
        let y0 = self.y.max(0.0).floor() as u32;
        let x1 = ((self.x + self.width).min(frame_w as f32)).ceil().max(0.0) as u32;
        let y1 = ((self.y + self.height).min(frame_h as f32)).ceil().max(0.0) as u32;
        (x1 > x0 && y1 > y0).then(|| PixelRect {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }
}

/// Integer rectangle inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean distance. Embeddings of different length are infinitely far apart.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One face found in a frame together with its descriptor.
#[derive(Debug, Clone)]
pub struct Detection<D> {
    pub region: BoundingBox,
    pub descriptor: D,
}

/// Outcome of classifying a detection against the authorized set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceClass {
    Authorized,
    Unauthorized,
}

impl FaceClass {
    pub fn other(self) -> Self {
        match self {
            FaceClass::Authorized => FaceClass::Unauthorized,
            FaceClass::Unauthorized => FaceClass::Authorized,
        }
    }

    /// Short overlay label.
    pub fn label(self) -> &'static str {
        match self {
            FaceClass::Authorized => "Authorized",
            FaceClass::Unauthorized => "Unauthorized",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_length_mismatch() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![0.0, 0.0, 0.0]);
        assert!(a.euclidean_distance(&b).is_infinite());
    }

    #[test]
    fn test_bbox_shape_helpers() {
        let b = BoundingBox::new(10.0, 20.0, 50.0, 100.0, 0.9);
        assert!((b.area() - 5000.0).abs() < 1e-3);
        assert!((b.aspect_ratio() - 0.5).abs() < 1e-6);
        assert_eq!(BoundingBox::new(0.0, 0.0, 5.0, 0.0, 1.0).aspect_ratio(), 0.0);
    }

    #[test]
    fn test_face_class_other() {
        assert_eq!(FaceClass::Authorized.other(), FaceClass::Unauthorized);
        assert_eq!(FaceClass::Unauthorized.other(), FaceClass::Authorized);
    }

    #[test]
    fn test_clip_to_frame() {
        let b = BoundingBox::new(-10.0, 5.0, 50.0, 50.0, 1.0);
        let r = b.clip_to(30, 30).unwrap();
        assert_eq!(r, PixelRect { x: 0, y: 5, width: 30, height: 25 });

        let outside = BoundingBox::new(100.0, 100.0, 10.0, 10.0, 1.0);
        assert!(outside.clip_to(30, 30).is_none());
    }
}
