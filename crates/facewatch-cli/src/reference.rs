//! Reference identity loading.

use crate::setup::SetupError;
use facewatch_core::{DescriptorOf, FaceMatcher};
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// Per-file outcome of reference loading, printed by `facewatch check`.
#[derive(Debug, Default, Serialize)]
pub struct ReferenceReport {
    pub accepted: Vec<PathBuf>,
    pub skipped: Vec<SkippedReference>,
}

#[derive(Debug, Serialize)]
pub struct SkippedReference {
    pub path: PathBuf,
    pub reason: String,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|known| e.eq_ignore_ascii_case(known)))
}

fn images_in(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "cannot list reference directory");
            return Vec::new();
        }
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_image(p))
        .collect();
    files.sort();
    files
}

/// Resolve the reference image files.
///
/// Candidates are tried in order; a directory contributes its image files
/// sorted by name, a file contributes itself. The first candidate that yields
/// at least one image wins.
pub fn collect_reference_files(candidates: &[PathBuf]) -> Result<Vec<PathBuf>, SetupError> {
    for candidate in candidates {
        let files = if candidate.is_dir() {
            images_in(candidate)
        } else if candidate.is_file() {
            vec![candidate.clone()]
        } else {
            continue;
        };
        if files.is_empty() {
            tracing::debug!(path = %candidate.display(), "no reference images here");
            continue;
        }
        tracing::info!(path = %candidate.display(), count = files.len(), "using reference images");
        return Ok(files);
    }
    Err(SetupError::NoReferenceImage {
        searched: candidates.to_vec(),
    })
}

/// Describe the largest face of every reference file.
///
/// Unreadable files and files without a detectable face are skipped with a
/// warning. Zero usable descriptors is fatal.
pub fn load_reference_set<M: FaceMatcher>(
    matcher: &mut M,
    files: &[PathBuf],
) -> Result<(Vec<DescriptorOf<M>>, ReferenceReport), SetupError> {
    let mut descriptors = Vec::new();
    let mut report = ReferenceReport::default();

    for path in files {
        let gray = match image::open(path) {
            Ok(img) => img.to_luma8(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot read reference image");
                report.skipped.push(SkippedReference {
                    path: path.clone(),
                    reason: format!("unreadable: {e}"),
                });
                continue;
            }
        };
        let (width, height) = gray.dimensions();
        match matcher.describe_reference(gray.as_raw(), width, height) {
            Some(descriptor) => {
                tracing::info!(path = %path.display(), backend = %matcher.backend(), "loaded reference face");
                descriptors.push(descriptor);
                report.accepted.push(path.clone());
            }
            None => {
                tracing::warn!(path = %path.display(), "no face found in reference image");
                report.skipped.push(SkippedReference {
                    path: path.clone(),
                    reason: "no face detected".into(),
                });
            }
        }
    }

    if descriptors.is_empty() {
        return Err(SetupError::NoUsableReference { files: files.len() });
    }
    Ok((descriptors, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use facewatch_core::{Backend, Detection, IdentityMetric};
    use image::{GrayImage, Luma};

    struct MeanMetric;

    impl IdentityMetric for MeanMetric {
        type Descriptor = f32;

        fn is_authorized(&self, probe: &f32, authorized: &[f32]) -> bool {
            authorized.iter().any(|a| (a - probe).abs() < 1.0)
        }

        fn same_identity(&self, probe: &f32, known: &f32) -> bool {
            (known - probe).abs() < 1.0
        }
    }

    /// Treats any image brighter than mid-grey as containing one face.
    struct BrightnessMatcher;

    impl FaceMatcher for BrightnessMatcher {
        type Metric = MeanMetric;

        fn backend(&self) -> Backend {
            Backend::Features
        }

        fn metric(&self) -> &MeanMetric {
            &MeanMetric
        }

        fn detect_and_describe(&mut self, _frame: &[u8], _w: u32, _h: u32) -> Vec<Detection<f32>> {
            Vec::new()
        }

        fn describe_reference(&mut self, frame: &[u8], _w: u32, _h: u32) -> Option<f32> {
            let mean = frame.iter().map(|&v| v as f32).sum::<f32>() / frame.len().max(1) as f32;
            (mean > 128.0).then_some(mean)
        }
    }

    fn write_image(path: &Path, value: u8) {
        GrayImage::from_pixel(16, 16, Luma([value])).save(path).unwrap();
    }

    #[test]
    fn test_directory_images_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        write_image(&dir.path().join("b.png"), 200);
        write_image(&dir.path().join("a.JPG"), 200);
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let files = collect_reference_files(&[dir.path().to_path_buf()]).unwrap();
        let names: Vec<_> = files.iter().map(|p| p.file_name().unwrap().to_string_lossy().into_owned()).collect();
        assert_eq!(names, vec!["a.JPG", "b.png"]);
    }

    #[test]
    fn test_falls_back_to_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let authorized = dir.path().join("authorized");
        std::fs::create_dir(&authorized).unwrap();
        let face = dir.path().join("face.png");
        write_image(&face, 200);

        let files = collect_reference_files(&[authorized, face.clone()]).unwrap();
        assert_eq!(files, vec![face]);
    }

    #[test]
    fn test_nothing_found_is_setup_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = collect_reference_files(&[dir.path().join("missing.png")]).unwrap_err();
        assert!(matches!(err, SetupError::NoReferenceImage { .. }));
        assert!(err.to_string().contains("missing.png"));
    }

    #[test]
    fn test_load_skips_faceless_and_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.png");
        let dark = dir.path().join("dark.png");
        let broken = dir.path().join("broken.png");
        write_image(&good, 200);
        write_image(&dark, 10);
        std::fs::write(&broken, b"not an image").unwrap();

        let (descriptors, report) =
            load_reference_set(&mut BrightnessMatcher, &[good.clone(), dark, broken]).unwrap();
        assert_eq!(descriptors, vec![200.0]);
        assert_eq!(report.accepted, vec![good]);
        assert_eq!(report.skipped.len(), 2);
    }

    #[test]
    fn test_zero_descriptors_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let dark = dir.path().join("dark.png");
        write_image(&dark, 10);
        let err = load_reference_set(&mut BrightnessMatcher, &[dark]).unwrap_err();
        assert!(matches!(err, SetupError::NoUsableReference { files: 1 }));
    }
}
