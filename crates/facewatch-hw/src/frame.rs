//! Frame type and grayscale processing: YUYV/Y16 conversion, dark detection, CLAHE.

use std::time::Instant;

/// Fraction of near-black pixels above which a frame counts as dark.
pub const DARK_FRAME_FRACTION: f32 = 0.95;

/// Pixel values below this land in the darkest histogram bucket.
const DARK_PIXEL_CEILING: u8 = 32;

/// A captured grayscale frame.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Grayscale pixel data, row-major (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: Instant,
    pub sequence: u32,
}

impl Frame {
    /// Wrap a grayscale buffer, validating its length.
    pub fn from_gray(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            captured_at: Instant::now(),
            sequence,
        })
    }

    /// True when the frame is too dark to contain a usable face.
    pub fn is_dark(&self) -> bool {
        is_dark_frame(&self.data, DARK_FRAME_FRACTION)
    }

    /// Apply CLAHE in place with the settings used before detection.
    pub fn enhance_contrast(&mut self) {
        clahe_enhance(&mut self.data, self.width, self.height, 8, 0.02);
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by keeping the Y samples.
///
/// Two pixels are packed per 4 bytes as `[Y0, U, Y1, V]`.
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = width as usize * height as usize * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Convert 16-bit little-endian grayscale to 8-bit by keeping the high byte.
pub fn y16_to_grayscale(y16: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = width as usize * height as usize * 2;
    if y16.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: y16.len(),
        });
    }
    Ok(y16[..expected].chunks_exact(2).map(|px| px[1]).collect())
}

/// True if more than `threshold_pct` of the pixels are near black.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark = gray.iter().filter(|&&p| p < DARK_PIXEL_CEILING).count();
    (dark as f32 / gray.len() as f32) > threshold_pct
}

/// Contrast-Limited Adaptive Histogram Equalization, in place.
///
/// Builds one clipped-histogram CDF per tile of a `tiles`×`tiles` grid and
/// maps every pixel by bilinear interpolation between the four nearest tile
/// CDFs.
pub fn clahe_enhance(gray: &mut [u8], width: u32, height: u32, tiles: u32, clip_limit: f32) {
    let (w, h, n) = (width as usize, height as usize, tiles as usize);
    if n == 0 || w < n || h < n || gray.len() < w * h {
        return;
    }
    let (tile_w, tile_h) = (w / n, h / n);

    let mut cdfs: Vec<[f32; 256]> = Vec::with_capacity(n * n);
    for row in 0..n {
        for col in 0..n {
            cdfs.push(tile_cdf(gray, w, col * tile_w, row * tile_h, tile_w, tile_h, clip_limit));
        }
    }

    let max_tile = (n - 1) as f32;
    for y in 0..h {
        let fy = (y as f32 / tile_h as f32 - 0.5).clamp(0.0, max_tile);
        let (r0, dy) = (fy as usize, fy.fract());
        let r1 = (r0 + 1).min(n - 1);

        for x in 0..w {
            let fx = (x as f32 / tile_w as f32 - 0.5).clamp(0.0, max_tile);
            let (c0, dx) = (fx as usize, fx.fract());
            let c1 = (c0 + 1).min(n - 1);

            let v = gray[y * w + x] as usize;
            let top = cdfs[r0 * n + c0][v] * (1.0 - dx) + cdfs[r0 * n + c1][v] * dx;
            let bottom = cdfs[r1 * n + c0][v] * (1.0 - dx) + cdfs[r1 * n + c1][v] * dx;
            gray[y * w + x] = (top * (1.0 - dy) + bottom * dy).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Clipped, redistributed and normalised CDF of one tile.
fn tile_cdf(
    gray: &[u8],
    stride: usize,
    x0: usize,
    y0: usize,
    tile_w: usize,
    tile_h: usize,
    clip_limit: f32,
) -> [f32; 256] {
    let mut hist = [0u32; 256];
    for y in y0..y0 + tile_h {
        for &p in &gray[y * stride + x0..y * stride + x0 + tile_w] {
            hist[p as usize] += 1;
        }
    }

    let pixels = (tile_w * tile_h) as f32;
    let clip = (clip_limit * pixels) as u32;
    let excess: u32 = hist.iter_mut().map(|bin| {
        let over = bin.saturating_sub(clip);
        *bin -= over;
        over
    }).sum();
    let (share, leftover) = (excess / 256, (excess % 256) as usize);
    for (i, bin) in hist.iter_mut().enumerate() {
        *bin += share + u32::from(i < leftover);
    }

    let mut cdf = [0f32; 256];
    let mut running = 0f32;
    for (slot, &count) in cdf.iter_mut().zip(hist.iter()) {
        running += count as f32;
        *slot = running;
    }
    let cdf_min = cdf.iter().copied().find(|&v| v > 0.0).unwrap_or(0.0);
    let denom = pixels - cdf_min;
    if denom > 0.0 {
        for v in cdf.iter_mut() {
            *v = ((*v - cdf_min) / denom * 255.0).clamp(0.0, 255.0);
        }
    }
    cdf
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
