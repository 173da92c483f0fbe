//! Overlay rendering and output surfaces.

use crate::engine::ClassifiedFace;
use ab_glyph::{FontVec, PxScale};
use facewatch_core::FaceClass;
use facewatch_hw::Frame;
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const PLACEHOLDER_WIDTH: u32 = 640;
pub const PLACEHOLDER_HEIGHT: u32 = 480;
const PLACEHOLDER_TEXT: &str = "Camera OFF - Press 'S' to start";

const GREEN: Rgb<u8> = Rgb([0, 200, 0]);
const RED: Rgb<u8> = Rgb([220, 0, 0]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const GREY: Rgb<u8> = Rgb([90, 90, 90]);
const LABEL_HEIGHT: u32 = 22;
const LABEL_SCALE: f32 = 18.0;

fn class_color(class: FaceClass) -> Rgb<u8> {
    match class {
        FaceClass::Authorized => GREEN,
        FaceClass::Unauthorized => RED,
    }
}

/// Draws detection boxes and labels. Text needs a font; without one only
/// boxes and label tabs are drawn.
pub struct Overlay {
    font: Option<FontVec>,
}

impl Overlay {
    pub fn new(font_path: Option<&Path>) -> Self {
        let font = font_path.and_then(|path| match std::fs::read(path) {
            Ok(bytes) => match FontVec::try_from_vec(bytes) {
                Ok(font) => Some(font),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "overlay font is not a usable TTF/OTF");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read overlay font");
                None
            }
        });
        Self { font }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Grayscale frame → colour image with one box per classified face.
    pub fn annotate(&self, frame: &Frame, faces: &[ClassifiedFace]) -> RgbImage {
        let mut image = RgbImage::from_fn(frame.width, frame.height, |x, y| {
            let v = frame.data[(y * frame.width + x) as usize];
            Rgb([v, v, v])
        });

        for face in faces {
            let Some(rect) = face.region.clip_to(frame.width, frame.height) else { continue };
            let color = class_color(face.class);
            let (x, y) = (rect.x as i32, rect.y as i32);

            draw_hollow_rect_mut(&mut image, Rect::at(x, y).of_size(rect.width, rect.height), color);
            if rect.width > 2 && rect.height > 2 {
                draw_hollow_rect_mut(
                    &mut image,
                    Rect::at(x + 1, y + 1).of_size(rect.width - 2, rect.height - 2),
                    color,
                );
            }

            let tab_y = (y - LABEL_HEIGHT as i32).max(0);
            draw_filled_rect_mut(&mut image, Rect::at(x, tab_y).of_size(rect.width, LABEL_HEIGHT), color);
            if let Some(font) = &self.font {
                draw_text_mut(&mut image, WHITE, x + 4, tab_y + 2, PxScale::from(LABEL_SCALE), font, face.class.label());
            }
        }
        image
    }

    /// Frame shown while the camera is off.
    pub fn placeholder(&self) -> RgbImage {
        let mut image = RgbImage::new(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT);
        match &self.font {
            Some(font) => draw_text_mut(&mut image, WHITE, 50, 240, PxScale::from(28.0), font, PLACEHOLDER_TEXT),
            None => {
                // Crossed-out frame marker.
                let (w, h) = (PLACEHOLDER_WIDTH / 2, PLACEHOLDER_HEIGHT / 2);
                let (x, y) = ((PLACEHOLDER_WIDTH - w) as i32 / 2, (PLACEHOLDER_HEIGHT - h) as i32 / 2);
                draw_hollow_rect_mut(&mut image, Rect::at(x, y).of_size(w, h), GREY);
                imageproc::drawing::draw_line_segment_mut(
                    &mut image,
                    (x as f32, y as f32),
                    ((x + w as i32) as f32, (y + h as i32) as f32),
                    GREY,
                );
            }
        }
        image
    }
}

/// Where rendered frames go.
pub trait Surface {
    fn present(&mut self, image: &RgbImage);
}

/// Headless output: optionally keeps the latest rendered frame on disk.
pub struct HeadlessSurface {
    preview_path: Option<PathBuf>,
    interval: Duration,
    last_write: Option<Instant>,
}

impl HeadlessSurface {
    pub fn new(preview_path: Option<PathBuf>) -> Self {
        Self {
            preview_path,
            interval: Duration::from_secs(1),
            last_write: None,
        }
    }

    fn write_preview(path: &Path, image: &RgbImage) -> image::ImageResult<()> {
        // Write beside the target and rename so readers never see a partial JPEG.
        let tmp = path.with_extension("tmp");
        image.save_with_format(&tmp, ImageFormat::Jpeg)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl Surface for HeadlessSurface {
    fn present(&mut self, image: &RgbImage) {
        let Some(path) = &self.preview_path else { return };
        let now = Instant::now();
        if self.last_write.is_some_and(|at| now.duration_since(at) < self.interval) {
            return;
        }
        self.last_write = Some(now);
        if let Err(e) = Self::write_preview(path, image) {
            tracing::warn!(path = %path.display(), error = %e, "failed to write preview frame");
        }
    }
}

#[cfg(feature = "window")]
pub use window::WindowSurface;

#[cfg(feature = "window")]
mod window {
    use super::Surface;
    use crate::control::ControlCommand;
    use image::RgbImage;
    use minifb::{Key, KeyRepeat, Window, WindowOptions};
    use std::sync::mpsc::Sender;

    /// Persistent desktop window. Key presses become control commands.
    pub struct WindowSurface {
        window: Window,
        buffer: Vec<u32>,
        commands: Sender<ControlCommand>,
        closed: bool,
    }

    impl WindowSurface {
        pub fn open(title: &str, width: u32, height: u32, commands: Sender<ControlCommand>) -> Result<Self, minifb::Error> {
            let mut window = Window::new(title, width as usize, height as usize, WindowOptions::default())?;
            window.set_target_fps(60);
            Ok(Self {
                window,
                buffer: Vec::new(),
                commands,
                closed: false,
            })
        }

        fn forward_keys(&mut self) {
            if !self.window.is_open() || self.window.is_key_down(Key::Escape) {
                if !self.closed {
                    self.closed = true;
                    let _ = self.commands.send(ControlCommand::Quit);
                }
                return;
            }
            for key in self.window.get_keys_pressed(KeyRepeat::No) {
                let cmd = match key {
                    Key::S => Some(ControlCommand::Start),
                    Key::P => Some(ControlCommand::Stop),
                    Key::Q => Some(ControlCommand::Quit),
                    _ => None,
                };
                if let Some(cmd) = cmd {
                    let _ = self.commands.send(cmd);
                }
            }
        }
    }

    impl Surface for WindowSurface {
        fn present(&mut self, image: &RgbImage) {
            self.buffer.clear();
            self.buffer.extend(
                image
                    .pixels()
                    .map(|p| (u32::from(p[0]) << 16) | (u32::from(p[1]) << 8) | u32::from(p[2])),
            );
            if let Err(e) = self
                .window
                .update_with_buffer(&self.buffer, image.width() as usize, image.height() as usize)
            {
                tracing::warn!(error = %e, "window update failed");
            }
            self.forward_keys();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facewatch_core::BoundingBox;

    fn gray_frame(w: u32, h: u32, v: u8) -> Frame {
        Frame::from_gray(vec![v; (w * h) as usize], w, h, 0).unwrap()
    }

    #[test]
    fn test_annotate_draws_class_colors() {
        let overlay = Overlay::new(None);
        let frame = gray_frame(200, 200, 50);
        let faces = vec![
            ClassifiedFace {
                region: BoundingBox::new(20.0, 40.0, 60.0, 60.0, 1.0),
                class: FaceClass::Authorized,
            },
            ClassifiedFace {
                region: BoundingBox::new(120.0, 40.0, 60.0, 60.0, 1.0),
                class: FaceClass::Unauthorized,
            },
        ];
        let image = overlay.annotate(&frame, &faces);

        assert_eq!(image.dimensions(), (200, 200));
        assert_eq!(*image.get_pixel(20, 70), GREEN);
        assert_eq!(*image.get_pixel(120, 70), RED);
        // Label tab sits above the box.
        assert_eq!(*image.get_pixel(50, 30), GREEN);
        // Interior untouched.
        assert_eq!(*image.get_pixel(50, 70), Rgb([50, 50, 50]));
    }

    #[test]
    fn test_annotate_skips_offscreen_region() {
        let overlay = Overlay::new(None);
        let frame = gray_frame(50, 50, 10);
        let faces = vec![ClassifiedFace {
            region: BoundingBox::new(500.0, 500.0, 20.0, 20.0, 1.0),
            class: FaceClass::Unauthorized,
        }];
        let image = overlay.annotate(&frame, &faces);
        assert!(image.pixels().all(|p| *p == Rgb([10, 10, 10])));
    }

    #[test]
    fn test_placeholder_size() {
        let overlay = Overlay::new(None);
        assert!(!overlay.has_font());
        let image = overlay.placeholder();
        assert_eq!(image.dimensions(), (PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT));
        assert_eq!(*image.get_pixel(0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_missing_font_falls_back() {
        let overlay = Overlay::new(Some(Path::new("/nonexistent/font.ttf")));
        assert!(!overlay.has_font());
    }

    #[test]
    fn test_headless_writes_preview() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.jpg");
        let mut surface = HeadlessSurface::new(Some(path.clone()));
        surface.present(&RgbImage::new(32, 24));

        let written = image::open(&path).unwrap();
        assert_eq!((written.width(), written.height()), (32, 24));
        assert!(!path.with_extension("tmp").exists());
    }
}
