//! Frame source abstraction and ordered device probing.

use crate::camera::CameraError;
use crate::frame::Frame;

/// Anything that can hand out grayscale frames one at a time.
///
/// Dropping the source releases the underlying device.
pub trait FrameSource {
    /// Read the next frame. An error means "no frame this tick".
    fn read_frame(&mut self) -> Result<Frame, CameraError>;

    /// Human-readable identifier for logs.
    fn name(&self) -> &str;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        (**self).read_frame()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Try each candidate in order; accept the first that opens AND yields a frame.
///
/// Candidates that open but cannot produce a frame are dropped (released)
/// before the next one is tried. Returns the accepted source together with
/// its test frame.
pub fn probe_first<S, F>(candidates: &[String], mut open: F) -> Result<(S, Frame), CameraError>
where
    S: FrameSource,
    F: FnMut(&str) -> Result<S, CameraError>,
{
    for candidate in candidates {
        tracing::info!(device = %candidate, "probing capture device");
        let mut source = match open(candidate) {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!(device = %candidate, error = %e, "device did not open");
                continue;
            }
        };
        match source.read_frame() {
            Ok(frame) => {
                tracing::info!(device = %candidate, width = frame.width, height = frame.height, "device accepted");
                return Ok((source, frame));
            }
            Err(e) => {
                tracing::warn!(device = %candidate, error = %e, "device opened but yielded no frame");
            }
        }
    }
    Err(CameraError::NoUsableDevice(candidates.to_vec()))
}
