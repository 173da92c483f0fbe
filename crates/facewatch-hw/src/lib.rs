//! facewatch-hw: Hardware abstraction for camera capture.
//!
//! Provides V4L2-based camera access, grayscale frame conversion and the
//! ordered device probing used when capture is switched on.

pub mod camera;
pub mod frame;
pub mod source;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::Frame;
pub use source::{probe_first, FrameSource};
