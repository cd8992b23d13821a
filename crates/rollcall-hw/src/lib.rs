//! rollcall-hw — Webcam capture for the attendance loop.
//!
//! Provides V4L2 camera access, the grayscale [`Frame`] type, and the
//! lighting sufficiency check that gates detection.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, PixelFormat};
pub use frame::Frame;
