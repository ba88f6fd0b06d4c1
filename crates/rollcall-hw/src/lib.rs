//! rollcall-hw — hardware abstraction for the attendance kiosk.
//!
//! V4L2 camera capture behind the core frame-source trait, and the TCP
//! client for the confirmation display device.

pub mod camera;
pub mod display;
pub mod frame;

pub use camera::{Camera, CameraError, CameraSource, PixelFormat};
pub use display::{render_credential, ConfirmOutcome, CredentialError, DisplayClient};
