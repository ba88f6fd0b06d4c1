//! V4L2 camera capture via the `v4l` crate.
//!
//! [`Camera`] owns the device and negotiated format; [`CameraSource`]
//! borrows it for the lifetime of one capture session and implements the
//! core [`FrameSource`] trait, so a recognition or enrollment invocation
//! holds exactly one streaming handle.

use crate::frame;
use rollcall_core::{Frame, FrameSource, SourceError};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Capture resolution requested from the device.
const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Negotiated pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, Y channel extracted).
    Yuyv,
    /// 8-bit grayscale (1 byte/pixel).
    Grey,
}

/// An opened V4L2 capture device.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 device by path (e.g. "/dev/video0") and negotiate a
    /// usable format.
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = CAPTURE_WIDTH;
        fmt.height = CAPTURE_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV or GREY)"
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Start streaming. The returned source borrows the camera; dropping
    /// it releases the buffers.
    pub fn stream(&self) -> Result<CameraSource<'_>, CameraError> {
        let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| {
                CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })?;
        Ok(CameraSource {
            stream,
            width: self.width,
            height: self.height,
            pixel_format: self.pixel_format,
        })
    }

    fn buf_to_grayscale(
        buf: &[u8],
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
    ) -> Result<Vec<u8>, CameraError> {
        let pixels = (width * height) as usize;
        match pixel_format {
            PixelFormat::Grey => {
                if buf.len() < pixels {
                    return Err(CameraError::CaptureFailed(format!(
                        "GREY buffer too short: expected {pixels}, got {}",
                        buf.len()
                    )));
                }
                Ok(buf[..pixels].to_vec())
            }
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, width, height)
                .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}"))),
        }
    }
}

/// A live capture stream over an open camera.
pub struct CameraSource<'a> {
    stream: MmapStream<'a>,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

impl FrameSource for CameraSource<'_> {
    fn read_frame(&mut self) -> Result<Frame, SourceError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| SourceError::Read(format!("failed to dequeue buffer: {e}")))?;

        let gray = Camera::buf_to_grayscale(buf, self.width, self.height, self.pixel_format)
            .map_err(|e| SourceError::Read(e.to_string()))?;

        // Black or blown-out frames count as failed pulls; the caller's
        // retry budget absorbs them.
        if frame::is_degenerate_frame(&gray) {
            return Err(SourceError::Read(format!(
                "degenerate frame (seq {})",
                meta.sequence
            )));
        }

        Ok(Frame {
            data: gray,
            width: self.width,
            height: self.height,
            sequence: meta.sequence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buf_to_grayscale_grey_passthrough() {
        let buf: Vec<u8> = (0..8).collect();
        let gray = Camera::buf_to_grayscale(&buf, 4, 2, PixelFormat::Grey).unwrap();
        assert_eq!(gray, buf);
    }

    #[test]
    fn test_buf_to_grayscale_grey_short() {
        let buf = vec![0u8; 4];
        assert!(Camera::buf_to_grayscale(&buf, 4, 2, PixelFormat::Grey).is_err());
    }

    #[test]
    fn test_buf_to_grayscale_yuyv() {
        let buf = vec![10, 0, 20, 0, 30, 0, 40, 0];
        let gray = Camera::buf_to_grayscale(&buf, 2, 2, PixelFormat::Yuyv).unwrap();
        assert_eq!(gray, vec![10, 20, 30, 40]);
    }

    #[test]
    fn test_open_missing_device() {
        let err = Camera::open("/dev/video-does-not-exist").unwrap_err();
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
    }
}
