//! TCP client for the confirmation display device.
//!
//! The device shows the matched person's credential on its touch screen
//! and answers with free text; any response containing `CONFIRM` means the
//! person accepted. One fresh connection per confirmation, never pooled.
//!
//! Wire format: 4-byte little-endian unsigned length prefix, then exactly
//! that many JPEG bytes. Response: up to 1024 bytes of text.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use thiserror::Error;

/// Substring of the device response that signals acceptance.
const ACCEPT_TOKEN: &str = "CONFIRM";
/// Fixed response buffer; the device sends a short free-text answer.
const RESPONSE_BUF_LEN: usize = 1024;
/// Credential canvas side expected by the device screen.
const CREDENTIAL_SIDE: u32 = 480;
/// Reduced JPEG quality keeps the transfer short on the device link.
const CREDENTIAL_JPEG_QUALITY: u8 = 70;

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("credential image: {0}")]
    Image(#[from] image::ImageError),
}

/// Whether the person at the device accepted the shown credential.
///
/// Timeouts and transport failures collapse into `Rejected`; the logs
/// distinguish the causes but callers currently cannot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed,
    Rejected,
}

impl ConfirmOutcome {
    pub fn accepted(self) -> bool {
        self == ConfirmOutcome::Confirmed
    }
}

/// One-shot confirmation client for the display device.
pub struct DisplayClient {
    address: String,
    timeout: Duration,
}

impl DisplayClient {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }

    /// Send a credential JPEG and wait for the accept/reject answer.
    ///
    /// Never returns an error: every failure mode is a rejection. The
    /// connection is closed on all paths.
    pub fn confirm(&self, jpeg: &[u8]) -> ConfirmOutcome {
        match self.exchange(jpeg) {
            Ok(response) => {
                let accepted = response.contains(ACCEPT_TOKEN);
                tracing::info!(response = %response.trim(), accepted, "display device answered");
                if accepted {
                    ConfirmOutcome::Confirmed
                } else {
                    ConfirmOutcome::Rejected
                }
            }
            Err(e) => {
                tracing::warn!(address = %self.address, error = %e, "display exchange failed, treating as rejection");
                ConfirmOutcome::Rejected
            }
        }
    }

    fn exchange(&self, jpeg: &[u8]) -> std::io::Result<String> {
        let addr = self
            .address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    format!("could not resolve {}", self.address),
                )
            })?;

        let mut stream = TcpStream::connect_timeout(&addr, self.timeout)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        // Length prefix and payload in one buffer; write_all covers
        // partial writes.
        let mut payload = Vec::with_capacity(4 + jpeg.len());
        payload.extend_from_slice(&(jpeg.len() as u32).to_le_bytes());
        payload.extend_from_slice(jpeg);
        stream.write_all(&payload)?;

        tracing::debug!(bytes = jpeg.len(), address = %self.address, "credential sent");

        let mut buf = [0u8; RESPONSE_BUF_LEN];
        let n = stream.read(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
    }
}

/// Prepare the credential image for the device: decode the stored profile
/// photo, fit it to the device canvas, re-encode as compact JPEG.
pub fn render_credential(photo_jpeg: &[u8]) -> Result<Vec<u8>, CredentialError> {
    let photo = image::load_from_memory(photo_jpeg)?;
    let fitted = photo.resize_exact(CREDENTIAL_SIDE, CREDENTIAL_SIDE, FilterType::Triangle);

    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, CREDENTIAL_JPEG_QUALITY);
    fitted.to_rgb8().write_with_encoder(encoder)?;
    Ok(out)
}
