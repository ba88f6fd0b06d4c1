//! Raw buffer conversion and frame quality gating.

use thiserror::Error;

/// Frames with mean brightness outside this window are unusable: the
/// stream returned a black or blown-out frame while (re)synchronizing.
const BRIGHTNESS_FLOOR: f32 = 30.0;
const BRIGHTNESS_CEIL: f32 = 240.0;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid YUYV length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// True when a frame's mean brightness falls outside the usable window.
pub fn is_degenerate_frame(gray: &[u8]) -> bool {
    if gray.is_empty() {
        return true;
    }
    let mean = gray.iter().map(|&b| b as f32).sum::<f32>() / gray.len() as f32;
    !(BRIGHTNESS_FLOOR..=BRIGHTNESS_CEIL).contains(&mean)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_grayscale() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let yuyv = vec![100, 128, 200, 128];
        let gray = yuyv_to_grayscale(&yuyv, 2, 1).unwrap();
        assert_eq!(gray, vec![100, 200]);
    }

    #[test]
    fn test_yuyv_to_grayscale_4x2() {
        let yuyv: Vec<u8> = (0..16).collect();
        let gray = yuyv_to_grayscale(&yuyv, 4, 2).unwrap();
        assert_eq!(gray, vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128];
        assert!(yuyv_to_grayscale(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_black_frame_is_degenerate() {
        assert!(is_degenerate_frame(&vec![0u8; 1000]));
    }

    #[test]
    fn test_blown_out_frame_is_degenerate() {
        assert!(is_degenerate_frame(&vec![255u8; 1000]));
    }

    #[test]
    fn test_normal_frame_is_usable() {
        assert!(!is_degenerate_frame(&vec![128u8; 1000]));
    }

    #[test]
    fn test_empty_frame_is_degenerate() {
        assert!(is_degenerate_frame(&[]));
    }
}
