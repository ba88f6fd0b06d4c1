//! Daemon configuration.
//!
//! Layered: compiled defaults, then `/etc/rollcall/config.toml` when
//! present, then `ROLLCALL_*` environment overrides. The core never reads
//! any of this directly; values are handed to it per call.

use rollcall_core::aggregate::AggregateConfig;
use rollcall_core::enroll::EnrollConfig;
use rollcall_core::recognize::RecognitionConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const SYSTEM_CONFIG_PATH: &str = "/etc/rollcall/config.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path.
    pub camera_device: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Cosine similarity needed for a live-recognition confirmation.
    pub accept_threshold: f32,
    /// Cosine similarity needed for a 1:1 verification.
    pub verification_threshold: f32,
    /// Fewest valid samples an enrollment may produce.
    pub min_samples: usize,
    /// Embeddings to collect per enrollment session.
    pub target_samples: usize,
    /// `k` in the MAD outlier rule.
    pub mad_multiplier: f32,
    /// `k` in the stddev fallback rule.
    pub stddev_multiplier: f32,
    /// Wall-clock budget for one recognition pass, in milliseconds.
    pub recognition_deadline_ms: u64,
    /// Confirmation display address, host:port.
    pub device_address: String,
    /// Connect and read timeout for the display device, in seconds.
    pub device_timeout_secs: u64,
    /// Reserved: repeated-match count before confirming. The sampling loop
    /// currently confirms on the first qualifying frame and does not
    /// consult this.
    #[allow(dead_code)]
    pub required_confirmations: u32,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        Self {
            camera_device: "/dev/video0".to_string(),
            model_dir: rollcall_face::default_model_dir(),
            db_path: data_dir.join("rollcall.db"),
            accept_threshold: 0.48,
            verification_threshold: 0.70,
            min_samples: 5,
            target_samples: 40,
            mad_multiplier: 3.0,
            stddev_multiplier: 2.0,
            recognition_deadline_ms: 2000,
            device_address: "172.32.0.93:8081".to_string(),
            device_timeout_secs: 30,
            required_confirmations: 2,
        }
    }
}

impl Config {
    /// Load the layered configuration.
    pub fn load() -> Self {
        let mut cfg = match std::fs::read_to_string(SYSTEM_CONFIG_PATH) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(cfg) => {
                    tracing::info!(path = SYSTEM_CONFIG_PATH, "config file loaded");
                    cfg
                }
                Err(e) => {
                    tracing::warn!(path = SYSTEM_CONFIG_PATH, error = %e, "config file invalid, using defaults");
                    Config::default()
                }
            },
            Err(_) => Config::default(),
        };
        cfg.apply_env();
        cfg
    }

    /// Apply `ROLLCALL_*` environment overrides on top of file values.
    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Ok(v) = std::env::var("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ROLLCALL_DEVICE_ADDRESS") {
            self.device_address = v;
        }
        self.accept_threshold = env_f32("ROLLCALL_ACCEPT_THRESHOLD", self.accept_threshold);
        self.verification_threshold =
            env_f32("ROLLCALL_VERIFICATION_THRESHOLD", self.verification_threshold);
        self.min_samples = env_usize("ROLLCALL_MIN_SAMPLES", self.min_samples);
        self.target_samples = env_usize("ROLLCALL_TARGET_SAMPLES", self.target_samples);
        self.mad_multiplier = env_f32("ROLLCALL_MAD_MULTIPLIER", self.mad_multiplier);
        self.stddev_multiplier = env_f32("ROLLCALL_STDDEV_MULTIPLIER", self.stddev_multiplier);
        self.recognition_deadline_ms =
            env_u64("ROLLCALL_DEADLINE_MS", self.recognition_deadline_ms);
        self.device_timeout_secs =
            env_u64("ROLLCALL_DEVICE_TIMEOUT_SECS", self.device_timeout_secs);
    }

    /// Path to the face detection model.
    pub fn detect_model_path(&self) -> String {
        self.model_dir
            .join("version-RFB-320.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the embedding model.
    pub fn embed_model_path(&self) -> String {
        self.model_dir
            .join("w600k_mbf.onnx")
            .to_string_lossy()
            .into_owned()
    }

    pub fn enroll_config(&self) -> EnrollConfig {
        EnrollConfig {
            target_samples: self.target_samples,
            min_samples: self.min_samples,
        }
    }

    pub fn aggregate_config(&self) -> AggregateConfig {
        AggregateConfig {
            min_samples: self.min_samples,
            mad_multiplier: self.mad_multiplier,
            stddev_multiplier: self.stddev_multiplier,
        }
    }

    pub fn recognition_config(&self, shift_filter: Option<String>) -> RecognitionConfig {
        RecognitionConfig {
            accept_threshold: self.accept_threshold,
            deadline: Duration::from_millis(self.recognition_deadline_ms),
            shift_filter,
        }
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_secs(self.device_timeout_secs)
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.accept_threshold, 0.48);
        assert_eq!(cfg.verification_threshold, 0.70);
        assert_eq!(cfg.min_samples, 5);
        assert!(cfg.target_samples >= cfg.min_samples);
        assert_eq!(cfg.recognition_deadline_ms, 2000);
    }

    #[test]
    fn test_toml_partial_override() {
        let cfg: Config = toml::from_str(
            "accept_threshold = 0.55\ndevice_address = \"10.0.0.5:9000\"",
        )
        .unwrap();
        assert_eq!(cfg.accept_threshold, 0.55);
        assert_eq!(cfg.device_address, "10.0.0.5:9000");
        // Untouched fields keep their defaults.
        assert_eq!(cfg.min_samples, 5);
    }

    #[test]
    fn test_toml_rejects_unknown_keys() {
        assert!(toml::from_str::<Config>("no_such_knob = 1").is_err());
    }

    #[test]
    fn test_derived_core_configs() {
        let cfg = Config::default();
        let agg = cfg.aggregate_config();
        assert_eq!(agg.mad_multiplier, 3.0);
        assert_eq!(agg.stddev_multiplier, 2.0);

        let rec = cfg.recognition_config(Some("day".into()));
        assert_eq!(rec.deadline, Duration::from_millis(2000));
        assert_eq!(rec.shift_filter.as_deref(), Some("day"));
    }
}
