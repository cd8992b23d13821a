use std::path::PathBuf;

/// Application configuration, loaded from `ROLLCALL_*` environment variables.
/// The tool is interactive-only and takes no CLI flags.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory holding gallery.json, attendance.csv, and faces/.
    pub data_dir: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Maximum embedding distance accepted as a match.
    pub match_tolerance: f32,
    /// Minimum mean frame brightness for detection to run.
    pub min_brightness: f32,
    /// Minimum seconds between accepted marks for one identity.
    pub cooldown_secs: i64,
    /// Time budget per liveness challenge step, in seconds.
    pub challenge_step_secs: u64,
    /// Frames discarded at session start for camera AGC/AE stabilization.
    pub warmup_frames: usize,
}

impl Config {
    /// Load configuration from the environment with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("ROLLCALL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("XDG_DATA_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| {
                        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                        PathBuf::from(home).join(".local/share")
                    })
                    .join("rollcall")
            });

        let model_dir = std::env::var("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        Self {
            camera_device: std::env::var("ROLLCALL_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            data_dir,
            model_dir,
            match_tolerance: env_f32("ROLLCALL_MATCH_TOLERANCE", 0.5),
            min_brightness: env_f32(
                "ROLLCALL_MIN_BRIGHTNESS",
                rollcall_hw::frame::DEFAULT_MIN_BRIGHTNESS,
            ),
            cooldown_secs: env_i64(
                "ROLLCALL_COOLDOWN_SECS",
                rollcall_store::ledger::DEFAULT_COOLDOWN_SECS,
            ),
            challenge_step_secs: env_u64("ROLLCALL_CHALLENGE_STEP_SECS", 5),
            warmup_frames: env_usize("ROLLCALL_WARMUP_FRAMES", 4),
        }
    }

    pub fn gallery_path(&self) -> PathBuf {
        self.data_dir.join("gallery.json")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("attendance.csv")
    }

    pub fn faces_dir(&self) -> PathBuf {
        self.data_dir.join("faces")
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace embedding model.
    pub fn embedder_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
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
