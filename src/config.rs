use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Top-level configuration for the motioncam system
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct MotioncamConfig {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Directory of still frames replayed as the camera feed
    #[serde(default = "default_camera_source")]
    pub source: String,

    /// Nominal frame rate of the source
    #[serde(default = "default_camera_fps")]
    pub fps: f64,

    /// Restart from the first frame when the source is exhausted
    #[serde(default = "default_loop_playback")]
    pub loop_playback: bool,

    /// Scale every acquired frame to this resolution (width, height)
    pub scale_to: Option<(u32, u32)>,

    /// Consecutive bad frames tolerated before the handle is released
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Delay between reconnection attempts in seconds
    #[serde(default = "default_reconnect_delay_seconds")]
    pub reconnect_delay_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DetectorConfig {
    /// Intensity cut applied to the difference image (0-255)
    #[serde(default = "default_delta_threshold")]
    pub delta_threshold: u8,

    /// Non-zero pixel count above which a frame counts as motion
    #[serde(default = "default_motion_threshold")]
    pub motion_threshold: u64,

    /// Gaussian blur sigma applied before differencing
    #[serde(default = "default_blur_sigma")]
    pub blur_sigma: f32,

    /// AND two consecutive differences to suppress single-frame noise
    #[serde(default = "default_multi_frame")]
    pub multi_frame: bool,

    /// Downscale frames before differencing
    #[serde(default = "default_resize_before_detect")]
    pub resize_before_detect: bool,

    /// Target width for the detection downscale (aspect preserved)
    #[serde(default = "default_detect_width")]
    pub detect_width: u32,

    /// Retain intermediate masks on every evaluation
    #[serde(default = "default_produce_diagnostics")]
    pub produce_diagnostics: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GateConfig {
    /// Settling period after camera connection before detection is trusted
    #[serde(default = "default_warmup_seconds")]
    pub warmup_seconds: u64,

    /// Minimum duration a motion episode is held after the last detection
    #[serde(default = "default_min_motion_duration_seconds")]
    pub min_motion_duration_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RecordingConfig {
    /// Seconds of footage buffered ahead of a trigger
    #[serde(default = "default_preroll_seconds")]
    pub preroll_seconds: u32,

    /// Base path for recorded sessions
    #[serde(default = "default_output_directory")]
    pub output_directory: String,

    /// Codec identifier passed to the sink
    #[serde(default = "default_codec")]
    pub codec: String,

    /// Frame rate stamped on recorded sessions
    #[serde(default = "default_output_frame_rate")]
    pub output_frame_rate: f64,

    /// JPEG quality for encoded frames (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Group sessions under YYYY/MM/DD subfolders
    #[serde(default = "default_daily_subfolders")]
    pub daily_subfolders: bool,

    /// Stamp a motion label on recorded frames
    #[serde(default = "default_motion_label")]
    pub motion_label: bool,

    /// TrueType font file used for the motion label
    #[serde(default = "default_label_font_path")]
    pub label_font_path: String,

    /// Font size for the motion label
    #[serde(default = "default_label_font_size")]
    pub label_font_size: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LogConfig {
    /// Also write logs to a daily-rolled file
    #[serde(default = "default_file_logging")]
    pub file_logging: bool,

    /// Directory for rolled log files
    #[serde(default = "default_log_directory")]
    pub directory: String,
}

impl MotioncamConfig {
    /// Load configuration from the default file location
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("motioncam.toml")
    }

    /// Load configuration from a specific file path, with environment
    /// variable overrides (MOTIONCAM_CAMERA__FPS and friends)
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(Environment::with_prefix("MOTIONCAM").separator("__"))
            .build()?;

        let config: MotioncamConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.fps <= 0.0 {
            return Err(ConfigError::Message(
                "camera.fps must be greater than 0".to_string(),
            ));
        }
        if self.camera.max_consecutive_failures == 0 {
            return Err(ConfigError::Message(
                "camera.max_consecutive_failures must be greater than 0".to_string(),
            ));
        }
        if self.detector.detect_width == 0 {
            return Err(ConfigError::Message(
                "detector.detect_width must be greater than 0".to_string(),
            ));
        }
        if self.detector.blur_sigma <= 0.0 {
            return Err(ConfigError::Message(
                "detector.blur_sigma must be greater than 0".to_string(),
            ));
        }
        if self.recording.output_frame_rate <= 0.0 {
            return Err(ConfigError::Message(
                "recording.output_frame_rate must be greater than 0".to_string(),
            ));
        }
        if self.recording.jpeg_quality == 0 || self.recording.jpeg_quality > 100 {
            return Err(ConfigError::Message(
                "recording.jpeg_quality must be in 1..=100".to_string(),
            ));
        }
        if let Some((w, h)) = self.camera.scale_to {
            if w == 0 || h == 0 {
                return Err(ConfigError::Message(
                    "camera.scale_to dimensions must be greater than 0".to_string(),
                ));
            }
        }
        if self.recording.motion_label && self.recording.label_font_path.is_empty() {
            return Err(ConfigError::Message(
                "recording.label_font_path is required when recording.motion_label is enabled"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Default configuration rendered as TOML (for --print-config)
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|e| format!("# failed to render defaults: {}", e))
    }
}

impl GateConfig {
    pub fn warmup(&self) -> Duration {
        Duration::from_secs(self.warmup_seconds)
    }

    pub fn min_motion_duration(&self) -> Duration {
        Duration::from_secs(self.min_motion_duration_seconds)
    }
}

impl CameraConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_seconds)
    }
}

impl RecordingConfig {
    pub fn preroll(&self) -> Duration {
        Duration::from_secs(self.preroll_seconds as u64)
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: default_camera_source(),
            fps: default_camera_fps(),
            loop_playback: default_loop_playback(),
            scale_to: None,
            max_consecutive_failures: default_max_consecutive_failures(),
            reconnect_delay_seconds: default_reconnect_delay_seconds(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            delta_threshold: default_delta_threshold(),
            motion_threshold: default_motion_threshold(),
            blur_sigma: default_blur_sigma(),
            multi_frame: default_multi_frame(),
            resize_before_detect: default_resize_before_detect(),
            detect_width: default_detect_width(),
            produce_diagnostics: default_produce_diagnostics(),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            warmup_seconds: default_warmup_seconds(),
            min_motion_duration_seconds: default_min_motion_duration_seconds(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            preroll_seconds: default_preroll_seconds(),
            output_directory: default_output_directory(),
            codec: default_codec(),
            output_frame_rate: default_output_frame_rate(),
            jpeg_quality: default_jpeg_quality(),
            daily_subfolders: default_daily_subfolders(),
            motion_label: default_motion_label(),
            label_font_path: default_label_font_path(),
            label_font_size: default_label_font_size(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file_logging: default_file_logging(),
            directory: default_log_directory(),
        }
    }
}

fn default_camera_source() -> String {
    "./frames".to_string()
}

fn default_camera_fps() -> f64 {
    20.0
}

fn default_loop_playback() -> bool {
    false
}

fn default_max_consecutive_failures() -> u32 {
    100
}

fn default_reconnect_delay_seconds() -> u64 {
    5
}

fn default_delta_threshold() -> u8 {
    10
}

fn default_motion_threshold() -> u64 {
    1500
}

fn default_blur_sigma() -> f32 {
    2.0
}

fn default_multi_frame() -> bool {
    false
}

fn default_resize_before_detect() -> bool {
    false
}

fn default_detect_width() -> u32 {
    500
}

fn default_produce_diagnostics() -> bool {
    false
}

fn default_warmup_seconds() -> u64 {
    5
}

fn default_min_motion_duration_seconds() -> u64 {
    10
}

fn default_preroll_seconds() -> u32 {
    5
}

fn default_output_directory() -> String {
    "./video".to_string()
}

fn default_codec() -> String {
    "MJPG".to_string()
}

fn default_output_frame_rate() -> f64 {
    20.0
}

fn default_jpeg_quality() -> u8 {
    90
}

fn default_daily_subfolders() -> bool {
    false
}

fn default_motion_label() -> bool {
    false
}

fn default_label_font_path() -> String {
    String::new()
}

fn default_label_font_size() -> f32 {
    24.0
}

fn default_file_logging() -> bool {
    false
}

fn default_log_directory() -> String {
    "./logs".to_string()
}
