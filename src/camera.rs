use crate::error::CameraError;
use crate::frame::{Frame, PixelFormat};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Outcome of one frame acquisition attempt
pub enum FrameRead {
    Frame(Frame),
    /// Transient failure: skip this iteration, no state reset
    Unavailable,
}

/// Abstract camera boundary: supplies frames and, once available, an
/// approximate frame rate. Implementations may block inside `read`; that is
/// the loop's one permitted blocking point.
pub trait CameraSource: Send {
    fn open(&mut self) -> Result<(), CameraError>;
    fn is_open(&self) -> bool;
    fn read(&mut self) -> FrameRead;
    /// Approximate frames-per-second, once the source has established it
    fn frame_rate(&self) -> Option<f64>;
    fn release(&mut self);
}

/// Reconnection policy for the camera boundary
#[derive(Debug, Clone)]
pub struct ConnectionPolicy {
    /// Consecutive bad frames tolerated before the handle is released
    pub max_consecutive_failures: u32,
    /// Delay before the next connection attempt after a failed open
    pub reconnect_delay: Duration,
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 100,
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// Tracks consecutive read failures and decides when the camera handle must
/// be released and reacquired. Only the connection handle is replaced;
/// detection state persists across the event.
pub struct ConnectionSupervisor {
    policy: ConnectionPolicy,
    consecutive_failures: u32,
    releases: u64,
}

impl ConnectionSupervisor {
    pub fn new(policy: ConnectionPolicy) -> Self {
        Self {
            policy,
            consecutive_failures: 0,
            releases: 0,
        }
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// True once the failure streak exceeds the tolerated maximum
    pub fn should_release(&self) -> bool {
        self.consecutive_failures > self.policy.max_consecutive_failures
    }

    /// Record that the handle was released; resets the failure streak
    pub fn note_release(&mut self) {
        self.releases += 1;
        self.consecutive_failures = 0;
    }

    pub fn reconnect_delay(&self) -> Duration {
        self.policy.reconnect_delay
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn releases(&self) -> u64 {
        self.releases
    }
}

/// Camera source that replays a directory of still images at a nominal
/// frame rate.
///
/// Stands in for a live connection when tuning detection parameters against
/// recorded footage; the directory is scanned on open and frames are served
/// in filename order.
pub struct ReplayCamera {
    dir: PathBuf,
    fps: f64,
    loop_playback: bool,
    /// Sleep one frame interval per read to emulate a blocking acquisition
    pace: bool,
    paths: Vec<PathBuf>,
    cursor: usize,
    frame_counter: u64,
    open: bool,
    epoch: Option<SystemTime>,
    frames_served: u64,
}

impl ReplayCamera {
    pub fn new<P: Into<PathBuf>>(dir: P, fps: f64, loop_playback: bool) -> Self {
        Self {
            dir: dir.into(),
            fps,
            loop_playback,
            pace: true,
            paths: Vec::new(),
            cursor: 0,
            frame_counter: 0,
            open: false,
            epoch: None,
            frames_served: 0,
        }
    }

    /// Disable the per-frame pacing sleep (tests and batch tools)
    pub fn without_pacing(mut self) -> Self {
        self.pace = false;
        self
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps)
    }

    fn is_image(path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("jpg") | Some("jpeg") | Some("png")
        )
    }
}

impl CameraSource for ReplayCamera {
    fn open(&mut self) -> Result<(), CameraError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| CameraError::Open {
            source_name: self.dir.display().to_string(),
            details: e.to_string(),
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| Self::is_image(p))
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(CameraError::Open {
                source_name: self.dir.display().to_string(),
                details: "no image files found".to_string(),
            });
        }

        info!(
            "Replay source opened: {} frames from {} at {:.1} fps",
            paths.len(),
            self.dir.display(),
            self.fps
        );

        self.paths = paths;
        self.open = true;
        if self.epoch.is_none() {
            self.epoch = Some(SystemTime::now());
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn read(&mut self) -> FrameRead {
        if !self.open {
            return FrameRead::Unavailable;
        }

        if self.pace {
            std::thread::sleep(self.frame_interval());
        }

        if self.cursor >= self.paths.len() {
            if self.loop_playback {
                self.cursor = 0;
            } else {
                // The stream came to an end; behaves like a broken
                // connection
                return FrameRead::Unavailable;
            }
        }

        let path = self.paths[self.cursor].clone();
        self.cursor += 1;

        let image = match image::open(&path) {
            Ok(image) => image.to_rgb8(),
            Err(e) => {
                warn!("Failed to decode {}: {}", path.display(), e);
                return FrameRead::Unavailable;
            }
        };

        let (width, height) = image.dimensions();
        let id = self.frame_counter;
        self.frame_counter += 1;
        let timestamp =
            self.epoch.expect("epoch set on open") + self.frame_interval().mul_f64(id as f64);

        self.frames_served += 1;
        debug!("Replayed frame {} from {}", id, path.display());

        FrameRead::Frame(Frame::new(
            id,
            timestamp,
            image.into_raw(),
            width,
            height,
            PixelFormat::Rgb24,
        ))
    }

    fn frame_rate(&self) -> Option<f64> {
        // Reported once playback has actually produced a frame, the way a
        // live source reports its rate only after capture begins
        if self.frames_served > 0 {
            Some(self.fps)
        } else {
            None
        }
    }

    fn release(&mut self) {
        if self.open {
            debug!("Replay source released at frame cursor {}", self.cursor);
        }
        self.open = false;
        self.paths.clear();
    }
}
