use crate::detector::FrameDifferencer;
use crate::frame::Frame;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Gate state: detection is suppressed until the camera has settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    /// Waiting out the warm-up period after (re)connection
    Cooling { connected_at: Option<SystemTime> },
    /// Delegating frames to the differencer
    Armed,
}

/// Snapshot of the gate's motion bookkeeping
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionState {
    /// True while a motion episode (including extension) is in progress
    pub active: bool,
    /// Instant of the most recent positive detection
    pub triggered_at: Option<SystemTime>,
    /// Score reported by the last differencer evaluation
    pub last_score: u64,
}

/// Wraps the frame differencer with a warm-up timer and a minimum-duration
/// extension.
///
/// Warm-up models cameras needing a settling period (auto-exposure,
/// auto-focus) before frame content is trustworthy. The extension keeps a
/// motion episode alive for a minimum duration after the last positive
/// detection, so intermittent detections do not flap the recording.
pub struct MotionGate {
    differencer: FrameDifferencer,
    warmup: Duration,
    min_motion_duration: Duration,
    state: GateState,
    triggered_at: Option<SystemTime>,
    last_score: u64,
    episode_active: bool,
}

impl MotionGate {
    pub fn new(
        differencer: FrameDifferencer,
        warmup: Duration,
        min_motion_duration: Duration,
    ) -> Self {
        Self {
            differencer,
            warmup,
            min_motion_duration,
            state: GateState::Cooling { connected_at: None },
            triggered_at: None,
            last_score: 0,
            episode_active: false,
        }
    }

    /// Record a (re)connection instant. While still cooling this restarts
    /// the warm-up clock; once armed the gate stays armed.
    pub fn note_connection(&mut self, now: SystemTime) {
        if let GateState::Cooling { .. } = self.state {
            debug!("Camera connected, warm-up runs for {:?}", self.warmup);
            self.state = GateState::Cooling {
                connected_at: Some(now),
            };
        }
    }

    /// Evaluate one frame: true means "treat as in-motion for recording".
    pub fn evaluate(&mut self, frame: &Frame, now: SystemTime) -> bool {
        if !self.armed(now) {
            return false;
        }

        let detected = match self.differencer.evaluate(frame) {
            Ok(detection) => {
                self.last_score = detection.score;
                detection.motion
            }
            Err(e) => {
                // Expected conditions are modeled as states, so anything
                // surfacing here is a malformed or undecodable frame; skip
                // it rather than ending the episode early.
                warn!("Frame {} could not be evaluated: {}", frame.id, e);
                false
            }
        };

        if detected {
            if !self.episode_active {
                info!("something moved!");
            }
            self.triggered_at = Some(now);
            self.episode_active = true;
            return true;
        }

        // Debounce: hold the episode until the minimum duration has elapsed
        // since the last positive detection
        if let Some(triggered_at) = self.triggered_at {
            if now < triggered_at + self.min_motion_duration {
                return true;
            }
            self.triggered_at = None;
        }

        self.episode_active = false;
        false
    }

    /// Time left on the current extension, if an episode is active
    pub fn remaining_extension(&self, now: SystemTime) -> Option<Duration> {
        let triggered_at = self.triggered_at?;
        (triggered_at + self.min_motion_duration)
            .duration_since(now)
            .ok()
    }

    pub fn state(&self) -> MotionState {
        MotionState {
            active: self.episode_active || self.triggered_at.is_some(),
            triggered_at: self.triggered_at,
            last_score: self.last_score,
        }
    }

    pub fn triggered_at(&self) -> Option<SystemTime> {
        self.triggered_at
    }

    pub fn last_score(&self) -> u64 {
        self.last_score
    }

    /// Number of frames held by the underlying motion window
    pub fn window_len(&self) -> usize {
        self.differencer.window_len()
    }

    fn armed(&mut self, now: SystemTime) -> bool {
        match self.state {
            GateState::Armed => true,
            GateState::Cooling { connected_at: None } => false,
            GateState::Cooling {
                connected_at: Some(connected_at),
            } => {
                if now >= connected_at + self.warmup {
                    debug!("Warm-up complete, motion detection armed");
                    self.state = GateState::Armed;
                    true
                } else {
                    false
                }
            }
        }
    }
}
