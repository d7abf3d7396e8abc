use crate::error::Result;
use crate::frame::Frame;
use crate::prealarm::PreAlarmBuffer;
use crate::sink::{OutputLayout, SinkFactory, SinkSpec};
use chrono::Utc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Observable outcome of one controller step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEvent {
    None,
    /// A new session was opened; the pre-alarm buffer was flushed into it
    Started { preroll_frames: usize },
    /// The active session was finalized
    Stopped,
}

/// Recording state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
}

/// An open recording session, exclusively owned by the controller.
///
/// Exists only between a start and stop transition; finalizing the sink
/// consumes it, so write-after-close is unrepresentable.
struct RecordingSession {
    sink: Box<dyn crate::sink::FrameSink>,
    started_at: SystemTime,
    width: u32,
    height: u32,
    frames_written: u64,
    dimension_warning_logged: bool,
}

/// State machine coordinating motion decisions, the pre-alarm buffer and
/// the output sink.
pub struct RecordingController {
    factory: Box<dyn SinkFactory>,
    layout: OutputLayout,
    codec: String,
    output_frame_rate: f64,
    session: Option<RecordingSession>,
    /// Latched after a failed sink open; cleared when motion drops, so each
    /// motion episode attempts the transition at most once
    trigger_blocked: bool,
    sessions_started: u64,
    sessions_completed: u64,
}

impl RecordingController {
    pub fn new(
        factory: Box<dyn SinkFactory>,
        layout: OutputLayout,
        codec: String,
        output_frame_rate: f64,
    ) -> Self {
        Self {
            factory,
            layout,
            codec,
            output_frame_rate,
            session: None,
            trigger_blocked: false,
            sessions_started: 0,
            sessions_completed: 0,
        }
    }

    /// Advance the state machine by one frame.
    pub fn step(
        &mut self,
        motion: bool,
        frame: &Frame,
        prealarm: &mut PreAlarmBuffer,
    ) -> Result<StepEvent> {
        if !motion {
            self.trigger_blocked = false;
            if self.session.is_some() {
                info!("stopping recording...");
                self.stop()?;
                return Ok(StepEvent::Stopped);
            }
            return Ok(StepEvent::None);
        }

        match self.session.as_mut() {
            None => {
                if self.trigger_blocked {
                    return Ok(StepEvent::None);
                }
                info!("starting recording...");
                match self.start(frame, prealarm) {
                    Ok(preroll_frames) => Ok(StepEvent::Started { preroll_frames }),
                    Err(e) => {
                        self.trigger_blocked = true;
                        Err(e)
                    }
                }
            }
            Some(session) => {
                // Mid-session resolution changes are not honored: the
                // session finishes at its original resolution and new
                // dimensions take effect on the next start transition.
                if frame.dimensions() != (session.width, session.height) {
                    if !session.dimension_warning_logged {
                        warn!(
                            "Frame resolution changed to {}x{} during a {}x{} session, ignoring until the session ends",
                            frame.width, frame.height, session.width, session.height
                        );
                        session.dimension_warning_logged = true;
                    }
                    return Ok(StepEvent::None);
                }

                session.sink.write_frame(frame)?;
                session.frames_written += 1;
                Ok(StepEvent::None)
            }
        }
    }

    /// Stop any active session. The shutdown path calls this to guarantee
    /// the sink is cleanly finalized before the loop exits.
    pub fn finish(&mut self) -> Result<()> {
        if self.session.is_some() {
            info!("stopping recording...");
            self.stop()?;
        }
        Ok(())
    }

    pub fn state(&self) -> RecorderState {
        if self.session.is_some() {
            RecorderState::Recording
        } else {
            RecorderState::Idle
        }
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    pub fn sessions_started(&self) -> u64 {
        self.sessions_started
    }

    pub fn sessions_completed(&self) -> u64 {
        self.sessions_completed
    }

    /// Open a sink bound to the current frame dimensions, seed it with the
    /// pre-roll footage, then write the trigger frame.
    fn start(&mut self, frame: &Frame, prealarm: &mut PreAlarmBuffer) -> Result<usize> {
        let now = Utc::now();
        let path = self.layout.session_path(now)?;
        let spec = SinkSpec {
            path,
            codec: self.codec.clone(),
            frame_rate: self.output_frame_rate,
            width: frame.width,
            height: frame.height,
        };

        let mut sink = self.factory.open(&spec)?;
        let preroll_frames = prealarm.flush_into(sink.as_mut())?;
        sink.write_frame(frame)?;

        debug!(
            "Recording session opened at {} ({} pre-roll frames)",
            spec.path.display(),
            preroll_frames
        );

        self.session = Some(RecordingSession {
            sink,
            started_at: frame.timestamp,
            width: frame.width,
            height: frame.height,
            frames_written: preroll_frames as u64 + 1,
            dimension_warning_logged: false,
        });
        self.sessions_started += 1;
        Ok(preroll_frames)
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            let elapsed = session
                .started_at
                .elapsed()
                .map(|d| format!("{:.1}s", d.as_secs_f64()))
                .unwrap_or_else(|_| "unknown".to_string());
            debug!(
                "Closing session after {} ({} frames written)",
                elapsed, session.frames_written
            );
            session.sink.finalize()?;
            self.sessions_completed += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{MotioncamError, SinkError};
    use crate::frame::PixelFormat;
    use crate::sink::FrameSink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, SystemTime};

    fn test_frame(id: u64, width: u32, height: u32) -> Frame {
        Frame::new(
            id,
            SystemTime::now(),
            vec![0u8; (width * height) as usize],
            width,
            height,
            PixelFormat::Gray8,
        )
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum SinkLog {
        Opened { width: u32, height: u32 },
        Wrote(u64),
        Finalized,
    }

    struct MockSink {
        log: Arc<Mutex<Vec<SinkLog>>>,
    }

    impl FrameSink for MockSink {
        fn write_frame(&mut self, frame: &Frame) -> Result<()> {
            self.log.lock().unwrap().push(SinkLog::Wrote(frame.id));
            Ok(())
        }

        fn finalize(self: Box<Self>) -> Result<()> {
            self.log.lock().unwrap().push(SinkLog::Finalized);
            Ok(())
        }
    }

    struct MockFactory {
        log: Arc<Mutex<Vec<SinkLog>>>,
        opens: Arc<AtomicUsize>,
        fail: bool,
    }

    impl SinkFactory for MockFactory {
        fn open(&self, spec: &SinkSpec) -> Result<Box<dyn FrameSink>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(MotioncamError::Sink(SinkError::Open {
                    path: spec.path.display().to_string(),
                    details: "mock failure".to_string(),
                }));
            }
            self.log.lock().unwrap().push(SinkLog::Opened {
                width: spec.width,
                height: spec.height,
            });
            Ok(Box::new(MockSink {
                log: Arc::clone(&self.log),
            }))
        }
    }

    fn controller_with(
        fail: bool,
    ) -> (
        RecordingController,
        Arc<Mutex<Vec<SinkLog>>>,
        Arc<AtomicUsize>,
    ) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let opens = Arc::new(AtomicUsize::new(0));
        let factory = MockFactory {
            log: Arc::clone(&log),
            opens: Arc::clone(&opens),
            fail,
        };
        let controller = RecordingController::new(
            Box::new(factory),
            OutputLayout::new("/tmp/motioncam-test"),
            "MJPG".to_string(),
            20.0,
        );
        (controller, log, opens)
    }

    fn filled_prealarm(frames: u64, fps: f64) -> PreAlarmBuffer {
        let mut buffer = PreAlarmBuffer::new(Duration::from_secs(5));
        buffer.set_frame_rate(fps);
        for id in 0..frames {
            buffer.push(test_frame(id, 32, 24));
        }
        buffer
    }

    #[test]
    fn test_idle_without_motion_stays_idle() {
        let (mut controller, log, _) = controller_with(false);
        let mut prealarm = filled_prealarm(10, 10.0);

        let event = controller
            .step(false, &test_frame(100, 32, 24), &mut prealarm)
            .unwrap();
        assert_eq!(event, StepEvent::None);
        assert_eq!(controller.state(), RecorderState::Idle);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_trigger_flushes_preroll_before_live_frame() {
        let (mut controller, log, _) = controller_with(false);
        // 5s at 10 fps: capacity 50; 200 pushes leave ids 150..200
        let mut prealarm = filled_prealarm(200, 10.0);

        let event = controller
            .step(true, &test_frame(200, 32, 24), &mut prealarm)
            .unwrap();
        assert_eq!(event, StepEvent::Started { preroll_frames: 50 });
        assert!(controller.is_recording());
        assert!(prealarm.is_empty());

        let log = log.lock().unwrap();
        assert_eq!(log[0], SinkLog::Opened { width: 32, height: 24 });
        // The last 50 frames seen before the trigger, in arrival order,
        // followed immediately by the triggering frame
        let written: Vec<u64> = log
            .iter()
            .filter_map(|entry| match entry {
                SinkLog::Wrote(id) => Some(*id),
                _ => None,
            })
            .collect();
        let mut expected: Vec<u64> = (150..200).collect();
        expected.push(200);
        assert_eq!(written, expected);
    }

    #[test]
    fn test_round_trip_opens_and_closes_once() {
        let (mut controller, log, opens) = controller_with(false);
        let mut prealarm = filled_prealarm(0, 10.0);

        controller
            .step(true, &test_frame(1, 32, 24), &mut prealarm)
            .unwrap();
        for id in 2..=5 {
            let event = controller
                .step(true, &test_frame(id, 32, 24), &mut prealarm)
                .unwrap();
            assert_eq!(event, StepEvent::None);
        }
        let event = controller
            .step(false, &test_frame(6, 32, 24), &mut prealarm)
            .unwrap();
        assert_eq!(event, StepEvent::Stopped);
        assert_eq!(controller.state(), RecorderState::Idle);

        assert_eq!(opens.load(Ordering::SeqCst), 1);
        let log = log.lock().unwrap();
        assert_eq!(log.iter().filter(|e| **e == SinkLog::Finalized).count(), 1);
        // Frames 1..=5 written while motion continued
        let written: Vec<u64> = log
            .iter()
            .filter_map(|entry| match entry {
                SinkLog::Wrote(id) => Some(*id),
                _ => None,
            })
            .collect();
        assert_eq!(written, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_dimension_change_mid_session_is_ignored() {
        let (mut controller, log, opens) = controller_with(false);
        let mut prealarm = filled_prealarm(0, 10.0);

        controller
            .step(true, &test_frame(1, 32, 24), &mut prealarm)
            .unwrap();
        // Resolution changes while recording: frame dropped, session stays
        controller
            .step(true, &test_frame(2, 64, 48), &mut prealarm)
            .unwrap();
        assert!(controller.is_recording());
        controller
            .step(true, &test_frame(3, 32, 24), &mut prealarm)
            .unwrap();
        controller
            .step(false, &test_frame(4, 64, 48), &mut prealarm)
            .unwrap();

        // New dimensions honored on the next start transition
        controller
            .step(true, &test_frame(5, 64, 48), &mut prealarm)
            .unwrap();
        assert_eq!(opens.load(Ordering::SeqCst), 2);

        let log = log.lock().unwrap();
        let written: Vec<u64> = log
            .iter()
            .filter_map(|entry| match entry {
                SinkLog::Wrote(id) => Some(*id),
                _ => None,
            })
            .collect();
        assert_eq!(written, vec![1, 3, 5]);
        assert!(log.contains(&SinkLog::Opened {
            width: 64,
            height: 48
        }));
    }

    #[test]
    fn test_open_failure_leaves_idle_and_blocks_retry() {
        let (mut controller, _, opens) = controller_with(true);
        let mut prealarm = filled_prealarm(10, 10.0);

        let result = controller.step(true, &test_frame(1, 32, 24), &mut prealarm);
        assert!(result.is_err());
        assert_eq!(controller.state(), RecorderState::Idle);

        // Motion continues: the same episode does not retry the open
        for id in 2..=5 {
            let event = controller
                .step(true, &test_frame(id, 32, 24), &mut prealarm)
                .unwrap();
            assert_eq!(event, StepEvent::None);
        }
        assert_eq!(opens.load(Ordering::SeqCst), 1);

        // Motion drops and returns: a fresh episode may try again
        controller
            .step(false, &test_frame(6, 32, 24), &mut prealarm)
            .unwrap();
        let _ = controller.step(true, &test_frame(7, 32, 24), &mut prealarm);
        assert_eq!(opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_finish_closes_active_session() {
        let (mut controller, log, _) = controller_with(false);
        let mut prealarm = filled_prealarm(0, 10.0);

        controller
            .step(true, &test_frame(1, 32, 24), &mut prealarm)
            .unwrap();
        assert!(controller.is_recording());

        controller.finish().unwrap();
        assert_eq!(controller.state(), RecorderState::Idle);
        assert_eq!(
            log.lock()
                .unwrap()
                .iter()
                .filter(|e| **e == SinkLog::Finalized)
                .count(),
            1
        );

        // Idempotent: a second finish is a no-op
        controller.finish().unwrap();
        assert_eq!(controller.sessions_completed(), 1);
    }
}
