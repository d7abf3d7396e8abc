use crate::camera::{CameraSource, ConnectionPolicy, ConnectionSupervisor, FrameRead};
use crate::command::{command_channel, CommandKind, CommandReceiver, CommandSender};
use crate::config::MotioncamConfig;
use crate::detector::FrameDifferencer;
use crate::error::Result;
use crate::frame::{Frame, PixelFormat};
use crate::gate::MotionGate;
use crate::overlay::MotionLabelOverlay;
use crate::prealarm::PreAlarmBuffer;
use crate::recorder::RecordingController;
use crate::sink::{OutputLayout, SinkFactory};
use image::imageops::{self, FilterType};
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

/// The motion-driven recorder: a single-threaded cooperative loop tying the
/// camera boundary, motion gate, pre-alarm buffer and recording controller
/// together.
///
/// One iteration = poll commands, ensure the camera connection, acquire a
/// frame (the only blocking point), evaluate motion, step the recording
/// state machine. A `CommandSender` obtained at construction is the single
/// shutdown entry point; shutdown latency is bounded by the camera's read
/// blocking time.
pub struct MotionDrivenRecorder {
    camera: Box<dyn CameraSource>,
    gate: MotionGate,
    prealarm: PreAlarmBuffer,
    controller: RecordingController,
    commands: CommandReceiver,
    supervisor: ConnectionSupervisor,
    overlay: Option<MotionLabelOverlay>,
    scale_to: Option<(u32, u32)>,
    quit: bool,
    frames_processed: u64,
    prev_logged_left_seconds: Option<u64>,
}

impl MotionDrivenRecorder {
    /// Assemble a recorder from configuration plus the two external
    /// collaborators. Returns the recorder and the command sender that
    /// controls it.
    pub fn new(
        config: &MotioncamConfig,
        camera: Box<dyn CameraSource>,
        factory: Box<dyn SinkFactory>,
    ) -> (Self, CommandSender) {
        let differencer = FrameDifferencer::new(config.detector.clone());
        let gate = MotionGate::new(
            differencer,
            config.gate.warmup(),
            config.gate.min_motion_duration(),
        );

        let mut layout = OutputLayout::new(config.recording.output_directory.clone());
        if config.recording.daily_subfolders {
            layout = layout.with_daily_subfolders();
        }
        let controller = RecordingController::new(
            factory,
            layout,
            config.recording.codec.clone(),
            config.recording.output_frame_rate,
        );

        let supervisor = ConnectionSupervisor::new(ConnectionPolicy {
            max_consecutive_failures: config.camera.max_consecutive_failures,
            reconnect_delay: config.camera.reconnect_delay(),
        });

        let overlay = if config.recording.motion_label {
            MotionLabelOverlay::load(
                &config.recording.label_font_path,
                config.recording.label_font_size,
            )
        } else {
            None
        };

        let (sender, receiver) = command_channel();

        let recorder = Self {
            camera,
            gate,
            prealarm: PreAlarmBuffer::new(config.recording.preroll()),
            controller,
            commands: receiver,
            supervisor,
            overlay,
            scale_to: config.camera.scale_to,
            quit: false,
            frames_processed: 0,
            prev_logged_left_seconds: None,
        };

        (recorder, sender)
    }

    /// Run the processing loop until a `Quit` command is consumed.
    pub fn run(&mut self) -> Result<()> {
        info!("main loop started");

        while !self.quit {
            self.process_queue_commands();
            if self.quit {
                break;
            }

            if self.supervisor.should_release() {
                warn!(
                    "{} consecutive bad frames, releasing camera handle",
                    self.supervisor.consecutive_failures()
                );
                self.camera.release();
                self.supervisor.note_release();
            }

            if !self.camera.is_open() {
                info!("initializing connection to camera");
                if let Err(e) = self.camera.open() {
                    error!("can't initialize connection to camera: {}", e);
                    std::thread::sleep(self.supervisor.reconnect_delay());
                    continue;
                }
                self.gate.note_connection(SystemTime::now());
            }

            let frame = match self.camera.read() {
                FrameRead::Frame(frame) => {
                    self.supervisor.record_success();
                    frame
                }
                FrameRead::Unavailable => {
                    warn!("bad frame");
                    self.supervisor.record_failure();
                    continue;
                }
            };

            let frame = self.preprocess(frame);
            self.frames_processed += 1;

            if self.prealarm.capacity().is_none() {
                if let Some(fps) = self.camera.frame_rate() {
                    info!("FPS = {}", fps);
                    self.prealarm.set_frame_rate(fps);
                }
            }

            let observed_at = frame.timestamp;
            let motion = self.gate.evaluate(&frame, observed_at);

            if motion {
                self.log_left_seconds(observed_at);
            } else {
                self.prev_logged_left_seconds = None;
            }

            // Only the recorded copy carries the label; the pre-alarm
            // buffer keeps the clean frame
            let output_frame = if motion {
                match &self.overlay {
                    Some(overlay) => {
                        let remaining = self
                            .gate
                            .remaining_extension(observed_at)
                            .map(|d| d.as_secs())
                            .unwrap_or(0);
                        overlay.apply(&frame, remaining)
                    }
                    None => frame.clone(),
                }
            } else {
                frame.clone()
            };

            if let Err(e) = self.controller.step(motion, &output_frame, &mut self.prealarm) {
                error!("recording step failed: {}", e);
            }

            // Offered unconditionally, after the step so a flush seeds a
            // new session with exactly the frames preceding the trigger
            self.prealarm.push(frame);
        }

        if let Err(e) = self.controller.finish() {
            error!("failed to finalize recording during shutdown: {}", e);
        }
        self.camera.release();

        info!("main loop finished");
        Ok(())
    }

    /// Drain the command queue. The first `Quit` sets the terminate flag;
    /// duplicates queued behind it are consumed and ignored.
    fn process_queue_commands(&mut self) {
        while let Some(command) = self.commands.try_next() {
            info!("got new command - {:?} [{}]", command.kind, command.id);
            match command.kind {
                CommandKind::Quit => {
                    if self.quit {
                        debug!("quit already pending, ignoring duplicate");
                    }
                    self.quit = true;
                }
            }
        }
    }

    /// Apply the configured full-frame resize before buffering or analysis
    fn preprocess(&self, frame: Frame) -> Frame {
        let Some((width, height)) = self.scale_to else {
            return frame;
        };
        if frame.dimensions() == (width, height) {
            return frame;
        }

        match frame.format {
            PixelFormat::Rgb24 => {
                let Some(image) =
                    image::RgbImage::from_raw(frame.width, frame.height, frame.data.to_vec())
                else {
                    warn!("Frame {} payload malformed, skipping resize", frame.id);
                    return frame;
                };
                let resized = imageops::resize(&image, width, height, FilterType::Triangle);
                Frame::new(
                    frame.id,
                    frame.timestamp,
                    resized.into_raw(),
                    width,
                    height,
                    PixelFormat::Rgb24,
                )
            }
            PixelFormat::Gray8 => {
                let Some(image) =
                    image::GrayImage::from_raw(frame.width, frame.height, frame.data.to_vec())
                else {
                    warn!("Frame {} payload malformed, skipping resize", frame.id);
                    return frame;
                };
                let resized = imageops::resize(&image, width, height, FilterType::Triangle);
                Frame::new(
                    frame.id,
                    frame.timestamp,
                    resized.into_raw(),
                    width,
                    height,
                    PixelFormat::Gray8,
                )
            }
            PixelFormat::Mjpeg => match image::load_from_memory(&frame.data) {
                Ok(image) => {
                    let resized =
                        imageops::resize(&image.to_rgb8(), width, height, FilterType::Triangle);
                    Frame::new(
                        frame.id,
                        frame.timestamp,
                        resized.into_raw(),
                        width,
                        height,
                        PixelFormat::Rgb24,
                    )
                }
                Err(e) => {
                    warn!("Frame {} decode failed ({}), skipping resize", frame.id, e);
                    frame
                }
            },
        }
    }

    fn log_left_seconds(&mut self, now: SystemTime) {
        if let Some(remaining) = self.gate.remaining_extension(now) {
            let left = remaining.as_secs();
            if self.prev_logged_left_seconds != Some(left) {
                info!("left seconds for motion recording: {}", left);
                self.prev_logged_left_seconds = Some(left);
            }
        }
    }

    pub fn is_recording(&self) -> bool {
        self.controller.is_recording()
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn sessions_started(&self) -> u64 {
        self.controller.sessions_started()
    }

    pub fn sessions_completed(&self) -> u64 {
        self.controller.sessions_completed()
    }

    /// Number of camera handle releases forced by the failure policy
    pub fn camera_releases(&self) -> u64 {
        self.supervisor.releases()
    }

    /// Number of frames currently held by the motion window
    pub fn motion_window_len(&self) -> usize {
        self.gate.window_len()
    }
}
