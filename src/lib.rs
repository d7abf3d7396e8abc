pub mod camera;
pub mod command;
pub mod config;
pub mod detector;
pub mod error;
pub mod frame;
pub mod gate;
pub mod keyboard;
pub mod overlay;
pub mod prealarm;
pub mod recorder;
pub mod runner;
pub mod sink;

pub use camera::{CameraSource, ConnectionPolicy, ConnectionSupervisor, FrameRead, ReplayCamera};
pub use command::{command_channel, Command, CommandKind, CommandReceiver, CommandSender};
pub use config::MotioncamConfig;
pub use detector::{Detection, DetectionArtifacts, FrameDifferencer, MotionWindow};
pub use error::{CameraError, DetectorError, MotioncamError, Result, SinkError};
pub use frame::{Frame, PixelFormat};
pub use gate::{MotionGate, MotionState};
pub use keyboard::KeyboardQuitListener;
pub use overlay::MotionLabelOverlay;
pub use prealarm::PreAlarmBuffer;
pub use recorder::{RecorderState, RecordingController, StepEvent};
pub use runner::MotionDrivenRecorder;
pub use sink::{
    FrameSink, JpegSequenceSink, JpegSequenceSinkFactory, OutputLayout, SinkFactory, SinkSpec,
    SubfolderFn,
};
