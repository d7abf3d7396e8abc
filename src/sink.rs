use crate::error::{Result, SinkError};
use crate::frame::{Frame, PixelFormat};
use chrono::{DateTime, Datelike, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use serde::Serialize;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Parameters a sink is constructed with
#[derive(Debug, Clone)]
pub struct SinkSpec {
    /// Session output path (a directory for sequence sinks)
    pub path: PathBuf,
    /// Codec identifier
    pub codec: String,
    /// Frame rate stamped on the session
    pub frame_rate: f64,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
}

/// Abstract destination that persists recorded frames.
///
/// `finalize` consumes the sink, so a closed sink can never be written to
/// again and is finalized at most once per session.
pub trait FrameSink: Send {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;
    fn finalize(self: Box<Self>) -> Result<()>;
}

/// Opens sinks for new recording sessions
pub trait SinkFactory: Send {
    fn open(&self, spec: &SinkSpec) -> Result<Box<dyn FrameSink>>;
}

/// Optional mapping from a session timestamp to a subfolder path
pub type SubfolderFn = Box<dyn Fn(DateTime<Utc>) -> Option<PathBuf> + Send>;

/// Chooses where a new session's output lives under the output root.
///
/// Purely a naming concern; subfolders are created on demand when the
/// generator starts returning a new path.
pub struct OutputLayout {
    root: PathBuf,
    subfolder_fn: Option<SubfolderFn>,
    prev_subfolder: Option<PathBuf>,
}

impl OutputLayout {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            subfolder_fn: None,
            prev_subfolder: None,
        }
    }

    /// Install a custom subfolder generator
    pub fn with_subfolder_fn(mut self, subfolder_fn: SubfolderFn) -> Self {
        self.subfolder_fn = Some(subfolder_fn);
        self
    }

    /// Group sessions under YYYY/MM/DD subfolders
    pub fn with_daily_subfolders(self) -> Self {
        self.with_subfolder_fn(Box::new(|dts| {
            Some(PathBuf::from(format!(
                "{:04}/{:02}/{:02}",
                dts.year(),
                dts.month(),
                dts.day()
            )))
        }))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Compute (and create, if needed) the path for a session starting now
    pub fn session_path(&mut self, now: DateTime<Utc>) -> Result<PathBuf> {
        let session_name = format!("video_{}", now.format("%Y%m%dT%H%M%S"));

        let dir = match self.subfolder_fn.as_ref().and_then(|f| f(now)) {
            Some(subfolder) => {
                let dir = self.root.join(&subfolder);
                if self.prev_subfolder.as_deref() != Some(subfolder.as_path()) {
                    info!("Adding new output directory: {}", dir.display());
                    fs::create_dir_all(&dir).map_err(|e| SinkError::DirectoryCreation {
                        path: dir.display().to_string(),
                        source: e,
                    })?;
                    self.prev_subfolder = Some(subfolder);
                }
                dir
            }
            None => self.root.clone(),
        };

        Ok(dir.join(session_name))
    }
}

/// Metadata written alongside a finished session
#[derive(Debug, Serialize)]
struct SessionMetadata {
    event_id: String,
    codec: String,
    frame_rate: f64,
    width: u32,
    height: u32,
    frame_count: u64,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

/// Sink that stores a session as a directory of numbered JPEG frames plus a
/// `session.json` metadata file.
pub struct JpegSequenceSink {
    dir: PathBuf,
    spec: SinkSpec,
    quality: u8,
    event_id: Uuid,
    started_at: DateTime<Utc>,
    frames_written: u64,
}

impl JpegSequenceSink {
    fn frame_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("frame_{:06}.jpg", index))
    }
}

impl FrameSink for JpegSequenceSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let path = self.frame_path(self.frames_written + 1);

        match frame.format {
            PixelFormat::Mjpeg => {
                // Already JPEG encoded: store the payload as-is
                fs::write(&path, frame.data.as_slice())
                    .map_err(|e| SinkError::Write { source: e })?;
            }
            PixelFormat::Gray8 | PixelFormat::Rgb24 => {
                let color = match frame.format {
                    PixelFormat::Gray8 => ColorType::L8,
                    _ => ColorType::Rgb8,
                };
                let file = fs::File::create(&path).map_err(|e| SinkError::Write { source: e })?;
                let mut writer = BufWriter::new(file);
                let mut encoder = JpegEncoder::new_with_quality(&mut writer, self.quality);
                encoder
                    .encode(frame.data.as_slice(), frame.width, frame.height, color)
                    .map_err(|e| SinkError::Encode {
                        details: e.to_string(),
                    })?;
            }
        }

        self.frames_written += 1;
        Ok(())
    }

    fn finalize(self: Box<Self>) -> Result<()> {
        let metadata = SessionMetadata {
            event_id: self.event_id.to_string(),
            codec: self.spec.codec.clone(),
            frame_rate: self.spec.frame_rate,
            width: self.spec.width,
            height: self.spec.height,
            frame_count: self.frames_written,
            started_at: self.started_at,
            finished_at: Utc::now(),
        };

        let json = serde_json::to_string_pretty(&metadata).map_err(|e| SinkError::Finalize {
            details: e.to_string(),
        })?;
        fs::write(self.dir.join("session.json"), json)
            .map_err(|e| SinkError::Write { source: e })?;

        info!(
            "Finalized session {} ({} frames) at {}",
            self.event_id,
            self.frames_written,
            self.dir.display()
        );
        Ok(())
    }
}

/// Factory producing `JpegSequenceSink`s
pub struct JpegSequenceSinkFactory {
    quality: u8,
}

impl JpegSequenceSinkFactory {
    pub fn new(quality: u8) -> Self {
        Self { quality }
    }
}

impl SinkFactory for JpegSequenceSinkFactory {
    fn open(&self, spec: &SinkSpec) -> Result<Box<dyn FrameSink>> {
        fs::create_dir_all(&spec.path).map_err(|e| SinkError::DirectoryCreation {
            path: spec.path.display().to_string(),
            source: e,
        })?;

        let event_id = Uuid::new_v4();
        debug!(
            "Opened session {} at {} ({}x{} @ {:.1} fps, codec {})",
            event_id,
            spec.path.display(),
            spec.width,
            spec.height,
            spec.frame_rate,
            spec.codec
        );

        Ok(Box::new(JpegSequenceSink {
            dir: spec.path.clone(),
            spec: spec.clone(),
            quality: self.quality,
            event_id,
            started_at: Utc::now(),
            frames_written: 0,
        }))
    }
}
