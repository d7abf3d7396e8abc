use thiserror::Error;

#[derive(Error, Debug)]
pub enum MotioncamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Detector error: {0}")]
    Detector(#[from] DetectorError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("System error: {message}")]
    System { message: String },
}

impl MotioncamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }
}

/// Errors raised by camera sources and the connection boundary.
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera source '{source_name}': {details}")]
    Open {
        source_name: String,
        details: String,
    },
}

/// Errors raised during frame analysis.
#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Frame decode failed: {details}")]
    Decode { details: String },

    #[error("Frame data does not match {width}x{height} {format}")]
    MalformedFrame {
        width: u32,
        height: u32,
        format: &'static str,
    },
}

/// Errors raised while opening or writing a recording sink.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to create directory {path}: {source}")]
    DirectoryCreation {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to open sink at {path}: {details}")]
    Open { path: String, details: String },

    #[error("Frame encode failed: {details}")]
    Encode { details: String },

    #[error("Failed to finalize sink: {details}")]
    Finalize { details: String },

    #[error("Frame write failed: {source}")]
    Write { source: std::io::Error },
}

pub type Result<T> = std::result::Result<T, MotioncamError>;
