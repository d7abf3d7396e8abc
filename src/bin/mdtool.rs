//! Detection tuning harness: replays a directory of frames through the
//! frame differencer and reports per-frame scores, optionally dumping the
//! intermediate masks for inspection.

use anyhow::{bail, Result};
use clap::Parser;

use motioncam::{
    CameraSource, DetectionArtifacts, FrameDifferencer, FrameRead, MotioncamConfig, ReplayCamera,
};

#[derive(Parser, Debug)]
#[command(name = "mdtool")]
#[command(about = "Replay recorded frames through the motion detector and report scores")]
#[command(version)]
struct Args {
    /// Directory of frames to analyze
    #[arg(value_name = "DIR")]
    frames: String,

    /// Path to configuration file (detector section is used)
    #[arg(short, long, default_value = "motioncam.toml")]
    config: String,

    /// Override the motion score threshold
    #[arg(long, value_name = "COUNT")]
    threshold: Option<u64>,

    /// Override the difference intensity cut (0-255)
    #[arg(long, value_name = "LEVEL")]
    delta: Option<u8>,

    /// Use multi-frame differencing
    #[arg(long)]
    multi_frame: bool,

    /// Write raw/cleaned masks for each frame into this directory
    #[arg(long, value_name = "DIR")]
    dump_masks: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("motioncam=warn")),
        )
        .init();

    let config = MotioncamConfig::load_from_file(&args.config)?;
    let mut detector_config = config.detector.clone();
    if let Some(threshold) = args.threshold {
        detector_config.motion_threshold = threshold;
    }
    if let Some(delta) = args.delta {
        detector_config.delta_threshold = delta;
    }
    if args.multi_frame {
        detector_config.multi_frame = true;
    }
    if args.dump_masks.is_some() {
        detector_config.produce_diagnostics = true;
    }

    if let Some(dir) = &args.dump_masks {
        std::fs::create_dir_all(dir)?;
    }

    let mut differencer = FrameDifferencer::new(detector_config.clone());
    let mut camera = ReplayCamera::new(&args.frames, config.camera.fps, false).without_pacing();
    camera.open()?;

    println!(
        "frame differencer: delta {}, threshold {}, multi-frame {}",
        detector_config.delta_threshold, detector_config.motion_threshold, detector_config.multi_frame
    );

    let mut frames = 0u64;
    let mut detections = 0u64;

    loop {
        let frame = match camera.read() {
            FrameRead::Frame(frame) => frame,
            FrameRead::Unavailable => break,
        };

        let detection = differencer.evaluate(&frame)?;
        frames += 1;
        if detection.motion {
            detections += 1;
        }

        println!(
            "frame {:>6}  score {:>8}  {}",
            frame.id,
            detection.score,
            if detection.motion { "MOTION" } else { "" }
        );

        if let (Some(dir), Some(artifacts)) = (&args.dump_masks, detection.artifacts.as_ref()) {
            dump_masks(dir, frame.id, artifacts)?;
        }
    }

    if frames == 0 {
        bail!("no frames analyzed from {}", args.frames);
    }

    println!(
        "{} frames analyzed, {} with motion ({:.1}%)",
        frames,
        detections,
        (detections as f64 / frames as f64) * 100.0
    );
    Ok(())
}

fn dump_masks(dir: &str, frame_id: u64, artifacts: &DetectionArtifacts) -> Result<()> {
    let raw_path = format!("{}/frame_{:06}_raw.png", dir, frame_id);
    let cleaned_path = format!("{}/frame_{:06}_cleaned.png", dir, frame_id);
    artifacts.raw_mask.save(&raw_path)?;
    artifacts.cleaned_mask.save(&cleaned_path)?;
    Ok(())
}
