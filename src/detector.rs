use crate::config::DetectorConfig;
use crate::error::{DetectorError, Result};
use crate::frame::{Frame, PixelFormat};

use image::{imageops, imageops::FilterType, GrayImage, Luma, RgbImage};
use imageproc::{
    contrast::threshold,
    distance_transform::Norm,
    filter::gaussian_blur_f32,
    morphology::{dilate, erode},
};
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Dilation passes applied to the thresholded difference mask. Dilating more
/// than eroding merges nearby motion blobs while still removing speckle.
const DILATE_STEPS: u8 = 8;
const ERODE_STEPS: u8 = 4;

/// Outcome of evaluating one frame
#[derive(Debug)]
pub struct Detection {
    /// True when the cleaned difference mask exceeds the motion threshold
    pub motion: bool,
    /// Count of non-zero pixels in the cleaned mask
    pub score: u64,
    /// Intermediate masks, populated only when diagnostics are enabled
    pub artifacts: Option<DetectionArtifacts>,
}

/// Side-channel artifacts for tuning and debugging. Never part of the
/// motion decision.
#[derive(Debug, Clone)]
pub struct DetectionArtifacts {
    /// Binary mask straight after thresholding
    pub raw_mask: GrayImage,
    /// Mask after dilate/erode cleanup
    pub cleaned_mask: GrayImage,
}

/// Bounded FIFO of preprocessed grayscale frames, oldest first.
///
/// Owns copies of the frames it holds, so sliding the window never aliases
/// externally held frame data.
#[derive(Debug)]
pub struct MotionWindow {
    frames: VecDeque<GrayImage>,
    capacity: usize,
}

impl MotionWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a frame, evicting the oldest when full
    pub fn push(&mut self, frame: GrayImage) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most recently pushed frame
    fn newest(&self) -> Option<&GrayImage> {
        self.frames.back()
    }

    /// Second most recently pushed frame
    fn second_newest(&self) -> Option<&GrayImage> {
        let len = self.frames.len();
        if len >= 2 {
            self.frames.get(len - 2)
        } else {
            None
        }
    }

    fn clear(&mut self) {
        self.frames.clear();
    }
}

/// Frame-differencing motion detector.
///
/// Pure function over a sliding window of recent grayscale frames: each
/// `evaluate` call reports whether the new frame shows motion relative to
/// the window, plus a magnitude score. Holds no timing state; warm-up and
/// episode extension live in the gate.
pub struct FrameDifferencer {
    config: DetectorConfig,
    window: MotionWindow,
}

impl FrameDifferencer {
    pub fn new(config: DetectorConfig) -> Self {
        let depth = if config.multi_frame { 3 } else { 2 };
        debug!(
            "Initializing frame differencer (window depth {}, delta threshold {}, motion threshold {})",
            depth, config.delta_threshold, config.motion_threshold
        );
        Self {
            config,
            window: MotionWindow::new(depth),
        }
    }

    /// Evaluate a single frame against the motion window.
    ///
    /// Cold-start policy: until enough prior frames exist, the frame is
    /// absorbed into the window and no motion is reported.
    pub fn evaluate(&mut self, frame: &Frame) -> Result<Detection> {
        let gray = self.prepare(frame)?;

        // A resolution change invalidates the window; restart the cold-start
        // fill rather than differencing mismatched dimensions.
        let prev_dims = self.window.newest().map(|prev| prev.dimensions());
        if let Some(prev_dims) = prev_dims {
            if prev_dims != gray.dimensions() {
                debug!(
                    "Frame dimensions changed {:?} -> {:?}, restarting motion window",
                    prev_dims,
                    gray.dimensions()
                );
                self.window.clear();
            }
        }

        let priors_needed = self.window.capacity() - 1;
        if self.window.len() < priors_needed {
            trace!(
                "Motion window cold start ({}/{} prior frames)",
                self.window.len(),
                priors_needed
            );
            self.window.push(gray);
            return Ok(Detection {
                motion: false,
                score: 0,
                artifacts: None,
            });
        }

        let diff = if self.config.multi_frame {
            // Flag only regions that changed across two consecutive steps;
            // a single-frame flash produces an empty intersection.
            let prev = self.window.newest().expect("window has prior frames");
            let prev_prev = self.window.second_newest().expect("window has prior frames");
            let d1 = absdiff(&gray, prev);
            let d2 = absdiff(prev, prev_prev);
            bitwise_and(&d1, &d2)
        } else {
            let prev = self.window.newest().expect("window has prior frames");
            absdiff(&gray, prev)
        };

        let raw_mask = threshold(&diff, self.config.delta_threshold);
        let cleaned_mask = erode(
            &dilate(&raw_mask, Norm::LInf, DILATE_STEPS),
            Norm::LInf,
            ERODE_STEPS,
        );

        let score = count_nonzero(&cleaned_mask);
        let motion = score > self.config.motion_threshold;

        let artifacts = if self.config.produce_diagnostics {
            Some(DetectionArtifacts {
                raw_mask,
                cleaned_mask,
            })
        } else {
            None
        };

        trace!(
            "Frame {} differenced: score {} (threshold {}), motion {}",
            frame.id,
            score,
            self.config.motion_threshold,
            motion
        );

        self.window.push(gray);

        Ok(Detection {
            motion,
            score,
            artifacts,
        })
    }

    /// Number of frames currently held in the motion window
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Drop all window state, returning to cold start
    pub fn reset(&mut self) {
        self.window.clear();
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Grayscale conversion, optional downscale, blur and per-frame
    /// intensity normalization
    fn prepare(&self, frame: &Frame) -> Result<GrayImage> {
        let gray = match frame.format {
            PixelFormat::Gray8 => {
                GrayImage::from_raw(frame.width, frame.height, frame.data.to_vec()).ok_or(
                    DetectorError::MalformedFrame {
                        width: frame.width,
                        height: frame.height,
                        format: "Gray8",
                    },
                )?
            }
            PixelFormat::Rgb24 => rgb24_to_gray(frame)?,
            PixelFormat::Mjpeg => image::load_from_memory(&frame.data)
                .map_err(|e| DetectorError::Decode {
                    details: format!("MJPEG decode failed: {}", e),
                })?
                .to_luma8(),
        };

        let gray = if self.config.resize_before_detect && gray.width() > self.config.detect_width {
            let target_width = self.config.detect_width;
            let target_height =
                ((gray.height() as u64 * target_width as u64) / gray.width() as u64).max(1) as u32;
            imageops::resize(&gray, target_width, target_height, FilterType::Triangle)
        } else {
            gray
        };

        let blurred = gaussian_blur_f32(&gray, self.config.blur_sigma);
        Ok(normalize_minmax(&blurred))
    }
}

/// Convert an RGB24 frame to grayscale using the standard luminance formula
fn rgb24_to_gray(frame: &Frame) -> Result<GrayImage> {
    let rgb = RgbImage::from_raw(frame.width, frame.height, frame.data.to_vec()).ok_or(
        DetectorError::MalformedFrame {
            width: frame.width,
            height: frame.height,
            format: "Rgb24",
        },
    )?;

    let mut gray = GrayImage::new(frame.width, frame.height);
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let value =
            (0.299 * pixel[0] as f32 + 0.587 * pixel[1] as f32 + 0.114 * pixel[2] as f32) as u8;
        gray.put_pixel(x, y, Luma([value]));
    }
    Ok(gray)
}

/// Stretch the intensity range to [0, 255] to reduce sensitivity to
/// auto-exposure drift. A flat frame is returned unchanged.
fn normalize_minmax(image: &GrayImage) -> GrayImage {
    let raw = image.as_raw();
    let (mut min, mut max) = (u8::MAX, u8::MIN);
    for &v in raw {
        min = min.min(v);
        max = max.max(v);
    }
    if max <= min {
        return image.clone();
    }

    let range = (max - min) as u16;
    let data: Vec<u8> = raw
        .iter()
        .map(|&v| (((v - min) as u16 * 255) / range) as u8)
        .collect();
    GrayImage::from_raw(image.width(), image.height(), data)
        .expect("normalized buffer matches source dimensions")
}

/// Per-pixel absolute difference of two equally sized images
fn absdiff(a: &GrayImage, b: &GrayImage) -> GrayImage {
    debug_assert_eq!(a.dimensions(), b.dimensions());
    let data: Vec<u8> = a
        .as_raw()
        .iter()
        .zip(b.as_raw().iter())
        .map(|(&x, &y)| x.abs_diff(y))
        .collect();
    GrayImage::from_raw(a.width(), a.height(), data).expect("difference buffer matches dimensions")
}

/// Per-pixel bitwise AND of two equally sized images
fn bitwise_and(a: &GrayImage, b: &GrayImage) -> GrayImage {
    debug_assert_eq!(a.dimensions(), b.dimensions());
    let data: Vec<u8> = a
        .as_raw()
        .iter()
        .zip(b.as_raw().iter())
        .map(|(&x, &y)| x & y)
        .collect();
    GrayImage::from_raw(a.width(), a.height(), data).expect("AND buffer matches dimensions")
}

fn count_nonzero(image: &GrayImage) -> u64 {
    image.as_raw().iter().filter(|&&v| v != 0).count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn gray_frame(id: u64, image: GrayImage) -> Frame {
        let (width, height) = image.dimensions();
        Frame::new(
            id,
            SystemTime::now(),
            image.into_raw(),
            width,
            height,
            PixelFormat::Gray8,
        )
    }

    fn black(width: u32, height: u32) -> GrayImage {
        GrayImage::new(width, height)
    }

    fn with_square(width: u32, height: u32, x0: u32, y0: u32, side: u32) -> GrayImage {
        let mut image = GrayImage::new(width, height);
        for y in y0..(y0 + side).min(height) {
            for x in x0..(x0 + side).min(width) {
                image.put_pixel(x, y, Luma([255u8]));
            }
        }
        image
    }

    fn test_config() -> DetectorConfig {
        DetectorConfig {
            resize_before_detect: false,
            ..DetectorConfig::default()
        }
    }

    #[test]
    fn test_cold_start_single_frame_mode() {
        let mut differencer = FrameDifferencer::new(test_config());

        // First frame never reports motion, regardless of content
        let detection = differencer
            .evaluate(&gray_frame(1, with_square(160, 120, 10, 10, 60)))
            .unwrap();
        assert!(!detection.motion);
        assert_eq!(detection.score, 0);
        assert_eq!(differencer.window_len(), 1);
    }

    #[test]
    fn test_cold_start_multi_frame_mode() {
        let config = DetectorConfig {
            multi_frame: true,
            ..test_config()
        };
        let mut differencer = FrameDifferencer::new(config);

        // Window capacity is 3: the first two frames are absorbed silently
        for id in 1..=2 {
            let detection = differencer
                .evaluate(&gray_frame(id, with_square(160, 120, 10, 10, 60)))
                .unwrap();
            assert!(!detection.motion, "frame {} must not report motion", id);
        }
        assert_eq!(differencer.window_len(), 2);
    }

    #[test]
    fn test_static_scene_reports_no_motion() {
        let mut differencer = FrameDifferencer::new(test_config());

        differencer.evaluate(&gray_frame(1, black(160, 120))).unwrap();
        let detection = differencer.evaluate(&gray_frame(2, black(160, 120))).unwrap();
        assert!(!detection.motion);
        assert_eq!(detection.score, 0);
    }

    #[test]
    fn test_appearing_object_reports_motion() {
        let mut differencer = FrameDifferencer::new(test_config());

        differencer.evaluate(&gray_frame(1, black(160, 120))).unwrap();
        let detection = differencer
            .evaluate(&gray_frame(2, with_square(160, 120, 40, 30, 60)))
            .unwrap();
        assert!(detection.motion);
        assert!(detection.score > 1500);
    }

    #[test]
    fn test_multi_frame_suppresses_single_frame_flash() {
        let config = DetectorConfig {
            multi_frame: true,
            ..test_config()
        };
        let mut differencer = FrameDifferencer::new(config);

        differencer.evaluate(&gray_frame(1, black(160, 120))).unwrap();
        differencer.evaluate(&gray_frame(2, black(160, 120))).unwrap();
        // Flash appears in exactly one frame: the two differences do not
        // intersect, so the AND mask stays empty
        let detection = differencer
            .evaluate(&gray_frame(3, with_square(160, 120, 40, 30, 60)))
            .unwrap();
        assert!(!detection.motion);
        assert_eq!(detection.score, 0);
    }

    #[test]
    fn test_multi_frame_detects_sustained_motion() {
        let config = DetectorConfig {
            multi_frame: true,
            ..test_config()
        };
        let mut differencer = FrameDifferencer::new(config);

        differencer.evaluate(&gray_frame(1, black(200, 150))).unwrap();
        differencer
            .evaluate(&gray_frame(2, with_square(200, 150, 30, 40, 60)))
            .unwrap();
        let detection = differencer
            .evaluate(&gray_frame(3, with_square(200, 150, 60, 40, 60)))
            .unwrap();
        assert!(detection.motion, "score {} too low", detection.score);
    }

    #[test]
    fn test_resolution_change_restarts_window() {
        let mut differencer = FrameDifferencer::new(test_config());

        differencer.evaluate(&gray_frame(1, black(160, 120))).unwrap();
        let detection = differencer
            .evaluate(&gray_frame(2, with_square(320, 240, 40, 30, 120)))
            .unwrap();
        assert!(!detection.motion);
        assert_eq!(differencer.window_len(), 1);
    }

    #[test]
    fn test_diagnostics_only_when_enabled() {
        let mut differencer = FrameDifferencer::new(test_config());
        differencer.evaluate(&gray_frame(1, black(160, 120))).unwrap();
        let detection = differencer
            .evaluate(&gray_frame(2, with_square(160, 120, 40, 30, 60)))
            .unwrap();
        assert!(detection.artifacts.is_none());

        let config = DetectorConfig {
            produce_diagnostics: true,
            ..test_config()
        };
        let mut differencer = FrameDifferencer::new(config);
        differencer.evaluate(&gray_frame(1, black(160, 120))).unwrap();
        let detection = differencer
            .evaluate(&gray_frame(2, with_square(160, 120, 40, 30, 60)))
            .unwrap();
        let artifacts = detection.artifacts.expect("diagnostics requested");
        assert!(count_nonzero(&artifacts.raw_mask) > 0);
        assert!(count_nonzero(&artifacts.cleaned_mask) > 0);
    }

    #[test]
    fn test_resize_before_detect_shrinks_work() {
        let config = DetectorConfig {
            resize_before_detect: true,
            detect_width: 100,
            // The downscale shrinks the moving blob roughly by the square of
            // the scale factor; use a lower cut so it still registers
            motion_threshold: 300,
            ..DetectorConfig::default()
        };
        let mut differencer = FrameDifferencer::new(config);

        differencer.evaluate(&gray_frame(1, black(400, 300))).unwrap();
        let detection = differencer
            .evaluate(&gray_frame(2, with_square(400, 300, 100, 80, 120)))
            .unwrap();
        assert!(detection.motion, "score {} too low", detection.score);
    }

    #[test]
    fn test_rgb_frames_are_converted() {
        let mut differencer = FrameDifferencer::new(test_config());

        let dark = Frame::new(
            1,
            SystemTime::now(),
            vec![0u8; 160 * 120 * 3],
            160,
            120,
            PixelFormat::Rgb24,
        );
        let mut bright_data = vec![0u8; 160 * 120 * 3];
        for y in 30..90u32 {
            for x in 40..100u32 {
                let base = ((y * 160 + x) * 3) as usize;
                bright_data[base] = 255;
                bright_data[base + 1] = 255;
                bright_data[base + 2] = 255;
            }
        }
        let bright = Frame::new(
            2,
            SystemTime::now(),
            bright_data,
            160,
            120,
            PixelFormat::Rgb24,
        );

        differencer.evaluate(&dark).unwrap();
        let detection = differencer.evaluate(&bright).unwrap();
        assert!(detection.motion);
    }

    #[test]
    fn test_malformed_frame_is_an_error() {
        let mut differencer = FrameDifferencer::new(test_config());
        let bogus = Frame::new(
            1,
            SystemTime::now(),
            vec![0u8; 10],
            160,
            120,
            PixelFormat::Gray8,
        );
        assert!(differencer.evaluate(&bogus).is_err());
    }

    #[test]
    fn test_window_never_exceeds_capacity() {
        let mut differencer = FrameDifferencer::new(test_config());
        for id in 0..10 {
            differencer
                .evaluate(&gray_frame(id, black(160, 120)))
                .unwrap();
            assert!(differencer.window_len() <= 2);
        }
    }
}
