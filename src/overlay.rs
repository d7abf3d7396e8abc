use crate::frame::{Frame, PixelFormat};
use image::codecs::jpeg::JpegEncoder;
use image::{Luma, Rgb};
use imageproc::drawing::draw_text_mut;
use rusttype::{Font, Scale};
use std::fs;
use tracing::{debug, warn};

const LABEL_X: i32 = 10;
const LABEL_Y: i32 = 20;
const REENCODE_QUALITY: u8 = 90;

/// Stamps a "MOTION DETECTED [n]" label on frames written while a motion
/// episode is active, where `n` is the number of seconds left on the
/// episode extension.
///
/// Only the recorded copy of a frame is labeled; pre-alarm footage stays
/// clean.
pub struct MotionLabelOverlay {
    font: Font<'static>,
    scale: Scale,
}

impl MotionLabelOverlay {
    /// Load the label font. Returns `None` with a warning when the font is
    /// missing or unparseable, so a bad font path degrades to unlabeled
    /// recordings instead of failing startup.
    pub fn load(font_path: &str, font_size: f32) -> Option<Self> {
        let data = match fs::read(font_path) {
            Ok(data) => data,
            Err(e) => {
                warn!(
                    "Failed to read label font '{}': {} - motion label disabled",
                    font_path, e
                );
                return None;
            }
        };

        let font = match Font::try_from_vec(data) {
            Some(font) => font,
            None => {
                warn!(
                    "Failed to parse label font '{}' - motion label disabled",
                    font_path
                );
                return None;
            }
        };

        debug!("Motion label overlay using font '{}'", font_path);
        Some(Self {
            font,
            scale: Scale::uniform(font_size),
        })
    }

    /// Return a labeled copy of the frame. Frames that cannot be labeled
    /// (undecodable payloads) are returned unchanged.
    pub fn apply(&self, frame: &Frame, remaining_seconds: u64) -> Frame {
        let text = format!("MOTION DETECTED [{}]", remaining_seconds);

        match frame.format {
            PixelFormat::Rgb24 => {
                let Some(mut image) =
                    image::RgbImage::from_raw(frame.width, frame.height, frame.data.to_vec())
                else {
                    warn!("Frame {} payload malformed, skipping label", frame.id);
                    return frame.clone();
                };
                draw_text_mut(
                    &mut image,
                    Rgb([255u8, 0, 0]),
                    LABEL_X,
                    LABEL_Y,
                    self.scale,
                    &self.font,
                    &text,
                );
                Frame::new(
                    frame.id,
                    frame.timestamp,
                    image.into_raw(),
                    frame.width,
                    frame.height,
                    PixelFormat::Rgb24,
                )
            }
            PixelFormat::Gray8 => {
                let Some(mut image) =
                    image::GrayImage::from_raw(frame.width, frame.height, frame.data.to_vec())
                else {
                    warn!("Frame {} payload malformed, skipping label", frame.id);
                    return frame.clone();
                };
                draw_text_mut(
                    &mut image,
                    Luma([255u8]),
                    LABEL_X,
                    LABEL_Y,
                    self.scale,
                    &self.font,
                    &text,
                );
                Frame::new(
                    frame.id,
                    frame.timestamp,
                    image.into_raw(),
                    frame.width,
                    frame.height,
                    PixelFormat::Gray8,
                )
            }
            PixelFormat::Mjpeg => {
                // Decode, draw, re-encode
                let mut image = match image::load_from_memory(&frame.data) {
                    Ok(image) => image.to_rgb8(),
                    Err(e) => {
                        warn!("Frame {} JPEG decode failed ({}), skipping label", frame.id, e);
                        return frame.clone();
                    }
                };
                draw_text_mut(
                    &mut image,
                    Rgb([255u8, 0, 0]),
                    LABEL_X,
                    LABEL_Y,
                    self.scale,
                    &self.font,
                    &text,
                );

                let mut buf = Vec::new();
                let mut encoder = JpegEncoder::new_with_quality(&mut buf, REENCODE_QUALITY);
                let (width, height) = image.dimensions();
                if let Err(e) =
                    encoder.encode(&image.into_raw(), width, height, image::ColorType::Rgb8)
                {
                    warn!("Frame {} JPEG re-encode failed ({}), skipping label", frame.id, e);
                    return frame.clone();
                }
                Frame::new(
                    frame.id,
                    frame.timestamp,
                    buf,
                    frame.width,
                    frame.height,
                    PixelFormat::Mjpeg,
                )
            }
        }
    }
}
