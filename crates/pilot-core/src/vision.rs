use std::io::Cursor;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::{DynamicImage, ImageFormat, ImageReader};

use crate::error::CaptureError;

/// One captured still of the game view: the encoded bytes plus decoded dimensions.
///
/// Bytes are shared so an `Observation` can be cloned into prompts/logs without copying the image.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    bytes: Arc<[u8]>,
    format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Decodes the whole image to validate it. Empty, cut-off, undecodable and single-colour
    /// input (a hidden or minimised window renders black) is reported as unavailable.
    pub fn decode(bytes: Vec<u8>) -> Result<Self, CaptureError> {
        if bytes.is_empty() {
            return Err(CaptureError::Unavailable("empty image".to_string()));
        }
        let reader = ImageReader::new(Cursor::new(bytes.as_slice()))
            .with_guessed_format()
            .map_err(|e| CaptureError::Unavailable(format!("image sniff failed: {e}")))?;
        let format = reader
            .format()
            .ok_or_else(|| CaptureError::Unavailable("unknown image format".to_string()))?;
        if is_truncated(format, &bytes) {
            return Err(CaptureError::Unavailable("truncated image".to_string()));
        }
        let image = reader
            .decode()
            .map_err(|e| CaptureError::Unavailable(format!("image decode failed: {e}")))?;
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(CaptureError::Unavailable("zero-sized image".to_string()));
        }
        if is_uniform(&image) {
            return Err(CaptureError::Unavailable("blank image".to_string()));
        }
        Ok(Self {
            bytes: bytes.into(),
            format,
            width,
            height,
        })
    }

    pub fn format_name(&self) -> &'static str {
        self.format.extensions_str().first().copied().unwrap_or("png")
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    /// `data:` URL for OpenAI-style `image_url` content parts.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type(), self.to_base64())
    }

    /// Reticle position: the crosshair sits at the image centre.
    pub fn center(&self) -> (f32, f32) {
        (self.width as f32 / 2.0, self.height as f32 / 2.0)
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x.is_finite()
            && y.is_finite()
            && x >= 0.0
            && y >= 0.0
            && x < self.width as f32
            && y < self.height as f32
    }
}

/// Decoders may stop once the pixel data is complete, so a body cut off in the trailer still
/// decodes. Check the end marker explicitly.
fn is_truncated(format: ImageFormat, bytes: &[u8]) -> bool {
    match format {
        ImageFormat::Png => !bytes.ends_with(PNG_IEND),
        ImageFormat::Jpeg => !bytes.ends_with(&[0xFF, 0xD9]),
        _ => false,
    }
}

const PNG_IEND: &[u8] = b"\0\0\0\0IEND\xAEB`\x82";

fn is_uniform(image: &DynamicImage) -> bool {
    let bpp = usize::from(image.color().bytes_per_pixel());
    let raw = image.as_bytes();
    let Some(first) = raw.get(..bpp) else {
        return true;
    };
    raw.chunks_exact(bpp).all(|px| px == first)
}

/// Physical screen size the input control service addresses, which may differ from the
/// captured image size (scaled screenshots, HiDPI).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenGeometry {
    pub width: u32,
    pub height: u32,
}

impl ScreenGeometry {
    /// Maps an image-space pixel to screen space.
    pub fn scale_from(&self, frame: &Frame, x: u32, y: u32) -> (i32, i32) {
        let sx = (x as f64 * self.width as f64 / frame.width as f64).round() as i32;
        let sy = (y as f64 * self.height as f64 / frame.height as f64).round() as i32;
        (sx, sy)
    }
}

/// A small gradient, so it passes the blank-frame check.
#[cfg(test)]
pub(crate) fn scene_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| image::Rgb([x as u8, y as u8, 90]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .expect("png encode");
    out.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_reads_png_dimensions() {
        let frame = Frame::decode(scene_png(640, 480)).unwrap();
        assert_eq!((frame.width, frame.height), (640, 480));
        assert_eq!(frame.mime_type(), "image/png");
        assert_eq!(frame.center(), (320.0, 240.0));
        assert!(frame.data_url().starts_with("data:image/png;base64,"));
    }

    #[test]
    fn decode_rejects_empty_and_garbage() {
        assert!(Frame::decode(Vec::new()).is_err());
        assert!(Frame::decode(b"definitely not an image".to_vec()).is_err());
    }

    #[test]
    fn decode_rejects_truncated_png() {
        let png = scene_png(640, 480);
        let cut = png[..png.len() - 12].to_vec();
        let err = Frame::decode(cut).unwrap_err();
        assert!(err.to_string().contains("truncated"));

        let mid = png[..png.len() / 2].to_vec();
        assert!(Frame::decode(mid).is_err());
    }

    #[test]
    fn decode_rejects_single_colour_frames() {
        let mut out = Cursor::new(Vec::new());
        image::RgbImage::new(640, 480)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        let err = Frame::decode(out.into_inner()).unwrap_err();
        assert!(err.to_string().contains("blank image"));
    }

    #[test]
    fn bounds_are_half_open() {
        let frame = Frame::decode(scene_png(10, 10)).unwrap();
        assert!(frame.contains(0.0, 9.9));
        assert!(!frame.contains(10.0, 5.0));
        assert!(!frame.contains(-1.0, 5.0));
        assert!(!frame.contains(f32::NAN, 5.0));
    }

    #[test]
    fn screen_scaling_rounds_to_nearest_pixel() {
        let frame = Frame::decode(scene_png(640, 480)).unwrap();
        let screen = ScreenGeometry {
            width: 1920,
            height: 1080,
        };
        assert_eq!(screen.scale_from(&frame, 320, 240), (960, 540));
        assert_eq!(screen.scale_from(&frame, 1, 1), (3, 2));
    }
}
