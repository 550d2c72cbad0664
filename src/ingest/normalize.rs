//! Raw buffer to interleaved RGB conversion.

use image::RgbImage;

use crate::error::ViewerError;
use crate::frame::{Frame, PixelFormat};

/// Convert a source-native buffer into an interleaved RGB image.
///
/// 4:2:0 inputs produce an image with the luma plane's dimensions. YUV uses
/// the BT.601 full-range matrix.
pub fn normalize(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<RgbImage, ViewerError> {
    let expected = format.frame_len(width, height).ok_or_else(|| {
        ViewerError::TransientDecode(format!("{} frame dimensions overflow", format.name()))
    })?;
    if pixels.len() < expected {
        return Err(ViewerError::TransientDecode(format!(
            "{} frame length mismatch: expected {}, got {}",
            format.name(),
            expected,
            pixels.len()
        )));
    }
    let pixels = &pixels[..expected];

    let rgb = match format {
        PixelFormat::Rgb24 => pixels.to_vec(),
        PixelFormat::Bgr24 => pixels
            .chunks_exact(3)
            .flat_map(|bgr| [bgr[2], bgr[1], bgr[0]])
            .collect(),
        PixelFormat::Gray8 => pixels.iter().flat_map(|&l| [l, l, l]).collect(),
        PixelFormat::I420 => yuv420_to_rgb(pixels, width, height, Chroma::Planar),
        PixelFormat::Nv12 => yuv420_to_rgb(pixels, width, height, Chroma::Interleaved),
    };

    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| ViewerError::TransientDecode("RGB buffer size mismatch".to_string()))
}

/// Convert a whole frame; see [`normalize`].
pub fn normalize_frame(frame: &Frame) -> Result<RgbImage, ViewerError> {
    normalize(frame.data(), frame.width, frame.height, frame.format)
}

#[derive(Clone, Copy)]
enum Chroma {
    Planar,
    Interleaved,
}

fn yuv420_to_rgb(pixels: &[u8], width: u32, height: u32, chroma: Chroma) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let cw = w.div_ceil(2);
    let ch = h.div_ceil(2);
    let y_plane = w * h;
    let c_plane = cw * ch;

    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let c = (j / 2) * cw + (i / 2);
            let (u, v) = match chroma {
                Chroma::Planar => (pixels[y_plane + c], pixels[y_plane + c_plane + c]),
                Chroma::Interleaved => (pixels[y_plane + c * 2], pixels[y_plane + c * 2 + 1]),
            };
            let y = pixels[j * w + i] as f32;
            let u = u as f32 - 128.0;
            let v = v as f32 - 128.0;

            let r = y + 1.402_f32 * v;
            let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
            let b = y + 1.772_f32 * u;

            let offset = (j * w + i) * 3;
            rgb[offset] = clamp_to_u8(r);
            rgb[offset + 1] = clamp_to_u8(g);
            rgb[offset + 2] = clamp_to_u8(b);
        }
    }
    rgb
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
