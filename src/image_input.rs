use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader, RgbImage};
use std::io::Cursor;

use crate::error::{AppError, Result};

/// Canonical in-memory image: 8-bit RGB, orientation baked into pixel order.
pub type Bitmap = RgbImage;

/// Formats accepted from the file upload input.
pub const UPLOAD_FORMATS: &[ImageFormat] = &[
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::WebP,
    ImageFormat::Tiff,
];

/// Prefix of the URIs produced by [`to_data_uri`].
pub const DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// Longest side of the copy echoed back to the browser.
const DISPLAY_MAX_SIDE: u32 = 512;

/// Where the bytes came from. Camera captures are accepted in whatever format
/// the browser produced; uploads are held to [`UPLOAD_FORMATS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    Upload,
    Camera,
}

pub fn normalize(bytes: &[u8], source: ImageSource) -> Result<Bitmap> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| AppError::Decode(image::ImageError::IoError(e)))?;

    if source == ImageSource::Upload {
        if let Some(format) = reader.format() {
            if !UPLOAD_FORMATS.contains(&format) {
                return Err(AppError::UnsupportedFormat(format!("{format:?}")));
            }
        }
    }

    let mut decoder = reader.into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);

    Ok(image.into_rgb8())
}

/// PNG `data:` URI of the bitmap, for echoing the input back on the result page.
/// Large inputs are downscaled to fit [`DISPLAY_MAX_SIDE`].
pub fn to_data_uri(bitmap: &Bitmap) -> Result<String> {
    let (width, height) = bitmap.dimensions();
    let longest = width.max(height);
    let resized;
    let display = if longest > DISPLAY_MAX_SIDE {
        let scale = f64::from(DISPLAY_MAX_SIDE) / f64::from(longest);
        let fit = |side: u32| ((f64::from(side) * scale).round() as u32).max(1);
        resized = imageops::resize(bitmap, fit(width), fit(height), FilterType::Triangle);
        &resized
    } else {
        bitmap
    };

    let mut png = Vec::new();
    display
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(AppError::Encode)?;
    Ok(format!("{DATA_URI_PREFIX}{}", STANDARD.encode(png)))
}
