//! Image normalization to PNG.
//!
//! Generation parameters embedded by image generators survive the
//! conversion: a PNG `parameters` text chunk is copied as-is, and an EXIF
//! `UserComment` (JPEG/WebP) becomes a `parameters` text chunk.

use crate::error::{Result, ShelfError};
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::debug;

/// Text chunk keyword holding generation parameters.
pub const PARAMETERS_KEYWORD: &str = "parameters";

const EXIF_POINTER_TAG: u16 = 0x8769;
const USER_COMMENT_TAG: u16 = 0x9286;

/// Convert any supported image to a PNG at `dest`.
///
/// The source format is detected from the file contents, so `src` may carry
/// any extension. When metadata cannot be carried over the image is
/// re-encoded without it.
pub fn convert_to_png(src: &Path, dest: &Path) -> Result<()> {
    let reader = ImageReader::open(src)
        .map_err(|e| ShelfError::io_with_path(e, src))?
        .with_guessed_format()
        .map_err(|e| ShelfError::io_with_path(e, src))?;
    let format = reader.format();
    let mut decoder = reader.into_decoder()?;
    let exif = decoder.exif_metadata().ok().flatten();
    let image = DynamicImage::from_decoder(decoder)?;

    let parameters = match format {
        Some(ImageFormat::Png) => png_parameters(src),
        _ => exif.as_deref().and_then(exif_user_comment),
    };

    if let Some(parameters) = parameters {
        match write_png_with_text(&image, dest, &parameters) {
            Ok(()) => {
                debug!("Converted {} to PNG with parameters", src.display());
                return Ok(());
            }
            Err(e) => debug!("Failed to keep image metadata for {}: {}", src.display(), e),
        }
    }

    image.save_with_format(dest, ImageFormat::Png)?;
    debug!("Converted {} to PNG", src.display());
    Ok(())
}

/// `parameters` text of a PNG file, from any of its text chunk kinds.
pub fn png_parameters(path: &Path) -> Option<String> {
    let file = File::open(path).ok()?;
    let reader = png::Decoder::new(file).read_info().ok()?;
    let info = reader.info();

    if let Some(chunk) = info
        .uncompressed_latin1_text
        .iter()
        .find(|c| c.keyword == PARAMETERS_KEYWORD)
    {
        return Some(chunk.text.clone());
    }
    if let Some(chunk) = info
        .compressed_latin1_text
        .iter()
        .find(|c| c.keyword == PARAMETERS_KEYWORD)
    {
        return chunk.get_text().ok();
    }
    info.utf8_text
        .iter()
        .find(|c| c.keyword == PARAMETERS_KEYWORD)
        .and_then(|c| c.get_text().ok())
}

fn write_png_with_text(image: &DynamicImage, dest: &Path, parameters: &str) -> Result<()> {
    let rgba = image.to_rgba8();
    let file = File::create(dest).map_err(|e| ShelfError::io_with_path(e, dest))?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), rgba.width(), rgba.height());
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);

    let added = if parameters.is_ascii() {
        encoder.add_text_chunk(PARAMETERS_KEYWORD.to_string(), parameters.to_string())
    } else {
        encoder.add_itxt_chunk(PARAMETERS_KEYWORD.to_string(), parameters.to_string())
    };
    added.map_err(png_error)?;

    let mut writer = encoder.write_header().map_err(png_error)?;
    writer.write_image_data(rgba.as_raw()).map_err(png_error)?;
    writer.finish().map_err(png_error)?;
    Ok(())
}

fn png_error(err: png::EncodingError) -> ShelfError {
    ShelfError::Image {
        message: err.to_string(),
    }
}

// ========================================
// EXIF UserComment
// ========================================

#[derive(Clone, Copy)]
enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    fn u16(self, data: &[u8], at: usize) -> Option<u16> {
        let bytes: [u8; 2] = data.get(at..at + 2)?.try_into().ok()?;
        Some(match self {
            ByteOrder::Little => u16::from_le_bytes(bytes),
            ByteOrder::Big => u16::from_be_bytes(bytes),
        })
    }

    fn u32(self, data: &[u8], at: usize) -> Option<u32> {
        let bytes: [u8; 4] = data.get(at..at + 4)?.try_into().ok()?;
        Some(match self {
            ByteOrder::Little => u32::from_le_bytes(bytes),
            ByteOrder::Big => u32::from_be_bytes(bytes),
        })
    }
}

/// Find an IFD entry and return its type, count and value offset field.
fn find_entry(tiff: &[u8], order: ByteOrder, ifd: usize, tag: u16) -> Option<(u16, u32, usize)> {
    let count = order.u16(tiff, ifd)? as usize;
    (0..count)
        .map(|i| ifd + 2 + i * 12)
        .find(|&entry| order.u16(tiff, entry) == Some(tag))
        .and_then(|entry| {
            Some((
                order.u16(tiff, entry + 2)?,
                order.u32(tiff, entry + 4)?,
                entry + 8,
            ))
        })
}

/// Decode the EXIF `UserComment` tag from raw EXIF data.
///
/// Accepts data with or without the `Exif\0\0` header. The 8-byte character
/// code prefix selects the text encoding.
pub fn exif_user_comment(exif: &[u8]) -> Option<String> {
    let tiff = exif.strip_prefix(b"Exif\0\0").unwrap_or(exif);
    let order = match tiff.get(..4)? {
        [b'I', b'I', 42, 0] => ByteOrder::Little,
        [b'M', b'M', 0, 42] => ByteOrder::Big,
        _ => return None,
    };

    let ifd0 = order.u32(tiff, 4)? as usize;
    let (_, _, pointer_field) = find_entry(tiff, order, ifd0, EXIF_POINTER_TAG)?;
    let exif_ifd = order.u32(tiff, pointer_field)? as usize;
    let (_, count, value_field) = find_entry(tiff, order, exif_ifd, USER_COMMENT_TAG)?;

    let count = count as usize;
    let start = if count <= 4 {
        value_field
    } else {
        order.u32(tiff, value_field)? as usize
    };
    let value = tiff.get(start..start.checked_add(count)?)?;
    let (code, text) = (value.get(..8)?, &value[8..]);

    let decoded = match code {
        b"UNICODE\0" => {
            // Generators write UTF-16BE regardless of the TIFF byte order
            let units: Vec<u16> = text
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => String::from_utf8_lossy(text).into_owned(),
    };

    let decoded = decoded.trim_end_matches(['\0', ' ']).to_string();
    (!decoded.is_empty()).then_some(decoded)
}
