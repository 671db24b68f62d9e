//! Decoding of image XObjects.

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::{Document, Object};
use tracing::trace;

/// Decode an image XObject stream, if it is one we can read.
///
/// Supports DCT (JPEG) streams and 8-bit DeviceRGB / DeviceGray samples.
pub(crate) fn decode_image_xobject(doc: &Document, object: &Object) -> Option<DynamicImage> {
    let Object::Stream(stream) = object else {
        return None;
    };
    let dict = &stream.dict;
    if dict.get(b"Subtype").ok()?.as_name().ok()? != b"Image" {
        return None;
    }

    let width = u32::try_from(dict.get(b"Width").ok()?.as_i64().ok()?).ok()?;
    let height = u32::try_from(dict.get(b"Height").ok()?.as_i64().ok()?).ok()?;

    match first_name(dict.get(b"Filter").ok()) {
        Some(b"DCTDecode") => {
            return image::load_from_memory_with_format(&stream.content, ImageFormat::Jpeg).ok();
        }
        Some(filter @ (b"JPXDecode" | b"CCITTFaxDecode" | b"JBIG2Decode")) => {
            trace!("Unsupported image filter {}", String::from_utf8_lossy(filter));
            return None;
        }
        _ => {}
    }

    let bits = dict
        .get(b"BitsPerComponent")
        .ok()
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(8);
    if bits != 8 {
        trace!("Unsupported bits per component: {}", bits);
        return None;
    }

    let color_space = match dict.get(b"ColorSpace") {
        Ok(Object::Reference(id)) => doc.get_object(*id).ok().and_then(|o| first_name(Some(o))),
        other => first_name(other.ok()),
    }
    .unwrap_or(b"DeviceRGB");

    let samples = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());
    let pixels = width as usize * height as usize;

    match color_space {
        b"DeviceRGB" | b"RGB" if samples.len() >= pixels * 3 => {
            RgbImage::from_raw(width, height, samples[..pixels * 3].to_vec())
                .map(DynamicImage::ImageRgb8)
        }
        b"DeviceGray" | b"G" if samples.len() >= pixels => {
            GrayImage::from_raw(width, height, samples[..pixels].to_vec())
                .map(DynamicImage::ImageLuma8)
        }
        _ => {
            trace!(
                "Could not decode {}x{} image ({} bytes, colorspace {})",
                width,
                height,
                samples.len(),
                String::from_utf8_lossy(color_space)
            );
            None
        }
    }
}

/// Name of a `Name` object or the first name of an array.
fn first_name(object: Option<&Object>) -> Option<&[u8]> {
    match object? {
        Object::Name(name) => Some(name.as_slice()),
        Object::Array(items) => items.first().and_then(|o| o.as_name().ok()),
        _ => None,
    }
}
