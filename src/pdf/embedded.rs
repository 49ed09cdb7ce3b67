//! Embedded image extraction
//!
//! Turns an image XObject into self-contained encoded bytes. JPEG and
//! JPEG 2000 streams are returned untouched; raw sample streams have no
//! standalone encoding, so their pixels are rebuilt and packaged as PNG.

use super::filters::{apply_filters, filter_chain, stream_bytes};
use crate::error::{Error, Result};
use image::{DynamicImage, GrayImage, RgbImage};
use lopdf::{Dictionary, Object, Stream};

/// Upper bound on decoded pixel count for raw sample images
const MAX_IMAGE_PIXELS: u64 = 100_000_000;

/// Encoding of the extracted image bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddedFormat {
    Jpeg,
    Jpeg2000,
    Png,
}

impl EmbeddedFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            EmbeddedFormat::Jpeg => "image/jpeg",
            EmbeddedFormat::Jpeg2000 => "image/jp2",
            EmbeddedFormat::Png => "image/png",
        }
    }

    fn decoder_format(&self) -> Option<image::ImageFormat> {
        match self {
            EmbeddedFormat::Jpeg => Some(image::ImageFormat::Jpeg),
            EmbeddedFormat::Png => Some(image::ImageFormat::Png),
            EmbeddedFormat::Jpeg2000 => None,
        }
    }
}

/// Image bytes extracted from a document
#[derive(Debug, Clone)]
pub struct EmbeddedImage {
    /// Page index (0-indexed)
    pub page: usize,
    /// Image index on the page
    pub index: usize,
    /// Encoding of `data`
    pub format: EmbeddedFormat,
    /// Width declared by the image dictionary (0 if absent)
    pub width: u32,
    /// Height declared by the image dictionary (0 if absent)
    pub height: u32,
    /// Encoded image bytes
    pub data: Vec<u8>,
}

impl EmbeddedImage {
    /// Decode the encoded bytes into a pixel grid
    pub fn decode(&self) -> Result<DynamicImage> {
        let format = self.format.decoder_format().ok_or_else(|| Error::ImageDecode {
            page: self.page,
            index: self.index,
            reason: format!("no decoder for {}", self.format.mime_type()),
        })?;

        image::load_from_memory_with_format(&self.data, format).map_err(|e| Error::ImageDecode {
            page: self.page,
            index: self.index,
            reason: e.to_string(),
        })
    }
}

/// Follow indirect references until a direct object is reached
pub(crate) fn resolve<'a>(doc: &'a lopdf::Document, obj: &'a Object) -> Option<&'a Object> {
    let mut current = obj;
    for _ in 0..32 {
        match current {
            Object::Reference(id) => current = doc.get_object(*id).ok()?,
            other => return Some(other),
        }
    }
    None
}

fn dict_value<'a>(doc: &'a lopdf::Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    dict.get(key).ok().and_then(|obj| resolve(doc, obj))
}

fn dict_int(doc: &lopdf::Document, dict: &Dictionary, key: &[u8]) -> Option<i64> {
    dict_value(doc, dict, key).and_then(|obj| obj.as_i64().ok())
}

fn dict_bool(doc: &lopdf::Document, dict: &Dictionary, key: &[u8]) -> bool {
    matches!(dict_value(doc, dict, key), Some(Object::Boolean(true)))
}

fn object_f64(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

/// Sample color model of a raw image
#[derive(Debug, Clone, PartialEq)]
enum ColorSpace {
    Gray,
    Rgb,
    Cmyk,
    Indexed {
        base: Box<ColorSpace>,
        hival: usize,
        lookup: Vec<u8>,
    },
}

impl ColorSpace {
    fn components(&self) -> usize {
        match self {
            ColorSpace::Gray | ColorSpace::Indexed { .. } => 1,
            ColorSpace::Rgb => 3,
            ColorSpace::Cmyk => 4,
        }
    }

    fn parse(doc: &lopdf::Document, obj: &Object) -> std::result::Result<Self, String> {
        match resolve(doc, obj) {
            Some(Object::Name(name)) => Self::from_name(name),
            Some(Object::Array(items)) => {
                let family = match items.first().and_then(|o| resolve(doc, o)) {
                    Some(Object::Name(name)) => name.as_slice(),
                    _ => return Err("color space array without a family name".to_string()),
                };
                match family {
                    b"ICCBased" => {
                        let profile = items
                            .get(1)
                            .and_then(|o| resolve(doc, o))
                            .and_then(|o| o.as_stream().ok())
                            .ok_or_else(|| "ICCBased color space without profile".to_string())?;
                        match dict_int(doc, &profile.dict, b"N") {
                            Some(1) => Ok(ColorSpace::Gray),
                            Some(3) => Ok(ColorSpace::Rgb),
                            Some(4) => Ok(ColorSpace::Cmyk),
                            _ => match profile.dict.get(b"Alternate") {
                                Ok(alt) => Self::parse(doc, alt),
                                Err(_) => Err("ICCBased profile without N".to_string()),
                            },
                        }
                    }
                    b"Indexed" | b"I" => Self::parse_indexed(doc, items),
                    b"CalRGB" => Ok(ColorSpace::Rgb),
                    b"CalGray" => Ok(ColorSpace::Gray),
                    other => Err(format!(
                        "unsupported color space {}",
                        String::from_utf8_lossy(other)
                    )),
                }
            }
            _ => Err("missing or malformed color space".to_string()),
        }
    }

    fn from_name(name: &[u8]) -> std::result::Result<Self, String> {
        match name {
            b"DeviceGray" | b"CalGray" | b"G" => Ok(ColorSpace::Gray),
            b"DeviceRGB" | b"CalRGB" | b"RGB" => Ok(ColorSpace::Rgb),
            b"DeviceCMYK" | b"CMYK" => Ok(ColorSpace::Cmyk),
            other => Err(format!(
                "unsupported color space {}",
                String::from_utf8_lossy(other)
            )),
        }
    }

    fn parse_indexed(doc: &lopdf::Document, items: &[Object]) -> std::result::Result<Self, String> {
        let base = items
            .get(1)
            .ok_or_else(|| "Indexed color space without base".to_string())
            .and_then(|o| Self::parse(doc, o))?;
        if matches!(base, ColorSpace::Indexed { .. }) {
            return Err("nested Indexed color space".to_string());
        }

        let hival = items
            .get(2)
            .and_then(|o| resolve(doc, o))
            .and_then(|o| o.as_i64().ok())
            .filter(|v| (0..=255).contains(v))
            .ok_or_else(|| "Indexed color space with invalid hival".to_string())? as usize;

        let lookup = match items.get(3).and_then(|o| resolve(doc, o)) {
            Some(Object::String(bytes, _)) => bytes.clone(),
            Some(Object::Stream(stream)) => stream_bytes(doc, stream)?,
            _ => return Err("Indexed color space without lookup table".to_string()),
        };

        let needed = (hival + 1) * base.components();
        if lookup.len() < needed {
            return Err(format!(
                "Indexed lookup table too short ({} < {})",
                lookup.len(),
                needed
            ));
        }

        Ok(ColorSpace::Indexed {
            base: Box::new(base),
            hival,
            lookup,
        })
    }
}

/// Extract an image XObject stream as self-contained encoded bytes
pub(crate) fn extract_image(
    doc: &lopdf::Document,
    stream: &Stream,
    page: usize,
    index: usize,
) -> Result<EmbeddedImage> {
    let fail = |reason: String| Error::ImageExtraction {
        page,
        index,
        reason,
    };

    let dict = &stream.dict;
    let width = dict_int(doc, dict, b"Width").unwrap_or(0).max(0) as u32;
    let height = dict_int(doc, dict, b"Height").unwrap_or(0).max(0) as u32;
    let filters = filter_chain(doc, dict);

    let (format, data) = match filters.split_last() {
        Some((codec, layers)) if matches!(codec.name.as_slice(), b"DCTDecode" | b"DCT") => (
            EmbeddedFormat::Jpeg,
            apply_filters(doc, layers, &stream.content).map_err(fail)?,
        ),
        Some((codec, layers)) if codec.name.as_slice() == b"JPXDecode" => (
            EmbeddedFormat::Jpeg2000,
            apply_filters(doc, layers, &stream.content).map_err(fail)?,
        ),
        Some((codec, _)) if codec.is_image_codec() => {
            return Err(fail(format!(
                "unsupported image filter {}",
                String::from_utf8_lossy(&codec.name)
            )))
        }
        _ => (EmbeddedFormat::Png, encode_samples(doc, stream, width, height).map_err(fail)?),
    };

    if data.is_empty() {
        return Err(fail("empty image stream".to_string()));
    }

    Ok(EmbeddedImage {
        page,
        index,
        format,
        width,
        height,
        data,
    })
}

/// Rebuild the pixel grid of a raw sample stream and package it as PNG
fn encode_samples(
    doc: &lopdf::Document,
    stream: &Stream,
    width: u32,
    height: u32,
) -> std::result::Result<Vec<u8>, String> {
    let dict = &stream.dict;
    if dict_bool(doc, dict, b"ImageMask") {
        return Err("stencil masks are not photographs".to_string());
    }
    if width == 0 || height == 0 {
        return Err(format!("invalid dimensions {}x{}", width, height));
    }
    if width as u64 * height as u64 > MAX_IMAGE_PIXELS {
        return Err(format!(
            "{}x{} exceeds {} pixels",
            width, height, MAX_IMAGE_PIXELS
        ));
    }

    let bpc = dict_int(doc, dict, b"BitsPerComponent").unwrap_or(8);
    if !matches!(bpc, 1 | 2 | 4 | 8 | 16) {
        return Err(format!("unsupported BitsPerComponent {}", bpc));
    }
    let bpc = bpc as usize;

    let color_space = match dict.get(b"ColorSpace") {
        Ok(obj) => ColorSpace::parse(doc, obj)?,
        Err(_) => return Err("missing color space".to_string()),
    };
    let inverted = dict_value(doc, dict, b"Decode")
        .and_then(|obj| obj.as_array().ok())
        .map(|arr| {
            matches!(
                (arr.first().and_then(object_f64), arr.get(1).and_then(object_f64)),
                (Some(lo), Some(hi)) if lo > hi
            )
        })
        .unwrap_or(false);

    let samples = stream_bytes(doc, stream)?;
    let components = color_space.components();
    let (w, h) = (width as usize, height as usize);
    let row_bytes = (w * components * bpc).div_ceil(8);
    if samples.len() < row_bytes * h {
        return Err(format!(
            "truncated sample data ({} < {} bytes)",
            samples.len(),
            row_bytes * h
        ));
    }

    let indexed = matches!(color_space, ColorSpace::Indexed { .. });
    let mut values = Vec::with_capacity(w * h * components);
    for row in samples.chunks(row_bytes).take(h) {
        unpack_row(row, w * components, bpc, !indexed, &mut values);
    }
    if inverted && !indexed {
        values.iter_mut().for_each(|v| *v = 255 - *v);
    }

    let image = to_dynamic(&color_space, values, width, height)?;
    let mut png = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| format!("PNG encoding failed: {}", e))?;
    Ok(png)
}

/// Unpack `count` samples of `bpc` bits from one row.
/// With `scale` set, values are stretched to the 0..=255 range.
fn unpack_row(row: &[u8], count: usize, bpc: usize, scale: bool, out: &mut Vec<u8>) {
    match bpc {
        8 => out.extend_from_slice(&row[..count]),
        16 => out.extend(row.chunks(2).take(count).map(|pair| pair[0])),
        _ => {
            let max = (1u16 << bpc) - 1;
            let per_byte = 8 / bpc;
            for i in 0..count {
                let byte = row[i / per_byte];
                let shift = 8 - bpc * (i % per_byte + 1);
                let value = ((byte >> shift) as u16) & max;
                out.push(if scale {
                    (value * 255 / max) as u8
                } else {
                    value as u8
                });
            }
        }
    }
}

fn cmyk_to_rgb(c: u8, m: u8, y: u8, k: u8) -> [u8; 3] {
    let k = 255 - k as u16;
    [
        ((255 - c as u16) * k / 255) as u8,
        ((255 - m as u16) * k / 255) as u8,
        ((255 - y as u16) * k / 255) as u8,
    ]
}

fn to_dynamic(
    color_space: &ColorSpace,
    values: Vec<u8>,
    width: u32,
    height: u32,
) -> std::result::Result<DynamicImage, String> {
    let size_error = || "sample buffer does not match image dimensions".to_string();
    match color_space {
        ColorSpace::Gray => GrayImage::from_raw(width, height, values)
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(size_error),
        ColorSpace::Rgb => RgbImage::from_raw(width, height, values)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(size_error),
        ColorSpace::Cmyk => {
            let rgb: Vec<u8> = values
                .chunks_exact(4)
                .flat_map(|px| cmyk_to_rgb(px[0], px[1], px[2], px[3]))
                .collect();
            RgbImage::from_raw(width, height, rgb)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(size_error)
        }
        ColorSpace::Indexed {
            base,
            hival,
            lookup,
        } => {
            let n = base.components();
            let mut expanded = Vec::with_capacity(values.len() * n);
            for &idx in &values {
                let entry = (idx as usize).min(*hival) * n;
                expanded.extend_from_slice(&lookup[entry..entry + n]);
            }
            to_dynamic(base, expanded, width, height)
        }
    }
}
