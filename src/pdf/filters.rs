//! Stream filter decoding for image data
//!
//! lopdf refuses to decompress streams whose subtype is `/Image`, so image
//! samples and lookup tables are decoded here, one filter at a time, with
//! the matching `/DecodeParms` entry applied after each step.

use crate::pdf::embedded::resolve;
use lopdf::{dictionary, Dictionary, Object, Stream};
use std::io::Read;

type FilterResult = std::result::Result<Vec<u8>, String>;

/// One stage of a stream's filter pipeline
#[derive(Debug, Clone)]
pub(crate) struct Filter<'a> {
    pub name: Vec<u8>,
    pub params: Option<&'a Dictionary>,
}

impl Filter<'_> {
    /// Whether this filter is an image codec whose output is a complete encoded image
    pub(crate) fn is_image_codec(&self) -> bool {
        matches!(
            self.name.as_slice(),
            b"DCTDecode" | b"DCT" | b"JPXDecode" | b"CCITTFaxDecode" | b"CCF" | b"JBIG2Decode"
        )
    }
}

/// Filters applied to a stream, in application order, paired with their parameters
pub(crate) fn filter_chain<'a>(doc: &'a lopdf::Document, dict: &'a Dictionary) -> Vec<Filter<'a>> {
    let names: Vec<Vec<u8>> = match dict.get(b"Filter").ok().and_then(|o| resolve(doc, o)) {
        Some(Object::Name(name)) => vec![name.clone()],
        Some(Object::Array(items)) => items
            .iter()
            .filter_map(|item| match resolve(doc, item) {
                Some(Object::Name(name)) => Some(name.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    let params: Vec<Option<&Dictionary>> =
        match dict.get(b"DecodeParms").ok().and_then(|o| resolve(doc, o)) {
            Some(Object::Dictionary(params)) => vec![Some(params)],
            Some(Object::Array(items)) => items
                .iter()
                .map(|item| resolve(doc, item).and_then(|o| o.as_dict().ok()))
                .collect(),
            _ => Vec::new(),
        };

    names
        .into_iter()
        .enumerate()
        .map(|(i, name)| Filter {
            name,
            params: params.get(i).copied().flatten(),
        })
        .collect()
}

/// Run `data` through every filter in `filters`
pub(crate) fn apply_filters(
    doc: &lopdf::Document,
    filters: &[Filter<'_>],
    data: &[u8],
) -> FilterResult {
    let mut current = data.to_vec();
    for filter in filters {
        current = decode(doc, filter, &current)?;
    }
    Ok(current)
}

/// Fully decoded content of a non-codec stream (raw samples, lookup tables)
pub(crate) fn stream_bytes(doc: &lopdf::Document, stream: &Stream) -> FilterResult {
    let filters = filter_chain(doc, &stream.dict);
    if let Some(codec) = filters.iter().find(|f| f.is_image_codec()) {
        return Err(format!(
            "{} stream has no raw samples",
            String::from_utf8_lossy(&codec.name)
        ));
    }
    apply_filters(doc, &filters, &stream.content)
}

fn decode(doc: &lopdf::Document, filter: &Filter<'_>, data: &[u8]) -> FilterResult {
    match filter.name.as_slice() {
        b"FlateDecode" | b"Fl" => unpredict(doc, filter.params, inflate(data)?),
        b"LZWDecode" | b"LZW" => unpredict(doc, filter.params, lzw_decode(doc, filter.params, data)?),
        b"ASCIIHexDecode" | b"AHx" => ascii_hex_decode(data),
        b"ASCII85Decode" | b"A85" => ascii85_decode(data),
        b"RunLengthDecode" | b"RL" => run_length_decode(data),
        other => Err(format!(
            "unsupported filter {}",
            String::from_utf8_lossy(other)
        )),
    }
}

fn param_int(doc: &lopdf::Document, params: Option<&Dictionary>, key: &[u8], default: i64) -> i64 {
    params
        .and_then(|p| p.get(key).ok())
        .and_then(|o| resolve(doc, o))
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(default)
}

fn inflate(data: &[u8]) -> FilterResult {
    let mut out = Vec::new();
    match flate2::read::ZlibDecoder::new(data).read_to_end(&mut out) {
        Ok(_) => Ok(out),
        // Truncated streams are common; keep what was recovered
        Err(_) if !out.is_empty() => Ok(out),
        Err(e) => Err(format!("FlateDecode failed: {}", e)),
    }
}

/// LZW through lopdf, on a bare stream so the image subtype guard does not apply
fn lzw_decode(doc: &lopdf::Document, params: Option<&Dictionary>, data: &[u8]) -> FilterResult {
    let early_change = param_int(doc, params, b"EarlyChange", 1);
    let stream = Stream::new(
        dictionary! {
            "Filter" => "LZWDecode",
            "DecodeParms" => dictionary! { "EarlyChange" => early_change },
        },
        data.to_vec(),
    );
    stream
        .decompressed_content()
        .map_err(|e| format!("LZWDecode failed: {}", e))
}

/// Reverse a TIFF or PNG predictor declared in `/DecodeParms`
fn unpredict(doc: &lopdf::Document, params: Option<&Dictionary>, data: Vec<u8>) -> FilterResult {
    let predictor = param_int(doc, params, b"Predictor", 1);
    if predictor <= 1 {
        return Ok(data);
    }

    let colors = param_int(doc, params, b"Colors", 1).clamp(1, 32) as usize;
    let bpc = param_int(doc, params, b"BitsPerComponent", 8);
    let columns = param_int(doc, params, b"Columns", 1).max(1) as usize;
    if !matches!(bpc, 1 | 2 | 4 | 8 | 16) {
        return Err(format!("unsupported predictor BitsPerComponent {}", bpc));
    }
    let bpc = bpc as usize;
    let row_bytes = (colors * bpc * columns).div_ceil(8);
    let pixel_bytes = (colors * bpc).div_ceil(8);

    match predictor {
        2 => tiff_unpredict(data, row_bytes, colors, bpc),
        10..=15 => png_unpredict(&data, row_bytes, pixel_bytes),
        other => Err(format!("unsupported predictor {}", other)),
    }
}

fn tiff_unpredict(mut data: Vec<u8>, row_bytes: usize, colors: usize, bpc: usize) -> FilterResult {
    match bpc {
        8 => {
            for row in data.chunks_mut(row_bytes) {
                for i in colors..row.len() {
                    row[i] = row[i].wrapping_add(row[i - colors]);
                }
            }
        }
        16 => {
            let stride = colors * 2;
            for row in data.chunks_mut(row_bytes) {
                let mut i = stride;
                while i + 1 < row.len() {
                    let prev = u16::from_be_bytes([row[i - stride], row[i + 1 - stride]]);
                    let cur = u16::from_be_bytes([row[i], row[i + 1]]);
                    let [hi, lo] = cur.wrapping_add(prev).to_be_bytes();
                    row[i] = hi;
                    row[i + 1] = lo;
                    i += 2;
                }
            }
        }
        other => return Err(format!("TIFF predictor with {} bits per component", other)),
    }
    Ok(data)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let (pa, pb, pc) = ((p - a as i16).abs(), (p - b as i16).abs(), (p - c as i16).abs());
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

/// Each row carries a leading PNG filter type byte
fn png_unpredict(data: &[u8], row_bytes: usize, pixel_bytes: usize) -> FilterResult {
    let mut out = Vec::with_capacity(data.len());
    let mut prev = vec![0u8; row_bytes];
    let mut row = vec![0u8; row_bytes];

    for chunk in data.chunks(row_bytes + 1) {
        if chunk.len() < row_bytes + 1 {
            break;
        }
        let (kind, encoded) = (chunk[0], &chunk[1..]);
        for i in 0..row_bytes {
            let left = if i >= pixel_bytes { row[i - pixel_bytes] } else { 0 };
            let up = prev[i];
            let up_left = if i >= pixel_bytes { prev[i - pixel_bytes] } else { 0 };
            row[i] = match kind {
                0 => encoded[i],
                1 => encoded[i].wrapping_add(left),
                2 => encoded[i].wrapping_add(up),
                3 => encoded[i].wrapping_add(((left as u16 + up as u16) / 2) as u8),
                4 => encoded[i].wrapping_add(paeth(left, up, up_left)),
                other => return Err(format!("invalid PNG predictor row type {}", other)),
            };
        }
        out.extend_from_slice(&row);
        std::mem::swap(&mut prev, &mut row);
    }
    Ok(out)
}

fn ascii_hex_decode(data: &[u8]) -> FilterResult {
    let mut out = Vec::with_capacity(data.len() / 2);
    let mut pending: Option<u8> = None;
    for &byte in data {
        if byte == b'>' {
            break;
        }
        if byte.is_ascii_whitespace() {
            continue;
        }
        let digit = (byte as char)
            .to_digit(16)
            .ok_or_else(|| format!("invalid ASCIIHex character {:?}", byte as char))?
            as u8;
        match pending.take() {
            Some(high) => out.push(high << 4 | digit),
            None => pending = Some(digit),
        }
    }
    if let Some(high) = pending {
        out.push(high << 4);
    }
    Ok(out)
}

fn ascii85_decode(data: &[u8]) -> FilterResult {
    let body = data.strip_prefix(b"<~").unwrap_or(data);
    let mut out = Vec::with_capacity(body.len() * 4 / 5);
    let mut group = [0u8; 5];
    let mut filled = 0;

    let push_group = |group: &[u8; 5], out: &mut Vec<u8>, bytes: usize| -> std::result::Result<(), String> {
        let value = group
            .iter()
            .fold(0u64, |acc, &digit| acc * 85 + (digit - b'!') as u64);
        if value > u32::MAX as u64 {
            return Err("ASCII85 group overflows".to_string());
        }
        out.extend_from_slice(&(value as u32).to_be_bytes()[..bytes]);
        Ok(())
    };

    for &byte in body {
        match byte {
            b'~' => break,
            b'z' if filled == 0 => out.extend_from_slice(&[0; 4]),
            b'!'..=b'u' => {
                group[filled] = byte;
                filled += 1;
                if filled == 5 {
                    push_group(&group, &mut out, 4)?;
                    filled = 0;
                }
            }
            b if b.is_ascii_whitespace() => {}
            other => return Err(format!("invalid ASCII85 character {:?}", other as char)),
        }
    }

    if filled == 1 {
        return Err("ASCII85 data ends with a single character".to_string());
    }
    if filled > 1 {
        group[filled..].fill(b'u');
        push_group(&group, &mut out, filled - 1)?;
    }
    Ok(out)
}

fn run_length_decode(data: &[u8]) -> FilterResult {
    let mut out = Vec::new();
    let mut i = 0;
    while i < data.len() {
        let length = data[i] as usize;
        i += 1;
        match length {
            128 => break,
            0..=127 => {
                let end = (i + length + 1).min(data.len());
                out.extend_from_slice(&data[i..end]);
                i = end;
            }
            _ => {
                let value = *data.get(i).ok_or("RunLength repeat without a byte")?;
                out.extend(std::iter::repeat(value).take(257 - length));
                i += 1;
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::ZlibEncoder, Compression};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::io::Write;

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_filter_chain_pairs_params() {
        let doc = lopdf::Document::new();
        let dict = dictionary! {
            "Filter" => vec![Object::Name(b"ASCIIHexDecode".to_vec()), Object::Name(b"FlateDecode".to_vec())],
            "DecodeParms" => vec![Object::Null, Object::Dictionary(dictionary! { "Predictor" => 12_i64 })],
        };
        let chain = filter_chain(&doc, &dict);
        assert_eq!(chain.len(), 2);
        assert!(chain[0].params.is_none());
        assert_eq!(
            chain[1].params.and_then(|p| p.get(b"Predictor").ok()).and_then(|o| o.as_i64().ok()),
            Some(12)
        );
    }

    #[test]
    fn test_png_predictor_rows() {
        // 2 RGB pixels per row: row 0 uses Sub, row 1 uses Up
        let encoded = vec![
            1, 10, 20, 30, 5, 5, 5, //
            2, 1, 1, 1, 2, 2, 2,
        ];
        let params = dictionary! { "Predictor" => 15_i64, "Colors" => 3_i64, "Columns" => 2_i64 };
        let doc = lopdf::Document::new();
        let decoded = unpredict(&doc, Some(&params), encoded).unwrap();
        assert_eq!(
            decoded,
            vec![10, 20, 30, 15, 25, 35, 11, 21, 31, 17, 27, 37]
        );
    }

    #[test]
    fn test_png_paeth_and_average() {
        let params = dictionary! { "Predictor" => 15_i64, "Columns" => 3_i64 };
        let doc = lopdf::Document::new();
        let encoded = vec![0, 100, 50, 25, 3, 10, 10, 10, 4, 1, 1, 1];
        let decoded = unpredict(&doc, Some(&params), encoded).unwrap();
        // Average: 10 + (0+100)/2, 10 + (60+50)/2, 10 + (65+25)/2
        // Paeth picks the up value here: 1 + 60, 1 + 65, 1 + 55
        assert_eq!(decoded, vec![100, 50, 25, 60, 65, 55, 61, 66, 56]);
    }

    #[test]
    fn test_tiff_predictor() {
        let params = dictionary! { "Predictor" => 2_i64, "Colors" => 1_i64, "Columns" => 4_i64 };
        let doc = lopdf::Document::new();
        let decoded = unpredict(&doc, Some(&params), vec![10, 1, 1, 1, 200, 100, 0, 0]).unwrap();
        assert_eq!(decoded, vec![10, 11, 12, 13, 200, 44, 44, 44]);
    }

    #[test]
    fn test_flate_with_predictor() {
        let doc = lopdf::Document::new();
        let params = dictionary! { "Predictor" => 15_i64, "Colors" => 1_i64, "Columns" => 2_i64 };
        let filters = vec![Filter {
            name: b"FlateDecode".to_vec(),
            params: Some(&params),
        }];
        let decoded = apply_filters(&doc, &filters, &deflate(&[2, 7, 9, 2, 1, 1])).unwrap();
        assert_eq!(decoded, vec![7, 9, 8, 10]);
    }

    #[rstest]
    #[case::hex(b"ASCIIHexDecode", b"48 65 6C\n6c 6F>".to_vec(), b"Hello".to_vec())]
    #[case::hex_odd_digit(b"AHx", b"7>".to_vec(), vec![0x70])]
    #[case::ascii85(b"ASCII85Decode", b"<~87cURDZ~>".to_vec(), b"Hello".to_vec())]
    #[case::ascii85_zero_group(b"A85", b"z~>".to_vec(), vec![0, 0, 0, 0])]
    #[case::run_length(b"RunLengthDecode", vec![2, b'a', b'b', b'c', 254, b'x', 128], b"abcxxx".to_vec())]
    fn test_text_and_run_length_filters(
        #[case] name: &[u8],
        #[case] input: Vec<u8>,
        #[case] expected: Vec<u8>,
    ) {
        let doc = lopdf::Document::new();
        let filters = vec![Filter {
            name: name.to_vec(),
            params: None,
        }];
        assert_eq!(apply_filters(&doc, &filters, &input).unwrap(), expected);
    }

    #[rstest]
    #[case::bad_hex(b"ASCIIHexDecode", b"4G>".to_vec())]
    #[case::bad_ascii85(b"ASCII85Decode", b"ab{~>".to_vec())]
    #[case::unknown(b"JBIG2Decode", vec![1, 2, 3])]
    fn test_filter_errors(#[case] name: &[u8], #[case] input: Vec<u8>) {
        let doc = lopdf::Document::new();
        let filters = vec![Filter {
            name: name.to_vec(),
            params: None,
        }];
        assert!(apply_filters(&doc, &filters, &input).is_err());
    }

    #[test]
    fn test_stream_bytes_of_image_subtype() {
        let doc = lopdf::Document::new();
        let stream = Stream::new(
            dictionary! { "Subtype" => "Image", "Filter" => "FlateDecode" },
            deflate(b"samples"),
        );
        assert_eq!(stream_bytes(&doc, &stream).unwrap(), b"samples".to_vec());
    }
}
