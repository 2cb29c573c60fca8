//! Sample payload decoding.
//!
//! Replies to `:WAVeform:DATA?` arrive as an IEEE 488.2 definite-length block:
//! `#`, one digit `d`, `d` digits giving the byte count, the bytes, then a line
//! terminator. The bytes are either comma-separated decimal text or packed
//! fixed-width integers, depending on the transfer format.

use crate::scpi_terminal::preview_bytes;
use crate::waveform_request::{ByteOrder, Encoding, TransferFormat};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Truncated payload: header declares {declared} bytes but {available} are available")]
    TruncatedPayload { declared: usize, available: usize },

    #[error("Encoding mismatch: requested {requested:?} but the instrument reports {reported:?}")]
    EncodingMismatch {
        requested: Encoding,
        reported: Encoding,
    },

    #[error("Malformed block header '{header}': {reason}")]
    MalformedHeader {
        reason: &'static str,
        header: String,
    },

    #[error("Invalid sample #{index}: '{token}'")]
    InvalidSample { index: usize, token: String },

    #[error("Payload holds {actual} samples but the preamble announces {expected}")]
    PointCountMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Number of length digits following the `#d` marker.
    pub digit_count: usize,
    /// Byte count announced by the header, `None` for an indefinite `#0` block.
    pub declared_len: Option<usize>,
    /// Total header size in bytes, including `#` and the digit count.
    pub header_len: usize,
}

/// Parse the `#d<len>` header at the start of `raw`, if there is one.
pub fn parse_block_header(raw: &[u8]) -> Result<Option<BlockHeader>, DecodeError> {
    if raw.first() != Some(&b'#') {
        return Ok(None);
    }
    let malformed = |reason| DecodeError::MalformedHeader {
        reason,
        header: preview_bytes(raw),
    };

    let digit_count = match raw.get(1) {
        Some(d @ b'0'..=b'9') => usize::from(d - b'0'),
        Some(_) => return Err(malformed("digit count is not a decimal digit")),
        None => return Err(malformed("missing digit count")),
    };
    if digit_count == 0 {
        return Ok(Some(BlockHeader {
            digit_count,
            declared_len: None,
            header_len: 2,
        }));
    }

    let header_len = 2 + digit_count;
    let digits = raw
        .get(2..header_len)
        .ok_or_else(|| malformed("header shorter than its digit count"))?;
    let declared_len = std::str::from_utf8(digits)
        .ok()
        .filter(|digits| digits.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|digits| digits.parse::<usize>().ok())
        .ok_or_else(|| malformed("length is not a decimal number"))?;

    Ok(Some(BlockHeader {
        digit_count,
        declared_len: Some(declared_len),
        header_len,
    }))
}

fn strip_line_terminator(bytes: &[u8]) -> &[u8] {
    let bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    bytes.strip_suffix(b"\r").unwrap_or(bytes)
}

/// Return the data bytes of a block reply.
///
/// With a definite-length header exactly `declared` bytes are taken; anything
/// after them other than a line terminator means the reply and the header
/// disagree. Without a header the buffer is returned unchanged.
pub fn block_data(raw: &[u8]) -> Result<&[u8], DecodeError> {
    let Some(header) = parse_block_header(raw)? else {
        return Ok(raw);
    };
    let body = &raw[header.header_len..];

    let Some(declared) = header.declared_len else {
        return Ok(strip_line_terminator(body));
    };
    if body.len() < declared {
        return Err(DecodeError::TruncatedPayload {
            declared,
            available: body.len(),
        });
    }

    let (data, rest) = body.split_at(declared);
    if !strip_line_terminator(rest).is_empty() {
        return Err(DecodeError::TruncatedPayload {
            declared,
            available: body.len(),
        });
    }
    Ok(data)
}

/// Decode comma-separated decimal text, with or without a block header.
pub fn decode_ascii(raw: &[u8]) -> Result<Vec<f64>, DecodeError> {
    crate::profile_zone!("decode_ascii");

    let data = strip_line_terminator(block_data(raw)?);
    let text = std::str::from_utf8(data).map_err(|_| DecodeError::InvalidSample {
        index: 0,
        token: preview_bytes(data),
    })?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    text.split(',')
        .enumerate()
        .map(|(index, token)| {
            token
                .trim()
                .parse::<f64>()
                .map_err(|_| DecodeError::InvalidSample {
                    index,
                    token: token.to_string(),
                })
        })
        .collect()
}

/// Decode packed integers of the given format into raw codes.
pub fn decode_binary(raw: &[u8], format: &TransferFormat) -> Result<Vec<i32>, DecodeError> {
    crate::profile_zone!("decode_binary");

    let Some(width) = format.encoding.element_width() else {
        return Err(DecodeError::EncodingMismatch {
            requested: Encoding::Ascii,
            reported: format.encoding,
        });
    };
    // Without a header there is no telling a trailing terminator from a code.
    if parse_block_header(raw)?.is_none() {
        return Err(DecodeError::MalformedHeader {
            reason: "binary payload without a block header",
            header: preview_bytes(raw),
        });
    }
    let data = block_data(raw)?;
    if data.len() % width != 0 {
        return Err(DecodeError::TruncatedPayload {
            declared: data.len() / width * width + width,
            available: data.len(),
        });
    }
    log::trace!("Decoding {} samples of {} byte(s)", data.len() / width, width);

    let codes = match (width, format.signed) {
        (1, true) => data.iter().map(|b| i32::from(*b as i8)).collect(),
        (1, false) => data.iter().map(|b| i32::from(*b)).collect(),
        (_, signed) => data
            .chunks_exact(2)
            .map(|pair| {
                let bytes = [pair[0], pair[1]];
                match (format.byte_order, signed) {
                    (ByteOrder::MsbFirst, true) => i32::from(i16::from_be_bytes(bytes)),
                    (ByteOrder::MsbFirst, false) => i32::from(u16::from_be_bytes(bytes)),
                    (ByteOrder::LsbFirst, true) => i32::from(i16::from_le_bytes(bytes)),
                    (ByteOrder::LsbFirst, false) => i32::from(u16::from_le_bytes(bytes)),
                }
            })
            .collect(),
    };
    Ok(codes)
}

/// Pack raw codes the way the instrument would, without a block header.
///
/// Codes outside the range of the element type wrap.
pub fn encode_binary(codes: &[i32], format: &TransferFormat) -> Vec<u8> {
    match format.encoding {
        Encoding::Ascii => codes
            .iter()
            .map(i32::to_string)
            .collect::<Vec<_>>()
            .join(",")
            .into_bytes(),
        Encoding::Byte => codes.iter().map(|code| *code as u8).collect(),
        Encoding::Word => codes
            .iter()
            .flat_map(|code| {
                let word = *code as u16;
                match format.byte_order {
                    ByteOrder::MsbFirst => word.to_be_bytes(),
                    ByteOrder::LsbFirst => word.to_le_bytes(),
                }
            })
            .collect(),
    }
}

/// Wrap `data` in a definite-length block header and line terminator.
pub fn encode_block(data: &[u8]) -> Vec<u8> {
    let length = data.len().to_string();
    let digits = length.len().max(8);
    let mut block = format!("#{}{:0>width$}", digits, length, width = digits).into_bytes();
    block.extend_from_slice(data);
    block.push(b'\n');
    block
}

/// Decoded payload: physical values for text, raw codes for binary.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    Values(Vec<f64>),
    Codes(Vec<i32>),
}

impl Samples {
    pub fn len(&self) -> usize {
        match self {
            Self::Values(values) => values.len(),
            Self::Codes(codes) => codes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decode a payload with the format the request configured, after checking it
/// against the format the instrument reports in its preamble.
pub fn decode(
    raw: &[u8],
    requested: &TransferFormat,
    reported: Encoding,
) -> Result<Samples, DecodeError> {
    if requested.encoding != reported {
        return Err(DecodeError::EncodingMismatch {
            requested: requested.encoding,
            reported,
        });
    }
    match requested.encoding {
        Encoding::Ascii => decode_ascii(raw).map(Samples::Values),
        Encoding::Byte | Encoding::Word => decode_binary(raw, requested).map(Samples::Codes),
    }
}
