//! Per-column decoding of bound driver buffers.
//!
//! The driver leaves every non-binary column in character form (see the
//! buffer contract in [`crate::driver`]); this module turns those
//! buffers into [`Value`]s. Decoding is pure: one descriptor plus one
//! raw cell in, one value out.

use thiserror::Error;

use crate::driver::{RawColumn, TdsSession, TypeTag};
use crate::value::Value;

/// Why one bound cell could not be decoded.
///
/// Never fatal on its own: the assembler skips the row and reports a
/// diagnostic, the same way unrecognized row kinds are handled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The character buffer does not parse as the column's numeric
    /// type.
    #[error("invalid {kind} literal {text:?}")]
    BadNumber { kind: &'static str, text: String },

    /// Image data must be an even run of hex digit pairs.
    #[error("invalid hex image data: {0}")]
    BadHex(String),
}

/// Metadata for one column of the result set being assembled.
///
/// Lives only while its result set is being fetched; the returned
/// tables do not retain descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    /// 1-based position, as the driver reports it.
    pub ordinal: usize,
    pub name: String,
    pub tag: TypeTag,
    /// Declared byte length from the driver.
    pub length: usize,
    /// Computed bind width; zero means the column is unusable.
    pub width: usize,
}

impl ColumnDescriptor {
    /// Read one column's metadata from the session and compute its
    /// bind width.
    pub fn read(session: &dyn TdsSession, ordinal: usize) -> Self {
        let name = session.column_name(ordinal);
        let tag = session.column_type(ordinal);
        let length = session.column_length(ordinal);
        let width = bind_width(tag, length, session.convert_width(tag));
        Self {
            ordinal,
            name,
            tag,
            length,
            width,
        }
    }
}

/// Bind width for a column.
///
/// Image data arrives hex-encoded, two characters per byte, so its
/// slot doubles the declared length. Character types use the declared
/// length as-is. Everything else converts to character form first and
/// sizes off the driver's conversion hint.
pub fn bind_width(tag: TypeTag, declared: usize, convert_hint: usize) -> usize {
    match tag {
        TypeTag::Image => declared * 2,
        TypeTag::Char | TypeTag::VarChar | TypeTag::NVarChar | TypeTag::Text | TypeTag::NText => {
            declared
        }
        _ => convert_hint,
    }
}

/// Decode one bound cell.
///
/// Null wins over everything; otherwise the column's tag alone selects
/// the decoding.
pub fn decode_value(
    descriptor: &ColumnDescriptor,
    raw: RawColumn<'_>,
) -> Result<Value, DecodeError> {
    if raw.is_null {
        return Ok(Value::Null);
    }

    match descriptor.tag {
        TypeTag::Bit => Ok(Value::Bool(raw.bytes.first() == Some(&b'1'))),

        TypeTag::Int1 | TypeTag::Int2 | TypeTag::Int4 | TypeTag::Int8 | TypeTag::IntN => {
            let text = character_form(raw.bytes);
            text.trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| DecodeError::BadNumber {
                    kind: "integer",
                    text,
                })
        }

        TypeTag::Flt4 | TypeTag::Flt8 | TypeTag::Real | TypeTag::Numeric => {
            let text = character_form(raw.bytes);
            text.trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| DecodeError::BadNumber {
                    kind: "float",
                    text,
                })
        }

        TypeTag::Money4 | TypeTag::Money | TypeTag::MoneyN | TypeTag::Decimal => {
            Ok(Value::Unsupported(descriptor.tag))
        }

        TypeTag::Char | TypeTag::VarChar | TypeTag::NVarChar | TypeTag::Text | TypeTag::NText => {
            Ok(Value::Text(character_form(raw.bytes)))
        }

        TypeTag::DateTime
        | TypeTag::DateTime4
        | TypeTag::DateTimeN
        | TypeTag::Date
        | TypeTag::Time
        | TypeTag::BigDateTime
        | TypeTag::BigTime
        | TypeTag::MsDate
        | TypeTag::MsTime
        | TypeTag::MsDateTime2
        | TypeTag::MsDateTimeOffset => Ok(Value::Unsupported(descriptor.tag)),

        TypeTag::Image => decode_hex(raw.bytes).map(Value::Image),

        TypeTag::Binary | TypeTag::VarBinary | TypeTag::Void => {
            Ok(Value::Binary(raw.bytes.to_vec()))
        }
    }
}

/// Decode a hex-pair byte stream into raw bytes.
///
/// The stream is cut at the first NUL like any character buffer, and
/// spaces are ignored. What remains must be an even run of hex digits.
pub fn decode_hex(bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let digits: Vec<u8> = until_nul(bytes)
        .iter()
        .copied()
        .filter(|b| *b != b' ')
        .collect();

    if digits.len() % 2 != 0 {
        return Err(DecodeError::BadHex(format!(
            "odd digit count {}",
            digits.len()
        )));
    }

    let mut out = Vec::with_capacity(digits.len() / 2);
    for pair in digits.chunks_exact(2) {
        let hi = hex_digit(pair[0])?;
        let lo = hex_digit(pair[1])?;
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

fn hex_digit(b: u8) -> Result<u8, DecodeError> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'a'..=b'f' => Ok(b - b'a' + 10),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        _ => Err(DecodeError::BadHex(format!(
            "not a hex digit: {:?}",
            b as char
        ))),
    }
}

/// A character-form buffer as UTF-8, lossy, cut at the first NUL.
fn character_form(bytes: &[u8]) -> String {
    String::from_utf8_lossy(until_nul(bytes)).into_owned()
}

fn until_nul(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|b| *b == 0) {
        Some(nul) => &bytes[..nul],
        None => bytes,
    }
}
