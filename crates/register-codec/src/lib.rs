use thiserror::Error;
use tracing::trace;
use types::PointValue;

/// Layout of a value stored in one or two holding registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterFormat {
    I16,
    U16,
    I32,
    U32,
    F32,
}

impl RegisterFormat {
    pub fn word_count(self) -> usize {
        match self {
            RegisterFormat::I16 | RegisterFormat::U16 => 1,
            RegisterFormat::I32 | RegisterFormat::U32 | RegisterFormat::F32 => 2,
        }
    }

    fn bounds(self) -> Option<(i64, i64)> {
        match self {
            RegisterFormat::I16 => Some((i64::from(i16::MIN), i64::from(i16::MAX))),
            RegisterFormat::U16 => Some((0, i64::from(u16::MAX))),
            RegisterFormat::I32 => Some((i64::from(i32::MIN), i64::from(i32::MAX))),
            RegisterFormat::U32 => Some((0, i64::from(u32::MAX))),
            RegisterFormat::F32 => None,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("value {value} does not fit a {format:?} register")]
    Range { value: i64, format: RegisterFormat },
    #[error("{format:?} needs {expected} register words, got {actual}")]
    WordCount {
        format: RegisterFormat,
        expected: usize,
        actual: usize,
    },
    #[error("invalid scale factor register {0:#06x}")]
    InvalidScale(u16),
    #[error("register reports value as not implemented")]
    NotImplemented,
}

/// SunSpec scale factors are bounded to +/-10.
const MAX_SCALE_EXPONENT: i16 = 10;
const SCALE_NOT_IMPLEMENTED: u16 = 0x8000;

/// Interprets the low `bits` of `value` as a two's complement integer.
pub fn twos_complement(value: u32, bits: u32) -> i64 {
    let bits = bits.clamp(1, 32);
    let value = i64::from(value) & ((1i64 << bits) - 1);
    if value & (1i64 << (bits - 1)) != 0 {
        value - (1i64 << bits)
    } else {
        value
    }
}

pub fn decode(words: &[u16], format: RegisterFormat) -> Result<PointValue, CodecError> {
    let expected = format.word_count();
    if words.len() != expected {
        return Err(CodecError::WordCount {
            format,
            expected,
            actual: words.len(),
        });
    }

    let value = match format {
        RegisterFormat::I16 => PointValue::I16(words[0] as i16),
        RegisterFormat::U16 => PointValue::U16(words[0]),
        RegisterFormat::I32 => PointValue::I32(join_words(words) as i32),
        RegisterFormat::U32 => PointValue::U32(join_words(words)),
        RegisterFormat::F32 => PointValue::F32(f32::from_bits(join_words(words))),
    };
    Ok(value)
}

/// Decodes a value and applies an optional scale factor register holding a
/// power-of-ten exponent.
pub fn decode_scaled(
    words: &[u16],
    format: RegisterFormat,
    scale_word: Option<u16>,
) -> Result<f64, CodecError> {
    let raw = decode(words, format)?;
    let scale = match scale_word {
        Some(word) => scale_exponent(word)?,
        None => 0,
    };
    let scaled = apply_scale(raw, scale).ok_or(CodecError::NotImplemented)?;
    trace!(?raw, scale, scaled, "decoded register value");
    Ok(scaled)
}

pub fn scale_exponent(word: u16) -> Result<i16, CodecError> {
    if word == SCALE_NOT_IMPLEMENTED {
        return Err(CodecError::InvalidScale(word));
    }
    let exponent = word as i16;
    if !(-MAX_SCALE_EXPONENT..=MAX_SCALE_EXPONENT).contains(&exponent) {
        return Err(CodecError::InvalidScale(word));
    }
    Ok(exponent)
}

/// SunSpec marks absent values with sentinel patterns (e.g., 0x8000 for i16). Returns None when the raw value is a sentinel.
pub fn apply_scale(raw: PointValue, scale_factor: i16) -> Option<f64> {
    let factor = 10f64.powi(i32::from(scale_factor));
    match raw {
        PointValue::I16(v) if v == i16::MIN => None,
        PointValue::U16(v) if v == u16::MAX => None,
        PointValue::I32(v) if v == i32::MIN => None,
        PointValue::U32(v) if v == u32::MAX => None,
        PointValue::F32(v) if v.is_nan() => None,
        PointValue::I16(v) => Some(f64::from(v) * factor),
        PointValue::U16(v) => Some(f64::from(v) * factor),
        PointValue::I32(v) => Some(f64::from(v) * factor),
        PointValue::U32(v) => Some(f64::from(v) * factor),
        PointValue::F32(v) => Some(f64::from(v) * factor),
    }
}

/// Encodes an integer into register words, high word first.
pub fn encode(value: i64, format: RegisterFormat) -> Result<Vec<u16>, CodecError> {
    let Some((min, max)) = format.bounds() else {
        return encode_f32(value as f32).map(Vec::from);
    };
    if value < min || value > max {
        return Err(CodecError::Range { value, format });
    }

    // Truncating casts keep the two's complement bit pattern of in-range values.
    let words = match format.word_count() {
        1 => vec![value as u16],
        _ => split_words(value as u32).to_vec(),
    };
    Ok(words)
}

pub fn encode_f32(value: f32) -> Result<[u16; 2], CodecError> {
    if !value.is_finite() {
        return Err(CodecError::NotImplemented);
    }
    Ok(split_words(value.to_bits()))
}

/// Like [`encode`], but clamps to the format's bounds instead of failing.
pub fn encode_saturating(value: i64, format: RegisterFormat) -> Result<Vec<u16>, CodecError> {
    let clamped = match format.bounds() {
        Some((min, max)) => value.clamp(min, max),
        None => value,
    };
    encode(clamped, format)
}

fn join_words(words: &[u16]) -> u32 {
    (u32::from(words[0]) << 16) | u32::from(words[1])
}

fn split_words(value: u32) -> [u16; 2] {
    [(value >> 16) as u16, value as u16]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twos_complement_matches_native_casts() {
        assert_eq!(twos_complement(0xFFFF, 16), -1);
        assert_eq!(twos_complement(0x8000, 16), -32768);
        assert_eq!(twos_complement(0x7FFF, 16), 32767);
        assert_eq!(twos_complement(0xFFFF_FFFE, 32), -2);
    }

    #[test]
    fn join_and_split_are_big_endian() {
        assert_eq!(join_words(&[0x0001, 0x0002]), 0x0001_0002);
        assert_eq!(split_words(0xABCD_1234), [0xABCD, 0x1234]);
    }
}
