//! Conversion between raw protocol bytes and typed values.
//!
//! All multi-byte types use the protocol's big-endian byte order. The two
//! functions form an inverse pair: for every representable value `v` and
//! type `t`, `decode(&encode(&v, t, n)?, t, 0)? == v`.
//!
//! # Example
//!
//! ```
//! use s7_link::{convert, PlcValue, VarType};
//!
//! let raw = [0x41, 0x20, 0x00, 0x00];
//! assert_eq!(convert::decode(&raw, VarType::Real, 0).unwrap(), PlcValue::Real(10.0));
//!
//! let bytes = convert::encode(&PlcValue::Real(10.0), VarType::Real, 1).unwrap();
//! assert_eq!(bytes, raw);
//! ```

use crate::error::{LinkError, Result};
use crate::utils::get_bit;
use crate::value::{PlcValue, VarType};

/// Decodes a raw buffer into a typed value.
///
/// For [`VarType::Bit`] the value is bit `bit_offset % 8` of the addressed
/// byte. [`VarType::String`] expects the controller's length-prefixed
/// layout: a capacity byte, a current-length byte, then the character
/// bytes.
///
/// # Errors
///
/// Returns [`LinkError::ShortBuffer`] if the buffer is smaller than the
/// wire type requires.
pub fn decode(raw: &[u8], var_type: VarType, bit_offset: u8) -> Result<PlcValue> {
    let needed = match var_type {
        VarType::String => 2,
        other => other.byte_len(1),
    };
    if raw.len() < needed {
        return Err(LinkError::short_buffer(needed, raw.len()));
    }

    let value = match var_type {
        VarType::Bit => PlcValue::Bool(get_bit(raw[0], bit_offset % 8)),
        VarType::Byte => PlcValue::Byte(raw[0]),
        VarType::Word => PlcValue::Word(u16::from_be_bytes([raw[0], raw[1]])),
        VarType::Int => PlcValue::Int(i16::from_be_bytes([raw[0], raw[1]])),
        VarType::DWord => PlcValue::DWord(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])),
        VarType::DInt => PlcValue::DInt(i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])),
        VarType::Real => PlcValue::Real(f32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])),
        VarType::LReal => PlcValue::LReal(f64::from_be_bytes([
            raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
        ])),
        VarType::Time => PlcValue::Time(i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])),
        VarType::Counter => PlcValue::Counter(u16::from_be_bytes([raw[0], raw[1]])),
        VarType::Timer => PlcValue::Timer(u16::from_be_bytes([raw[0], raw[1]])),
        VarType::String => {
            let capacity = raw[0] as usize;
            let declared = raw[1] as usize;
            let available = raw.len() - 2;
            let len = declared.min(capacity).min(available);
            PlcValue::Text(String::from_utf8_lossy(&raw[2..2 + len]).to_string())
        }
    };
    Ok(value)
}

/// Encodes a typed value into the raw buffer for its wire type.
///
/// `count` is the declared element capacity and is only consulted for
/// [`VarType::String`], where it sets the capacity byte and the padded
/// buffer length. A bit encodes as a single byte holding 0 or 1.
///
/// # Errors
///
/// Returns [`LinkError::TypeMismatch`] if the value's tag does not match
/// `var_type`, and [`LinkError::Config`] if a string exceeds its declared
/// capacity.
pub fn encode(value: &PlcValue, var_type: VarType, count: usize) -> Result<Vec<u8>> {
    if value.var_type() != var_type {
        return Err(LinkError::type_mismatch(
            var_type.to_string(),
            value.var_type().to_string(),
        ));
    }

    let bytes = match value {
        PlcValue::Bool(v) => vec![u8::from(*v)],
        PlcValue::Byte(v) => vec![*v],
        PlcValue::Word(v) => v.to_be_bytes().to_vec(),
        PlcValue::Int(v) => v.to_be_bytes().to_vec(),
        PlcValue::DWord(v) => v.to_be_bytes().to_vec(),
        PlcValue::DInt(v) => v.to_be_bytes().to_vec(),
        PlcValue::Real(v) => v.to_be_bytes().to_vec(),
        PlcValue::LReal(v) => v.to_be_bytes().to_vec(),
        PlcValue::Time(v) => v.to_be_bytes().to_vec(),
        PlcValue::Counter(v) => v.to_be_bytes().to_vec(),
        PlcValue::Timer(v) => v.to_be_bytes().to_vec(),
        PlcValue::Text(text) => {
            if text.len() > count || count > u8::MAX as usize {
                return Err(LinkError::config(format!(
                    "string of {} bytes exceeds declared capacity {}",
                    text.len(),
                    count
                )));
            }
            let mut buffer = Vec::with_capacity(2 + count);
            buffer.push(count as u8);
            buffer.push(text.len() as u8);
            buffer.extend_from_slice(text.as_bytes());
            buffer.resize(2 + count, 0);
            buffer
        }
    };
    Ok(bytes)
}
