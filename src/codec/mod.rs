//! The alignment-directed wire codec (§4.B): encodes and decodes [`Value`]s
//! against a [`Signature`] block, padding to each type's natural alignment
//! as it goes.

#[cfg(test)]
mod tests;

use crate::error::{Error, ErrorKind, Result};
use crate::protocol::Endianness;
use crate::signature::Signature;
use crate::value::{type_mismatch, Value};

pub(crate) const MAX_ARRAY_LENGTH: u32 = 64 * 1024 * 1024;

/// The natural alignment, in bytes, of the type denoted by a single-atom
/// signature block's leading character.
pub(crate) fn alignment_of(block: &str) -> Result<usize> {
    let Some(c) = block.as_bytes().first() else {
        return Err(invalid("empty signature block"));
    };

    Ok(match c {
        b'y' | b'g' | b'v' => 1,
        b'n' | b'q' => 2,
        b'b' | b'i' | b'u' | b's' | b'o' | b'a' => 4,
        b'x' | b't' | b'd' | b'(' | b'{' => 8,
        _ => return Err(invalid(format!("unknown type code in `{block}`"))),
    })
}

pub(crate) fn padding(len: usize, align: usize) -> usize {
    let rem = len % align;

    if rem == 0 {
        0
    } else {
        align - rem
    }
}

pub(crate) fn align_to(buf: &mut Vec<u8>, align: usize) {
    let pad = padding(buf.len(), align);
    buf.resize(buf.len() + pad, 0);
}

/// Encode `value` against the single complete type denoted by `block`,
/// appending bytes (including alignment padding) to `buf`.
pub(crate) fn encode(buf: &mut Vec<u8>, block: &Signature, value: &Value) -> Result<()> {
    let s = block.as_str();
    let c = s.as_bytes()[0];

    match c {
        b'y' => {
            let Value::Byte(b) = value else {
                return Err(type_mismatch(block, value));
            };
            buf.push(*b);
        }
        b'b' => {
            let Value::Bool(b) = value else {
                return Err(type_mismatch(block, value));
            };
            align_to(buf, 4);
            buf.extend_from_slice(&(*b as u32).to_le_bytes());
        }
        b'n' => {
            let Value::Int16(v) = value else {
                return Err(type_mismatch(block, value));
            };
            align_to(buf, 2);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        b'q' => {
            let Value::UInt16(v) = value else {
                return Err(type_mismatch(block, value));
            };
            align_to(buf, 2);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        b'i' => {
            let Value::Int32(v) = value else {
                return Err(type_mismatch(block, value));
            };
            align_to(buf, 4);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        b'u' => {
            let Value::UInt32(v) = value else {
                return Err(type_mismatch(block, value));
            };
            align_to(buf, 4);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        b'x' => {
            let Value::Int64(v) = value else {
                return Err(type_mismatch(block, value));
            };
            align_to(buf, 8);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        b't' => {
            let Value::UInt64(v) = value else {
                return Err(type_mismatch(block, value));
            };
            align_to(buf, 8);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        b'd' => {
            let Value::Double(v) = value else {
                return Err(type_mismatch(block, value));
            };
            align_to(buf, 8);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        b's' => {
            let Value::String(v) = value else {
                return Err(type_mismatch(block, value));
            };
            encode_string(buf, v);
        }
        b'o' => {
            let Value::ObjectPath(v) = value else {
                return Err(type_mismatch(block, value));
            };
            encode_string(buf, v);
        }
        b'g' => {
            let Value::Signature(v) = value else {
                return Err(type_mismatch(block, value));
            };
            encode_signature_string(buf, v.as_str());
        }
        b'v' => {
            let Value::Variant(sig, inner) = value else {
                return Err(type_mismatch(block, value));
            };
            encode_signature_string(buf, sig.as_str());
            encode(buf, sig, inner)?;
        }
        b'a' => encode_array(buf, s, value)?,
        b'(' => encode_struct(buf, s, value)?,
        b'{' => return Err(invalid("dict-entry cannot be encoded outside of an array")),
        other => return Err(invalid(format!("unknown type code `{}`", other as char))),
    }

    Ok(())
}

fn encode_string(buf: &mut Vec<u8>, s: &str) {
    align_to(buf, 4);
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

fn encode_signature_string(buf: &mut Vec<u8>, s: &str) {
    buf.push(s.len() as u8);
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

fn encode_array(buf: &mut Vec<u8>, block: &str, value: &Value) -> Result<()> {
    let Value::Array {
        element_signature,
        items,
    } = value
    else {
        return Err(type_mismatch(Signature::new(block)?, value));
    };

    let elem_block = &block[1..];

    if elem_block != element_signature.as_str() {
        return Err(invalid(format!(
            "array element signature `{element_signature}` does not match expected `{elem_block}`"
        )));
    }

    align_to(buf, 4);
    let len_pos = buf.len();
    buf.extend_from_slice(&[0u8; 4]);

    let elem_align = alignment_of(elem_block)?;
    align_to(buf, elem_align);
    let elems_start = buf.len();

    let elem_sig = Signature::new(elem_block)?;

    for item in items {
        if elem_block.as_bytes()[0] == b'{' {
            encode_dict_entry(buf, elem_block, item)?;
        } else {
            encode(buf, elem_sig, item)?;
        }
    }

    let elems_len = buf.len() - elems_start;

    if elems_len > MAX_ARRAY_LENGTH as usize {
        return Err(Error::new(ErrorKind::Malformed(format!(
            "array of {elems_len} bytes exceeds the maximum of {MAX_ARRAY_LENGTH}"
        ))));
    }

    buf[len_pos..len_pos + 4].copy_from_slice(&(elems_len as u32).to_le_bytes());
    Ok(())
}

fn encode_struct(buf: &mut Vec<u8>, block: &str, value: &Value) -> Result<()> {
    let Value::Struct(items) = value else {
        return Err(type_mismatch(Signature::new(block)?, value));
    };

    align_to(buf, 8);

    let inner = &block[1..block.len() - 1];
    let blocks = crate::signature::split(inner)?;

    if blocks.len() != items.len() {
        return Err(invalid(format!(
            "struct `{block}` expects {} fields, found {}",
            blocks.len(),
            items.len()
        )));
    }

    for (field_block, item) in blocks.iter().zip(items) {
        encode(buf, Signature::new(field_block)?, item)?;
    }

    Ok(())
}

fn encode_dict_entry(buf: &mut Vec<u8>, block: &str, value: &Value) -> Result<()> {
    let Value::DictEntry(key, val) = value else {
        return Err(type_mismatch(Signature::new(block)?, value));
    };

    align_to(buf, 8);

    let inner = &block[1..block.len() - 1];
    let blocks = crate::signature::split(inner)?;

    if blocks.len() != 2 {
        return Err(invalid(format!("dict-entry `{block}` must have exactly two fields")));
    }

    encode(buf, Signature::new(blocks[0])?, key)?;
    encode(buf, Signature::new(blocks[1])?, val)?;
    Ok(())
}

/// Decode one complete value of the type denoted by `block`, starting at
/// byte offset `pos` in `buf`. Returns the value and the offset
/// immediately after it.
pub(crate) fn decode(
    buf: &[u8],
    pos: usize,
    block: &str,
    endian: Endianness,
) -> Result<(Value, usize)> {
    let c = block.as_bytes()[0];

    Ok(match c {
        b'y' => (Value::Byte(read_u8(buf, pos)?), pos + 1),
        b'b' => {
            let pos = align(pos, 4);
            let v = read_u32(buf, pos, endian)?;
            (Value::Bool(v != 0), pos + 4)
        }
        b'n' => {
            let pos = align(pos, 2);
            let bytes = read_bytes(buf, pos, 2)?;
            let v = read_i16(bytes, endian);
            (Value::Int16(v), pos + 2)
        }
        b'q' => {
            let pos = align(pos, 2);
            let bytes = read_bytes(buf, pos, 2)?;
            let v = read_u16(bytes, endian);
            (Value::UInt16(v), pos + 2)
        }
        b'i' => {
            let pos = align(pos, 4);
            let v = read_u32(buf, pos, endian)? as i32;
            (Value::Int32(v), pos + 4)
        }
        b'u' => {
            let pos = align(pos, 4);
            let v = read_u32(buf, pos, endian)?;
            (Value::UInt32(v), pos + 4)
        }
        b'x' => {
            let pos = align(pos, 8);
            let bytes = read_bytes(buf, pos, 8)?;
            let v = read_i64(bytes, endian);
            (Value::Int64(v), pos + 8)
        }
        b't' => {
            let pos = align(pos, 8);
            let bytes = read_bytes(buf, pos, 8)?;
            let v = read_u64(bytes, endian);
            (Value::UInt64(v), pos + 8)
        }
        b'd' => {
            let pos = align(pos, 8);
            let bytes = read_bytes(buf, pos, 8)?;
            let bits = read_u64(bytes, endian);
            (Value::Double(f64::from_bits(bits)), pos + 8)
        }
        b's' => {
            let (s, next) = decode_string(buf, pos, endian)?;
            (Value::String(s), next)
        }
        b'o' => {
            let (s, next) = decode_string(buf, pos, endian)?;
            (Value::ObjectPath(s), next)
        }
        b'g' => {
            let (s, next) = decode_signature_string(buf, pos)?;
            (Value::Signature(Signature::new(&s)?.to_owned()), next)
        }
        b'v' => {
            let (sig_str, after_sig) = decode_signature_string(buf, pos)?;
            let sig = Signature::new(&sig_str)?.to_owned();
            let (inner, next) = decode(buf, after_sig, sig.as_str(), endian)?;
            (Value::Variant(sig, Box::new(inner)), next)
        }
        b'a' => decode_array(buf, pos, block, endian)?,
        b'(' => decode_struct(buf, pos, block, endian)?,
        b'{' => return Err(invalid("dict-entry cannot be decoded outside of an array")),
        other => return Err(invalid(format!("unknown type code `{}`", other as char))),
    })
}

fn align(pos: usize, to: usize) -> usize {
    pos + padding(pos, to)
}

fn decode_array(
    buf: &[u8],
    pos: usize,
    block: &str,
    endian: Endianness,
) -> Result<(Value, usize)> {
    let pos = align(pos, 4);
    let len = read_u32(buf, pos, endian)?;

    if len > MAX_ARRAY_LENGTH {
        return Err(Error::new(ErrorKind::Malformed(format!(
            "array length {len} exceeds maximum of {MAX_ARRAY_LENGTH}"
        ))));
    }

    let elem_block = &block[1..];
    let elem_align = alignment_of(elem_block)?;
    let start = align(pos + 4, elem_align);
    let end = start
        .checked_add(len as usize)
        .ok_or_else(|| invalid("array length overflow"))?;

    if end > buf.len() {
        return Err(Error::new(ErrorKind::Malformed(
            "array byte-length overruns the buffer".to_owned(),
        )));
    }

    let mut items = Vec::new();
    let mut cursor = start;

    while cursor < end {
        let (item, next) = if elem_block.as_bytes()[0] == b'{' {
            decode_dict_entry(buf, cursor, elem_block, endian)?
        } else {
            decode(buf, cursor, elem_block, endian)?
        };
        items.push(item);
        cursor = next;
    }

    if cursor != end {
        return Err(Error::new(ErrorKind::Malformed(
            "array elements did not exactly fill the declared length".to_owned(),
        )));
    }

    Ok((
        Value::Array {
            element_signature: Signature::new(elem_block)?.to_owned(),
            items,
        },
        end,
    ))
}

fn decode_struct(
    buf: &[u8],
    pos: usize,
    block: &str,
    endian: Endianness,
) -> Result<(Value, usize)> {
    let pos = align(pos, 8);
    let inner = &block[1..block.len() - 1];
    let blocks = crate::signature::split(inner)?;

    let mut items = Vec::with_capacity(blocks.len());
    let mut cursor = pos;

    for field_block in blocks {
        let (item, next) = decode(buf, cursor, field_block, endian)?;
        items.push(item);
        cursor = next;
    }

    Ok((Value::Struct(items), cursor))
}

/// Decode a dict-entry block (`{KV}`), used only from within array decoding.
pub(crate) fn decode_dict_entry(
    buf: &[u8],
    pos: usize,
    block: &str,
    endian: Endianness,
) -> Result<(Value, usize)> {
    let pos = align(pos, 8);
    let inner = &block[1..block.len() - 1];
    let blocks = crate::signature::split(inner)?;

    let (key, next) = decode(buf, pos, blocks[0], endian)?;
    let (val, next) = decode(buf, next, blocks[1], endian)?;

    Ok((Value::DictEntry(Box::new(key), Box::new(val)), next))
}

fn decode_string(buf: &[u8], pos: usize, endian: Endianness) -> Result<(String, usize)> {
    let pos = align(pos, 4);
    let len = read_u32(buf, pos, endian)? as usize;
    let start = pos + 4;
    let end = start
        .checked_add(len)
        .ok_or_else(|| invalid("string length overflow"))?;
    let bytes = read_bytes(buf, start, len)?;
    let s = std::str::from_utf8(bytes)?.to_owned();
    // Skip the trailing NUL.
    Ok((s, end + 1))
}

fn decode_signature_string(buf: &[u8], pos: usize) -> Result<(String, usize)> {
    let len = read_u8(buf, pos)? as usize;
    let start = pos + 1;
    let end = start + len;
    let bytes = read_bytes(buf, start, len)?;
    let s = std::str::from_utf8(bytes)?.to_owned();
    Ok((s, end + 1))
}

fn read_bytes(buf: &[u8], pos: usize, len: usize) -> Result<&[u8]> {
    buf.get(pos..pos + len)
        .ok_or_else(|| Error::new(ErrorKind::ShortBuffer))
}

fn read_u8(buf: &[u8], pos: usize) -> Result<u8> {
    buf.get(pos).copied().ok_or_else(|| Error::new(ErrorKind::ShortBuffer))
}

fn read_u32(buf: &[u8], pos: usize, endian: Endianness) -> Result<u32> {
    let bytes = read_bytes(buf, pos, 4)?;
    let array = [bytes[0], bytes[1], bytes[2], bytes[3]];
    Ok(match endian {
        Endianness::Little => u32::from_le_bytes(array),
        Endianness::Big => u32::from_be_bytes(array),
    })
}

fn read_u16(bytes: &[u8], endian: Endianness) -> u16 {
    let array = [bytes[0], bytes[1]];
    match endian {
        Endianness::Little => u16::from_le_bytes(array),
        Endianness::Big => u16::from_be_bytes(array),
    }
}

fn read_i16(bytes: &[u8], endian: Endianness) -> i16 {
    read_u16(bytes, endian) as i16
}

fn read_u64(bytes: &[u8], endian: Endianness) -> u64 {
    let array = [
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ];
    match endian {
        Endianness::Little => u64::from_le_bytes(array),
        Endianness::Big => u64::from_be_bytes(array),
    }
}

fn read_i64(bytes: &[u8], endian: Endianness) -> i64 {
    read_u64(bytes, endian) as i64
}

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidSignature(message.into()))
}
