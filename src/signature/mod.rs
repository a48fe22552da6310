//! The type-signature mini-language: a compact grammar describing the
//! shape of a message body, nested containers and all.

mod owned_signature;
pub use self::owned_signature::OwnedSignature;

#[cfg(test)]
mod tests;

use std::fmt;

use crate::error::{Error, ErrorKind, Result};

/// A borrowed, validated type signature.
///
/// A `Signature` is never constructed without being validated first: every
/// value obtained through the public API denotes a sequence of complete,
/// well-bracketed type atoms.
#[derive(PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Signature(str);

impl Signature {
    pub const EMPTY: &'static Signature = Signature::new_unchecked("");

    /// Validate and wrap a signature string.
    pub fn new(sig: &str) -> Result<&Signature> {
        validate(sig)?;
        Ok(Self::new_unchecked(sig))
    }

    const fn new_unchecked(sig: &str) -> &Signature {
        // SAFETY: `Signature` is `repr(transparent)` over `str`.
        unsafe { &*(sig as *const str as *const Signature) }
    }

    /// Borrow the underlying string.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Split this signature into its top-level blocks.
    pub fn split(&self) -> Result<Vec<&Signature>> {
        split(&self.0).map(|blocks| blocks.into_iter().map(Self::new_unchecked).collect())
    }

    /// Extract the first complete type block starting at byte offset `i`.
    pub fn next_block(&self, i: usize) -> Result<(&Signature, usize)> {
        let (block, j) = next_block(&self.0, i)?;
        Ok((Self::new_unchecked(block), j))
    }

    pub fn to_owned(&self) -> OwnedSignature {
        OwnedSignature::from(self)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({:?})", &self.0)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validate a complete signature string, ensuring every character belongs
/// to a well-formed, fully-consumed sequence of type blocks.
pub(crate) fn validate(sig: &str) -> Result<()> {
    split(sig)?;
    Ok(())
}

/// Repeatedly extract [`next_block`] until the signature is fully consumed.
pub(crate) fn split(sig: &str) -> Result<Vec<&str>> {
    let bytes = sig.as_bytes();
    let mut i = 0;
    let mut out = Vec::new();

    while i < bytes.len() {
        let (block, j) = next_block(sig, i)?;
        out.push(block);
        i = j;
    }

    Ok(out)
}

/// Returns the shortest signature starting at `i` that denotes one
/// complete type, and the byte offset immediately after it.
pub(crate) fn next_block(sig: &str, i: usize) -> Result<(&str, usize)> {
    let bytes = sig.as_bytes();

    let Some(&c) = bytes.get(i) else {
        return Err(invalid(format!(
            "empty signature at offset {i} in `{sig}`"
        )));
    };

    match c {
        b'(' => {
            let end = matching_bracket(bytes, i, b'(', b')')?;
            Ok((&sig[i..=end], end + 1))
        }
        b'{' => Err(invalid(format!(
            "dict-entry `{{...}}` outside of an array at offset {i} in `{sig}`"
        ))),
        b'a' => {
            let Some(&next) = bytes.get(i + 1) else {
                return Err(invalid(format!(
                    "array `a` with no following type at offset {i} in `{sig}`"
                )));
            };

            if next == b'{' {
                let end = matching_bracket(bytes, i + 1, b'{', b'}')?;
                let entry = &sig[i + 2..end];
                validate_dict_entry(entry)?;
                Ok((&sig[i..=end], end + 1))
            } else {
                let (_, j) = next_block(sig, i + 1)?;
                Ok((&sig[i..j], j))
            }
        }
        b'y' | b'b' | b'n' | b'q' | b'i' | b'u' | b'x' | b't' | b'd' | b's' | b'o' | b'g'
        | b'v' => Ok((&sig[i..=i], i + 1)),
        other => Err(invalid(format!(
            "unknown type code `{}` at offset {i} in `{sig}`",
            other as char
        ))),
    }
}

fn validate_dict_entry(entry: &str) -> Result<()> {
    let (_, j) = next_block(entry, 0)?;

    if j == entry.len() {
        return Err(invalid(format!(
            "dict-entry `{{{entry}}}` must contain exactly two types"
        )));
    }

    let (_, k) = next_block(entry, j)?;

    if k != entry.len() {
        return Err(invalid(format!(
            "dict-entry `{{{entry}}}` must contain exactly two types"
        )));
    }

    Ok(())
}

/// Find the index of the bracket matching the one at `open_index`.
fn matching_bracket(bytes: &[u8], open_index: usize, open: u8, close: u8) -> Result<usize> {
    let mut depth = 0usize;
    let mut i = open_index;

    while i < bytes.len() {
        if bytes[i] == open {
            depth += 1;
        } else if bytes[i] == close {
            depth -= 1;

            if depth == 0 {
                return Ok(i);
            }
        }

        i += 1;
    }

    Err(invalid(format!(
        "unbalanced brackets starting at offset {open_index}"
    )))
}

fn invalid(message: String) -> Error {
    Error::new(ErrorKind::InvalidSignature(message))
}
