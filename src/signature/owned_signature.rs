use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;

use super::Signature;

/// An owned, validated type signature.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct OwnedSignature(String);

impl OwnedSignature {
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn as_signature(&self) -> &Signature {
        Signature::new_unchecked(&self.0)
    }
}

impl From<&Signature> for OwnedSignature {
    fn from(sig: &Signature) -> Self {
        Self(sig.as_str().to_owned())
    }
}

impl Deref for OwnedSignature {
    type Target = Signature;

    fn deref(&self) -> &Self::Target {
        self.as_signature()
    }
}

impl Borrow<Signature> for OwnedSignature {
    fn borrow(&self) -> &Signature {
        self.as_signature()
    }
}

impl fmt::Debug for OwnedSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_signature(), f)
    }
}

impl fmt::Display for OwnedSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.as_signature(), f)
    }
}
