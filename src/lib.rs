//! Pure-Rust core of a desktop message-bus client: the SASL-style auth
//! handshake, the binary wire codec, the message framing layer, signal
//! match rules, introspection parsing, and (with the `tokio` feature) the
//! async connection multiplexer that ties them together.
//!
//! Address-from-environment discovery beyond a thin `DBUS_*_BUS_ADDRESS`
//! lookup, concrete broker behavior, and dispatching inbound method calls
//! to application handlers are out of scope; this crate covers the wire
//! layer and its concurrency surface.

#[doc(inline)]
pub use self::error::{Error, Result};
mod error;

#[doc(inline)]
pub use self::signature::{OwnedSignature, Signature};
pub mod signature;

#[doc(inline)]
pub use self::value::Value;
pub mod value;

#[doc(inline)]
pub use self::message::{Message, MessageKind};
mod message;

mod protocol;

mod codec;

pub mod sasl;

pub mod introspect;

#[doc(inline)]
pub use self::matchrule::{MatchRule, MatchRuleBuilder};
mod matchrule;

pub mod address;

#[cfg(feature = "tokio")]
pub mod transport;

#[cfg(feature = "tokio")]
#[doc(inline)]
pub use self::connection::{Bus, BusBuilder};
#[cfg(feature = "tokio")]
mod connection;

#[cfg(feature = "tokio")]
#[doc(inline)]
pub use self::object::{Interface, Object};
#[cfg(feature = "tokio")]
mod object;
