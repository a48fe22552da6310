//! The message model (§4.C): header fields, body, and the binary framing
//! that carries both across the wire.

use std::num::NonZeroU32;

use crate::codec;
use crate::error::{Error, ErrorKind, Result};
use crate::protocol::{Endianness, Flags, HeaderField, MessageType, PROTOCOL_VERSION};
use crate::signature::{OwnedSignature, Signature};
use crate::value::{body_signature, Value};

/// The kind-specific part of a message, mirroring which header fields a
/// message type requires.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MessageKind {
    MethodCall { path: String, member: String },
    MethodReturn { reply_serial: NonZeroU32 },
    Error { error_name: String, reply_serial: NonZeroU32 },
    Signal { path: String, member: String },
}

/// A complete D-Bus message: kind, header fields and an ordered body.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub(crate) kind: MessageKind,
    pub(crate) serial: Option<NonZeroU32>,
    pub(crate) flags: Flags,
    pub(crate) interface: Option<String>,
    pub(crate) destination: Option<String>,
    pub(crate) sender: Option<String>,
    pub(crate) signature: OwnedSignature,
    pub(crate) body: Vec<Value>,
}

impl Message {
    /// Construct a method call to `member` on `path`.
    pub fn method_call(path: impl Into<String>, member: impl Into<String>) -> Self {
        Self::new(MessageKind::MethodCall {
            path: path.into(),
            member: member.into(),
        })
    }

    /// Construct a method return replying to `reply_serial`.
    pub fn method_return(reply_serial: NonZeroU32) -> Self {
        Self::new(MessageKind::MethodReturn { reply_serial })
    }

    /// Construct an error reply to `reply_serial`.
    pub fn error(error_name: impl Into<String>, reply_serial: NonZeroU32) -> Self {
        Self::new(MessageKind::Error {
            error_name: error_name.into(),
            reply_serial,
        })
    }

    /// Construct a signal emission of `member` from `path`.
    pub fn signal(path: impl Into<String>, member: impl Into<String>) -> Self {
        Self::new(MessageKind::Signal {
            path: path.into(),
            member: member.into(),
        })
    }

    fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            serial: None,
            flags: Flags::EMPTY,
            interface: None,
            destination: None,
            sender: None,
            signature: OwnedSignature::empty(),
            body: Vec::new(),
        }
    }

    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    pub fn serial(&self) -> Option<NonZeroU32> {
        self.serial
    }

    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn body(&self) -> &[Value] {
        &self.body
    }

    /// The object path of this message, if its kind carries one.
    pub fn path(&self) -> Option<&str> {
        match &self.kind {
            MessageKind::MethodCall { path, .. } | MessageKind::Signal { path, .. } => {
                Some(path.as_str())
            }
            _ => None,
        }
    }

    /// The member name of this message, if its kind carries one.
    pub fn member(&self) -> Option<&str> {
        match &self.kind {
            MessageKind::MethodCall { member, .. } | MessageKind::Signal { member, .. } => {
                Some(member.as_str())
            }
            _ => None,
        }
    }

    pub fn no_reply_expected(&self) -> bool {
        self.flags.contains(Flags::NO_REPLY_EXPECTED)
    }

    pub fn with_serial(mut self, serial: NonZeroU32) -> Self {
        self.serial = Some(serial);
        self
    }

    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_no_reply_expected(mut self) -> Self {
        self.flags = self.flags | Flags::NO_REPLY_EXPECTED;
        self
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Attach a body, deriving the message's signature from its values.
    pub fn with_body(mut self, body: Vec<Value>) -> Self {
        self.signature = body_signature(&body);
        self.body = body;
        self
    }

    pub(crate) fn message_type(&self) -> MessageType {
        match self.kind {
            MessageKind::MethodCall { .. } => MessageType::METHOD_CALL,
            MessageKind::MethodReturn { .. } => MessageType::METHOD_RETURN,
            MessageKind::Error { .. } => MessageType::ERROR,
            MessageKind::Signal { .. } => MessageType::SIGNAL,
        }
    }

    /// Encode this message to its complete wire representation, assigning it
    /// `serial` in the header (overriding any serial set via
    /// [`Message::with_serial`]).
    pub(crate) fn encode(&self, serial: NonZeroU32) -> Result<Vec<u8>> {
        let mut buf = Vec::new();

        buf.push(Endianness::NATIVE.to_byte());
        buf.push(self.message_type().0);
        buf.push(self.flags.0);
        buf.push(PROTOCOL_VERSION);
        buf.extend_from_slice(&[0u8; 4]); // body length, patched below
        buf.extend_from_slice(&serial.get().to_le_bytes());

        let fields = self.encode_header_fields();
        codec::encode(&mut buf, Signature::new("a(yv)")?, &fields)?;
        codec::align_to(&mut buf, 8);

        let body_start = buf.len();

        for (value, block) in self.body.iter().zip(crate::signature::split(self.signature.as_str())?) {
            codec::encode(&mut buf, Signature::new(block)?, value)?;
        }

        let body_len = (buf.len() - body_start) as u32;
        buf[4..8].copy_from_slice(&body_len.to_le_bytes());

        Ok(buf)
    }

    fn encode_header_fields(&self) -> Value {
        let mut items = Vec::new();

        let mut push = |code: u8, value: Value| {
            items.push(Value::Struct(vec![Value::Byte(code), Value::variant(value)]));
        };

        match &self.kind {
            MessageKind::MethodCall { path, member } => {
                push(HeaderField::PATH.0, Value::ObjectPath(path.clone()));
                push(HeaderField::MEMBER.0, Value::String(member.clone()));
            }
            MessageKind::MethodReturn { reply_serial } => {
                push(HeaderField::REPLY_SERIAL.0, Value::UInt32(reply_serial.get()));
            }
            MessageKind::Error {
                error_name,
                reply_serial,
            } => {
                push(HeaderField::ERROR_NAME.0, Value::String(error_name.clone()));
                push(HeaderField::REPLY_SERIAL.0, Value::UInt32(reply_serial.get()));
            }
            MessageKind::Signal { path, member } => {
                push(HeaderField::PATH.0, Value::ObjectPath(path.clone()));
                push(HeaderField::MEMBER.0, Value::String(member.clone()));
            }
        }

        if let Some(interface) = &self.interface {
            push(HeaderField::INTERFACE.0, Value::String(interface.clone()));
        }

        if let Some(destination) = &self.destination {
            push(HeaderField::DESTINATION.0, Value::String(destination.clone()));
        }

        if let Some(sender) = &self.sender {
            push(HeaderField::SENDER.0, Value::String(sender.clone()));
        }

        if !self.signature.is_empty() {
            push(HeaderField::SIGNATURE.0, Value::Signature(self.signature.clone()));
        }

        Value::Array {
            element_signature: Signature::new("(yv)").expect("valid signature").to_owned(),
            items,
        }
    }

    /// Parse the 16-byte fixed prefix of a message (12-byte header plus the
    /// field-array length), reporting how many further bytes are needed to
    /// read the complete frame.
    pub(crate) fn decode_prefix(buf: &[u8]) -> Result<FramePrefix> {
        if buf.len() < 16 {
            return Err(Error::new(ErrorKind::ShortBuffer));
        }

        let endian = Endianness::from_byte(buf[0])
            .ok_or_else(|| Error::new(ErrorKind::Malformed("invalid endian flag".to_owned())))?;

        let read_u32 = |pos: usize| -> u32 {
            let b = [buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]];
            match endian {
                Endianness::Little => u32::from_le_bytes(b),
                Endianness::Big => u32::from_be_bytes(b),
            }
        };

        let message_type = buf[1];
        let flags = Flags(buf[2]);
        let protocol_version = buf[3];

        if protocol_version != PROTOCOL_VERSION {
            return Err(Error::new(ErrorKind::Malformed(format!(
                "unsupported protocol version {protocol_version}"
            ))));
        }

        let body_length = read_u32(4);
        let serial = read_u32(8);
        let fields_length = read_u32(12);

        let fields_end = 16usize
            .checked_add(fields_length as usize)
            .ok_or_else(|| Error::new(ErrorKind::Malformed("field array length overflow".to_owned())))?;
        let body_start = fields_end + codec::padding(fields_end, 8);
        let total_len = body_start
            .checked_add(body_length as usize)
            .ok_or_else(|| Error::new(ErrorKind::Malformed("body length overflow".to_owned())))?;

        Ok(FramePrefix {
            endian,
            message_type,
            flags,
            body_length,
            serial,
            fields_length,
            total_len,
        })
    }

    /// Decode a complete frame (as identified by a prior call to
    /// [`Message::decode_prefix`]) into a [`Message`].
    pub(crate) fn decode(buf: &[u8], prefix: &FramePrefix) -> Result<Message> {
        let endian = prefix.endian;
        let fields_end = 16 + prefix.fields_length as usize;

        let fields_sig = Signature::new("a(yv)")?;
        let (fields, consumed) = codec::decode(buf, 12, fields_sig.as_str(), endian)?;
        debug_assert_eq!(consumed, fields_end);

        let Value::Array { items, .. } = fields else {
            return Err(Error::new(ErrorKind::Malformed("header fields were not an array".to_owned())));
        };

        let mut path = None;
        let mut interface = None;
        let mut member = None;
        let mut error_name = None;
        let mut reply_serial = None;
        let mut destination = None;
        let mut sender = None;
        let mut signature = OwnedSignature::empty();

        for item in items {
            let Value::Struct(fields) = item else {
                return Err(Error::new(ErrorKind::Malformed("header field entry was not a struct".to_owned())));
            };
            let [Value::Byte(code), Value::Variant(_, value)] = <[Value; 2]>::try_from(fields)
                .map_err(|_| Error::new(ErrorKind::Malformed("header field entry had wrong arity".to_owned())))?
            else {
                return Err(Error::new(ErrorKind::Malformed("header field entry had the wrong shape".to_owned())));
            };

            match code {
                c if c == HeaderField::PATH.0 => path = Some(expect_object_path(*value)?),
                c if c == HeaderField::INTERFACE.0 => interface = Some(expect_string(*value)?),
                c if c == HeaderField::MEMBER.0 => member = Some(expect_string(*value)?),
                c if c == HeaderField::ERROR_NAME.0 => error_name = Some(expect_string(*value)?),
                c if c == HeaderField::REPLY_SERIAL.0 => reply_serial = Some(expect_u32(*value)?),
                c if c == HeaderField::DESTINATION.0 => destination = Some(expect_string(*value)?),
                c if c == HeaderField::SENDER.0 => sender = Some(expect_string(*value)?),
                c if c == HeaderField::SIGNATURE.0 => signature = expect_signature(*value)?,
                _ => {}
            }
        }

        let kind = match prefix.message_type {
            t if t == MessageType::METHOD_CALL.0 => MessageKind::MethodCall {
                path: path.ok_or_else(|| missing_field("PATH"))?,
                member: member.ok_or_else(|| missing_field("MEMBER"))?,
            },
            t if t == MessageType::METHOD_RETURN.0 => MessageKind::MethodReturn {
                reply_serial: to_nonzero(reply_serial.ok_or_else(|| missing_field("REPLY_SERIAL"))?)?,
            },
            t if t == MessageType::ERROR.0 => MessageKind::Error {
                error_name: error_name.ok_or_else(|| missing_field("ERROR_NAME"))?,
                reply_serial: to_nonzero(reply_serial.ok_or_else(|| missing_field("REPLY_SERIAL"))?)?,
            },
            t if t == MessageType::SIGNAL.0 => MessageKind::Signal {
                path: path.ok_or_else(|| missing_field("PATH"))?,
                member: member.ok_or_else(|| missing_field("MEMBER"))?,
            },
            other => {
                return Err(Error::new(ErrorKind::Malformed(format!(
                    "unknown message type {other}"
                ))))
            }
        };

        let body_start = fields_end + codec::padding(fields_end, 8);
        let mut body = Vec::new();
        let mut cursor = body_start;

        for block in crate::signature::split(signature.as_str())? {
            let (value, next) = codec::decode(buf, cursor, block, endian)?;
            body.push(value);
            cursor = next;
        }

        Ok(Message {
            kind,
            serial: to_nonzero(prefix.serial).ok(),
            flags: prefix.flags,
            interface,
            destination,
            sender,
            signature,
            body,
        })
    }
}

/// The result of parsing a message's fixed 16-byte prefix: enough to know
/// how many further bytes to read before the frame is complete.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FramePrefix {
    pub(crate) endian: Endianness,
    pub(crate) message_type: u8,
    pub(crate) flags: Flags,
    pub(crate) body_length: u32,
    pub(crate) serial: u32,
    pub(crate) fields_length: u32,
    /// Total number of bytes the complete frame occupies, prefix included.
    pub(crate) total_len: usize,
}

fn missing_field(name: &'static str) -> Error {
    Error::new(ErrorKind::Malformed(format!("missing required header field {name}")))
}

fn to_nonzero(value: u32) -> Result<NonZeroU32> {
    NonZeroU32::new(value).ok_or_else(|| Error::new(ErrorKind::Malformed("serial must not be zero".to_owned())))
}

fn expect_string(value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(Error::new(ErrorKind::Malformed(format!(
            "expected string header field, found {}",
            other.type_name()
        )))),
    }
}

fn expect_object_path(value: Value) -> Result<String> {
    match value {
        Value::ObjectPath(s) => Ok(s),
        other => Err(Error::new(ErrorKind::Malformed(format!(
            "expected object path header field, found {}",
            other.type_name()
        )))),
    }
}

fn expect_u32(value: Value) -> Result<u32> {
    match value {
        Value::UInt32(v) => Ok(v),
        other => Err(Error::new(ErrorKind::Malformed(format!(
            "expected uint32 header field, found {}",
            other.type_name()
        )))),
    }
}

fn expect_signature(value: Value) -> Result<OwnedSignature> {
    match value {
        Value::Signature(s) => Ok(s),
        other => Err(Error::new(ErrorKind::Malformed(format!(
            "expected signature header field, found {}",
            other.type_name()
        )))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_header_round_trip() {
        let message = Message::method_call("/org/freedesktop/DBus", "Hello")
            .with_interface("org.freedesktop.DBus")
            .with_destination("org.freedesktop.DBus");

        let serial = NonZeroU32::new(1).unwrap();
        let encoded = message.encode(serial).unwrap();

        let expected: &[u8] = b"l\x01\x00\x01\x00\x00\x00\x00\x01\x00\x00\x00\
            m\x00\x00\x00\
            \x01\x01o\x00\x15\x00\x00\x00/org/freedesktop/DBus\x00\x00\x00\
            \x02\x01s\x00\x14\x00\x00\x00org.freedesktop.DBus\x00\x00\x00\x00\
            \x03\x01s\x00\x05\x00\x00\x00Hello\x00\x00\x00\
            \x06\x01s\x00\x14\x00\x00\x00org.freedesktop.DBus\x00\x00\x00\x00";

        assert_eq!(encoded, expected);

        let prefix = Message::decode_prefix(&encoded).unwrap();
        assert_eq!(prefix.total_len, encoded.len());

        let decoded = Message::decode(&encoded, &prefix).unwrap();
        assert_eq!(decoded.path(), Some("/org/freedesktop/DBus"));
        assert_eq!(decoded.member(), Some("Hello"));
        assert_eq!(decoded.interface(), Some("org.freedesktop.DBus"));
        assert_eq!(decoded.destination(), Some("org.freedesktop.DBus"));
        assert_eq!(decoded.serial(), Some(serial));
        assert!(decoded.body().is_empty());
    }

    #[test]
    fn method_return_with_body_round_trips() {
        let message = Message::method_return(NonZeroU32::new(7).unwrap())
            .with_destination("org.example.Caller")
            .with_body(vec![Value::String("pong".to_owned())]);

        let serial = NonZeroU32::new(9).unwrap();
        let encoded = message.encode(serial).unwrap();

        let prefix = Message::decode_prefix(&encoded).unwrap();
        assert_eq!(prefix.total_len, encoded.len());

        let decoded = Message::decode(&encoded, &prefix).unwrap();
        assert_eq!(
            decoded.kind(),
            &MessageKind::MethodReturn {
                reply_serial: NonZeroU32::new(7).unwrap()
            }
        );
        assert_eq!(decoded.body(), &[Value::String("pong".to_owned())]);
    }

    #[test]
    fn signal_without_body_round_trips() {
        let message = Message::signal("/org/example/Object", "Changed")
            .with_interface("org.example.Iface")
            .with_no_reply_expected();

        let serial = NonZeroU32::new(2).unwrap();
        let encoded = message.encode(serial).unwrap();
        assert!(Flags(encoded[2]).contains(Flags::NO_REPLY_EXPECTED));

        let prefix = Message::decode_prefix(&encoded).unwrap();
        let decoded = Message::decode(&encoded, &prefix).unwrap();
        assert_eq!(decoded.path(), Some("/org/example/Object"));
        assert_eq!(decoded.member(), Some("Changed"));
        assert!(decoded.no_reply_expected());
    }

    #[test]
    fn error_reply_round_trips() {
        let message = Message::error(
            "org.freedesktop.DBus.Error.Failed",
            NonZeroU32::new(3).unwrap(),
        )
        .with_body(vec![Value::String("nope".to_owned())]);

        let serial = NonZeroU32::new(4).unwrap();
        let encoded = message.encode(serial).unwrap();
        let prefix = Message::decode_prefix(&encoded).unwrap();
        let decoded = Message::decode(&encoded, &prefix).unwrap();

        assert_eq!(
            decoded.kind(),
            &MessageKind::Error {
                error_name: "org.freedesktop.DBus.Error.Failed".to_owned(),
                reply_serial: NonZeroU32::new(3).unwrap()
            }
        );
    }

    #[test]
    fn short_prefix_is_reported() {
        assert!(Message::decode_prefix(&[1, 2, 3]).is_err());
    }
}
