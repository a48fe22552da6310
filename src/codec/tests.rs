use super::*;
use crate::protocol::Endianness;
use crate::signature::Signature;
use crate::value::Value;

fn roundtrip(sig: &str, value: Value) {
    let signature = Signature::new(sig).unwrap();
    let mut buf = Vec::new();
    encode(&mut buf, signature, &value).unwrap();
    let (decoded, consumed) = decode(&buf, 0, sig, Endianness::Little).unwrap();
    assert_eq!(consumed, buf.len());
    assert_eq!(decoded, value);
}

#[test]
fn scalars_roundtrip() {
    roundtrip("y", Value::Byte(42));
    roundtrip("b", Value::Bool(true));
    roundtrip("b", Value::Bool(false));
    roundtrip("n", Value::Int16(-1234));
    roundtrip("q", Value::UInt16(1234));
    roundtrip("i", Value::Int32(-123456));
    roundtrip("u", Value::UInt32(123456));
    roundtrip("x", Value::Int64(-123456789));
    roundtrip("t", Value::UInt64(123456789));
    roundtrip("d", Value::Double(3.5));
    roundtrip("s", Value::String("hello".to_owned()));
    roundtrip("o", Value::ObjectPath("/org/example/Foo".to_owned()));
    roundtrip("g", Value::Signature(Signature::new("a{sv}").unwrap().to_owned()));
}

#[test]
fn array_of_struct_roundtrip() {
    let value = Value::array(
        Signature::new("(su)").unwrap(),
        vec![
            Value::Struct(vec![Value::String("test1".into()), Value::UInt32(1)]),
            Value::Struct(vec![Value::String("test2".into()), Value::UInt32(2)]),
            Value::Struct(vec![Value::String("test3".into()), Value::UInt32(3)]),
        ],
    );
    roundtrip("a(su)", value);
}

/// S2 from the seed scenarios: array-of-struct alignment, with the
/// array-length field correctly excluding padding before the first
/// element (see DESIGN.md for why this differs from the source fixture).
#[test]
fn s2_array_of_struct_literal_bytes() {
    let value = Value::array(
        Signature::new("(su)").unwrap(),
        vec![
            Value::Struct(vec![Value::String("test1".into()), Value::UInt32(1)]),
            Value::Struct(vec![Value::String("test2".into()), Value::UInt32(2)]),
            Value::Struct(vec![Value::String("test3".into()), Value::UInt32(3)]),
        ],
    );

    let mut buf = Vec::new();
    encode(&mut buf, Signature::new("a(su)").unwrap(), &value).unwrap();

    let expected = b"\x30\x00\x00\x00\x00\x00\x00\x00\
        \x05\x00\x00\x00test1\x00\x00\x00\x01\x00\x00\x00\
        \x05\x00\x00\x00test2\x00\x00\x00\x02\x00\x00\x00\
        \x05\x00\x00\x00test3\x00\x00\x00\x03\x00\x00\x00";
    assert_eq!(buf, expected);
}

/// S3 from the seed scenarios: a sequence of variants.
#[test]
fn s3_variant_sequence() {
    let buf: &[u8] = b"\x01s\x00\x00\x04\x00\x00\x00test\x00\x01y\x00\x03\x01u\x00\x04\x00\x00\x00";

    let (first, next) = decode(buf, 0, "v", Endianness::Little).unwrap();
    let (second, next) = decode(buf, next, "v", Endianness::Little).unwrap();
    let (third, next) = decode(buf, next, "v", Endianness::Little).unwrap();
    assert_eq!(next, buf.len());

    assert_eq!(first, Value::Variant(Signature::new("s").unwrap().to_owned(), Box::new(Value::String("test".to_owned()))));
    assert_eq!(second, Value::Variant(Signature::new("y").unwrap().to_owned(), Box::new(Value::Byte(3))));
    assert_eq!(third, Value::Variant(Signature::new("u").unwrap().to_owned(), Box::new(Value::UInt32(4))));
}

#[test]
fn dict_roundtrip() {
    let value = Value::array(
        Signature::new("{sv}").unwrap(),
        vec![
            Value::DictEntry(
                Box::new(Value::String("key".into())),
                Box::new(Value::variant(Value::UInt32(7))),
            ),
        ],
    );
    roundtrip("a{sv}", value);
}

#[test]
fn nested_array_roundtrip() {
    let value = Value::array(
        Signature::new("au").unwrap(),
        vec![Value::UInt32(1), Value::UInt32(2), Value::UInt32(3)],
    );
    roundtrip("au", value);
}

#[test]
fn alignment_invariant_holds_from_arbitrary_start() {
    for prefix_len in 0..16 {
        let mut buf = vec![0xAAu8; prefix_len];
        let start = buf.len();
        encode(&mut buf, Signature::new("x").unwrap(), &Value::Int64(1)).unwrap();
        let offset = start + padding(start, 8);
        assert_eq!(offset % 8, 0);
        // The value bytes begin exactly at the aligned offset.
        assert_eq!(&buf[offset..offset + 8], &1i64.to_le_bytes());
    }
}

#[test]
fn short_buffer_is_reported() {
    let err = decode(&[1, 2], 0, "u", Endianness::Little).unwrap_err();
    assert!(format!("{err}").contains("short buffer"));
}

#[test]
fn invalid_utf8_is_reported() {
    let mut buf = vec![1, 0, 0, 0];
    buf.push(0xFF);
    buf.push(0);
    assert!(decode(&buf, 0, "s", Endianness::Little).is_err());
}

#[test]
fn array_overrunning_buffer_is_malformed() {
    // Declares a length far larger than what is actually available.
    let buf = [0xFFu8, 0xFF, 0xFF, 0x7F];
    assert!(decode(&buf, 0, "ay", Endianness::Little).is_err());
}

#[test]
fn type_mismatch_is_reported() {
    let mut buf = Vec::new();
    let err = encode(&mut buf, Signature::new("u").unwrap(), &Value::String("oops".into()))
        .unwrap_err();
    assert!(format!("{err}").contains("type mismatch"));
}

#[test]
fn big_endian_decode_is_respected() {
    let mut buf = Vec::new();
    buf.extend_from_slice(&42u32.to_be_bytes());
    let (value, _) = decode(&buf, 0, "u", Endianness::Big).unwrap();
    assert_eq!(value, Value::UInt32(42));
}
