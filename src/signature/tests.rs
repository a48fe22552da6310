use super::{next_block, split, Signature};

#[test]
fn next_block_array_of_dict() {
    assert_eq!(next_block("a{us}y", 0).unwrap(), ("a{us}", 5));
}

#[test]
fn next_block_nested_struct() {
    assert_eq!(next_block("(y(ppp))yy", 0).unwrap(), ("(y(ppp))", 8));
}

#[test]
fn next_block_scalar() {
    assert_eq!(next_block("sa{sv}", 0).unwrap(), ("s", 1));
}

#[test]
fn next_block_array_of_scalar() {
    assert_eq!(next_block("auy", 0).unwrap(), ("au", 2));
}

#[test]
fn split_full_signature() {
    assert_eq!(split("ysu a{sv}".replace(' ', "").as_str()).unwrap(), [
        "y", "s", "u", "a{sv}"
    ]);
}

#[test]
fn bare_dict_entry_outside_array_is_invalid() {
    assert!(Signature::new("{sv}").is_err());
}

#[test]
fn unbalanced_brackets_are_invalid() {
    assert!(Signature::new("(si").is_err());
    assert!(Signature::new("a{s").is_err());
}

#[test]
fn unknown_atom_is_invalid() {
    assert!(Signature::new("z").is_err());
}

#[test]
fn empty_signature_is_valid() {
    assert!(Signature::new("").is_ok());
}

#[test]
fn dict_entry_must_have_exactly_two_types() {
    assert!(Signature::new("a{s}").is_err());
    assert!(Signature::new("a{sii}").is_err());
    assert!(Signature::new("a{sv}").is_ok());
}
