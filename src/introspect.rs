//! Introspection document parsing (§4.E): turns a `org.freedesktop.DBus.Introspectable`
//! XML document into a read-only lookup table of interfaces, methods and
//! signals.

use xmlparser::{ElementEnd, Token};

use crate::error::{Error, ErrorKind, Result};
use crate::signature::OwnedSignature;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone)]
struct ArgData {
    ty: String,
    direction: Direction,
}

/// A single method argument, in declared order.
#[derive(Debug, Clone)]
pub struct MethodData {
    name: String,
    args: Vec<ArgData>,
}

impl MethodData {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The concatenated signature of every `in` argument, in declared order.
    pub fn in_signature(&self) -> OwnedSignature {
        concat_signature(self.args.iter().filter(|a| a.direction == Direction::In))
    }

    /// The concatenated signature of every `out` argument, in declared order.
    pub fn out_signature(&self) -> OwnedSignature {
        concat_signature(self.args.iter().filter(|a| a.direction == Direction::Out))
    }
}

/// A single signal, in declared order.
#[derive(Debug, Clone)]
pub struct SignalData {
    name: String,
    args: Vec<ArgData>,
}

impl SignalData {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The concatenated signature of every argument, in declared order.
    pub fn signature(&self) -> OwnedSignature {
        concat_signature(self.args.iter())
    }
}

fn concat_signature<'a>(args: impl Iterator<Item = &'a ArgData>) -> OwnedSignature {
    let joined: String = args.map(|a| a.ty.as_str()).collect();
    crate::signature::Signature::new(&joined)
        .unwrap_or(crate::signature::Signature::EMPTY)
        .to_owned()
}

/// A single interface and its methods and signals.
#[derive(Debug, Clone)]
pub struct InterfaceData {
    name: String,
    methods: Vec<MethodData>,
    signals: Vec<SignalData>,
}

impl InterfaceData {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method_by_name(&self, name: &str) -> Option<&MethodData> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn signal_by_name(&self, name: &str) -> Option<&SignalData> {
        self.signals.iter().find(|s| s.name == name)
    }

    pub fn methods(&self) -> &[MethodData] {
        &self.methods
    }

    pub fn signals(&self) -> &[SignalData] {
        &self.signals
    }
}

/// A parsed introspection document: every interface declared at the node's
/// top level.
#[derive(Debug, Clone, Default)]
pub struct IntrospectData {
    interfaces: Vec<InterfaceData>,
}

impl IntrospectData {
    /// Parse an introspection XML document.
    pub fn parse(xml: &str) -> Result<Self> {
        parse(xml)
    }

    pub fn interface_by_name(&self, name: &str) -> Option<&InterfaceData> {
        self.interfaces.iter().find(|i| i.name == name)
    }

    pub fn interfaces(&self) -> &[InterfaceData] {
        &self.interfaces
    }
}

#[derive(Debug, Default)]
struct InterfaceBuilder {
    name: Option<String>,
    methods: Vec<MethodData>,
    signals: Vec<SignalData>,
}

#[derive(Debug, Default)]
struct MethodBuilder {
    name: Option<String>,
    args: Vec<ArgData>,
}

#[derive(Debug, Default)]
struct SignalBuilder {
    name: Option<String>,
    args: Vec<ArgData>,
}

#[derive(Debug)]
enum Frame {
    Node,
    Interface(InterfaceBuilder),
    Method(MethodBuilder),
    Signal(SignalBuilder),
    Arg,
    /// An element this parser does not model (`doc`, `annotation`, ...);
    /// its entire subtree, including any attributes, is ignored.
    Ignored,
}

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidIntrospect(message.into()))
}

fn parse(xml: &str) -> Result<IntrospectData> {
    let mut stack: Vec<Frame> = Vec::new();
    let mut interfaces = Vec::new();

    for token in xmlparser::Tokenizer::from(xml) {
        let token = token.map_err(|e| invalid(e.to_string()))?;

        match token {
            Token::ElementStart { local, .. } => {
                let frame = match (stack.last(), local.as_str()) {
                    (None, "node") => Frame::Node,
                    (Some(Frame::Node), "interface") => Frame::Interface(InterfaceBuilder::default()),
                    (Some(Frame::Interface(_)), "method") => Frame::Method(MethodBuilder::default()),
                    (Some(Frame::Interface(_)), "signal") => Frame::Signal(SignalBuilder::default()),
                    (Some(Frame::Method(_) | Frame::Signal(_)), "arg") => Frame::Arg,
                    _ => Frame::Ignored,
                };
                stack.push(frame);
            }
            Token::ElementEnd { end, .. } => {
                match end {
                    ElementEnd::Open => continue,
                    ElementEnd::Close(..) | ElementEnd::Empty => {}
                }

                let Some(top) = stack.pop() else {
                    return Err(invalid("unbalanced closing tag"));
                };

                match (stack.last_mut(), top) {
                    (None, Frame::Node) => {}
                    (Some(Frame::Node), Frame::Interface(builder)) => {
                        interfaces.push(InterfaceData {
                            name: builder.name.ok_or_else(|| invalid("<interface> missing name"))?,
                            methods: builder.methods,
                            signals: builder.signals,
                        });
                    }
                    (Some(Frame::Interface(iface)), Frame::Method(builder)) => {
                        iface.methods.push(MethodData {
                            name: builder.name.ok_or_else(|| invalid("<method> missing name"))?,
                            args: builder.args,
                        });
                    }
                    (Some(Frame::Interface(iface)), Frame::Signal(builder)) => {
                        iface.signals.push(SignalData {
                            name: builder.name.ok_or_else(|| invalid("<signal> missing name"))?,
                            args: builder.args,
                        });
                    }
                    (Some(Frame::Method(_) | Frame::Signal(_)), Frame::Arg) => {}
                    (_, Frame::Ignored) => {}
                    _ => return Err(invalid("mismatched element nesting")),
                }
            }
            Token::Attribute { local, value, .. } => {
                let name = local.as_str();
                let value = value.as_str();

                match stack.last_mut() {
                    Some(Frame::Interface(builder)) if name == "name" => {
                        builder.name = Some(value.to_owned());
                    }
                    Some(Frame::Method(builder)) if name == "name" => {
                        builder.name = Some(value.to_owned());
                    }
                    Some(Frame::Signal(builder)) if name == "name" => {
                        builder.name = Some(value.to_owned());
                    }
                    _ => {}
                }

                // `arg` attributes are collected only at element-end time via
                // a pending slot, since they arrive before we know whether
                // this `arg` belongs to a method (direction matters) or a
                // signal (direction is irrelevant).
                if matches!(stack.last(), Some(Frame::Arg)) {
                    let (parent_args, is_method) = match stack.iter_mut().rev().nth(1) {
                        Some(Frame::Method(builder)) => (&mut builder.args, true),
                        Some(Frame::Signal(builder)) => (&mut builder.args, false),
                        _ => return Err(invalid("<arg> outside of <method> or <signal>")),
                    };

                    record_arg_attribute(parent_args, is_method, name, value)?;
                }
            }
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(invalid("unexpected end of document"));
    }

    Ok(IntrospectData { interfaces })
}

/// `<arg>` elements are typically self-closing with all attributes present
/// before the end tag, so we build up the pending argument's fields directly
/// on an in-progress `ArgData`, pushed once `type` is seen (type is the only
/// field this parser treats as required).
fn record_arg_attribute(args: &mut Vec<ArgData>, is_method: bool, name: &str, value: &str) -> Result<()> {
    match name {
        "type" => {
            let direction = if is_method { Direction::In } else { Direction::Out };
            args.push(ArgData {
                ty: value.to_owned(),
                direction,
            });
        }
        "direction" if is_method => {
            let Some(last) = args.last_mut() else {
                return Err(invalid("<arg direction=...> seen before type"));
            };
            last.direction = match value.to_ascii_lowercase().as_str() {
                "in" => Direction::In,
                "out" => Direction::Out,
                other => return Err(invalid(format!("unknown argument direction `{other}`"))),
            };
        }
        _ => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <node>
          <interface name="org.example.Calculator">
            <method name="Add">
              <arg name="a" type="i" direction="in"/>
              <arg name="b" type="i" direction="in"/>
              <arg name="sum" type="i" direction="out"/>
            </method>
            <method name="Ping">
              <arg name="reply" type="s" direction="OUT"/>
            </method>
            <signal name="Overflowed">
              <arg name="at" type="t"/>
            </signal>
            <annotation name="org.freedesktop.DBus.Deprecated" value="false"/>
          </interface>
        </node>
    "#;

    #[test]
    fn s6_interface_lookup() {
        let data = IntrospectData::parse(SAMPLE).unwrap();
        let iface = data.interface_by_name("org.example.Calculator").unwrap();

        let add = iface.method_by_name("Add").unwrap();
        assert_eq!(add.in_signature().as_str(), "ii");
        assert_eq!(add.out_signature().as_str(), "i");

        let ping = iface.method_by_name("Ping").unwrap();
        assert_eq!(ping.in_signature().as_str(), "");
        assert_eq!(ping.out_signature().as_str(), "s");

        let overflowed = iface.signal_by_name("Overflowed").unwrap();
        assert_eq!(overflowed.signature().as_str(), "t");
    }

    #[test]
    fn missing_direction_defaults_to_in_for_methods() {
        let xml = r#"<node><interface name="x.Y"><method name="M">
            <arg type="s"/>
        </method></interface></node>"#;

        let data = IntrospectData::parse(xml).unwrap();
        let method = data.interface_by_name("x.Y").unwrap().method_by_name("M").unwrap();
        assert_eq!(method.in_signature().as_str(), "s");
        assert_eq!(method.out_signature().as_str(), "");
    }

    #[test]
    fn unknown_nested_elements_are_ignored() {
        let xml = r#"<node><interface name="x.Y">
            <method name="M"><arg type="s" direction="in"/></method>
            <doc><summary>hello</summary></doc>
        </interface></node>"#;

        assert!(IntrospectData::parse(xml).is_ok());
    }

    #[test]
    fn malformed_xml_is_invalid_introspect() {
        let xml = "<node><interface name=\"x.Y\">";
        assert!(IntrospectData::parse(xml).is_err());
    }

    #[test]
    fn unknown_interface_name_is_none() {
        let data = IntrospectData::parse(SAMPLE).unwrap();
        assert!(data.interface_by_name("org.example.Missing").is_none());
    }
}
