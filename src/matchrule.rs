//! Signal match rules (§4.F): the predicate installed with the broker (via
//! `AddMatch`) to select which signals a handler receives, and the local
//! predicate the dispatcher evaluates against each inbound signal.

use crate::message::{Message, MessageKind};

/// A predicate over a message's type, interface, member and path.
///
/// An empty `MatchRule` (the default) matches every message. Setting a
/// field restricts matching to messages whose corresponding field is
/// exactly equal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchRule {
    r#type: Option<&'static str>,
    interface: Option<String>,
    member: Option<String>,
    path: Option<String>,
}

impl MatchRule {
    /// Start building a match rule restricted to signals (the only message
    /// type a client can usefully install a broker-side match for).
    pub fn builder() -> MatchRuleBuilder {
        MatchRuleBuilder::default()
    }

    /// Test whether `message` satisfies every non-empty predicate of this rule.
    pub fn matches(&self, message: &Message) -> bool {
        if let Some(t) = self.r#type {
            if t != kind_name(message.kind()) {
                return false;
            }
        }

        if let Some(interface) = &self.interface {
            if Some(interface.as_str()) != message.interface() {
                return false;
            }
        }

        if let Some(member) = &self.member {
            if Some(member.as_str()) != message.member() {
                return false;
            }
        }

        if let Some(path) = &self.path {
            if Some(path.as_str()) != message.path() {
                return false;
            }
        }

        true
    }
}

impl std::fmt::Display for MatchRule {
    /// Serialize in the form the broker's `AddMatch` method expects:
    /// `key='value'` pairs joined by `,`, declared in type/interface/member/path
    /// order, lowercase keys, omitting empty fields.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();

        if let Some(t) = self.r#type {
            parts.push(format!("type='{t}'"));
        }

        if let Some(interface) = &self.interface {
            parts.push(format!("interface='{interface}'"));
        }

        if let Some(member) = &self.member {
            parts.push(format!("member='{member}'"));
        }

        if let Some(path) = &self.path {
            parts.push(format!("path='{path}'"));
        }

        f.write_str(&parts.join(","))
    }
}

fn kind_name(kind: &MessageKind) -> &'static str {
    match kind {
        MessageKind::MethodCall { .. } => "method_call",
        MessageKind::MethodReturn { .. } => "method_return",
        MessageKind::Error { .. } => "error",
        MessageKind::Signal { .. } => "signal",
    }
}

/// Builds a [`MatchRule`] field by field.
#[derive(Debug, Default, Clone)]
pub struct MatchRuleBuilder {
    rule: MatchRule,
}

impl MatchRuleBuilder {
    pub fn signal(mut self) -> Self {
        self.rule.r#type = Some("signal");
        self
    }

    pub fn method_call(mut self) -> Self {
        self.rule.r#type = Some("method_call");
        self
    }

    pub fn method_return(mut self) -> Self {
        self.rule.r#type = Some("method_return");
        self
    }

    pub fn error(mut self) -> Self {
        self.rule.r#type = Some("error");
        self
    }

    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.rule.interface = Some(interface.into());
        self
    }

    pub fn member(mut self, member: impl Into<String>) -> Self {
        self.rule.member = Some(member.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.rule.path = Some(path.into());
        self
    }

    pub fn build(self) -> MatchRule {
        self.rule
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU32;

    #[test]
    fn empty_rule_matches_everything() {
        let rule = MatchRule::default();
        let msg = Message::signal("/bar/foo", "Foo").with_interface("org.freedesktop.DBus");
        assert!(rule.matches(&msg));

        let call = Message::method_call("/a", "B");
        assert!(rule.matches(&call));
    }

    #[test]
    fn s5_serialization() {
        let rule = MatchRule::builder()
            .signal()
            .interface("org.freedesktop.DBus")
            .member("Foo")
            .path("/bar/foo")
            .build();

        assert_eq!(
            rule.to_string(),
            "type='signal',interface='org.freedesktop.DBus',member='Foo',path='/bar/foo'"
        );
    }

    #[test]
    fn field_restricts_exactly_that_predicate() {
        let rule = MatchRule::builder().member("Foo").build();

        let matching = Message::signal("/bar/foo", "Foo");
        assert!(rule.matches(&matching));

        let other_member = Message::signal("/bar/foo", "Bar");
        assert!(!rule.matches(&other_member));
    }

    #[test]
    fn type_predicate_distinguishes_message_kinds() {
        let rule = MatchRule::builder().signal().build();

        let signal = Message::signal("/a", "Changed");
        assert!(rule.matches(&signal));

        let call = Message::method_call("/a", "Changed");
        assert!(!rule.matches(&call));

        let ret = Message::method_return(NonZeroU32::new(1).unwrap());
        assert!(!rule.matches(&ret));
    }
}
