//! The application-facing convenience layer named in §6's public API
//! surface: fetching and caching a remote object's introspection tree and
//! binding interfaces on it for typed-ish method calls and signal emission.

use crate::connection::Bus;
use crate::error::{Error, ErrorKind, Result};
use crate::introspect::IntrospectData;
use crate::value::Value;

const INTROSPECTABLE: &str = "org.freedesktop.DBus.Introspectable";

/// A remote object: a `(destination, path)` pair together with its cached
/// introspection tree.
#[derive(Debug, Clone)]
pub struct Object {
    bus: Bus,
    destination: String,
    path: String,
    introspect: IntrospectData,
}

impl Object {
    /// Fetch and cache the introspection tree of `path` on `destination`.
    pub async fn get(bus: &Bus, destination: impl Into<String>, path: impl Into<String>) -> Result<Self> {
        let destination = destination.into();
        let path = path.into();

        let reply = bus
            .call(path.clone(), INTROSPECTABLE, "Introspect", destination.clone(), Vec::new())
            .await?;

        let xml = match reply.into_iter().next() {
            Some(Value::String(xml)) => xml,
            _ => {
                return Err(Error::new(ErrorKind::InvalidIntrospect(
                    "Introspect did not return a string".to_owned(),
                )))
            }
        };

        let introspect = IntrospectData::parse(&xml)?;

        Ok(Self {
            bus: bus.clone(),
            destination,
            path,
            introspect,
        })
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn introspect(&self) -> &IntrospectData {
        &self.introspect
    }

    /// Bind an interface name declared on this object's introspection tree.
    pub fn interface(&self, name: impl Into<String>) -> Option<Interface> {
        let name = name.into();
        self.introspect.interface_by_name(&name)?;

        Some(Interface {
            object: self.clone(),
            name,
        })
    }
}

/// An interface bound to an [`Object`], used to call methods and emit
/// signals scoped to that interface.
#[derive(Debug, Clone)]
pub struct Interface {
    object: Object,
    name: String,
}

impl Interface {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn object(&self) -> &Object {
        &self.object
    }

    /// Call `member`, looking it up in the cached introspection data first
    /// so an unknown method fails locally instead of round-tripping.
    pub async fn call(&self, member: impl AsRef<str>, args: Vec<Value>) -> Result<Vec<Value>> {
        let member = member.as_ref();

        let iface = self
            .object
            .introspect
            .interface_by_name(&self.name)
            .ok_or_else(|| Error::new(ErrorKind::NoSuchInterface(self.name.clone())))?;

        iface
            .method_by_name(member)
            .ok_or_else(|| Error::new(ErrorKind::NoSuchMethod(member.to_owned())))?;

        self.object
            .bus
            .call(
                self.object.path.clone(),
                self.name.clone(),
                member.to_owned(),
                self.object.destination.clone(),
                args,
            )
            .await
    }

    /// Emit `member` as a signal from this interface's path.
    pub async fn emit_signal(&self, member: impl Into<String>, args: Vec<Value>) -> Result<()> {
        self.object
            .bus
            .emit_signal(self.object.path.clone(), self.name.clone(), member, args)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_binding_requires_known_interface() {
        let introspect = IntrospectData::parse(
            r#"<node><interface name="org.example.Known"><method name="Ping"/></interface></node>"#,
        )
        .unwrap();
        assert!(introspect.interface_by_name("org.example.Known").is_some());
        assert!(introspect.interface_by_name("org.example.Unknown").is_none());
    }
}
