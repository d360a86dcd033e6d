//! GENA property-change documents.
//!
//! A [`PropertySet`] is the body of a NOTIFY request:
//!
//! ```xml
//! <?xml version="1.0"?>
//! <e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
//!   <e:property><SystemUpdateID>0</SystemUpdateID></e:property>
//! </e:propertyset>
//! ```
//!
//! Property order is preserved in both directions.

use dms_core::config::DEFAULT_EVENT_NAMESPACE;
use dms_core::{Error, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;
use serde::{Deserialize, Serialize};

const ROOT: &str = "propertyset";
const PROPERTY: &str = "property";
const PREFIX: &str = "e";

/// A state variable and its new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub value: String,
}

/// One `<e:property>` element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub variable: Variable,
}

/// An ordered set of changed state variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySet {
    pub namespace: String,
    pub properties: Vec<Property>,
}

impl Default for PropertySet {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_NAMESPACE)
    }
}

impl PropertySet {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            properties: Vec::new(),
        }
    }

    /// Build a set from `(name, value)` pairs, keeping their order.
    pub fn from_pairs<N, V>(
        namespace: impl Into<String>,
        pairs: impl IntoIterator<Item = (N, V)>,
    ) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        let mut set = Self::new(namespace);
        for (name, value) in pairs {
            set.push(name, value);
        }
        set
    }

    /// Append a variable.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.properties.push(Property {
            variable: Variable {
                name: name.into(),
                value: value.into(),
            },
        });
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(name, value);
        self
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// `(name, value)` pairs in order.
    pub fn variables(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties
            .iter()
            .map(|p| (p.variable.name.as_str(), p.variable.value.as_str()))
    }

    /// Serialize to a NOTIFY body. Values are escaped; variable names must
    /// be valid XML element names.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        let root = format!("{PREFIX}:{ROOT}");
        let property = format!("{PREFIX}:{PROPERTY}");

        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", None, None)))
            .map_err(xml_err)?;

        let mut start = BytesStart::new(root.as_str());
        start.push_attribute((format!("xmlns:{PREFIX}").as_str(), self.namespace.as_str()));
        writer.write_event(Event::Start(start)).map_err(xml_err)?;

        for (name, value) in self.variables() {
            check_element_name(name)?;
            writer
                .write_event(Event::Start(BytesStart::new(property.as_str())))
                .map_err(xml_err)?;
            writer
                .write_event(Event::Start(BytesStart::new(name)))
                .map_err(xml_err)?;
            writer
                .write_event(Event::Text(BytesText::new(value)))
                .map_err(xml_err)?;
            writer
                .write_event(Event::End(BytesEnd::new(name)))
                .map_err(xml_err)?;
            writer
                .write_event(Event::End(BytesEnd::new(property.as_str())))
                .map_err(xml_err)?;
        }

        writer
            .write_event(Event::End(BytesEnd::new(root.as_str())))
            .map_err(xml_err)?;

        String::from_utf8(writer.into_inner())
            .map_err(|e| Error::Xml(format!("writer produced invalid UTF-8: {e}")))
    }

    /// Parse a NOTIFY body.
    ///
    /// The root must be a `propertyset` element (any prefix) whose prefix is
    /// bound by an `xmlns` attribute; each `property` child must hold exactly
    /// one variable element with text content.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        let mut namespace: Option<String> = None;
        let mut properties = Vec::new();
        // Variable collected inside the current <property>.
        let mut current: Option<Variable> = None;
        let mut open_var: Option<Variable> = None;
        let mut depth = 0usize;

        loop {
            match reader.read_event().map_err(xml_err)? {
                Event::Start(e) => {
                    let name = utf8(e.name().as_ref())?.to_string();
                    match depth {
                        0 => namespace = Some(root_namespace(&e, &name)?),
                        1 if local(&name) == PROPERTY => current = None,
                        1 => return Err(Error::Xml(format!("unexpected <{name}> in propertyset"))),
                        2 if current.is_none() && open_var.is_none() => {
                            open_var = Some(Variable {
                                name,
                                value: String::new(),
                            })
                        }
                        2 => return Err(Error::Xml("property holds more than one variable".into())),
                        _ => return Err(Error::Xml(format!("unexpected nested element <{name}>"))),
                    }
                    depth += 1;
                }
                Event::Empty(e) => {
                    let name = utf8(e.name().as_ref())?.to_string();
                    match depth {
                        0 => {
                            namespace = Some(root_namespace(&e, &name)?);
                            break;
                        }
                        1 if local(&name) == PROPERTY => {
                            return Err(Error::Xml("empty property".into()))
                        }
                        2 if current.is_none() => {
                            current = Some(Variable {
                                name,
                                value: String::new(),
                            })
                        }
                        _ => return Err(Error::Xml(format!("unexpected element <{name}>"))),
                    }
                }
                Event::Text(t) => {
                    let text = t.unescape().map_err(xml_err)?;
                    match open_var.as_mut() {
                        Some(var) if depth == 3 => var.value.push_str(&text),
                        _ if text.trim().is_empty() => {}
                        _ => return Err(Error::Xml(format!("stray text {:?}", text.trim()))),
                    }
                }
                Event::CData(c) => match open_var.as_mut() {
                    Some(var) if depth == 3 => var.value.push_str(utf8(&c)?),
                    _ => return Err(Error::Xml("stray CDATA section".into())),
                },
                Event::End(_) => {
                    depth = depth.saturating_sub(1);
                    match depth {
                        0 => break,
                        1 => {
                            let variable = current
                                .take()
                                .ok_or_else(|| Error::Xml("empty property".into()))?;
                            properties.push(Property { variable });
                        }
                        2 => current = open_var.take(),
                        _ => {}
                    }
                }
                Event::Eof => return Err(Error::Xml("unexpected end of document".into())),
                _ => {}
            }
        }

        let namespace = namespace.ok_or_else(|| Error::Xml("missing propertyset root".into()))?;
        Ok(Self {
            namespace,
            properties,
        })
    }
}

fn xml_err(e: impl std::fmt::Display) -> Error {
    Error::Xml(e.to_string())
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| Error::Xml(format!("invalid UTF-8: {e}")))
}

fn local(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, l)| l)
}

/// Validate the root element and return the namespace bound to its prefix.
fn root_namespace(start: &BytesStart<'_>, name: &str) -> Result<String> {
    if local(name) != ROOT {
        return Err(Error::Xml(format!("root element is <{name}>, not propertyset")));
    }
    let wanted = match name.split_once(':') {
        Some((prefix, _)) => format!("xmlns:{prefix}"),
        None => "xmlns".to_string(),
    };
    for attr in start.attributes() {
        let attr = attr.map_err(xml_err)?;
        if attr.key.as_ref() == wanted.as_bytes() {
            return Ok(attr.unescape_value().map_err(xml_err)?.into_owned());
        }
    }
    Err(Error::Xml(format!("propertyset has no {wanted} attribute")))
}

/// Reject names that would produce malformed markup.
fn check_element_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid_start && valid_rest {
        Ok(())
    } else {
        Err(Error::Xml(format!("{name:?} is not a valid variable name")))
    }
}
