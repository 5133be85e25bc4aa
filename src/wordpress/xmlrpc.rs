//! Minimal XML-RPC codec: method call encoding and `methodResponse` decoding.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use thiserror::Error;

/// Errors produced while decoding an XML-RPC response.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum XmlRpcError {
    /// The document is not well-formed XML.
    #[error("XML error: {0}")]
    Xml(String),

    /// Well-formed XML that is not a valid XML-RPC response.
    #[error("Malformed XML-RPC response: {0}")]
    Malformed(String),

    /// The server answered with a `<fault>`.
    #[error("XML-RPC fault {code}: {message}")]
    Fault { code: i64, message: String },
}

/// An XML-RPC value.
#[derive(Debug, Clone, PartialEq)]
pub enum XmlRpcValue {
    Int(i64),
    Bool(bool),
    String(String),
    Double(f64),
    /// `dateTime.iso8601`, kept verbatim.
    DateTime(String),
    Base64(Vec<u8>),
    Array(Vec<XmlRpcValue>),
    Struct(BTreeMap<String, XmlRpcValue>),
    Nil,
}

impl XmlRpcValue {
    /// Builds a struct from key/value pairs.
    pub fn structure<K, I>(members: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, XmlRpcValue)>,
    {
        Self::Struct(members.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Builds an array of strings.
    pub fn strings<S: AsRef<str>>(items: &[S]) -> Self {
        Self::Array(items.iter().map(|s| Self::from(s.as_ref())).collect())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[XmlRpcValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Looks up a struct member.
    pub fn get(&self, key: &str) -> Option<&XmlRpcValue> {
        match self {
            Self::Struct(members) => members.get(key),
            _ => None,
        }
    }

    fn write_xml(&self, out: &mut String) {
        out.push_str("<value>");
        match self {
            Self::Int(i) => out.push_str(&format!("<int>{i}</int>")),
            Self::Bool(b) => out.push_str(&format!("<boolean>{}</boolean>", u8::from(*b))),
            Self::String(s) => {
                out.push_str("<string>");
                out.push_str(&html_escape::encode_text(s));
                out.push_str("</string>");
            }
            Self::Double(d) => out.push_str(&format!("<double>{d}</double>")),
            Self::DateTime(dt) => {
                out.push_str("<dateTime.iso8601>");
                out.push_str(&html_escape::encode_text(dt));
                out.push_str("</dateTime.iso8601>");
            }
            Self::Base64(bytes) => {
                out.push_str("<base64>");
                out.push_str(&STANDARD.encode(bytes));
                out.push_str("</base64>");
            }
            Self::Array(items) => {
                out.push_str("<array><data>");
                for item in items {
                    item.write_xml(out);
                }
                out.push_str("</data></array>");
            }
            Self::Struct(members) => {
                out.push_str("<struct>");
                for (name, value) in members {
                    out.push_str("<member><name>");
                    out.push_str(&html_escape::encode_text(name));
                    out.push_str("</name>");
                    value.write_xml(out);
                    out.push_str("</member>");
                }
                out.push_str("</struct>");
            }
            Self::Nil => out.push_str("<nil/>"),
        }
        out.push_str("</value>");
    }
}

impl From<&str> for XmlRpcValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for XmlRpcValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for XmlRpcValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for XmlRpcValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Encodes a `methodCall` document.
///
/// # Examples
///
/// ```
/// use zsxq_sync::wordpress::{XmlRpcValue, encode_call};
///
/// let xml = encode_call("demo.echo", &[XmlRpcValue::from("a<b")]);
/// assert!(xml.contains("<methodName>demo.echo</methodName>"));
/// assert!(xml.contains("<string>a&lt;b</string>"));
/// ```
pub fn encode_call(method: &str, params: &[XmlRpcValue]) -> String {
    let mut out = String::from(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    out.push_str("<methodCall><methodName>");
    out.push_str(&html_escape::encode_text(method));
    out.push_str("</methodName><params>");
    for param in params {
        out.push_str("<param>");
        param.write_xml(&mut out);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>");
    out
}

#[derive(Debug, Default)]
struct Node {
    name: String,
    text: String,
    children: Vec<Node>,
}

impl Node {
    fn named(name: String) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Node> {
        self.children.iter().filter(move |c| c.name == name)
    }
}

fn malformed(what: impl Into<String>) -> XmlRpcError {
    XmlRpcError::Malformed(what.into())
}

fn parse_tree(xml: &str) -> Result<Node, XmlRpcError> {
    let mut reader = Reader::from_str(xml);
    let mut stack = vec![Node::default()];

    loop {
        let event = reader
            .read_event()
            .map_err(|e| XmlRpcError::Xml(e.to_string()))?;
        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                stack.push(Node::named(name));
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(Node::named(name));
                }
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(|e| XmlRpcError::Xml(e.to_string()))?;
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&text);
                }
            }
            Event::CData(c) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(_) => {
                let node = stack.pop().ok_or_else(|| malformed("unbalanced end tag"))?;
                let parent = stack
                    .last_mut()
                    .ok_or_else(|| malformed("unbalanced end tag"))?;
                parent.children.push(node);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    match (stack.pop(), stack.is_empty()) {
        (Some(root), true) => Ok(root),
        _ => Err(malformed("unclosed element")),
    }
}

fn decode_value(node: &Node) -> Result<XmlRpcValue, XmlRpcError> {
    let Some(typed) = node.children.first() else {
        return Ok(XmlRpcValue::String(node.text.clone()));
    };

    let text = typed.text.trim();
    let value = match typed.name.as_str() {
        "int" | "i4" | "i8" => XmlRpcValue::Int(
            text.parse()
                .map_err(|_| malformed(format!("invalid integer {text:?}")))?,
        ),
        "boolean" => match text {
            "1" | "true" => XmlRpcValue::Bool(true),
            "0" | "false" => XmlRpcValue::Bool(false),
            other => return Err(malformed(format!("invalid boolean {other:?}"))),
        },
        "string" => XmlRpcValue::String(typed.text.clone()),
        "double" => XmlRpcValue::Double(
            text.parse()
                .map_err(|_| malformed(format!("invalid double {text:?}")))?,
        ),
        "dateTime.iso8601" => XmlRpcValue::DateTime(text.to_string()),
        "base64" => {
            let compact: String = text.split_whitespace().collect();
            XmlRpcValue::Base64(
                STANDARD
                    .decode(compact)
                    .map_err(|e| malformed(format!("invalid base64: {e}")))?,
            )
        }
        "array" => {
            let data = typed
                .child("data")
                .ok_or_else(|| malformed("array without data"))?;
            XmlRpcValue::Array(
                data.children_named("value")
                    .map(decode_value)
                    .collect::<Result<_, _>>()?,
            )
        }
        "struct" => {
            let mut members = BTreeMap::new();
            for member in typed.children_named("member") {
                let name = member
                    .child("name")
                    .ok_or_else(|| malformed("struct member without name"))?;
                let value = member
                    .child("value")
                    .ok_or_else(|| malformed("struct member without value"))?;
                members.insert(name.text.clone(), decode_value(value)?);
            }
            XmlRpcValue::Struct(members)
        }
        "nil" => XmlRpcValue::Nil,
        other => return Err(malformed(format!("unknown value type <{other}>"))),
    };
    Ok(value)
}

/// Decodes a `methodResponse`, returning its single parameter.
///
/// A `<fault>` response becomes [`XmlRpcError::Fault`].
pub fn decode_response(xml: &str) -> Result<XmlRpcValue, XmlRpcError> {
    let root = parse_tree(xml)?;
    let response = root
        .child("methodResponse")
        .ok_or_else(|| malformed("missing methodResponse"))?;

    if let Some(fault) = response.child("fault") {
        let value = fault
            .child("value")
            .ok_or_else(|| malformed("fault without value"))?;
        let fault = decode_value(value)?;
        return Err(XmlRpcError::Fault {
            code: fault.get("faultCode").and_then(XmlRpcValue::as_i64).unwrap_or(0),
            message: fault
                .get("faultString")
                .and_then(XmlRpcValue::as_str)
                .unwrap_or_default()
                .to_string(),
        });
    }

    let value = response
        .child("params")
        .and_then(|p| p.child("param"))
        .and_then(|p| p.child("value"))
        .ok_or_else(|| malformed("response without a parameter"))?;
    decode_value(value)
}
