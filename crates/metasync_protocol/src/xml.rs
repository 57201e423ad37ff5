//! Owned XML response tree.
//!
//! Responses are parsed once with `roxmltree` and copied into a small owned
//! tree so callers can hold on to it without borrowing the response body.
//! Lookups match on local names (namespace prefixes are ignored) and are
//! ASCII case-insensitive, so `sessionId`, `sessionid` and `sf:sessionId`
//! all resolve to the same field. No schema validation is performed; only
//! the presence or absence of named fields matters.

use crate::error::{ProtocolError, ProtocolResult};

/// One element of a parsed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    name: String,
    text: String,
    children: Vec<XmlElement>,
}

impl XmlElement {
    /// Local name of the element.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Concatenated text of the element and all of its descendants.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Direct child elements in document order.
    pub fn children(&self) -> &[XmlElement] {
        &self.children
    }

    /// Returns the first element in this subtree (self included) with the given name.
    pub fn find(&self, name: &str) -> Option<&XmlElement> {
        if self.name.eq_ignore_ascii_case(name) {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(name))
    }

    /// Returns every element in this subtree (self included) with the given name.
    pub fn find_all<'a>(&'a self, name: &str, out: &mut Vec<&'a XmlElement>) {
        if self.name.eq_ignore_ascii_case(name) {
            out.push(self);
        }
        for child in &self.children {
            child.find_all(name, out);
        }
    }

    /// Returns the trimmed text of the first matching element in this subtree.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.find(name).map(|e| e.text.trim())
    }

    /// Like [`field`](Self::field) but fails with `MissingField` when absent.
    pub fn require(&self, name: &'static str) -> ProtocolResult<&str> {
        self.field(name).ok_or(ProtocolError::MissingField(name))
    }
}

/// A parsed response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlTree {
    root: XmlElement,
}

impl XmlTree {
    /// Parses a response body.
    pub fn parse(bytes: &[u8]) -> ProtocolResult<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| ProtocolError::Xml(format!("response is not utf-8: {}", e)))?;
        Self::parse_str(text)
    }

    /// Parses a response body that is already text.
    pub fn parse_str(text: &str) -> ProtocolResult<Self> {
        let doc = roxmltree::Document::parse(text).map_err(|e| ProtocolError::Xml(e.to_string()))?;
        Ok(Self {
            root: convert(doc.root_element()),
        })
    }

    /// The document element.
    pub fn root(&self) -> &XmlElement {
        &self.root
    }

    /// Returns the trimmed text of the first element named `name`, if any.
    pub fn find_field(&self, name: &str) -> Option<&str> {
        self.root.field(name)
    }

    /// Returns true if an element named `name` exists anywhere in the tree.
    pub fn has_field(&self, name: &str) -> bool {
        self.root.find(name).is_some()
    }

    /// Like [`find_field`](Self::find_field) but fails with `MissingField` when absent.
    pub fn require(&self, name: &'static str) -> ProtocolResult<&str> {
        self.root.require(name)
    }

    /// Returns all elements named `name` in document order.
    pub fn find_all(&self, name: &str) -> Vec<&XmlElement> {
        let mut out = Vec::new();
        self.root.find_all(name, &mut out);
        out
    }

    /// Returns the SOAP fault carried by this response, if any.
    pub fn fault(&self) -> Option<ProtocolError> {
        let message = self.find_field("faultstring")?;
        Some(ProtocolError::Fault {
            code: self.find_field("faultcode").unwrap_or_default().to_string(),
            message: message.to_string(),
        })
    }
}

fn convert(node: roxmltree::Node<'_, '_>) -> XmlElement {
    let mut text = String::new();
    let mut children = Vec::new();

    for child in node.children() {
        if child.is_element() {
            let element = convert(child);
            text.push_str(&element.text);
            children.push(element);
        } else if child.is_text() {
            if let Some(t) = child.text() {
                text.push_str(t);
            }
        }
    }

    XmlElement {
        name: node.tag_name().name().to_string(),
        text,
        children,
    }
}

/// Escapes text for inclusion in element content or attribute values.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGIN: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns="urn:enterprise.soap.sforce.com">
  <soapenv:Body>
    <loginResponse>
      <result>
        <metadataServerUrl>https://na1.salesforce.com/services/Soap/m/28.0/00D</metadataServerUrl>
        <sessionId>00D!AQ0AQ</sessionId>
      </result>
    </loginResponse>
  </soapenv:Body>
</soapenv:Envelope>"#;

    #[test]
    fn find_field_ignores_case_and_prefix() {
        let tree = XmlTree::parse_str(LOGIN).unwrap();
        assert_eq!(tree.find_field("sessionid"), Some("00D!AQ0AQ"));
        assert_eq!(tree.find_field("SESSIONID"), Some("00D!AQ0AQ"));
        assert_eq!(tree.root().name(), "Envelope");
        assert!(tree.has_field("body"));
    }

    #[test]
    fn absent_field_is_none() {
        let tree = XmlTree::parse_str(LOGIN).unwrap();
        assert_eq!(tree.find_field("faultstring"), None);
        assert!(tree.fault().is_none());
        assert_eq!(
            tree.require("zipFile"),
            Err(ProtocolError::MissingField("zipFile"))
        );
    }

    #[test]
    fn find_all_keeps_document_order() {
        let tree =
            XmlTree::parse_str("<r><result><id>1</id></result><x/><result><id>2</id></result></r>")
                .unwrap();
        let ids: Vec<_> = tree
            .find_all("result")
            .iter()
            .map(|e| e.field("id").unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn fault_is_extracted() {
        let tree = XmlTree::parse_str(
            "<Envelope><Body><Fault><faultcode>sf:X</faultcode><faultstring>boom</faultstring></Fault></Body></Envelope>",
        )
        .unwrap();
        assert_eq!(
            tree.fault(),
            Some(ProtocolError::Fault {
                code: "sf:X".into(),
                message: "boom".into()
            })
        );
    }

    #[test]
    fn malformed_body_is_rejected() {
        assert!(matches!(
            XmlTree::parse(b"<unclosed>"),
            Err(ProtocolError::Xml(_))
        ));
        assert!(matches!(
            XmlTree::parse(&[0xff, 0xfe]),
            Err(ProtocolError::Xml(_))
        ));
    }

    #[test]
    fn escape_special_characters() {
        assert_eq!(escape("a<b & 'c' > \"d\""), "a&lt;b &amp; &apos;c&apos; &gt; &quot;d&quot;");
        assert_eq!(escape("plain"), "plain");
    }

    #[test]
    fn escaped_text_round_trips_through_parser() {
        let raw = "System.debug('<x> & y');";
        let tree = XmlTree::parse_str(&format!("<String>{}</String>", escape(raw))).unwrap();
        assert_eq!(tree.find_field("string"), Some(raw));
    }

    proptest::proptest! {
        #[test]
        fn escape_survives_parsing(raw in "[ -~]{0,64}") {
            let tree = XmlTree::parse_str(&format!("<String>{}</String>", escape(&raw))).unwrap();
            proptest::prop_assert_eq!(tree.root().text(), raw.as_str());
        }
    }
}
