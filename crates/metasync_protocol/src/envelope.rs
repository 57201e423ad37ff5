//! Request envelope builder.
//!
//! A request is a plain configuration record: header fragments, body
//! fragments, an endpoint template and the parameters that fill it. Each
//! remote operation is a different value of [`RequestSpec`], not a
//! different type.

use crate::error::{ProtocolError, ProtocolResult};
use crate::xml::escape;
use std::collections::BTreeMap;

/// SOAP 1.1 envelope namespace.
pub const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// Namespace of the apex (`s`) endpoint and its headers.
pub const APEX_NS: &str = "http://soap.sforce.com/2006/08/apex";

/// Namespace of the metadata (`m`) endpoint.
pub const METADATA_NS: &str = "http://soap.sforce.com/2006/04/metadata";

/// Namespace of the enterprise login call.
pub const ENTERPRISE_NS: &str = "urn:enterprise.soap.sforce.com";

/// HTTP headers sent with every envelope.
pub const HTTP_HEADERS: [(&str, &str); 2] = [("SOAPAction", "\"\""), ("Content-Type", "text/xml")];

/// Configuration record describing one outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    /// SOAP header fragments, in order.
    pub headers: Vec<String>,
    /// SOAP body fragments, in order.
    pub body: Vec<String>,
    /// Endpoint URL with `{name}` placeholders.
    pub endpoint_template: String,
    /// Values for the endpoint placeholders.
    pub url_params: BTreeMap<String, String>,
}

impl RequestSpec {
    /// Creates a request for the given endpoint template.
    ///
    /// The debugging header is always present, matching what the server
    /// expects for apex debug logs on every call.
    pub fn new(endpoint_template: impl Into<String>) -> Self {
        Self {
            headers: vec![debugging_header()],
            body: Vec::new(),
            endpoint_template: endpoint_template.into(),
            url_params: BTreeMap::new(),
        }
    }

    /// Appends a header fragment.
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.headers.push(header.into());
        self
    }

    /// Appends a body fragment.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body.push(body.into());
        self
    }

    /// Binds an endpoint placeholder.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.url_params.insert(name.into(), value.into());
        self
    }

    /// Renders the endpoint URL.
    pub fn url(&self) -> ProtocolResult<String> {
        let mut out = String::with_capacity(self.endpoint_template.len());
        let mut rest = self.endpoint_template.as_str();

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| {
                ProtocolError::MalformedUrl(format!(
                    "unterminated placeholder in {}",
                    self.endpoint_template
                ))
            })?;
            let name = &after[..close];
            let value = self
                .url_params
                .get(name)
                .ok_or_else(|| ProtocolError::UnboundPlaceholder(name.to_string()))?;
            out.push_str(value);
            rest = &after[close + 1..];
        }
        out.push_str(rest);

        Ok(out)
    }

    /// Renders the full SOAP envelope.
    pub fn envelope(&self) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <Envelope xmlns=\"{ns}\"><Header>{headers}</Header><Body>{body}</Body></Envelope>",
            ns = SOAP_ENVELOPE_NS,
            headers = self.headers.join("\n"),
            body = self.body.join("\n"),
        )
    }
}

fn debugging_header() -> String {
    format!(
        "<DebuggingHeader xmlns=\"{}\"><debugLevel>Detail</debugLevel></DebuggingHeader>",
        APEX_NS
    )
}

/// Builds the session header for an authenticated endpoint.
pub fn session_header(namespace: &str, session_id: &str) -> String {
    format!(
        "<SessionHeader xmlns=\"{}\"><sessionId>{}</sessionId></SessionHeader>",
        namespace,
        escape(session_id)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::XmlTree;

    #[test]
    fn url_substitutes_params() {
        let spec = RequestSpec::new("https://{server}.example.com/services/Soap/{endpoint}/{version}")
            .with_param("server", "na1")
            .with_param("endpoint", "m")
            .with_param("version", "28.0");
        assert_eq!(
            spec.url().unwrap(),
            "https://na1.example.com/services/Soap/m/28.0"
        );
    }

    #[test]
    fn url_without_placeholders_is_unchanged() {
        let spec = RequestSpec::new("https://login.example.com/services/Soap/c/28.0");
        assert_eq!(
            spec.url().unwrap(),
            "https://login.example.com/services/Soap/c/28.0"
        );
    }

    #[test]
    fn unbound_placeholder_fails() {
        let spec = RequestSpec::new("https://{server}.example.com/{org_id}").with_param("server", "x");
        assert_eq!(
            spec.url(),
            Err(ProtocolError::UnboundPlaceholder("org_id".into()))
        );
    }

    #[test]
    fn unterminated_placeholder_fails() {
        let spec = RequestSpec::new("https://{server.example.com");
        assert!(matches!(spec.url(), Err(ProtocolError::MalformedUrl(_))));
    }

    #[test]
    fn envelope_is_well_formed_and_ordered() {
        let spec = RequestSpec::new("https://x")
            .with_header(session_header(METADATA_NS, "00D!abc"))
            .with_body("<ping/>");
        let tree = XmlTree::parse_str(&spec.envelope()).unwrap();

        let header = tree.root().find("Header").unwrap();
        let names: Vec<_> = header.children().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["DebuggingHeader", "SessionHeader"]);
        assert_eq!(tree.find_field("debugLevel"), Some("Detail"));
        assert_eq!(tree.find_field("sessionId"), Some("00D!abc"));
        assert!(tree.root().find("Body").unwrap().find("ping").is_some());
    }

    #[test]
    fn session_header_escapes_token() {
        let header = session_header(APEX_NS, "a<b");
        assert!(header.contains("a&lt;b"));
    }
}
