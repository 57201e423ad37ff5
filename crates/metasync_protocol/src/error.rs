//! Error types for the protocol layer.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while building requests or reading responses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The response body is not well-formed XML.
    #[error("malformed xml: {0}")]
    Xml(String),

    /// A field the operation needs is absent from the response.
    #[error("missing field `{0}` in response")]
    MissingField(&'static str),

    /// The server answered with a SOAP fault.
    #[error("soap fault {code}: {message}")]
    Fault {
        /// Fault code (`faultcode`), empty when the server omitted it.
        code: String,
        /// Fault message (`faultstring`).
        message: String,
    },

    /// A URL returned by the server does not have the expected shape.
    #[error("malformed url: {0}")]
    MalformedUrl(String),

    /// An endpoint template references a parameter that was never bound.
    #[error("unbound url parameter `{0}`")]
    UnboundPlaceholder(String),

    /// A timestamp field could not be parsed.
    #[error("invalid date in `{field}`: {value}")]
    InvalidDate {
        /// Field name.
        field: &'static str,
        /// Raw value.
        value: String,
    },
}

impl ProtocolError {
    /// Returns true if this error carries a server-side fault.
    pub fn is_fault(&self) -> bool {
        matches!(self, ProtocolError::Fault { .. })
    }
}
