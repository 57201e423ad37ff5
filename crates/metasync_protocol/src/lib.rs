//! # metasync protocol
//!
//! SOAP request building and response extraction for the metadata API.
//!
//! This crate provides:
//! - `RequestSpec`, the single request builder (headers, body, endpoint template)
//! - `XmlTree`, an owned response tree with case-insensitive field lookup
//! - Typed operations: login, retrieve, checkRetrieveStatus,
//!   executeAnonymous, listMetadata
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod envelope;
mod error;
pub mod operations;
mod xml;

pub use envelope::{
    session_header, RequestSpec, APEX_NS, ENTERPRISE_NS, HTTP_HEADERS, METADATA_NS,
    SOAP_ENVELOPE_NS,
};
pub use error::{ProtocolError, ProtocolResult};
pub use operations::{
    Authority, Endpoint, ExecuteAnonymousResult, LoginResult, MetadataItem, Operation,
    RetrieveStatus, DEFAULT_API_VERSION, DEFAULT_INSTANCE_URL_TEMPLATE, DEFAULT_LOGIN_URL,
};
pub use xml::{escape, XmlElement, XmlTree};
