//! # metasync testkit
//!
//! Test utilities for metasync.
//!
//! This crate provides:
//! - `FakeMetadataServer`, an in-process metadata API behind `HttpClient`
//! - SOAP response builders
//! - Temporary working trees and archive builders
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use metasync_engine::{ClientConfig, SoapTransport};
//! use metasync_testkit::prelude::*;
//!
//! let server = FakeMetadataServer::new().with_pending_polls(2);
//! let transport = SoapTransport::new(&ClientConfig::default(), server);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod responses;
pub mod server;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::server::*;
}

pub use fixtures::*;
pub use generators::*;
pub use server::*;
