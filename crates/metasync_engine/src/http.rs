//! HTTP transport implementation.
//!
//! This module submits SOAP envelopes over an abstract HTTP client. The
//! actual client is a trait so tests can answer requests in memory; with the
//! `blocking-http` feature a reqwest-based client is provided.

use crate::config::ClientConfig;
use crate::error::{SyncError, SyncResult};
use crate::session::{Credentials, Session};
use crate::transport::MetadataTransport;
use metasync_protocol::{
    operations, ExecuteAnonymousResult, LoginResult, MetadataItem, Operation, ProtocolError,
    RetrieveStatus, XmlTree, HTTP_HEADERS,
};
use parking_lot::RwLock;
use tracing::debug;

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. The call is
/// synchronous and must return any response the server produced, whatever
/// its status; `Err` is reserved for failures that produced no response.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response.
    fn post(&self, url: &str, body: Vec<u8>, headers: &[(&str, &str)]) -> Result<HttpResponse, String>;
}

/// SOAP transport over an [`HttpClient`].
pub struct SoapTransport<C: HttpClient> {
    client: C,
    login_url: String,
    instance_url_template: String,
    api_version: String,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> SoapTransport<C> {
    /// Creates a transport using the endpoints of `config`.
    pub fn new(config: &ClientConfig, client: C) -> Self {
        Self {
            client,
            login_url: config.login_url.clone(),
            instance_url_template: config.instance_url_template.clone(),
            api_version: config.api_version.clone(),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn set_error(&self, err: &str) {
        *self.last_error.write() = Some(err.to_string());
    }

    fn clear_error(&self) {
        *self.last_error.write() = None;
    }

    /// Submits an operation.
    ///
    /// The outer result carries transport failures; the inner one carries
    /// what the operation's extractor made of the response, so callers can
    /// decide what a SOAP fault means for them.
    fn execute<T>(&self, op: &Operation<T>) -> SyncResult<Result<T, ProtocolError>> {
        let url = op.spec.url()?;
        let body = op.spec.envelope().into_bytes();
        debug!(operation = op.name, url = %url, bytes = body.len(), "submitting envelope");

        let response = self.client.post(&url, body, &HTTP_HEADERS).map_err(|e| {
            self.set_error(&e);
            SyncError::transport_retryable(e)
        })?;

        let status = response.status;
        let success = (200..300).contains(&status);
        if !success && status != 500 {
            return Err(self.status_error(op.name, status));
        }

        let tree = match XmlTree::parse(&response.body) {
            Ok(tree) => tree,
            Err(_) if !success => return Err(self.status_error(op.name, status)),
            Err(e) => return Err(e.into()),
        };

        // SOAP 1.1 delivers faults with status 500; anything else on a 500
        // is a server failure rather than a protocol answer.
        if !success && tree.fault().is_none() {
            return Err(self.status_error(op.name, status));
        }

        self.clear_error();
        debug!(operation = op.name, status, "response received");
        Ok(op.extract(&tree))
    }

    fn status_error(&self, operation: &str, status: u16) -> SyncError {
        let message = format!("{} returned http status {}", operation, status);
        self.set_error(&message);
        if status == 429 || status >= 500 {
            SyncError::transport_retryable(message)
        } else {
            SyncError::transport_fatal(message)
        }
    }
}

impl<C: HttpClient> MetadataTransport for SoapTransport<C> {
    fn login(&self, credentials: &Credentials) -> SyncResult<LoginResult> {
        let op = operations::login(
            &self.login_url,
            credentials.username(),
            credentials.password(),
            credentials.security_token(),
        );
        match self.execute(&op)? {
            Ok(result) => Ok(result),
            Err(ProtocolError::Fault { code, message }) => Err(SyncError::AuthenticationFailed(
                if code.is_empty() {
                    message
                } else {
                    format!("{}: {}", code, message)
                },
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn submit_export(&self, session: &Session, types: &[String]) -> SyncResult<String> {
        let authority = session.authority(&self.instance_url_template, &self.api_version)?;
        Ok(self.execute(&operations::retrieve(&authority, types))??)
    }

    fn check_export(&self, session: &Session, job_id: &str) -> SyncResult<RetrieveStatus> {
        let authority = session.authority(&self.instance_url_template, &self.api_version)?;
        Ok(self.execute(&operations::check_retrieve_status(&authority, job_id))??)
    }

    fn execute_anonymous(
        &self,
        session: &Session,
        source: &str,
    ) -> SyncResult<ExecuteAnonymousResult> {
        let authority = session.authority(&self.instance_url_template, &self.api_version)?;
        Ok(self.execute(&operations::execute_anonymous(&authority, source))??)
    }

    fn list_metadata(
        &self,
        session: &Session,
        metadata_type: &str,
    ) -> SyncResult<Vec<MetadataItem>> {
        let authority = session.authority(&self.instance_url_template, &self.api_version)?;
        Ok(self.execute(&operations::list_metadata(&authority, metadata_type))??)
    }
}

#[cfg(feature = "blocking-http")]
pub use reqwest_client::ReqwestClient;

#[cfg(feature = "blocking-http")]
mod reqwest_client {
    use super::{HttpClient, HttpResponse, SoapTransport};
    use crate::config::ClientConfig;
    use crate::error::{SyncError, SyncResult};
    use std::time::Duration;

    /// Blocking HTTPS client backed by reqwest and rustls.
    #[derive(Debug, Clone)]
    pub struct ReqwestClient {
        http: reqwest::blocking::Client,
    }

    impl ReqwestClient {
        /// Creates a client with the given request timeout.
        pub fn new(timeout: Duration) -> SyncResult<Self> {
            let http = reqwest::blocking::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| SyncError::transport_fatal(e.to_string()))?;
            Ok(Self { http })
        }
    }

    impl HttpClient for ReqwestClient {
        fn post(
            &self,
            url: &str,
            body: Vec<u8>,
            headers: &[(&str, &str)],
        ) -> Result<HttpResponse, String> {
            let mut request = self.http.post(url).body(body);
            for (name, value) in headers {
                request = request.header(*name, *value);
            }
            let response = request.send().map_err(|e| e.to_string())?;
            let status = response.status().as_u16();
            let body = response.bytes().map_err(|e| e.to_string())?;
            Ok(HttpResponse::new(status, body.to_vec()))
        }
    }

    impl SoapTransport<ReqwestClient> {
        /// Creates a transport over a reqwest client configured from `config`.
        pub fn connect(config: &ClientConfig) -> SyncResult<Self> {
            Ok(Self::new(config, ReqwestClient::new(config.request_timeout)?))
        }
    }
}
