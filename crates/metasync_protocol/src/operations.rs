//! Typed remote operations.
//!
//! Each operation is a [`RequestSpec`] paired with the function that turns
//! the parsed response into a typed result. Operations hold no state; the
//! engine decides when to submit them.

use crate::envelope::{session_header, RequestSpec, APEX_NS, ENTERPRISE_NS, METADATA_NS};
use crate::error::{ProtocolError, ProtocolResult};
use crate::xml::{escape, XmlElement, XmlTree};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default login endpoint.
pub const DEFAULT_LOGIN_URL: &str = "https://login.salesforce.com/services/Soap/c/28.0";

/// Default template for authenticated endpoints.
pub const DEFAULT_INSTANCE_URL_TEMPLATE: &str =
    "https://{server}.salesforce.com/services/Soap/{endpoint}/{version}/{org_id}";

/// Default API version.
pub const DEFAULT_API_VERSION: &str = "28.0";

/// Authenticated endpoint families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Metadata API (`m`): retrieve, checkRetrieveStatus, listMetadata.
    Metadata,
    /// Apex API (`s`): executeAnonymous.
    Apex,
}

impl Endpoint {
    /// Path segment of the endpoint.
    pub fn path_segment(self) -> &'static str {
        match self {
            Endpoint::Metadata => "m",
            Endpoint::Apex => "s",
        }
    }

    /// Namespace of the endpoint's session header.
    pub fn namespace(self) -> &'static str {
        match self {
            Endpoint::Metadata => METADATA_NS,
            Endpoint::Apex => APEX_NS,
        }
    }
}

/// Identity used to address authenticated endpoints.
#[derive(Debug, Clone, Copy)]
pub struct Authority<'a> {
    /// Server instance label, e.g. `na1`.
    pub server_instance: &'a str,
    /// Session token.
    pub session_id: &'a str,
    /// Endpoint URL template.
    pub instance_url_template: &'a str,
    /// API version.
    pub api_version: &'a str,
}

impl Authority<'_> {
    /// Organization id: the session token up to its first `!`.
    pub fn org_id(&self) -> &str {
        self.session_id
            .split('!')
            .next()
            .unwrap_or(self.session_id)
    }

    fn request(&self, endpoint: Endpoint) -> RequestSpec {
        RequestSpec::new(self.instance_url_template)
            .with_header(session_header(endpoint.namespace(), self.session_id))
            .with_param("server", self.server_instance)
            .with_param("endpoint", endpoint.path_segment())
            .with_param("version", self.api_version)
            .with_param("org_id", self.org_id())
    }
}

/// A request together with its response extractor.
pub struct Operation<T> {
    /// Operation name, used for logging.
    pub name: &'static str,
    /// The request to submit.
    pub spec: RequestSpec,
    extractor: fn(&XmlTree) -> ProtocolResult<T>,
}

impl<T> Operation<T> {
    fn new(name: &'static str, spec: RequestSpec, extractor: fn(&XmlTree) -> ProtocolResult<T>) -> Self {
        Self {
            name,
            spec,
            extractor,
        }
    }

    /// Extracts the typed result from a parsed response.
    pub fn extract(&self, tree: &XmlTree) -> ProtocolResult<T> {
        (self.extractor)(tree)
    }
}

impl<T> std::fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("endpoint", &self.spec.endpoint_template)
            .finish_non_exhaustive()
    }
}

fn reject_fault(tree: &XmlTree) -> ProtocolResult<()> {
    match tree.fault() {
        Some(fault) => Err(fault),
        None => Ok(()),
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

// ---------------------------------------------------------------------------
// login

/// Result of a successful login call.
#[derive(Clone, PartialEq, Eq)]
pub struct LoginResult {
    /// Session token.
    pub session_id: String,
    /// URL of the metadata endpoint for this session.
    pub metadata_server_url: String,
}

impl LoginResult {
    /// Derives the server instance from the metadata server URL.
    ///
    /// `https://abc123.my.example.com/services/...` yields `abc123`. The URL
    /// must use `https://` and its host must have at least two labels.
    pub fn server_instance(&self) -> ProtocolResult<String> {
        server_instance_from_url(&self.metadata_server_url)
    }
}

impl std::fmt::Debug for LoginResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginResult")
            .field("session_id", &"<redacted>")
            .field("metadata_server_url", &self.metadata_server_url)
            .finish()
    }
}

/// Extracts the leading host label from an `https://` URL.
pub fn server_instance_from_url(url: &str) -> ProtocolResult<String> {
    let rest = url
        .strip_prefix("https://")
        .ok_or_else(|| ProtocolError::MalformedUrl(format!("expected https:// url, got {}", url)))?;
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();

    match host.split_once('.') {
        Some((label, domain)) if !label.is_empty() && !domain.is_empty() => Ok(label.to_string()),
        _ => Err(ProtocolError::MalformedUrl(format!(
            "no server instance in {}",
            url
        ))),
    }
}

/// Builds the login operation.
pub fn login(
    login_url: &str,
    username: &str,
    password: &str,
    security_token: &str,
) -> Operation<LoginResult> {
    let body = format!(
        "<login xmlns=\"{}\"><username>{}</username><password>{}{}</password></login>",
        ENTERPRISE_NS,
        escape(username),
        escape(password),
        escape(security_token),
    );
    Operation::new("login", RequestSpec::new(login_url).with_body(body), extract_login)
}

fn extract_login(tree: &XmlTree) -> ProtocolResult<LoginResult> {
    reject_fault(tree)?;
    Ok(LoginResult {
        session_id: tree.require("sessionId")?.to_string(),
        metadata_server_url: tree.require("metadataServerUrl")?.to_string(),
    })
}

// ---------------------------------------------------------------------------
// retrieve / checkRetrieveStatus

/// Builds the operation that starts an export (retrieve) job.
///
/// One `types` block is emitted per entry of `types`, each with the `*`
/// wildcard member.
pub fn retrieve(authority: &Authority<'_>, types: &[String]) -> Operation<String> {
    let type_blocks: String = types
        .iter()
        .map(|t| format!("<types><members>*</members><name>{}</name></types>", escape(t)))
        .collect();
    let body = format!(
        "<retrieve xmlns=\"{ns}\"><retrieveRequest>\
         <apiVersion>{version}</apiVersion>\
         <singlePackage>false</singlePackage>\
         <unpackaged>{types}<version>{version}</version></unpackaged>\
         </retrieveRequest></retrieve>",
        ns = METADATA_NS,
        version = escape(authority.api_version),
        types = type_blocks,
    );
    Operation::new(
        "retrieve",
        authority.request(Endpoint::Metadata).with_body(body),
        extract_retrieve,
    )
}

fn extract_retrieve(tree: &XmlTree) -> ProtocolResult<String> {
    reject_fault(tree)?;
    Ok(tree.require("id")?.to_string())
}

/// Outcome of one export status check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrieveStatus {
    /// The response carried a fault.
    ///
    /// The server uses the same fault for a job that is still running and
    /// for one that will never finish, so this cannot be read as a failure.
    Pending {
        /// Fault text reported by the server.
        fault: String,
    },
    /// The archive is available.
    Ready {
        /// Base64-encoded zip archive.
        zip_file: String,
    },
}

impl RetrieveStatus {
    /// Returns true if the archive is available.
    pub fn is_ready(&self) -> bool {
        matches!(self, RetrieveStatus::Ready { .. })
    }
}

/// Builds the operation that checks an export job.
pub fn check_retrieve_status(authority: &Authority<'_>, job_id: &str) -> Operation<RetrieveStatus> {
    let body = format!(
        "<checkRetrieveStatus xmlns=\"{}\"><asyncProcessId>{}</asyncProcessId></checkRetrieveStatus>",
        METADATA_NS,
        escape(job_id),
    );
    Operation::new(
        "checkRetrieveStatus",
        authority.request(Endpoint::Metadata).with_body(body),
        extract_retrieve_status,
    )
}

fn extract_retrieve_status(tree: &XmlTree) -> ProtocolResult<RetrieveStatus> {
    if let Some(fault) = tree.find_field("faultstring") {
        return Ok(RetrieveStatus::Pending {
            fault: fault.to_string(),
        });
    }
    Ok(RetrieveStatus::Ready {
        zip_file: tree.require("zipFile")?.to_string(),
    })
}

// ---------------------------------------------------------------------------
// executeAnonymous

/// Result of running an anonymous script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteAnonymousResult {
    /// Whether the script compiled.
    pub compiled: bool,
    /// Compiler diagnostic, if any.
    pub compile_problem: Option<String>,
    /// Whether the script ran without an uncaught exception.
    pub success: Option<bool>,
    /// Uncaught exception message, if any.
    pub exception_message: Option<String>,
    /// Debug log returned in the response header.
    pub debug_log: Option<String>,
}

/// Builds the operation that runs an anonymous script.
pub fn execute_anonymous(authority: &Authority<'_>, source: &str) -> Operation<ExecuteAnonymousResult> {
    let body = format!(
        "<executeAnonymous xmlns=\"{}\"><String>{}</String></executeAnonymous>",
        APEX_NS,
        escape(source),
    );
    Operation::new(
        "executeAnonymous",
        authority.request(Endpoint::Apex).with_body(body),
        extract_execute_anonymous,
    )
}

fn extract_execute_anonymous(tree: &XmlTree) -> ProtocolResult<ExecuteAnonymousResult> {
    reject_fault(tree)?;
    Ok(ExecuteAnonymousResult {
        compiled: tree.require("compiled")? == "true",
        compile_problem: non_empty(tree.find_field("compileProblem")),
        success: tree.find_field("success").map(|v| v == "true"),
        exception_message: non_empty(tree.find_field("exceptionMessage")),
        debug_log: non_empty(tree.find_field("debugLog")),
    })
}

// ---------------------------------------------------------------------------
// listMetadata

/// One remote item of a metadata type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataItem {
    /// Remote id.
    pub id: String,
    /// Path of the item inside an export archive.
    pub file_name: String,
    /// Creation time.
    pub created_date: DateTime<Utc>,
    /// Last modification time.
    pub last_modified_date: DateTime<Utc>,
}

/// Builds the operation that lists all items of one metadata type.
pub fn list_metadata(authority: &Authority<'_>, metadata_type: &str) -> Operation<Vec<MetadataItem>> {
    let body = format!(
        "<listMetadata xmlns=\"{}\"><queries><type>{}</type></queries><asOfVersion>{}</asOfVersion></listMetadata>",
        METADATA_NS,
        escape(metadata_type),
        escape(authority.api_version),
    );
    Operation::new(
        "listMetadata",
        authority.request(Endpoint::Metadata).with_body(body),
        extract_list_metadata,
    )
}

fn extract_list_metadata(tree: &XmlTree) -> ProtocolResult<Vec<MetadataItem>> {
    reject_fault(tree)?;
    tree.find_all("result")
        .into_iter()
        .map(metadata_item)
        .collect()
}

fn metadata_item(result: &XmlElement) -> ProtocolResult<MetadataItem> {
    Ok(MetadataItem {
        id: result.require("id")?.to_string(),
        file_name: result.require("fileName")?.to_string(),
        created_date: parse_date(result, "createdDate")?,
        last_modified_date: parse_date(result, "lastModifiedDate")?,
    })
}

fn parse_date(element: &XmlElement, field: &'static str) -> ProtocolResult<DateTime<Utc>> {
    let raw = element.require(field)?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ProtocolError::InvalidDate {
            field,
            value: raw.to_string(),
        })
}
