//! Configuration for the client and the export poller.

use crate::error::{SyncError, SyncResult};
use crate::reconcile::PathMapping;
use metasync_protocol::{DEFAULT_API_VERSION, DEFAULT_INSTANCE_URL_TEMPLATE, DEFAULT_LOGIN_URL};
use std::time::Duration;

/// Metadata types exported when none are configured.
pub const DEFAULT_EXPORT_TYPES: [&str; 6] = [
    "ApexClass",
    "ApexComponent",
    "ApexPage",
    "ApexTrigger",
    "CustomObject",
    "StaticResource",
];

/// Configuration for a metadata client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Login endpoint.
    pub login_url: String,
    /// Template for authenticated endpoints (`{server}`, `{endpoint}`,
    /// `{version}`, `{org_id}`).
    pub instance_url_template: String,
    /// API version sent with every request.
    pub api_version: String,
    /// Metadata types requested by an export and listed by
    /// `list_configured_metadata`.
    pub export_types: Vec<String>,
    /// HTTP request timeout.
    pub request_timeout: Duration,
    /// Export polling behaviour.
    pub poll: PollConfig,
    /// Mapping from archive paths to working-tree paths.
    pub mapping: PathMapping,
}

impl ClientConfig {
    /// Creates a configuration with default endpoints.
    pub fn new() -> Self {
        Self {
            login_url: DEFAULT_LOGIN_URL.to_string(),
            instance_url_template: DEFAULT_INSTANCE_URL_TEMPLATE.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            export_types: DEFAULT_EXPORT_TYPES.iter().map(|t| t.to_string()).collect(),
            request_timeout: Duration::from_secs(30),
            poll: PollConfig::default(),
            mapping: PathMapping::default(),
        }
    }

    /// Sets the login endpoint.
    pub fn with_login_url(mut self, url: impl Into<String>) -> Self {
        self.login_url = url.into();
        self
    }

    /// Sets the authenticated endpoint template.
    pub fn with_instance_url_template(mut self, template: impl Into<String>) -> Self {
        self.instance_url_template = template.into();
        self
    }

    /// Sets the API version.
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Sets the exported metadata types.
    pub fn with_export_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.export_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the HTTP request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the polling configuration.
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Sets the path mapping.
    pub fn with_mapping(mut self, mapping: PathMapping) -> Self {
        self.mapping = mapping;
        self
    }

    /// Checks that the configuration can drive a sync.
    pub fn validate(&self) -> SyncResult<()> {
        if self.export_types.is_empty() {
            return Err(SyncError::InvalidConfig("no export types configured".into()));
        }
        self.poll.validate()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for export polling.
///
/// A status check cannot tell a running job from a dead one, so polling
/// must be bounded by `max_attempts`, `deadline`, or both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between two status checks.
    pub interval: Duration,
    /// Maximum number of status checks.
    pub max_attempts: Option<u32>,
    /// Maximum time spent polling.
    pub deadline: Option<Duration>,
}

impl PollConfig {
    /// Creates a configuration bounded by `max_attempts`.
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: Some(max_attempts),
            deadline: None,
        }
    }

    /// Sets the delay between status checks.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets or clears the attempt bound.
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets or clears the deadline.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Rejects configurations that could poll forever.
    pub fn validate(&self) -> SyncResult<()> {
        match (self.max_attempts, self.deadline) {
            (None, None) => Err(SyncError::InvalidConfig(
                "polling needs max_attempts or a deadline".into(),
            )),
            (Some(0), _) => Err(SyncError::InvalidConfig(
                "max_attempts must be at least 1".into(),
            )),
            _ => Ok(()),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), 600)
    }
}
