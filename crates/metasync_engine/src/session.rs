//! Authenticated session.

use crate::error::{SyncError, SyncResult};
use crate::transport::MetadataTransport;
use metasync_protocol::{Authority, LoginResult};
use tracing::info;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Login credentials.
///
/// Only held for the duration of a login call. Secrets are zeroized on
/// drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    username: String,
    password: String,
    security_token: String,
}

impl Credentials {
    /// Creates credentials.
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        security_token: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            security_token: security_token.into(),
        }
    }

    /// User name.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Password.
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Security token appended to the password.
    pub fn security_token(&self) -> &str {
        &self.security_token
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("security_token", &"<redacted>")
            .finish()
    }
}

/// An authenticated session.
///
/// Created by [`authenticate`] and never mutated afterwards; logging in
/// again produces a new value. Every authenticated operation takes the
/// session explicitly.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Session {
    #[zeroize(skip)]
    server_instance: String,
    session_token: String,
    #[zeroize(skip)]
    authenticated: bool,
}

impl Session {
    /// Creates an authenticated session from known values.
    pub fn new(server_instance: impl Into<String>, session_token: impl Into<String>) -> Self {
        Self {
            server_instance: server_instance.into(),
            session_token: session_token.into(),
            authenticated: true,
        }
    }

    /// A session that has not logged in. Authenticated operations reject it.
    pub fn unauthenticated() -> Self {
        Self {
            server_instance: String::new(),
            session_token: String::new(),
            authenticated: false,
        }
    }

    /// Builds a session from a login response.
    pub fn from_login(result: &LoginResult) -> SyncResult<Self> {
        let server_instance = result.server_instance()?;
        Ok(Self::new(server_instance, result.session_id.clone()))
    }

    /// Server instance label, e.g. `na1`.
    pub fn server_instance(&self) -> &str {
        &self.server_instance
    }

    /// Session token.
    pub fn session_token(&self) -> &str {
        &self.session_token
    }

    /// Returns true if this session came from a successful login.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated && !self.session_token.is_empty()
    }

    /// Checks the session and returns the identity used to address
    /// authenticated endpoints. This is a local check, no request is made.
    pub fn authority<'a>(
        &'a self,
        instance_url_template: &'a str,
        api_version: &'a str,
    ) -> SyncResult<Authority<'a>> {
        if !self.is_authenticated() {
            return Err(SyncError::NotAuthenticated);
        }
        Ok(Authority {
            server_instance: &self.server_instance,
            session_id: &self.session_token,
            instance_url_template,
            api_version,
        })
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::unauthenticated()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("server_instance", &self.server_instance)
            .field("session_token", &"<redacted>")
            .field("authenticated", &self.authenticated)
            .finish()
    }
}

/// Logs in and returns a new session.
///
/// A login fault surfaces as `AuthenticationFailed`; a response whose
/// metadata URL has no server instance surfaces as `Protocol`.
pub fn authenticate<T: MetadataTransport + ?Sized>(
    transport: &T,
    credentials: &Credentials,
) -> SyncResult<Session> {
    info!(username = credentials.username(), "authenticating");
    let result = transport.login(credentials)?;
    let session = Session::from_login(&result)?;
    info!(server_instance = session.server_instance(), "authenticated");
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    fn login_result(url: &str) -> LoginResult {
        LoginResult {
            session_id: "00D!token".into(),
            metadata_server_url: url.into(),
        }
    }

    #[test]
    fn session_from_login_derives_instance() {
        let session =
            Session::from_login(&login_result("https://abc123.my.example.com/services/Soap/m/28.0"))
                .unwrap();
        assert_eq!(session.server_instance(), "abc123");
        assert_eq!(session.session_token(), "00D!token");
        assert!(session.is_authenticated());
    }

    #[test]
    fn session_from_login_rejects_non_https() {
        let err = Session::from_login(&login_result("http://abc123.my.example.com/")).unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
    }

    #[test]
    fn unauthenticated_session_has_no_authority() {
        let session = Session::unauthenticated();
        assert!(!session.is_authenticated());
        assert!(matches!(
            session.authority("https://{server}", "28.0"),
            Err(SyncError::NotAuthenticated)
        ));
    }

    #[test]
    fn authority_carries_identity() {
        let session = Session::new("na1", "00D!abc");
        let authority = session.authority("https://{server}", "28.0").unwrap();
        assert_eq!(authority.server_instance, "na1");
        assert_eq!(authority.org_id(), "00D");
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let session = Session::new("na1", "super-secret-token");
        assert!(!format!("{:?}", session).contains("super-secret-token"));

        let credentials = Credentials::new("dev@example.com", "hunter2", "TOKEN123");
        let printed = format!("{:?}", credentials);
        assert!(printed.contains("dev@example.com"));
        assert!(!printed.contains("hunter2"));
        assert!(!printed.contains("TOKEN123"));
    }

    #[test]
    fn authenticate_through_transport() {
        let transport = MockTransport::new();
        transport.push_login_response(Ok(login_result(
            "https://na7.salesforce.com/services/Soap/m/28.0/00D",
        )));

        let session =
            authenticate(&transport, &Credentials::new("u", "p", "t")).unwrap();
        assert_eq!(session.server_instance(), "na7");
    }

    #[test]
    fn authenticate_failure_propagates() {
        let transport = MockTransport::new();
        transport.push_login_response(Err(SyncError::AuthenticationFailed(
            "INVALID_LOGIN".into(),
        )));

        let err = authenticate(&transport, &Credentials::new("u", "p", "t")).unwrap_err();
        assert!(matches!(err, SyncError::AuthenticationFailed(_)));
    }
}
