use crate::error::Result;
use crate::http::{Page, Request, Transport, TransportError};
use std::sync::Arc;
use tracing::{debug, info};

/// Cookies the identity provider sets only after accepting the credentials.
pub const LOGIN_COOKIES: [&str; 2] = ["CASTGC", "iPlanetDirectoryPro"];

/// Username and password for the identity provider.
#[derive(custom_debug_derive::Debug, Clone)]
pub struct Credentials {
    identifier: String,
    #[debug(with = "crate::fmt::redacted")]
    secret: String,
    remember: bool,
}

impl Credentials {
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: secret.into(),
            remember: false,
        }
    }

    /// Ask the identity provider for a long-lived login.
    pub fn remember_me(mut self, remember: bool) -> Self {
        self.remember = remember;
        self
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub(crate) fn secret(&self) -> &str {
        &self.secret
    }

    pub fn remember(&self) -> bool {
        self.remember
    }
}

/// An authenticated cookie store.
///
/// Cloning is cheap and every clone shares the same cookies. Downstream clients only read from
/// it; whether the remote side still honors it is only discovered by a failed portal gate.
#[derive(custom_debug_derive::Debug, Clone)]
pub struct AuthSession {
    #[debug(skip)]
    transport: Arc<dyn Transport>,
    login_url: String,
}

impl AuthSession {
    /// Wrap a transport that already carries login cookies.
    ///
    /// [`SessionAuthenticator::login`](super::SessionAuthenticator::login) is the usual way to
    /// obtain a session; this exists for callers restoring one from an existing cookie store.
    pub fn from_transport(transport: Arc<dyn Transport>, login_url: impl Into<String>) -> Self {
        Self {
            transport,
            login_url: login_url.into(),
        }
    }

    pub async fn send(&self, request: Request) -> Result<Page, TransportError> {
        self.transport.send(request).await
    }

    /// Local check that both identity-provider cookies are present.
    pub fn has_login_cookies(&self) -> bool {
        has_login_cookies(self.transport.as_ref(), &self.login_url)
    }

    /// Invalidate the session on the identity provider.
    ///
    /// Callers should treat failure as a warning: whatever the session was used for has
    /// already happened.
    pub async fn logout(&self, logout_url: &str) -> Result<()> {
        self.transport
            .send(Request::get(logout_url))
            .await?
            .error_for_status()?;
        info!("logged out of the identity provider");
        Ok(())
    }
}

/// Current values of [`LOGIN_COOKIES`], in that order; `None` where a cookie is absent.
pub(crate) fn login_cookie_values(transport: &dyn Transport, login_url: &str) -> Vec<Option<String>> {
    let cookies = transport.cookies(login_url);
    LOGIN_COOKIES
        .iter()
        .map(|required| {
            cookies
                .iter()
                .find(|(name, _)| name == required)
                .map(|(_, value)| value.clone())
        })
        .collect()
}

fn has_login_cookies(transport: &dyn Transport, login_url: &str) -> bool {
    let values = login_cookie_values(transport, login_url);
    let present = values.iter().all(Option::is_some);
    debug!(present, "checked identity provider cookies");
    present
}
