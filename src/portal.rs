//! Per-portal login check.
//!
//! None of the downstream portals expose a status code for "not logged in"; they all render the
//! identity provider's login wrapper instead. That wrapper is the only signal available, and it
//! is distinct from a connection failure: a timeout here means the campus network is not
//! reachable, while the wrapper means the session has to be renewed.

use crate::auth::AuthSession;
use crate::config::PortalProbeUrls;
use crate::error::{AuthError, Result};
use crate::http::{Page, Request};
use html_scraper::{Html, Selector};
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

static LOGIN_WRAPPER: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.auth_page_wrapper").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Portal {
    /// Course system (enrollment, timetables)
    Eams,
    /// Campus card
    Ecard,
    /// Dormitory electricity
    Electricity,
    /// Campus cloud drive
    CloudDrive,
}

impl Portal {
    pub fn probe_url<'a>(&self, urls: &'a PortalProbeUrls) -> &'a str {
        match self {
            Portal::Eams => &urls.eams,
            Portal::Ecard => &urls.ecard,
            Portal::Electricity => &urls.electricity,
            Portal::CloudDrive => &urls.cloud_drive,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Portal::Eams => "eams",
            Portal::Ecard => "ecard",
            Portal::Electricity => "electricity",
            Portal::CloudDrive => "cloud-drive",
        }
    }

    pub async fn assert_authenticated(
        &self,
        session: &AuthSession,
        urls: &PortalProbeUrls,
        timeout: Duration,
    ) -> Result<Page> {
        assert_authenticated(session, self.as_str(), self.probe_url(urls), timeout).await
    }
}

impl fmt::Display for Portal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True if the page is the identity provider's "please log in" wrapper.
pub fn is_login_wall(html: &str) -> bool {
    Html::parse_document(html)
        .select(&LOGIN_WRAPPER)
        .next()
        .is_some()
}

/// Fetch `probe_url` with the session and fail unless the portal accepted it.
///
/// Returns the probe page so callers can continue from it (some portals expect their landing
/// form to be posted back).
pub async fn assert_authenticated(
    session: &AuthSession,
    portal: &str,
    probe_url: &str,
    timeout: Duration,
) -> Result<Page> {
    if !session.has_login_cookies() {
        debug!(portal, "no identity provider cookies, skipping request");
        return Err(AuthError::NotLoggedIn {
            portal: portal.to_owned(),
        }
        .into());
    }

    let page = session
        .send(Request::get(probe_url).timeout(timeout))
        .await?
        .error_for_status()?;

    if is_login_wall(&page.text()) {
        debug!(portal, "portal answered with the login wrapper");
        return Err(AuthError::NotLoggedIn {
            portal: portal.to_owned(),
        }
        .into());
    }

    debug!(portal, "portal accepted the session");
    Ok(page)
}
