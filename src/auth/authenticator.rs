//! The identity provider's login handshake as an explicit state machine.
//!
//! The login page embeds single-use hidden fields (`lt`, `execution`, ...) tied to the cookie
//! issued with it, so the handshake must be walked exactly once and in order:
//!
//! ```text
//! start ─► AwaitingCaptchaDecision ─needs_captcha()─► AwaitingLogin ─login()─► LoggedIn
//!                                          │                 ▲          └────► Failed
//!                                          ▼                 │
//!                               CaptchaRequired ─captcha_image()─► AwaitingCaptchaCode
//!                                                       set_captcha_code() ──┘
//! ```
//!
//! Every method checks the current state first and fails with
//! [`AuthError::WrongAuthStep`] without touching the network when called out of order.

use super::session::{AuthSession, Credentials, login_cookie_values};
use crate::config::AuthEndpoints;
use crate::error::{AuthError, Error, Result};
use crate::http::{Request, Transport, TransportError};
use crate::utils::unix_timestamp;
use html_scraper::{Html, Selector};
use std::fmt;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

static HIDDEN_INPUT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("input[type=hidden]").unwrap());
static UNREGISTERED_MSG: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div#msg.errors").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    AwaitingCaptchaDecision,
    /// The identity provider wants a captcha but no image has been fetched yet.
    CaptchaRequired,
    AwaitingCaptchaCode,
    AwaitingLogin,
    LoggedIn,
    Failed,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuthState::AwaitingCaptchaDecision => "awaiting captcha decision",
            AuthState::CaptchaRequired => "captcha required",
            AuthState::AwaitingCaptchaCode => "awaiting captcha code",
            AuthState::AwaitingLogin => "awaiting login",
            AuthState::LoggedIn => "logged in",
            AuthState::Failed => "failed",
        })
    }
}

/// A captcha image, guaranteed to look like a JPEG.
#[derive(Clone)]
pub struct CaptchaChallenge {
    pub image: Vec<u8>,
}

impl fmt::Debug for CaptchaChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptchaChallenge")
            .field("len", &self.image.len())
            .finish()
    }
}

impl CaptchaChallenge {
    /// JPEG files start with an SOI marker (`FF D8 FF`) and end with EOI (`FF D9`).
    pub fn is_jpeg(bytes: &[u8]) -> bool {
        bytes.starts_with(&[0xFF, 0xD8, 0xFF]) && bytes.ends_with(&[0xFF, 0xD9])
    }
}

/// Form state captured from the login page for exactly one login attempt.
///
/// Field order is preserved and later writes replace earlier values with the same name.
#[derive(custom_debug_derive::Debug, Clone, Default)]
pub struct LoginFormContext {
    #[debug(with = "crate::fmt::field_names")]
    fields: Vec<(String, String)>,
    /// Query parameters (e.g. `service=`) sent with both the page fetch and the form submit.
    params: Vec<(String, String)>,
}

impl LoginFormContext {
    /// Seed the credential fields, then add every hidden input found on the login page.
    pub fn from_login_page(
        html: &str,
        credentials: &Credentials,
        params: Vec<(String, String)>,
    ) -> Result<Self, AuthError> {
        let document = Html::parse_document(html);
        if document.select(&UNREGISTERED_MSG).next().is_some() {
            return Err(AuthError::UnregisteredApplication);
        }

        let mut form = Self {
            fields: Vec::new(),
            params,
        };
        form.set("username", credentials.identifier());
        form.set("password", credentials.secret());
        if credentials.remember() {
            form.set("rememberMe", "on");
        }

        for input in document.select(&HIDDEN_INPUT) {
            let Some(name) = input.attr("name").filter(|n| !n.is_empty()) else {
                continue;
            };
            form.set(name, input.attr("value").unwrap_or_default());
        }

        Ok(form)
    }

    pub fn set(&mut self, name: &str, value: &str) {
        if let Some(existing) = self.fields.iter_mut().find(|(n, _)| n == name) {
            existing.1 = value.to_owned();
        } else {
            self.fields.push((name.to_owned(), value.to_owned()));
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

#[derive(custom_debug_derive::Debug)]
pub struct SessionAuthenticator {
    #[debug(skip)]
    transport: Arc<dyn Transport>,
    endpoints: AuthEndpoints,
    username: String,
    form: LoginFormContext,
    state: AuthState,
}

impl SessionAuthenticator {
    /// Fetch the login page and capture its form.
    ///
    /// `params` are extra query parameters for the login URL, typically `service=<callback>` to
    /// log straight into a specific portal.
    pub async fn start(
        transport: Arc<dyn Transport>,
        endpoints: AuthEndpoints,
        credentials: &Credentials,
        params: Vec<(String, String)>,
    ) -> Result<Self> {
        let page = transport
            .send(Request::get(&endpoints.login_url).queries(&params))
            .await?
            .error_for_status()?;

        let form = LoginFormContext::from_login_page(&page.text(), credentials, params)?;
        debug!(form = ?form, "captured login form");

        Ok(Self {
            transport,
            endpoints,
            username: credentials.identifier().to_owned(),
            form,
            state: AuthState::AwaitingCaptchaDecision,
        })
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    fn wrong_step(&self, operation: &'static str) -> Error {
        AuthError::WrongAuthStep {
            operation,
            state: self.state,
        }
        .into()
    }

    /// Ask the identity provider whether this user must solve a captcha.
    ///
    /// The server's criteria are unknown; the answer is whatever its endpoint says.
    pub async fn needs_captcha(&mut self) -> Result<bool> {
        if self.state != AuthState::AwaitingCaptchaDecision {
            return Err(self.wrong_step("check captcha requirement"));
        }

        let page = self
            .transport
            .send(
                Request::get(&self.endpoints.need_captcha_url)
                    .query("username", &self.username)
                    .query("_", unix_timestamp().to_string()),
            )
            .await?
            .error_for_status()?;

        let required = page.text().contains("true");
        self.state = if required {
            AuthState::CaptchaRequired
        } else {
            AuthState::AwaitingLogin
        };
        debug!(required, "captcha decision received");
        Ok(required)
    }

    /// Fetch a captcha image. May be called again to get a fresh image.
    pub async fn captcha_image(&mut self) -> Result<CaptchaChallenge> {
        if !matches!(
            self.state,
            AuthState::CaptchaRequired | AuthState::AwaitingCaptchaCode
        ) {
            return Err(self.wrong_step("fetch captcha image"));
        }

        let page = self
            .transport
            .send(
                Request::get(&self.endpoints.captcha_image_url)
                    .query("ts", unix_timestamp().to_string()),
            )
            .await?
            .error_for_status()?;

        if !CaptchaChallenge::is_jpeg(&page.body) {
            return Err(Error::CaptchaFormat {
                len: page.body.len(),
            });
        }

        self.state = AuthState::AwaitingCaptchaCode;
        Ok(CaptchaChallenge { image: page.body })
    }

    pub fn set_captcha_code(&mut self, code: &str) -> Result<()> {
        if self.state != AuthState::AwaitingCaptchaCode {
            return Err(self.wrong_step("set captcha code"));
        }
        let code = code.trim();
        if code.is_empty() {
            return Err(AuthError::EmptyCaptchaCode.into());
        }

        self.form.set("captchaResponse", code);
        self.state = AuthState::AwaitingLogin;
        Ok(())
    }

    /// Submit the form. The form is single-use: any outcome other than success leaves the
    /// authenticator in [`AuthState::Failed`].
    ///
    /// The identity provider answers wrong credentials with a normal 200 page, so success is
    /// judged only by both login cookies being present afterwards and having been (re)issued by
    /// this submission.
    pub async fn login(&mut self) -> Result<AuthSession> {
        match self.state {
            AuthState::AwaitingLogin => {}
            AuthState::CaptchaRequired | AuthState::AwaitingCaptchaCode => {
                return Err(AuthError::MissingCaptchaCode.into());
            }
            _ => return Err(self.wrong_step("login")),
        }

        // The jar may still hold cookies from an earlier login on the same transport.
        let before = login_cookie_values(self.transport.as_ref(), &self.endpoints.login_url);

        let request = Request::post(&self.endpoints.login_url)
            .queries(self.form.params())
            .form(self.form.fields.clone());

        let page = match self.transport.send(request).await {
            Ok(page) => page,
            Err(e) => {
                self.state = AuthState::Failed;
                return Err(e.into());
            }
        };
        if page.status >= 500 {
            self.state = AuthState::Failed;
            return Err(TransportError::Status {
                url: page.url,
                status: page.status,
            }
            .into());
        }

        let after = login_cookie_values(self.transport.as_ref(), &self.endpoints.login_url);
        let issued = after.iter().all(Option::is_some) && after != before;
        if !issued {
            warn!(user = %self.username, status = page.status, "identity provider rejected credentials");
            self.state = AuthState::Failed;
            return Err(AuthError::InvalidCredentials.into());
        }

        self.state = AuthState::LoggedIn;
        info!(user = %self.username, "logged in to the identity provider");
        Ok(AuthSession::from_transport(
            self.transport.clone(),
            self.endpoints.login_url.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGIN_PAGE: &str = r#"
        <html><body>
          <form id="casLoginForm" method="post">
            <input id="username" name="username" type="text" value="">
            <input id="password" name="password" type="password" value="">
            <input type="hidden" name="lt" value="LT-1234-abcd-cas">
            <input type="hidden" name="dllt" value="userNamePasswordLogin">
            <input type="hidden" name="execution" value="e1s1">
            <input type="hidden" name="_eventId" value="submit">
            <input type="hidden" name="rmShown" value="1">
            <input type="hidden" value="nameless">
          </form>
        </body></html>
    "#;

    #[test]
    fn captures_hidden_fields_after_credentials() {
        let credentials = Credentials::new("20210001", "hunter2");
        let form = LoginFormContext::from_login_page(LOGIN_PAGE, &credentials, Vec::new()).unwrap();

        assert_eq!(form.get("username"), Some("20210001"));
        assert_eq!(form.get("password"), Some("hunter2"));
        assert_eq!(form.get("lt"), Some("LT-1234-abcd-cas"));
        assert_eq!(form.get("execution"), Some("e1s1"));
        assert_eq!(form.get("_eventId"), Some("submit"));
        assert_eq!(form.get("rememberMe"), None);
        // Visible inputs are seeded from the credentials, not the page.
        assert_eq!(form.fields.len(), 7);
    }

    #[test]
    fn remember_flag_adds_form_field() {
        let credentials = Credentials::new("20210001", "hunter2").remember_me(true);
        let form = LoginFormContext::from_login_page(LOGIN_PAGE, &credentials, Vec::new()).unwrap();
        assert_eq!(form.get("rememberMe"), Some("on"));
    }

    #[test]
    fn error_banner_means_unregistered_application() {
        let page = r#"<div id="msg" class="errors"><h2>应用未注册</h2></div>"#;
        let credentials = Credentials::new("20210001", "hunter2");
        assert_eq!(
            LoginFormContext::from_login_page(page, &credentials, Vec::new()).unwrap_err(),
            AuthError::UnregisteredApplication
        );
    }

    #[test]
    fn jpeg_magic_bytes() {
        assert!(CaptchaChallenge::is_jpeg(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0xFF, 0xD9]));
        assert!(!CaptchaChallenge::is_jpeg(b"\x89PNG\r\n\x1a\n"));
        assert!(!CaptchaChallenge::is_jpeg(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00]));
        assert!(!CaptchaChallenge::is_jpeg(&[]));
    }

    #[test]
    fn later_writes_replace_earlier_fields() {
        let mut form = LoginFormContext::default();
        form.set("captchaResponse", "abcd");
        form.set("captchaResponse", "wxyz");
        assert_eq!(form.get("captchaResponse"), Some("wxyz"));
        assert_eq!(form.fields.len(), 1);
    }
}
