//! Login against the campus identity provider (a CAS deployment).

mod authenticator;
mod session;

pub use authenticator::{AuthState, CaptchaChallenge, LoginFormContext, SessionAuthenticator};
pub use session::{AuthSession, Credentials, LOGIN_COOKIES};
