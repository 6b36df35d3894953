//! Error types shared by the authenticator, the portal gate and the course system client.

use crate::auth::AuthState;
use crate::http::TransportError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The campus network cannot be reached: connect to it (or its VPN) and retry.
    #[error("campus network unreachable: {0}")]
    NetworkUnreachable(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// The captcha endpoint answered with something other than a JPEG image.
    #[error("captcha payload is not a JPEG image ({len} bytes)")]
    CaptchaFormat { len: usize },
    #[error("election profile {profile_id} is not within its election window")]
    NotWithinElectionWindow { profile_id: String },
    #[error("failed to parse course feed for election profile {profile_id}")]
    CatalogParse {
        profile_id: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("offering {offering} still failing after {attempts} attempts: {last_reason}")]
    RetryBudgetExhausted {
        offering: String,
        attempts: u32,
        last_reason: String,
    },
    #[error(transparent)]
    Transport(TransportError),
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout { .. } | TransportError::Connect { .. } => {
                Error::NetworkUnreachable(err.to_string())
            }
            other => Error::Transport(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("application is not registered with the identity provider")]
    UnregisteredApplication,
    #[error("wrong auth step: cannot {operation} while {state}")]
    WrongAuthStep {
        operation: &'static str,
        state: AuthState,
    },
    #[error("wrong username or password")]
    InvalidCredentials,
    #[error("a captcha code is required before logging in")]
    MissingCaptchaCode,
    #[error("captcha code must not be empty")]
    EmptyCaptchaCode,
    #[error("not logged in to {portal}")]
    NotLoggedIn { portal: String },
}
