//! HTTP transport shared by the identity provider and every downstream portal.
//!
//! All portals behind the identity provider authorize requests purely through cookies, so a
//! transport is a cookie-carrying client. Components hold it as `Arc<dyn Transport>` which lets
//! the whole login/election flow run against a scripted transport in tests.

pub mod middleware;

use anyhow::Context;
use async_trait::async_trait;
use cookie::Cookie;
use reqwest::cookie::{CookieStore, Jar};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Browser User-Agent; the identity provider serves a degraded login page to unknown agents.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A single outgoing request.
///
/// Form fields may contain the password or captcha code, so `Debug` only prints their names.
#[derive(custom_debug_derive::Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    #[debug(with = "crate::fmt::field_names")]
    pub form: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            query: Vec::new(),
            form: Vec::new(),
            timeout: None,
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            ..Self::get(url)
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn queries(mut self, pairs: &[(String, String)]) -> Self {
        self.query.extend(pairs.iter().cloned());
        self
    }

    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.form = fields;
        self
    }

    /// Override the transport's default timeout for this request only.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct Page {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub body: Vec<u8>,
}

impl Page {
    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn error_for_status(self) -> Result<Self, TransportError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(TransportError::Status {
                url: self.url,
                status: self.status,
            })
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("cannot connect to {url}: {message}")]
    Connect { url: String, message: String },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request and buffer the whole response body.
    async fn send(&self, request: Request) -> Result<Page, TransportError>;

    /// Name/value pairs of the cookies the store would attach to a request for `url`.
    fn cookies(&self, url: &str) -> Vec<(String, String)>;
}

/// `reqwest`-backed transport with a shared cookie jar.
pub struct HttpTransport {
    client: reqwest_middleware::ClientWithMiddleware,
    jar: Arc<Jar>,
    default_timeout: Duration,
}

impl HttpTransport {
    /// Build a transport whose requests all time out after `default_timeout` unless overridden.
    pub fn new(default_timeout: Duration) -> anyhow::Result<Self> {
        let jar = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .user_agent(USER_AGENT)
            .timeout(default_timeout)
            .build()
            .context("Failed to build reqwest client")?;

        let client = reqwest_middleware::ClientBuilder::new(client)
            .with(middleware::RequestLogger)
            .build();

        Ok(Self {
            client,
            jar,
            default_timeout,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> Result<Page, TransportError> {
        let Request {
            method,
            url,
            query,
            form,
            timeout,
        } = request;

        let mut builder = match method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url).form(&form),
        };
        if !query.is_empty() {
            builder = builder.query(&query);
        }
        builder = builder.timeout(timeout.unwrap_or(self.default_timeout));

        let response = builder.send().await.map_err(|e| match e {
            reqwest_middleware::Error::Reqwest(e) => classify(&url, e),
            other => TransportError::Request {
                url: url.clone(),
                message: format!("{other:#}"),
            },
        })?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.bytes().await.map_err(|e| classify(&url, e))?;

        Ok(Page {
            url: final_url,
            status,
            body: body.to_vec(),
        })
    }

    fn cookies(&self, url: &str) -> Vec<(String, String)> {
        let Ok(url) = Url::parse(url) else {
            return Vec::new();
        };
        let Some(header) = self.jar.cookies(&url) else {
            return Vec::new();
        };
        let Ok(header) = header.to_str() else {
            return Vec::new();
        };
        parse_cookie_header(header)
    }
}

fn classify(url: &str, err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout {
            url: url.to_owned(),
        }
    } else if err.is_connect() {
        TransportError::Connect {
            url: url.to_owned(),
            message: err.to_string(),
        }
    } else {
        TransportError::Request {
            url: url.to_owned(),
            message: err.to_string(),
        }
    }
}

/// Split a `Cookie:` header value into name/value pairs, skipping malformed pairs.
pub fn parse_cookie_header(header: &str) -> Vec<(String, String)> {
    Cookie::split_parse(header)
        .filter_map(|cookie| cookie.ok())
        .map(|cookie| (cookie.name().to_owned(), cookie.value().to_owned()))
        .collect()
}
