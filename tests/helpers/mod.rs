#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use suep_toolkit::auth::AuthSession;
use suep_toolkit::config::{AuthEndpoints, EamsEndpoints, ElectionConfig};
use suep_toolkit::eams::CourseOffering;
use suep_toolkit::http::{Method, Page, Request, Transport, TransportError};

pub const LOGIN_URL: &str = "https://ids.test/authserver/login";

pub const LOGIN_PAGE: &str = r#"
    <html><body>
      <form id="casLoginForm" method="post">
        <input id="username" name="username" type="text">
        <input id="password" name="password" type="password">
        <input type="hidden" name="lt" value="LT-42-cas">
        <input type="hidden" name="execution" value="e1s1">
        <input type="hidden" name="_eventId" value="submit">
      </form>
    </body></html>
"#;

/// Smallest byte string that passes the JPEG magic check.
pub const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0xFF, 0xD9];

#[derive(Debug, Clone)]
pub enum Reply {
    Page { status: u16, body: Vec<u8> },
    Timeout,
    Refused,
}

impl Reply {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Reply::Page {
            status: 200,
            body: body.into(),
        }
    }
}

/// In-memory transport: replies are queued per URL (query string ignored) and replayed in
/// order; the last reply for a URL repeats once the queue is down to it. Unscripted URLs
/// answer 404. Every request is recorded.
#[derive(Default)]
pub struct FakeTransport {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    cookies_on: Mutex<HashMap<String, Vec<String>>>,
    cookies: Mutex<Vec<(String, String)>>,
    issued: Mutex<u32>,
    requests: Mutex<Vec<Request>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, url: &str, reply: Reply) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .entry(url.to_owned())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn page(&self, url: &str, body: impl Into<Vec<u8>>) -> &Self {
        self.reply(url, Reply::ok(body))
    }

    /// Have the cookie store hold `names` once `url` has been requested.
    pub fn set_cookies_on(&self, url: &str, names: &[&str]) -> &Self {
        self.cookies_on.lock().unwrap().insert(
            url.to_owned(),
            names.iter().map(|n| n.to_string()).collect(),
        );
        self
    }

    /// Replace the cookie store with `names`, each carrying a value never issued before.
    pub fn set_cookies(&self, names: &[&str]) {
        self.issue(names.iter().map(|n| n.to_string()).collect());
    }

    fn issue(&self, names: Vec<String>) {
        let mut issued = self.issued.lock().unwrap();
        *issued += 1;
        *self.cookies.lock().unwrap() = names
            .into_iter()
            .map(|name| (name, format!("v{issued}")))
            .collect();
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, url: &str) -> Vec<Request> {
        self.requests()
            .into_iter()
            .filter(|r| r.url == url)
            .collect()
    }

    pub fn posts(&self) -> Vec<Request> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == Method::Post)
            .collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: Request) -> Result<Page, TransportError> {
        let url = request.url.clone();
        self.requests.lock().unwrap().push(request);

        let names = self.cookies_on.lock().unwrap().get(&url).cloned();
        if let Some(names) = names {
            self.issue(names);
        }

        let reply = {
            let mut replies = self.replies.lock().unwrap();
            match replies.get_mut(&url) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match reply {
            Some(Reply::Page { status, body }) => Ok(Page { url, status, body }),
            Some(Reply::Timeout) => Err(TransportError::Timeout { url }),
            Some(Reply::Refused) => Err(TransportError::Connect {
                url,
                message: "connection refused".to_owned(),
            }),
            None => Ok(Page {
                url,
                status: 404,
                body: b"not found".to_vec(),
            }),
        }
    }

    fn cookies(&self, _url: &str) -> Vec<(String, String)> {
        self.cookies.lock().unwrap().clone()
    }
}

pub fn auth_endpoints() -> AuthEndpoints {
    AuthEndpoints {
        login_url: LOGIN_URL.to_owned(),
        logout_url: "https://ids.test/authserver/logout".to_owned(),
        need_captcha_url: "https://ids.test/authserver/needCaptcha.html".to_owned(),
        captcha_image_url: "https://ids.test/authserver/captcha.html".to_owned(),
    }
}

pub fn eams_endpoints() -> EamsEndpoints {
    EamsEndpoints {
        login_url: "https://jw.test/eams/login.action".to_owned(),
        course_table_url: "https://jw.test/eams/courseTableForStd.action".to_owned(),
        elect_landing_url: "https://jw.test/eams/stdElectCourse.action".to_owned(),
        elect_profile_url: "https://jw.test/eams/stdElectCourse!defaultPage.action".to_owned(),
        elect_data_url: "https://jw.test/eams/stdElectCourse!data.action".to_owned(),
        elect_operator_url: "https://jw.test/eams/stdElectCourse!batchOperator.action"
            .to_owned(),
    }
}

/// Election policy without pacing, so tests run at full speed.
pub fn fast_election() -> ElectionConfig {
    ElectionConfig {
        max_attempts: 5,
        backoff_base: std::time::Duration::ZERO,
        backoff_max: std::time::Duration::ZERO,
        requests_per_second: 0,
        rejection_markers: Vec::new(),
    }
}

pub fn session(transport: &Arc<FakeTransport>) -> AuthSession {
    transport.set_cookies(&["CASTGC", "iPlanetDirectoryPro"]);
    AuthSession::from_transport(transport.clone(), LOGIN_URL)
}

pub fn offering(no: &str, id: i64, profile: &str) -> CourseOffering {
    CourseOffering {
        offering_id: no.to_owned(),
        internal_id: id,
        display_name: format!("Course {no}"),
        profile_id: profile.to_owned(),
    }
}

/// An operator response page with `status` as its message.
pub fn operator_page(status: &str) -> String {
    format!(
        r#"<table><tr><td><div style="width:85%;text-align:left;margin:auto;">{status}</div></td></tr></table>"#
    )
}
