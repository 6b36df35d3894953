//! Login handshake against a scripted identity provider.

mod helpers;

use helpers::{FakeTransport, JPEG, LOGIN_PAGE, LOGIN_URL, Reply, auth_endpoints};
use std::sync::Arc;
use suep_toolkit::auth::{AuthState, Credentials, SessionAuthenticator};
use suep_toolkit::http::Method;
use suep_toolkit::{AuthError, Error};

const NEED_CAPTCHA_URL: &str = "https://ids.test/authserver/needCaptcha.html";
const CAPTCHA_URL: &str = "https://ids.test/authserver/captcha.html";

async fn start(transport: &Arc<FakeTransport>) -> SessionAuthenticator {
    transport.page(LOGIN_URL, LOGIN_PAGE);
    begin(transport).await
}

/// Start against whatever the test scripted for the login URL.
async fn begin(transport: &Arc<FakeTransport>) -> SessionAuthenticator {
    SessionAuthenticator::start(
        transport.clone(),
        auth_endpoints(),
        &Credentials::new("20210001", "hunter2"),
        Vec::new(),
    )
    .await
    .unwrap()
}

fn wrong_step(err: &Error) -> bool {
    matches!(err, Error::Auth(AuthError::WrongAuthStep { .. }))
}

#[tokio::test]
async fn login_before_captcha_decision_is_a_wrong_step() {
    let transport = FakeTransport::new();
    let mut auth = start(&transport).await;

    let err = auth.login().await.unwrap_err();
    assert!(wrong_step(&err), "{err}");
    assert!(transport.posts().is_empty(), "form must not be submitted");
    assert_eq!(auth.state(), AuthState::AwaitingCaptchaDecision);
}

#[tokio::test]
async fn captcha_decision_cannot_be_repeated() {
    let transport = FakeTransport::new();
    transport.page(NEED_CAPTCHA_URL, "false");
    let mut auth = start(&transport).await;

    assert!(!auth.needs_captcha().await.unwrap());
    let err = auth.needs_captcha().await.unwrap_err();
    assert!(wrong_step(&err), "{err}");
    assert_eq!(transport.requests_to(NEED_CAPTCHA_URL).len(), 1);
}

#[tokio::test]
async fn captcha_decision_is_keyed_by_username() {
    let transport = FakeTransport::new();
    transport.page(NEED_CAPTCHA_URL, "true");
    let mut auth = start(&transport).await;

    assert!(auth.needs_captcha().await.unwrap());
    let request = &transport.requests_to(NEED_CAPTCHA_URL)[0];
    assert!(
        request
            .query
            .iter()
            .any(|(k, v)| k == "username" && v == "20210001")
    );
    assert!(request.query.iter().any(|(k, _)| k == "_"));
}

#[tokio::test]
async fn login_without_required_captcha_code_fails() {
    let transport = FakeTransport::new();
    transport.page(NEED_CAPTCHA_URL, "true").page(CAPTCHA_URL, JPEG);
    let mut auth = start(&transport).await;
    assert!(auth.needs_captcha().await.unwrap());

    let err = auth.login().await.unwrap_err();
    assert!(matches!(err, Error::Auth(AuthError::MissingCaptchaCode)), "{err}");

    // Still missing after the image was shown but no code was entered.
    auth.captcha_image().await.unwrap();
    let err = auth.login().await.unwrap_err();
    assert!(matches!(err, Error::Auth(AuthError::MissingCaptchaCode)), "{err}");
    assert!(transport.posts().is_empty());
}

#[tokio::test]
async fn captcha_image_only_after_captcha_is_required() {
    let transport = FakeTransport::new();
    transport.page(NEED_CAPTCHA_URL, "false");
    let mut auth = start(&transport).await;

    let err = auth.captcha_image().await.unwrap_err();
    assert!(wrong_step(&err), "{err}");

    auth.needs_captcha().await.unwrap();
    let err = auth.captcha_image().await.unwrap_err();
    assert!(wrong_step(&err), "{err}");
    assert!(transport.requests_to(CAPTCHA_URL).is_empty());
}

#[tokio::test]
async fn non_jpeg_captcha_is_a_format_error() {
    let transport = FakeTransport::new();
    transport
        .page(NEED_CAPTCHA_URL, "true")
        .page(CAPTCHA_URL, b"\x89PNG\r\n\x1a\n".to_vec());
    let mut auth = start(&transport).await;
    auth.needs_captcha().await.unwrap();

    let err = auth.captcha_image().await.unwrap_err();
    assert!(matches!(err, Error::CaptchaFormat { len: 8 }), "{err}");
}

#[tokio::test]
async fn empty_captcha_code_is_rejected() {
    let transport = FakeTransport::new();
    transport.page(NEED_CAPTCHA_URL, "true").page(CAPTCHA_URL, JPEG);
    let mut auth = start(&transport).await;
    auth.needs_captcha().await.unwrap();
    auth.captcha_image().await.unwrap();

    let err = auth.set_captcha_code("   ").unwrap_err();
    assert!(matches!(err, Error::Auth(AuthError::EmptyCaptchaCode)), "{err}");
    assert_eq!(auth.state(), AuthState::AwaitingCaptchaCode);
}

#[tokio::test]
async fn ok_response_without_login_cookies_means_invalid_credentials() {
    let transport = FakeTransport::new();
    transport.page(NEED_CAPTCHA_URL, "false");
    let mut auth = start(&transport).await;
    auth.needs_captcha().await.unwrap();

    // Only one of the two cookies shows up: still a rejection.
    transport.set_cookies_on(LOGIN_URL, &["CASTGC"]);
    let err = auth.login().await.unwrap_err();
    assert!(matches!(err, Error::Auth(AuthError::InvalidCredentials)), "{err}");
    assert_eq!(auth.state(), AuthState::Failed);

    let err = auth.login().await.unwrap_err();
    assert!(wrong_step(&err), "form must not be replayed: {err}");
    assert_eq!(transport.posts().len(), 1);
}

#[tokio::test]
async fn full_handshake_with_captcha() {
    let transport = FakeTransport::new();
    transport.page(NEED_CAPTCHA_URL, "true").page(CAPTCHA_URL, JPEG);
    let mut auth = start(&transport).await;

    assert!(auth.needs_captcha().await.unwrap());
    let challenge = auth.captcha_image().await.unwrap();
    assert_eq!(challenge.image, JPEG);
    auth.set_captcha_code(" x7kq ").unwrap();
    assert_eq!(auth.state(), AuthState::AwaitingLogin);

    transport.set_cookies_on(LOGIN_URL, &["JSESSIONID", "CASTGC", "iPlanetDirectoryPro"]);
    let session = auth.login().await.unwrap();
    assert_eq!(auth.state(), AuthState::LoggedIn);
    assert!(session.has_login_cookies());

    let posts = transport.posts();
    assert_eq!(posts.len(), 1);
    let form = &posts[0].form;
    let field = |name: &str| {
        form.iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    };
    assert_eq!(field("username"), Some("20210001"));
    assert_eq!(field("password"), Some("hunter2"));
    assert_eq!(field("lt"), Some("LT-42-cas"));
    assert_eq!(field("captchaResponse"), Some("x7kq"));
    assert_eq!(posts[0].method, Method::Post);
}

#[tokio::test]
async fn server_error_on_submit_fails_the_handshake() {
    let transport = FakeTransport::new();
    transport
        .page(LOGIN_URL, LOGIN_PAGE)
        .reply(
            LOGIN_URL,
            Reply::Page {
                status: 502,
                body: Vec::new(),
            },
        )
        .page(NEED_CAPTCHA_URL, "false");
    let mut auth = begin(&transport).await;
    auth.needs_captcha().await.unwrap();

    let err = auth.login().await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)), "{err}");
    assert_eq!(auth.state(), AuthState::Failed);
}

#[tokio::test]
async fn login_page_timeout_is_network_unreachable() {
    let transport = FakeTransport::new();
    transport.reply(LOGIN_URL, Reply::Timeout);
    let err = SessionAuthenticator::start(
        transport.clone(),
        auth_endpoints(),
        &Credentials::new("20210001", "hunter2"),
        Vec::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::NetworkUnreachable(_)), "{err}");
}

#[tokio::test]
async fn service_parameters_round_trip_to_the_submit() {
    let transport = FakeTransport::new();
    transport.page(LOGIN_URL, LOGIN_PAGE).page(NEED_CAPTCHA_URL, "false");
    let params = vec![(
        "service".to_owned(),
        "https://pan.test/sso".to_owned(),
    )];
    let mut auth = SessionAuthenticator::start(
        transport.clone(),
        auth_endpoints(),
        &Credentials::new("20210001", "hunter2").remember_me(true),
        params.clone(),
    )
    .await
    .unwrap();
    auth.needs_captcha().await.unwrap();
    transport.set_cookies_on(LOGIN_URL, &["CASTGC", "iPlanetDirectoryPro"]);
    auth.login().await.unwrap();

    let requests = transport.requests_to(LOGIN_URL);
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.query == params));
    assert!(
        requests[1]
            .form
            .iter()
            .any(|(k, v)| k == "rememberMe" && v == "on")
    );
}

#[tokio::test]
async fn cookies_left_from_an_earlier_login_do_not_pass_a_wrong_password() {
    let transport = FakeTransport::new();
    transport.set_cookies(&["CASTGC", "iPlanetDirectoryPro"]);
    transport.page(LOGIN_URL, LOGIN_PAGE).page(NEED_CAPTCHA_URL, "false");
    let mut auth = SessionAuthenticator::start(
        transport.clone(),
        auth_endpoints(),
        &Credentials::new("20210001", "wrong-password"),
        Vec::new(),
    )
    .await
    .unwrap();
    auth.needs_captcha().await.unwrap();

    let err = auth.login().await.unwrap_err();
    assert!(matches!(err, Error::Auth(AuthError::InvalidCredentials)), "{err}");
    assert_eq!(auth.state(), AuthState::Failed);
}

#[tokio::test]
async fn relogin_on_a_used_transport_needs_freshly_issued_cookies() {
    let transport = FakeTransport::new();
    transport.set_cookies(&["CASTGC", "iPlanetDirectoryPro"]);
    transport.page(NEED_CAPTCHA_URL, "false");
    let mut auth = start(&transport).await;
    auth.needs_captcha().await.unwrap();

    transport.set_cookies_on(LOGIN_URL, &["CASTGC", "iPlanetDirectoryPro"]);
    let session = auth.login().await.unwrap();
    assert!(session.has_login_cookies());
    assert_eq!(auth.state(), AuthState::LoggedIn);
}

#[tokio::test]
async fn captcha_code_needs_an_issued_challenge() {
    let transport = FakeTransport::new();
    transport.page(NEED_CAPTCHA_URL, "true").page(CAPTCHA_URL, JPEG);
    let mut auth = start(&transport).await;
    assert!(auth.needs_captcha().await.unwrap());
    assert_eq!(auth.state(), AuthState::CaptchaRequired);

    let err = auth.set_captcha_code("x7kq").unwrap_err();
    assert!(wrong_step(&err), "{err}");
    assert_eq!(auth.state(), AuthState::CaptchaRequired);

    auth.captcha_image().await.unwrap();
    auth.set_captcha_code("x7kq").unwrap();
    assert_eq!(auth.state(), AuthState::AwaitingLogin);
}
