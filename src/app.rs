use crate::auth::{AuthSession, Credentials, SessionAuthenticator};
use crate::cli::Command;
use crate::config::Config;
use crate::eams::engine::{ElectionReport, select_targets};
use crate::eams::requested::{RequestedFileError, load_requested};
use crate::eams::{CourseStatus, ElectionAction, EnrollmentCatalog, EnrollmentEngine};
use crate::error::{AuthError, Error};
use crate::gateway::GatewayProbe;
use crate::http::{HttpTransport, Transport};
use crate::portal::Portal;
use anyhow::Context;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Where the captcha image is written for the user to look at.
const CAPTCHA_FILE: &str = "captcha.jpg";

/// Process exit statuses of the `suep` binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Internal,
    /// Some offerings were rejected or ran out of attempts.
    Partial,
    /// Requested-offerings file unusable, or it names offerings the catalog lacks.
    InvalidRequest,
    NetworkUnreachable,
    AuthFailed,
    ElectionClosed,
    /// The remote side changed a format we depend on (catalog feed, captcha payload).
    Incompatible,
    Interrupted,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Internal => 1,
            ExitStatus::Partial => 2,
            ExitStatus::InvalidRequest => 3,
            ExitStatus::NetworkUnreachable => 4,
            ExitStatus::AuthFailed => 5,
            ExitStatus::ElectionClosed => 6,
            ExitStatus::Incompatible => 7,
            ExitStatus::Interrupted => 130,
        }
    }

    /// Classify a failed command by the first typed error in its chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(e) = cause.downcast_ref::<Error>() {
                return Self::from_library_error(e);
            }
            if cause.downcast_ref::<AuthError>().is_some() {
                return ExitStatus::AuthFailed;
            }
            if cause.downcast_ref::<RequestedFileError>().is_some() {
                return ExitStatus::InvalidRequest;
            }
        }
        ExitStatus::Internal
    }

    fn from_library_error(err: &Error) -> Self {
        match err {
            Error::NetworkUnreachable(_) => ExitStatus::NetworkUnreachable,
            Error::Auth(_) => ExitStatus::AuthFailed,
            Error::CaptchaFormat { .. } | Error::CatalogParse { .. } => ExitStatus::Incompatible,
            Error::NotWithinElectionWindow { .. } => ExitStatus::ElectionClosed,
            Error::RetryBudgetExhausted { .. } => ExitStatus::Partial,
            Error::Transport(_) => ExitStatus::Internal,
        }
    }

    pub fn from_report(report: &ElectionReport) -> Self {
        if report.cancelled {
            ExitStatus::Interrupted
        } else if report.session_expired {
            ExitStatus::AuthFailed
        } else if report
            .courses
            .iter()
            .any(|c| matches!(c.status, CourseStatus::Rejected(_) | CourseStatus::Exhausted { .. }))
        {
            ExitStatus::Partial
        } else if !report.missing.is_empty() {
            ExitStatus::InvalidRequest
        } else {
            ExitStatus::Success
        }
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}

/// Runs one command end to end: probe, login, portal work, logout.
pub struct App {
    config: Config,
    transport: Arc<dyn Transport>,
}

impl App {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let transport = HttpTransport::new(config.request_timeout)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    pub async fn run(&self, command: Command) -> ExitStatus {
        let result = match command {
            Command::Probe => self.probe().await,
            Command::Check { portal } => self.check(portal).await,
            Command::Elect { file, cancel, yes } => self.elect(&file, cancel, yes).await,
        };

        match result {
            Ok(status) => status,
            Err(e) => {
                let status = ExitStatus::from_error(&e);
                error!(error = format!("{e:#}"), code = status.code(), "command failed");
                status
            }
        }
    }

    async fn probe(&self) -> anyhow::Result<ExitStatus> {
        let probe = GatewayProbe::from_config(&self.config.probe);
        let report = probe.probe(self.config.probe.timeout).await;
        let reachable = report.meets(self.config.probe.threshold);
        println!(
            "{}/{} internal hosts reachable: campus network {}",
            report.reachable,
            report.total,
            if reachable { "available" } else { "unavailable" }
        );
        Ok(if reachable {
            ExitStatus::Success
        } else {
            ExitStatus::NetworkUnreachable
        })
    }

    async fn check(&self, portal: Portal) -> anyhow::Result<ExitStatus> {
        self.ensure_network().await?;
        let session = self.login().await?;
        let outcome = portal
            .assert_authenticated(&session, &self.config.portals, self.config.portal_timeout)
            .await;
        self.logout(&session).await;

        outcome?;
        println!("{portal}: session accepted");
        Ok(ExitStatus::Success)
    }

    async fn elect(&self, file: &Path, cancel: bool, yes: bool) -> anyhow::Result<ExitStatus> {
        let action = if cancel {
            ElectionAction::Cancel
        } else {
            ElectionAction::Elect
        };
        let requested = load_requested(file)?;
        info!(file = %file.display(), count = requested.len(), "loaded requested offerings");

        self.ensure_network().await?;
        let session = self.login().await?;
        let result = self.elect_with(&session, &requested, action, yes).await;
        self.logout(&session).await;
        result
    }

    async fn elect_with(
        &self,
        session: &AuthSession,
        requested: &[String],
        action: ElectionAction,
        yes: bool,
    ) -> anyhow::Result<ExitStatus> {
        let catalog = EnrollmentCatalog::open(
            session.clone(),
            self.config.eams.clone(),
            self.config.portal_timeout,
        )
        .await?;
        let offerings = catalog.list_electable_offerings().await?;

        let (targets, missing) = select_targets(&offerings, requested);
        println!("Offerings to {action}:");
        for offering in &targets {
            println!("  {} - {}", offering.offering_id, offering.display_name);
        }
        for id in &missing {
            println!("  {id} - not offered in the current election");
        }
        if targets.is_empty() {
            warn!("none of the requested offerings are electable");
            return Ok(ExitStatus::InvalidRequest);
        }
        if !yes && !confirm("Start now? [y/N] ").await? {
            println!("Aborted.");
            return Ok(ExitStatus::Success);
        }

        let engine = EnrollmentEngine::new(
            session.clone(),
            self.config.eams.elect_operator_url.clone(),
            &self.config.election,
        );
        let token = engine.cancellation_token();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping after the current request");
                token.cancel();
            }
        });

        let report = engine.run(&offerings, requested, action).await;
        interrupt.abort();

        print_report(&report);
        for err in report.exhausted() {
            warn!(error = %err, "offering not secured");
        }
        Ok(ExitStatus::from_report(&report))
    }

    async fn ensure_network(&self) -> Result<(), Error> {
        let probe = GatewayProbe::from_config(&self.config.probe);
        if probe
            .is_internal_network_reachable(self.config.probe.timeout)
            .await
        {
            Ok(())
        } else {
            Err(Error::NetworkUnreachable(
                "campus hosts do not answer; connect to the campus network or VPN".to_owned(),
            ))
        }
    }

    async fn credentials(&self) -> anyhow::Result<Credentials> {
        let username = match &self.config.username {
            Some(username) => username.clone(),
            None => prompt_line("Username: ").await?,
        };
        let password = match &self.config.password {
            Some(password) => password.clone(),
            None => tokio::task::spawn_blocking(|| rpassword::prompt_password("Password: "))
                .await
                .context("password prompt panicked")?
                .context("failed to read password")?,
        };
        Ok(Credentials::new(username, password))
    }

    async fn login(&self) -> anyhow::Result<AuthSession> {
        let credentials = self.credentials().await?;
        let mut auth = SessionAuthenticator::start(
            self.transport.clone(),
            self.config.auth.clone(),
            &credentials,
            Vec::new(),
        )
        .await?;

        if auth.needs_captcha().await? {
            let challenge = auth.captcha_image().await?;
            let path = PathBuf::from(CAPTCHA_FILE);
            tokio::fs::write(&path, &challenge.image)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Captcha saved to {}", path.display());
            let code = prompt_line("Captcha: ").await;
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(error = %e, "failed to remove captcha image");
            }
            auth.set_captcha_code(&code?)?;
        }

        Ok(auth.login().await?)
    }

    async fn logout(&self, session: &AuthSession) {
        if let Err(e) = session.logout(&self.config.auth.logout_url).await {
            warn!(error = %e, "logout failed");
        }
    }
}

fn print_report(report: &ElectionReport) {
    for course in &report.courses {
        let status = match &course.status {
            CourseStatus::Pending => "pending".to_owned(),
            CourseStatus::Elected => "elected".to_owned(),
            CourseStatus::Dropped => "dropped".to_owned(),
            CourseStatus::AlreadyElected => "already elected".to_owned(),
            CourseStatus::Rejected(reason) => format!("rejected: {reason}"),
            CourseStatus::Exhausted { last_reason } => {
                format!("gave up after {} attempts: {last_reason}", course.attempts)
            }
        };
        println!(
            "  {} - {}: {status}",
            course.offering.offering_id, course.offering.display_name
        );
    }
    println!(
        "{} of {} offerings secured{}",
        report.secured(),
        report.courses.len(),
        if report.session_expired {
            " (session expired, log in again)"
        } else if report.cancelled {
            " (interrupted)"
        } else {
            ""
        }
    );
}

async fn prompt_line(label: &'static str) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        let mut stderr = std::io::stderr();
        stderr.write_all(label.as_bytes())?;
        stderr.flush()?;
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim().to_owned())
    })
    .await
    .context("prompt panicked")?
    .context("failed to read from stdin")
}

async fn confirm(label: &'static str) -> anyhow::Result<bool> {
    let answer = prompt_line(label).await?;
    Ok(matches!(answer.to_lowercase().as_str(), "y" | "yes"))
}
