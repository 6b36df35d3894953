//! The election loop.
//!
//! Requested offerings are swept sequentially, one request at a time: the course system
//! rate-limits concurrent submissions from one session and its form state is not safe to post
//! twice in parallel. Every transient failure pushes that offering back by an exponential
//! backoff, and each offering has its own attempt budget, so a busy server is never hammered
//! and the loop always terminates.

use crate::auth::AuthSession;
use crate::config::ElectionConfig;
use crate::eams::models::{CourseOffering, ElectionAction, ElectionOutcome};
use crate::error::Error;
use crate::http::Request;
use crate::portal::is_login_wall;
use crate::utils::fmt_duration;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use html_scraper::{Html, Selector};
use std::num::NonZeroU32;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

/// "Already elected": the offering is held by this account.
pub const ALREADY_ELECTED_MARKER: &str = "已经选过";

/// "failed", "internal error", "clicked too fast".
pub const TRANSIENT_MARKERS: [&str; 3] = ["失败", "内部错误", "过快点击"];

static STATUS_BLOCK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div").unwrap());

/// Primary status text of an operator response: the first `div` if there is one, otherwise
/// the whole document text. Whitespace runs are collapsed.
pub fn status_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let text: String = match document.select(&STATUS_BLOCK).next() {
        Some(block) => block.text().collect(),
        None => document.root_element().text().collect(),
    };
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Maps status text to an outcome.
#[derive(Debug, Clone, Default)]
pub struct OutcomeClassifier {
    rejection_markers: Vec<String>,
}

impl OutcomeClassifier {
    pub fn new(rejection_markers: Vec<String>) -> Self {
        let rejection_markers = rejection_markers
            .into_iter()
            .filter(|marker| !marker.trim().is_empty())
            .collect();
        Self { rejection_markers }
    }

    pub fn classify(&self, action: ElectionAction, status: &str) -> ElectionOutcome {
        if action == ElectionAction::Elect && status.contains(ALREADY_ELECTED_MARKER) {
            return ElectionOutcome::AlreadyElected;
        }
        if self
            .rejection_markers
            .iter()
            .any(|marker| status.contains(marker.as_str()))
        {
            return ElectionOutcome::Rejected(status.to_owned());
        }
        if TRANSIENT_MARKERS.iter().any(|marker| status.contains(marker)) {
            return ElectionOutcome::TransientFailure(status.to_owned());
        }
        ElectionOutcome::Success
    }
}

/// Attempt budget and retry spacing for a single offering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    /// Delay before the next attempt after `failures` consecutive transient failures.
    pub fn backoff(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32 << (failures - 1).min(16);
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_max)
    }
}

impl From<&ElectionConfig> for RetryPolicy {
    fn from(config: &ElectionConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: config.backoff_base,
            backoff_max: config.backoff_max,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CourseStatus {
    /// Not settled yet; only seen in reports of cancelled runs.
    Pending,
    Elected,
    /// A cancel request took effect.
    Dropped,
    AlreadyElected,
    Rejected(String),
    Exhausted { last_reason: String },
}

impl CourseStatus {
    pub fn is_secured(&self) -> bool {
        matches!(
            self,
            CourseStatus::Elected | CourseStatus::Dropped | CourseStatus::AlreadyElected
        )
    }
}

#[derive(Debug, Clone)]
pub struct CourseProgress {
    pub offering: CourseOffering,
    pub status: CourseStatus,
    pub attempts: u32,
    pub transient_failures: u32,
}

/// What a run achieved, per requested offering.
#[derive(Debug, Clone, Default)]
pub struct ElectionReport {
    /// Offerings found in the catalog, in request order.
    pub courses: Vec<CourseProgress>,
    /// Requested identifiers that no catalog offering carries.
    pub missing: Vec<String>,
    pub cancelled: bool,
    /// The run stopped because the course system no longer accepted the session.
    pub session_expired: bool,
}

impl ElectionReport {
    pub fn secured(&self) -> usize {
        self.courses.iter().filter(|c| c.status.is_secured()).count()
    }

    pub fn pending(&self) -> usize {
        self.courses
            .iter()
            .filter(|c| c.status == CourseStatus::Pending)
            .count()
    }

    pub fn rejected(&self) -> impl Iterator<Item = &CourseProgress> {
        self.courses
            .iter()
            .filter(|c| matches!(c.status, CourseStatus::Rejected(_)))
    }

    /// Transient failures that were retried (or given up on) across all offerings.
    pub fn transient_retries(&self) -> u32 {
        self.courses.iter().map(|c| c.transient_failures).sum()
    }

    /// Offerings that used up their attempt budget, as errors.
    pub fn exhausted(&self) -> Vec<Error> {
        self.courses
            .iter()
            .filter_map(|c| match &c.status {
                CourseStatus::Exhausted { last_reason } => Some(Error::RetryBudgetExhausted {
                    offering: c.offering.offering_id.clone(),
                    attempts: c.attempts,
                    last_reason: last_reason.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Every found offering is secured and nothing requested was missing.
    pub fn is_complete(&self) -> bool {
        !self.cancelled
            && !self.session_expired
            && self.missing.is_empty()
            && self.courses.iter().all(|c| c.status.is_secured())
    }
}

/// Split `requested` into catalog offerings (request order, exact identifier match) and
/// identifiers the catalog does not list.
pub fn select_targets(
    catalog: &[CourseOffering],
    requested: &[String],
) -> (Vec<CourseOffering>, Vec<String>) {
    let mut found = Vec::new();
    let mut missing = Vec::new();
    for wanted in requested {
        if found
            .iter()
            .any(|o: &CourseOffering| &o.offering_id == wanted)
            || missing.contains(wanted)
        {
            continue;
        }
        match catalog.iter().find(|o| &o.offering_id == wanted) {
            Some(offering) => found.push(offering.clone()),
            None => missing.push(wanted.clone()),
        }
    }
    (found, missing)
}

pub struct EnrollmentEngine {
    session: AuthSession,
    operator_url: String,
    policy: RetryPolicy,
    classifier: OutcomeClassifier,
    limiter: Option<DefaultDirectRateLimiter>,
    cancel: CancellationToken,
}

impl EnrollmentEngine {
    pub fn new(session: AuthSession, operator_url: impl Into<String>, config: &ElectionConfig) -> Self {
        let limiter = NonZeroU32::new(config.requests_per_second)
            .map(|rate| RateLimiter::direct(Quota::per_second(rate)));
        Self {
            session,
            operator_url: operator_url.into(),
            policy: RetryPolicy::from(config),
            classifier: OutcomeClassifier::new(config.rejection_markers.clone()),
            limiter,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops [`run`](Self::run) at the next attempt boundary or backoff wait.
    ///
    /// Cancellation is permanent: every later `run` on this engine returns a cancelled report
    /// without sending anything. Build a new engine to start over.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Post one election request and classify the answer.
    ///
    /// Transport failures are transient outcomes, not errors: the next sweep retries them.
    pub async fn attempt(&self, offering: &CourseOffering, action: ElectionAction) -> ElectionOutcome {
        let request = Request::post(&self.operator_url)
            .query("profileId", &offering.profile_id)
            .form(vec![
                ("optype".to_owned(), action.optype().to_owned()),
                ("operator0".to_owned(), action.operator(offering)),
            ]);

        let page = match self.session.send(request).await {
            Ok(page) => page,
            Err(e) => return ElectionOutcome::TransientFailure(e.to_string()),
        };
        if !page.is_success() {
            return ElectionOutcome::TransientFailure(format!("HTTP {}", page.status));
        }

        let body = page.text();
        if is_login_wall(&body) {
            return ElectionOutcome::SessionExpired;
        }
        let status = status_text(&body);
        debug!(offering = %offering.offering_id, status = %status, "operator response");
        self.classifier.classify(action, &status)
    }

    /// Drive every requested offering to a terminal state, or until cancelled.
    pub async fn run(
        &self,
        catalog: &[CourseOffering],
        requested: &[String],
        action: ElectionAction,
    ) -> ElectionReport {
        let span = info_span!("election", %action, requested = requested.len());
        self.run_inner(catalog, requested, action).instrument(span).await
    }

    async fn run_inner(
        &self,
        catalog: &[CourseOffering],
        requested: &[String],
        action: ElectionAction,
    ) -> ElectionReport {
        let started = std::time::Instant::now();
        let (targets, missing) = select_targets(catalog, requested);
        for id in &missing {
            warn!(offering = %id, "requested offering is not in the catalog");
        }

        let mut report = ElectionReport {
            courses: targets
                .into_iter()
                .map(|offering| CourseProgress {
                    offering,
                    status: CourseStatus::Pending,
                    attempts: 0,
                    transient_failures: 0,
                })
                .collect(),
            missing,
            cancelled: false,
            session_expired: false,
        };
        let mut ready_at = vec![Instant::now(); report.courses.len()];
        let mut sweeps = 0u32;

        'sweeps: loop {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let pending: Vec<usize> = (0..report.courses.len())
                .filter(|&i| report.courses[i].status == CourseStatus::Pending)
                .collect();
            let Some(next_wake) = pending.iter().map(|&i| ready_at[i]).min() else {
                break;
            };

            let now = Instant::now();
            if next_wake > now {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        report.cancelled = true;
                        break;
                    }
                    _ = time::sleep_until(next_wake) => continue,
                }
            }

            sweeps += 1;
            let due: Vec<usize> = pending.into_iter().filter(|&i| ready_at[i] <= now).collect();
            for i in due {
                if self.cancel.is_cancelled() {
                    report.cancelled = true;
                    break 'sweeps;
                }
                if let Some(limiter) = &self.limiter {
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            report.cancelled = true;
                            break 'sweeps;
                        }
                        _ = limiter.until_ready() => {}
                    }
                }

                let outcome = self.attempt(&report.courses[i].offering, action).await;
                let course = &mut report.courses[i];
                course.attempts += 1;
                let offering = course.offering.offering_id.as_str();

                match outcome {
                    ElectionOutcome::Success => {
                        info!(offering, name = %course.offering.display_name, attempt = course.attempts, "{action} succeeded");
                        course.status = match action {
                            ElectionAction::Elect => CourseStatus::Elected,
                            ElectionAction::Cancel => CourseStatus::Dropped,
                        };
                    }
                    ElectionOutcome::AlreadyElected => {
                        info!(offering, attempt = course.attempts, "already elected");
                        course.status = CourseStatus::AlreadyElected;
                    }
                    ElectionOutcome::Rejected(reason) => {
                        warn!(offering, reason = %reason, "{action} rejected");
                        course.status = CourseStatus::Rejected(reason);
                    }
                    ElectionOutcome::SessionExpired => {
                        warn!(offering, attempt = course.attempts, "session no longer accepted, stopping");
                        report.session_expired = true;
                        break 'sweeps;
                    }
                    ElectionOutcome::TransientFailure(reason) => {
                        course.transient_failures += 1;
                        if course.attempts >= self.policy.max_attempts {
                            warn!(offering, attempts = course.attempts, reason = %reason, "giving up after retry budget");
                            course.status = CourseStatus::Exhausted {
                                last_reason: reason,
                            };
                        } else {
                            let delay = self.policy.backoff(course.transient_failures);
                            debug!(offering, attempt = course.attempts, reason = %reason, retry_in = fmt_duration(delay), "transient failure");
                            ready_at[i] = Instant::now() + delay;
                        }
                    }
                }
            }
        }

        let summary_secured = report.secured();
        if report.session_expired {
            warn!(secured = summary_secured, pending = report.pending(), "election stopped, log in again");
        } else if report.cancelled {
            warn!(secured = summary_secured, pending = report.pending(), "election interrupted");
        } else {
            info!(
                secured = summary_secured,
                total = report.courses.len(),
                missing = report.missing.len(),
                sweeps,
                retries = report.transient_retries(),
                duration = fmt_duration(started.elapsed()),
                "election finished"
            );
        }
        report
    }
}
