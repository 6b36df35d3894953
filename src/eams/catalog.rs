use crate::auth::AuthSession;
use crate::config::EamsEndpoints;
use crate::eams::json::{parse_json_with_context, repair_course_feed};
use crate::eams::models::{CourseOffering, FeedLesson};
use crate::error::{Error, Result};
use crate::http::Request;
use crate::portal;
use crate::utils::fmt_duration;
use regex::Regex;
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument};

/// Shown on a profile's landing page outside its election window ("not within election time").
pub const CLOSED_WINDOW_MARKER: &str = "不在选课时间内";

static PROFILE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"electionProfile\.id=(\d+)").unwrap());

/// Read access to the course system's electable offerings.
#[derive(Debug, Clone)]
pub struct EnrollmentCatalog {
    session: AuthSession,
    endpoints: EamsEndpoints,
}

impl EnrollmentCatalog {
    /// Enter the course system: check the session is accepted, then load the student's course
    /// table once, which the course system requires before it serves election pages.
    pub async fn open(
        session: AuthSession,
        endpoints: EamsEndpoints,
        gate_timeout: Duration,
    ) -> Result<Self> {
        portal::assert_authenticated(&session, "eams", &endpoints.login_url, gate_timeout).await?;
        session
            .send(Request::get(&endpoints.course_table_url))
            .await?
            .error_for_status()?;
        debug!("course system session established");
        Ok(Self::new(session, endpoints))
    }

    /// Wrap a session that has already entered the course system.
    pub fn new(session: AuthSession, endpoints: EamsEndpoints) -> Self {
        Self { session, endpoints }
    }

    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    /// Election profiles advertised on the election landing page, in page order.
    pub async fn profile_ids(&self) -> Result<Vec<String>> {
        let page = self
            .session
            .send(Request::get(&self.endpoints.elect_landing_url))
            .await?
            .error_for_status()?;
        let ids = extract_profile_ids(&page.text());
        debug!(profiles = ?ids, "found election profiles");
        Ok(ids)
    }

    /// Every offering electable right now, across all election profiles.
    ///
    /// Profiles are visited in order and each is fetched fresh; the first profile outside its
    /// election window aborts the listing before any later profile is requested.
    #[instrument(skip(self))]
    pub async fn list_electable_offerings(&self) -> Result<Vec<CourseOffering>> {
        let start = Instant::now();
        let profile_ids = self.profile_ids().await?;

        let mut offerings = Vec::new();
        for profile_id in &profile_ids {
            offerings.extend(self.fetch_profile(profile_id).await?);
        }

        info!(
            profiles = profile_ids.len(),
            offerings = offerings.len(),
            duration = fmt_duration(start.elapsed()),
            "listed electable offerings"
        );
        Ok(offerings)
    }

    async fn fetch_profile(&self, profile_id: &str) -> Result<Vec<CourseOffering>> {
        let landing = self
            .session
            .send(
                Request::get(&self.endpoints.elect_profile_url)
                    .query("electionProfile.id", profile_id),
            )
            .await?
            .error_for_status()?;
        if landing.text().contains(CLOSED_WINDOW_MARKER) {
            return Err(Error::NotWithinElectionWindow {
                profile_id: profile_id.to_owned(),
            });
        }

        let feed = self
            .session
            .send(Request::get(&self.endpoints.elect_data_url).query("profileId", profile_id))
            .await?
            .error_for_status()?;
        let offerings = parse_course_feed(profile_id, &feed.text())?;
        debug!(profile_id, count = offerings.len(), "parsed course feed");
        Ok(offerings)
    }
}

/// Distinct `electionProfile.id` values in `html`, first occurrence first.
pub fn extract_profile_ids(html: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for caps in PROFILE_ID.captures_iter(html) {
        let id = &caps[1];
        if !ids.iter().any(|seen| seen == id) {
            ids.push(id.to_owned());
        }
    }
    ids
}

/// Repair and decode one profile's data feed.
pub fn parse_course_feed(profile_id: &str, raw: &str) -> Result<Vec<CourseOffering>> {
    let parsed = repair_course_feed(raw)
        .and_then(|json| parse_json_with_context::<Vec<FeedLesson>>(&json));
    match parsed {
        Ok(lessons) => Ok(lessons
            .into_iter()
            .map(|lesson| lesson.into_offering(profile_id))
            .collect()),
        Err(source) => Err(Error::CatalogParse {
            profile_id: profile_id.to_owned(),
            source,
        }),
    }
}
