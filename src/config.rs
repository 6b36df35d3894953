//! Configuration loaded from defaults, an optional TOML file and `SUEP_*` environment variables.
//!
//! Every institutional URL lives here rather than in the clients so a portal move only needs a
//! config change. Durations accept human strings (`"500ms"`, `"10s"`, `"2m"`) or bare numbers
//! of seconds.

use anyhow::Context;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;
use std::time::Duration;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "suep.toml";

#[derive(custom_debug_derive::Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level for this crate's targets (overridden entirely by `RUST_LOG`).
    pub log_level: String,
    /// Uniform timeout applied to every request that does not set its own.
    #[serde(with = "duration_str")]
    pub request_timeout: Duration,
    /// Bound on the portal gate request; a timeout there means "not on the campus network".
    #[serde(with = "duration_str")]
    pub portal_timeout: Duration,
    pub username: Option<String>,
    #[debug(with = "crate::fmt::redacted")]
    pub password: Option<String>,
    pub probe: ProbeConfig,
    pub auth: AuthEndpoints,
    pub eams: EamsEndpoints,
    pub portals: PortalProbeUrls,
    pub election: ElectionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            request_timeout: Duration::from_secs(10),
            portal_timeout: Duration::from_secs(5),
            username: None,
            password: None,
            probe: ProbeConfig::default(),
            auth: AuthEndpoints::default(),
            eams: EamsEndpoints::default(),
            portals: PortalProbeUrls::default(),
            election: ElectionConfig::default(),
        }
    }
}

impl Config {
    /// Merge defaults, the TOML file (if it exists) and `SUEP_`-prefixed environment variables.
    ///
    /// Nested keys use a double underscore: `SUEP_ELECTION__MAX_ATTEMPTS=20`.
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        let file = file.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        Self::figment(file)
            .extract()
            .context("Failed to load configuration")
    }

    fn figment(file: &Path) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed("SUEP_").split("__"))
    }
}

/// Internal-network reachability probe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Hosts only reachable from inside the campus network.
    pub hosts: Vec<String>,
    pub port: u16,
    /// Per-connection timeout; below ~500ms false negatives become likely.
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    /// Fraction of hosts that must accept a connection.
    pub threshold: f64,
    /// Maximum simultaneous connection attempts; never fewer than the number of hosts.
    pub workers: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            hosts: vec![
                "10.50.2.206".to_owned(),
                "10.166.18.114".to_owned(),
                "10.166.19.26".to_owned(),
                "10.168.103.76".to_owned(),
            ],
            port: 80,
            timeout: Duration::from_millis(500),
            threshold: 0.5,
            workers: 5,
        }
    }
}

/// Identity provider (CAS) endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthEndpoints {
    pub login_url: String,
    pub logout_url: String,
    pub need_captcha_url: String,
    pub captcha_image_url: String,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            login_url: "https://ids.shiep.edu.cn/authserver/login".to_owned(),
            logout_url: "https://ids.shiep.edu.cn/authserver/logout".to_owned(),
            need_captcha_url: "https://ids.shiep.edu.cn/authserver/needCaptcha.html".to_owned(),
            captcha_image_url: "https://ids.shiep.edu.cn/authserver/captcha.html".to_owned(),
        }
    }
}

/// Course system (EAMS) endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EamsEndpoints {
    pub login_url: String,
    pub course_table_url: String,
    pub elect_landing_url: String,
    pub elect_profile_url: String,
    pub elect_data_url: String,
    pub elect_operator_url: String,
}

impl Default for EamsEndpoints {
    fn default() -> Self {
        Self {
            login_url: "https://jw.shiep.edu.cn/eams/login.action".to_owned(),
            course_table_url: "https://jw.shiep.edu.cn/eams/courseTableForStd.action".to_owned(),
            elect_landing_url: "https://jw.shiep.edu.cn/eams/stdElectCourse.action".to_owned(),
            elect_profile_url: "https://jw.shiep.edu.cn/eams/stdElectCourse!defaultPage.action"
                .to_owned(),
            elect_data_url: "https://jw.shiep.edu.cn/eams/stdElectCourse!data.action".to_owned(),
            elect_operator_url: "https://jw.shiep.edu.cn/eams/stdElectCourse!batchOperator.action"
                .to_owned(),
        }
    }
}

/// Pages that render the "please log in" wrapper when the session is not accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalProbeUrls {
    pub eams: String,
    pub ecard: String,
    pub electricity: String,
    pub cloud_drive: String,
}

impl Default for PortalProbeUrls {
    fn default() -> Self {
        Self {
            eams: "https://jw.shiep.edu.cn/eams/login.action".to_owned(),
            ecard: "http://10.168.103.76/sfrzwhlgportalHome.action".to_owned(),
            electricity: "http://10.50.2.206".to_owned(),
            cloud_drive: "https://ids.shiep.edu.cn/authserver/login?service=https%3A%2F%2Fpan.shiep.edu.cn%2Fsso".to_owned(),
        }
    }
}

/// Retry and pacing policy for the election loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Attempts per offering before it is reported as exhausted.
    pub max_attempts: u32,
    /// First retry delay; doubled after every transient failure of the same offering.
    #[serde(with = "duration_str")]
    pub backoff_base: Duration,
    #[serde(with = "duration_str")]
    pub backoff_max: Duration,
    /// Client-side cap on election requests per second for the whole session.
    pub requests_per_second: u32,
    /// Extra response substrings that mark a definitive, non-retryable rejection.
    pub rejection_markers: Vec<String>,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 100,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            requests_per_second: 2,
            rejection_markers: Vec::new(),
        }
    }
}

/// Parse a duration string with millisecond, second and minute units.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let parser =
        DurationParser::with_time_units(&[TimeUnit::MilliSecond, TimeUnit::Second, TimeUnit::Minute]);
    let parsed = parser
        .parse(value.trim())
        .map_err(|e| format!("invalid duration '{value}': {e}"))?;
    Duration::try_from(parsed).map_err(|e| format!("invalid duration '{value}': {e}"))
}

/// Serde adapter for `Duration` fields written as human strings.
mod duration_str {
    use super::*;
    use serde::de::{self, Visitor};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{}ms", value.as_millis()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        struct DurationVisitor;

        impl Visitor<'_> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a duration like \"500ms\", \"10s\" or a number of seconds")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
                Ok(Duration::from_secs(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
                u64::try_from(v)
                    .map(Duration::from_secs)
                    .map_err(|_| E::custom("duration must not be negative"))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Duration, E> {
                Duration::try_from_secs_f64(v).map_err(E::custom)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
                parse_duration(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}
