use serde::{Deserialize, Serialize};
use std::fmt;

/// One electable course offering, as listed by an election profile's data feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseOffering {
    /// Human-facing offering number, e.g. `2024001.01`. Users select courses by this.
    pub offering_id: String,
    /// Numeric id the course system expects in election requests.
    pub internal_id: i64,
    pub display_name: String,
    /// Election profile the offering was listed under; elections are posted against it.
    pub profile_id: String,
}

/// An entry of the lesson feed. The feed carries many more fields (teachers, schedule,
/// credits); only the ones needed to elect are kept.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FeedLesson {
    pub id: i64,
    pub no: String,
    pub name: String,
}

impl FeedLesson {
    pub fn into_offering(self, profile_id: &str) -> CourseOffering {
        CourseOffering {
            offering_id: self.no,
            internal_id: self.id,
            display_name: self.name,
            profile_id: profile_id.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionAction {
    Elect,
    /// Drop an offering previously elected.
    Cancel,
}

impl ElectionAction {
    /// Value of the `optype` form field.
    pub fn optype(self) -> &'static str {
        match self {
            ElectionAction::Elect => "true",
            ElectionAction::Cancel => "false",
        }
    }

    /// Value of the `operator0` form field for `offering`.
    pub fn operator(self, offering: &CourseOffering) -> String {
        match self {
            ElectionAction::Elect => format!("{}:true:0", offering.internal_id),
            ElectionAction::Cancel => format!("{}:false", offering.internal_id),
        }
    }
}

impl fmt::Display for ElectionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElectionAction::Elect => f.write_str("elect"),
            ElectionAction::Cancel => f.write_str("cancel"),
        }
    }
}

/// Result of a single election request, classified from the course system's status text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionOutcome {
    Success,
    /// The offering was already held by this account.
    AlreadyElected,
    /// The course system refused for a reason retrying will not fix.
    Rejected(String),
    /// The request should be repeated later (server busy, rate limited, network hiccup).
    TransientFailure(String),
    /// The course system answered with the identity provider's login page.
    SessionExpired,
}

impl ElectionOutcome {
    /// The offering is now held (or, for cancellation, released).
    pub fn is_secured(&self) -> bool {
        matches!(self, ElectionOutcome::Success | ElectionOutcome::AlreadyElected)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ElectionOutcome::TransientFailure(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offering() -> CourseOffering {
        CourseOffering {
            offering_id: "2024001.01".to_owned(),
            internal_id: 52611,
            display_name: "高等数学A".to_owned(),
            profile_id: "5".to_owned(),
        }
    }

    #[test]
    fn operator_field_encodes_the_internal_id() {
        assert_eq!(ElectionAction::Elect.operator(&offering()), "52611:true:0");
        assert_eq!(ElectionAction::Cancel.operator(&offering()), "52611:false");
        assert_eq!(ElectionAction::Cancel.optype(), "false");
    }

    #[test]
    fn feed_lessons_ignore_unknown_fields() {
        let lesson: FeedLesson = serde_json::from_str(
            r#"{"id":52611,"no":"2024001.01","name":"高等数学A","credits":5.0,"teachers":"张三"}"#,
        )
        .unwrap();
        assert_eq!(lesson.into_offering("5"), offering());
    }

    #[test]
    fn only_transient_failures_are_retried() {
        assert!(ElectionOutcome::Rejected("课程已满".into()).is_terminal());
        assert!(!ElectionOutcome::Rejected("课程已满".into()).is_secured());
        assert!(!ElectionOutcome::TransientFailure("过快点击".into()).is_terminal());
        assert!(ElectionOutcome::AlreadyElected.is_secured());
        assert!(ElectionOutcome::SessionExpired.is_terminal());
        assert!(!ElectionOutcome::SessionExpired.is_secured());
    }
}
