//! Course system (EAMS) client: electable offerings and the election loop.

pub mod catalog;
pub mod engine;
pub mod json;
pub mod models;
pub mod requested;

pub use catalog::EnrollmentCatalog;
pub use engine::{CourseProgress, CourseStatus, ElectionReport, EnrollmentEngine};
pub use models::{CourseOffering, ElectionAction, ElectionOutcome};
