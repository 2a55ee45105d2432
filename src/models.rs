use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

/// One attendance mark joined with the student and class display fields.
#[derive(Debug, Clone)]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub student_id: Uuid,
    pub class_id: Uuid,
    pub session_id: Uuid,
    pub marked_at: DateTime<Utc>,
    pub student_name: String,
    pub roll_number: String,
    pub class_name: String,
}

#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassStats {
    pub class_name: String,
    pub total_sessions: usize,
    pub total_attendance: usize,
    pub attendance_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyTrendPoint {
    pub date: NaiveDate,
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OverallStats {
    pub total_students: usize,
    pub total_sessions: usize,
    pub total_attendance: usize,
    pub avg_attendance_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsSnapshot {
    pub filter_label: String,
    pub as_of: NaiveDate,
    pub overall: OverallStats,
    pub per_class: Vec<ClassStats>,
    pub trend: Vec<DailyTrendPoint>,
}

/// An attendance session opened by a teacher; students scan its token.
#[derive(Debug, Clone)]
pub struct AttendanceSession {
    pub id: Uuid,
    pub class_id: Uuid,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Class selector for the overview counters and the daily trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassFilter {
    All,
    Class(Uuid),
}

impl ClassFilter {
    pub fn matches(&self, class_id: Uuid) -> bool {
        match self {
            ClassFilter::All => true,
            ClassFilter::Class(id) => *id == class_id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("class filter must be \"all\" or a class id, got {0:?}")]
pub struct FilterParseError(String);

impl FromStr for ClassFilter {
    type Err = FilterParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("all") {
            return Ok(ClassFilter::All);
        }
        Uuid::parse_str(value)
            .map(ClassFilter::Class)
            .map_err(|_| FilterParseError(value.to_string()))
    }
}

impl fmt::Display for ClassFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassFilter::All => f.write_str("all"),
            ClassFilter::Class(id) => write!(f, "{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_case_insensitively() {
        assert_eq!("all".parse::<ClassFilter>().unwrap(), ClassFilter::All);
        assert_eq!(" ALL ".parse::<ClassFilter>().unwrap(), ClassFilter::All);
    }

    #[test]
    fn parses_class_id() {
        let id = Uuid::new_v4();
        let filter: ClassFilter = id.to_string().parse().unwrap();
        assert_eq!(filter, ClassFilter::Class(id));
        assert!(filter.matches(id));
        assert!(!filter.matches(Uuid::new_v4()));
    }

    #[test]
    fn rejects_garbage() {
        let err = "math".parse::<ClassFilter>().unwrap_err();
        assert!(err.to_string().contains("math"));
    }
}
