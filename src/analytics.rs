use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Days, NaiveDate, TimeZone};
use uuid::Uuid;

use crate::models::{
    AnalyticsSnapshot, AttendanceRecord, ClassFilter, ClassInfo, ClassStats, DailyTrendPoint,
    OverallStats,
};

pub const TREND_DAYS: u64 = 7;

/// Aggregates attendance into overview counters, per-class stats and a
/// 7-day trend ending on the local date of `as_of`.
///
/// Per-class stats always cover every record; the filter only narrows the
/// overview and the trend. Records are bucketed by their calendar day in the
/// time zone of `as_of`, using the offset in force at each mark.
pub fn aggregate<Tz: TimeZone>(
    records: &[AttendanceRecord],
    classes: &[ClassInfo],
    filter: ClassFilter,
    as_of: DateTime<Tz>,
) -> AnalyticsSnapshot {
    let filtered: Vec<&AttendanceRecord> = records
        .iter()
        .filter(|record| filter.matches(record.class_id))
        .collect();

    AnalyticsSnapshot {
        filter_label: filter_label(filter, classes, records),
        as_of: as_of.date_naive(),
        overall: overall_stats(&filtered),
        per_class: class_stats(records),
        trend: daily_trend(&filtered, &as_of),
    }
}

pub fn overall_stats(records: &[&AttendanceRecord]) -> OverallStats {
    let students: HashSet<Uuid> = records.iter().map(|r| r.student_id).collect();
    let sessions: HashSet<Uuid> = records.iter().map(|r| r.session_id).collect();
    let total_attendance = records.len();

    let avg_attendance_rate = if sessions.is_empty() {
        0.0
    } else {
        (total_attendance as f64 / sessions.len() as f64) * 100.0
            / students.len().max(1) as f64
    };

    OverallStats {
        total_students: students.len(),
        total_sessions: sessions.len(),
        total_attendance,
        avg_attendance_rate,
    }
}

/// Groups by class display name in first-seen order.
pub fn class_stats(records: &[AttendanceRecord]) -> Vec<ClassStats> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(&str, usize, HashSet<Uuid>)> = Vec::new();

    for record in records {
        let slot = *index.entry(record.class_name.as_str()).or_insert_with(|| {
            groups.push((record.class_name.as_str(), 0, HashSet::new()));
            groups.len() - 1
        });
        let group = &mut groups[slot];
        group.1 += 1;
        group.2.insert(record.session_id);
    }

    groups
        .into_iter()
        .map(|(class_name, total_attendance, sessions)| {
            let total_sessions = sessions.len();
            ClassStats {
                class_name: class_name.to_string(),
                total_sessions,
                total_attendance,
                attendance_rate: if total_sessions == 0 {
                    0.0
                } else {
                    total_attendance as f64 / total_sessions as f64
                },
            }
        })
        .collect()
}

/// First day of the window ending on `today`, or `None` when it would fall
/// before the earliest representable date.
pub fn window_start(today: NaiveDate) -> Option<NaiveDate> {
    today.checked_sub_days(Days::new(TREND_DAYS - 1))
}

/// Windows that cannot end on `today` start at `NaiveDate::MIN` instead;
/// `as_of_date` refuses such dates.
pub fn trend_window(today: NaiveDate) -> Vec<NaiveDate> {
    window_start(today)
        .unwrap_or(NaiveDate::MIN)
        .iter_days()
        .take(TREND_DAYS as usize)
        .collect()
}

pub fn daily_trend<Tz: TimeZone>(
    records: &[&AttendanceRecord],
    as_of: &DateTime<Tz>,
) -> Vec<DailyTrendPoint> {
    let tz = as_of.timezone();
    let window = trend_window(as_of.date_naive());
    let mut counts: HashMap<NaiveDate, usize> = window.iter().map(|day| (*day, 0)).collect();

    for record in records {
        let day = record.marked_at.with_timezone(&tz).date_naive();
        if let Some(count) = counts.get_mut(&day) {
            *count += 1;
        }
    }

    window
        .into_iter()
        .map(|date| DailyTrendPoint {
            date,
            label: short_date(date),
            count: counts.get(&date).copied().unwrap_or(0),
        })
        .collect()
}

pub fn short_date(date: NaiveDate) -> String {
    date.format("%b %-d").to_string()
}

fn filter_label(
    filter: ClassFilter,
    classes: &[ClassInfo],
    records: &[AttendanceRecord],
) -> String {
    match filter {
        ClassFilter::All => "All Classes".to_string(),
        ClassFilter::Class(id) => classes
            .iter()
            .find(|class| class.id == id)
            .map(|class| class.name.clone())
            .or_else(|| {
                records
                    .iter()
                    .find(|record| record.class_id == id)
                    .map(|record| record.class_name.clone())
            })
            .unwrap_or_else(|| id.to_string()),
    }
}

/// Pins `date` to midday in `tz` so it can serve as an as-of moment.
///
/// Returns `None` when the trend window ending on `date` is not representable.
pub fn as_of_date<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> Option<DateTime<Tz>> {
    window_start(date)?;
    let midday = date.and_hms_opt(12, 0, 0)?;
    tz.from_local_datetime(&midday).earliest()
}
