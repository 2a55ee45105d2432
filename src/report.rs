use std::fmt::Write;

use clap::ValueEnum;

use crate::models::AnalyticsSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Markdown,
    Json,
}

pub fn render(snapshot: &AnalyticsSnapshot, format: ReportFormat) -> anyhow::Result<String> {
    match format {
        ReportFormat::Markdown => Ok(build_report(snapshot)),
        ReportFormat::Json => Ok(serde_json::to_string_pretty(snapshot)?),
    }
}

pub fn build_report(snapshot: &AnalyticsSnapshot) -> String {
    let mut output = String::new();
    let overall = &snapshot.overall;

    let _ = writeln!(output, "# Attendance Analytics Report");
    let _ = writeln!(
        output,
        "Generated for {} (as of {})",
        snapshot.filter_label, snapshot.as_of
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overview");
    let _ = writeln!(output, "- Total students: {}", overall.total_students);
    let _ = writeln!(output, "- Total sessions: {}", overall.total_sessions);
    let _ = writeln!(output, "- Total attendance: {}", overall.total_attendance);
    let _ = writeln!(
        output,
        "- Avg attendance rate: {:.1}%",
        overall.avg_attendance_rate
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Attendance by Class");

    if snapshot.per_class.is_empty() {
        let _ = writeln!(output, "No attendance recorded yet.");
    } else {
        for stats in snapshot.per_class.iter() {
            let _ = writeln!(
                output,
                "- {}: {} marks across {} sessions ({:.2} per session)",
                stats.class_name,
                stats.total_attendance,
                stats.total_sessions,
                stats.attendance_rate
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Daily Attendance Trend (last 7 days)");
    let _ = writeln!(output, "| Date | Count |");
    let _ = writeln!(output, "| --- | ---: |");
    for point in snapshot.trend.iter() {
        let _ = writeln!(output, "| {} | {} |", point.label, point.count);
    }

    output
}
