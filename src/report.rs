use std::collections::BTreeMap;
use std::fmt::Write;

use crate::models::{RunSummary, SemesterSummary, Snapshot};

pub fn summarize_by_semester(snapshots: &[Snapshot]) -> Vec<SemesterSummary> {
    let mut map: BTreeMap<u32, (usize, u32, usize)> = BTreeMap::new();

    for snapshot in snapshots {
        let entry = map.entry(snapshot.semestre_actual).or_insert((0, 0, 0));
        entry.0 += 1;
        entry.1 += snapshot.semestres_recursados;
        entry.2 += usize::from(snapshot.resultado_final);
    }

    map.into_iter()
        .map(|(semester, (count, total_repeated, graduated))| SemesterSummary {
            semester,
            count,
            avg_repeated: if count == 0 {
                0.0
            } else {
                total_repeated as f64 / count as f64
            },
            graduate_share: if count == 0 {
                0.0
            } else {
                graduated as f64 / count as f64
            },
        })
        .collect()
}

pub fn build_report(summary: &RunSummary, snapshots: &[Snapshot]) -> String {
    let semesters = summarize_by_semester(snapshots);
    let mut output = String::new();

    let _ = writeln!(output, "# Academic Timeline Report");
    let _ = writeln!(
        output,
        "Run {} over {} (generated {})",
        summary.run_id,
        summary.source,
        summary.generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Parameters");
    let _ = writeln!(output, "- Calendar periods: {}", summary.calendar_periods);
    let _ = writeln!(
        output,
        "- Program length: {} semesters",
        summary.policy.program_semesters
    );
    let _ = writeln!(
        output,
        "- On-time window: {} ideal + {} tolerance regular periods",
        summary.policy.ideal_duration, summary.policy.tolerance
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Graduation");
    let _ = writeln!(
        output,
        "- {} grade records across {} students",
        summary.grade_records, summary.students
    );
    let share = if summary.students == 0 {
        0.0
    } else {
        100.0 * summary.graduates as f64 / summary.students as f64
    };
    let _ = writeln!(
        output,
        "- {} graduated on time ({:.1}%)",
        summary.graduates, share
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Data Quality");
    let anomalies = &summary.anomalies;
    if anomalies.incomplete_careers + anomalies.inverted_timelines + anomalies.exceeded_tolerance
        == 0
    {
        let _ = writeln!(
            output,
            "All {} careers evaluated qualified.",
            anomalies.careers_evaluated
        );
    } else {
        let _ = writeln!(
            output,
            "- Careers evaluated: {}",
            anomalies.careers_evaluated
        );
        let _ = writeln!(
            output,
            "- Incomplete careers: {}",
            anomalies.incomplete_careers
        );
        let _ = writeln!(
            output,
            "- Inverted timelines: {}",
            anomalies.inverted_timelines
        );
        let _ = writeln!(
            output,
            "- Over tolerance: {}",
            anomalies.exceeded_tolerance
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Snapshots by Semester");
    if semesters.is_empty() {
        let _ = writeln!(output, "No snapshots produced for this run.");
    } else {
        for semester in &semesters {
            let _ = writeln!(
                output,
                "- Semester {}: {} students (avg repeated {:.2}, {:.0}% graduated)",
                semester.semester,
                semester.count,
                semester.avg_repeated,
                100.0 * semester.graduate_share
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graduation::{AnomalyCounts, GraduationPolicy};
    use chrono::Utc;
    use uuid::Uuid;

    fn snapshot(semester: u32, repeated: u32, label: u8) -> Snapshot {
        Snapshot {
            student_id: "s".to_string(),
            semestre_actual: semester,
            promedio_p1: 8.0,
            promedio_p2: 8.0,
            promedio_p3: 8.0,
            promedio_final: 8.0,
            promedio_e1: 0.0,
            promedio_e2: 0.0,
            promedio_esp: 0.0,
            semestres_recursados: repeated,
            resultado_final: label,
        }
    }

    fn summary(anomalies: AnomalyCounts) -> RunSummary {
        RunSummary {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            source: "exports/".to_string(),
            calendar_periods: 23,
            policy: GraduationPolicy::default(),
            grade_records: 40,
            students: 4,
            graduates: 1,
            anomalies,
            snapshots: 3,
        }
    }

    #[test]
    fn semester_summary_averages_delay_and_labels() {
        let snapshots = vec![snapshot(1, 0, 1), snapshot(1, 2, 0), snapshot(2, 1, 1)];
        let summaries = summarize_by_semester(&snapshots);

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].semester, 1);
        assert_eq!(summaries[0].count, 2);
        assert!((summaries[0].avg_repeated - 1.0).abs() < 1e-9);
        assert!((summaries[0].graduate_share - 0.5).abs() < 1e-9);
        assert_eq!(summaries[1].count, 1);
    }

    #[test]
    fn report_lists_anomaly_counts() {
        let report = build_report(
            &summary(AnomalyCounts {
                careers_evaluated: 5,
                incomplete_careers: 3,
                inverted_timelines: 1,
                exceeded_tolerance: 0,
            }),
            &[snapshot(1, 0, 1)],
        );

        assert!(report.starts_with("# Academic Timeline Report"));
        assert!(report.contains("- 1 graduated on time (25.0%)"));
        assert!(report.contains("- Incomplete careers: 3"));
        assert!(report.contains("- Inverted timelines: 1"));
        assert!(report.contains("- Semester 1: 1 students"));
    }

    #[test]
    fn report_handles_empty_run() {
        let report = build_report(&summary(AnomalyCounts::default()), &[]);
        assert!(report.contains("All 0 careers evaluated qualified."));
        assert!(report.contains("No snapshots produced for this run."));
    }
}
