use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::calendar::PeriodCalendar;
use crate::error::{Result, TimelineError};
use crate::progress::{ProgressIndex, ProgressRecord};

/// Program length and the on-time window, in regular periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GraduationPolicy {
    pub program_semesters: u32,
    pub ideal_duration: usize,
    pub tolerance: usize,
}

impl Default for GraduationPolicy {
    fn default() -> Self {
        Self {
            program_semesters: 10,
            ideal_duration: 10,
            tolerance: 4,
        }
    }
}

impl GraduationPolicy {
    pub fn max_regular_periods(&self) -> usize {
        self.ideal_duration + self.tolerance
    }
}

/// Result of evaluating one (student, career) pair. Only `Qualified` counts
/// toward graduation; the others are local anomalies, never errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CareerOutcome {
    Qualified { regular_periods: usize },
    IncompleteCareer { missing: Vec<u32> },
    InvertedTimeline { start_period: u32, end_period: u32 },
    ExceededTolerance { regular_periods: usize },
}

impl CareerOutcome {
    pub fn is_qualified(&self) -> bool {
        matches!(self, CareerOutcome::Qualified { .. })
    }
}

pub fn evaluate_career(
    progress: &ProgressRecord,
    calendar: &PeriodCalendar,
    policy: &GraduationPolicy,
) -> Result<CareerOutcome> {
    let missing: Vec<u32> = (1..=policy.program_semesters)
        .filter(|semester| !progress.contains_key(semester))
        .collect();
    let first = progress.get(&1);
    let last = progress.get(&policy.program_semesters);
    let (start_period, end_period) = match (first, last) {
        (Some(&start), Some(&end)) if missing.is_empty() => (start, end),
        _ => return Ok(CareerOutcome::IncompleteCareer { missing }),
    };

    if calendar.ordinal(start_period)? > calendar.ordinal(end_period)? {
        return Ok(CareerOutcome::InvertedTimeline {
            start_period,
            end_period,
        });
    }

    let regular_periods = calendar.count_regular_between(start_period, end_period)?;
    if regular_periods <= policy.max_regular_periods() {
        Ok(CareerOutcome::Qualified { regular_periods })
    } else {
        Ok(CareerOutcome::ExceededTolerance { regular_periods })
    }
}

/// Every career evaluated for one student, and the first one that qualified.
#[derive(Debug, Clone)]
pub struct GraduationDecision {
    pub student_id: String,
    pub careers: Vec<(u32, CareerOutcome)>,
    pub qualifying_career: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnomalyCounts {
    pub careers_evaluated: usize,
    pub incomplete_careers: usize,
    pub inverted_timelines: usize,
    pub exceeded_tolerance: usize,
}

impl AnomalyCounts {
    fn record(&mut self, outcome: &CareerOutcome) {
        self.careers_evaluated += 1;
        match outcome {
            CareerOutcome::Qualified { .. } => {}
            CareerOutcome::IncompleteCareer { .. } => self.incomplete_careers += 1,
            CareerOutcome::InvertedTimeline { .. } => self.inverted_timelines += 1,
            CareerOutcome::ExceededTolerance { .. } => self.exceeded_tolerance += 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GraduationOutcome {
    pub graduates: BTreeSet<String>,
    pub decisions: Vec<GraduationDecision>,
    pub anomalies: AnomalyCounts,
}

/// Classify every student in `index`. A student graduates when any of their
/// careers qualifies; careers are evaluated in ascending id order and the
/// first qualifying one is recorded on the decision.
pub fn classify(
    index: &ProgressIndex,
    calendar: &PeriodCalendar,
    policy: &GraduationPolicy,
) -> Result<GraduationOutcome> {
    let mut outcome = GraduationOutcome::default();
    let mut current: Option<GraduationDecision> = None;

    // BTreeMap keys are ordered by student, then career.
    for ((student_id, career_id), progress) in index {
        let evaluation = evaluate_career(progress, calendar, policy)?;
        if let CareerOutcome::InvertedTimeline {
            start_period,
            end_period,
        } = &evaluation
        {
            warn!(
                "Student {} career {}: semester {} reached in period {} before semester 1 in period {}",
                student_id, career_id, policy.program_semesters, end_period, start_period
            );
        }
        outcome.anomalies.record(&evaluation);

        if current
            .as_ref()
            .map(|decision| &decision.student_id != student_id)
            .unwrap_or(true)
        {
            if let Some(done) = current.take() {
                outcome.push(done);
            }
            current = Some(GraduationDecision {
                student_id: student_id.clone(),
                careers: Vec::new(),
                qualifying_career: None,
            });
        }

        if let Some(decision) = current.as_mut() {
            if decision.qualifying_career.is_none() && evaluation.is_qualified() {
                decision.qualifying_career = Some(*career_id);
            }
            decision.careers.push((*career_id, evaluation));
        }
    }
    if let Some(done) = current.take() {
        outcome.push(done);
    }

    info!(
        "Classified {} students: {} graduated ({} incomplete careers, {} inverted timelines, {} over tolerance)",
        outcome.decisions.len(),
        outcome.graduates.len(),
        outcome.anomalies.incomplete_careers,
        outcome.anomalies.inverted_timelines,
        outcome.anomalies.exceeded_tolerance
    );

    Ok(outcome)
}

impl GraduationOutcome {
    fn push(&mut self, decision: GraduationDecision) {
        if decision.qualifying_career.is_some() {
            self.graduates.insert(decision.student_id.clone());
        }
        self.decisions.push(decision);
    }
}

/// Write the label set as one student id per line.
pub fn write_graduates(path: &Path, graduates: &BTreeSet<String>) -> Result<()> {
    let io_err = |source| TimelineError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = std::io::BufWriter::new(std::fs::File::create(path).map_err(io_err)?);
    for student_id in graduates {
        writeln!(file, "{student_id}").map_err(io_err)?;
    }
    file.flush().map_err(io_err)
}

pub fn read_graduates(path: &Path) -> Result<BTreeSet<String>> {
    let contents = std::fs::read_to_string(path).map_err(|source| TimelineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GradeRecord, Grades};
    use crate::progress::build_progress;

    // Regular periods of the default calendar, in order.
    const REGULAR: [u32; 16] = [35, 36, 39, 42, 41, 46, 44, 49, 48, 53, 51, 52, 55, 58, 57, 61];

    fn record(student: &str, career: u32, period: u32, semester: u32) -> GradeRecord {
        GradeRecord {
            student_id: student.to_string(),
            career_id: career,
            period_id: period,
            semester,
            group_id: None,
            subject_id: None,
            grades: Grades::default(),
        }
    }

    /// Semesters 1..=10 in consecutive regular periods starting at `offset`,
    /// with each semester taking `stride` regular periods.
    fn trajectory(student: &str, career: u32, offset: usize, stride: usize) -> Vec<GradeRecord> {
        (1..=10u32)
            .map(|semester| {
                let idx = offset + (semester as usize - 1) * stride;
                record(student, career, REGULAR[idx.min(REGULAR.len() - 1)], semester)
            })
            .collect()
    }

    fn run(records: &[GradeRecord]) -> GraduationOutcome {
        let calendar = PeriodCalendar::default_calendar().unwrap();
        let index = build_progress(records, &calendar).unwrap();
        classify(&index, &calendar, &GraduationPolicy::default()).unwrap()
    }

    #[test]
    fn on_time_student_graduates() {
        let outcome = run(&trajectory("s1", 2, 0, 1));
        assert!(outcome.graduates.contains("s1"));
        assert_eq!(outcome.decisions[0].qualifying_career, Some(2));
        assert_eq!(
            outcome.decisions[0].careers[0].1,
            CareerOutcome::Qualified {
                regular_periods: 10
            }
        );
    }

    #[test]
    fn missing_semester_seven_never_graduates() {
        let records: Vec<GradeRecord> = trajectory("s1", 2, 0, 1)
            .into_iter()
            .filter(|r| r.semester != 7)
            .collect();
        let outcome = run(&records);
        assert!(outcome.graduates.is_empty());
        assert_eq!(outcome.anomalies.incomplete_careers, 1);
        assert_eq!(
            outcome.decisions[0].careers[0].1,
            CareerOutcome::IncompleteCareer { missing: vec![7] }
        );
    }

    #[test]
    fn tolerance_boundary_is_inclusive() {
        let calendar = PeriodCalendar::default_calendar().unwrap();
        let mut progress = ProgressRecord::new();
        for semester in 1..=10 {
            progress.insert(semester, 35);
        }
        // 35 .. REGULAR[13] spans exactly 14 regular periods.
        progress.insert(10, REGULAR[13]);
        let policy = GraduationPolicy::default();
        assert_eq!(
            evaluate_career(&progress, &calendar, &policy).unwrap(),
            CareerOutcome::Qualified {
                regular_periods: 14
            }
        );

        progress.insert(10, REGULAR[14]);
        assert_eq!(
            evaluate_career(&progress, &calendar, &policy).unwrap(),
            CareerOutcome::ExceededTolerance {
                regular_periods: 15
            }
        );
    }

    #[test]
    fn tolerance_is_configurable() {
        let calendar = PeriodCalendar::default_calendar().unwrap();
        let records = trajectory("s1", 2, 0, 1);
        let index = build_progress(&records, &calendar).unwrap();
        let strict = GraduationPolicy {
            ideal_duration: 8,
            tolerance: 1,
            ..GraduationPolicy::default()
        };
        let outcome = classify(&index, &calendar, &strict).unwrap();
        assert!(outcome.graduates.is_empty());
        assert_eq!(outcome.anomalies.exceeded_tolerance, 1);
    }

    #[test]
    fn inverted_timeline_is_counted_not_raised() {
        let mut records = trajectory("s1", 2, 5, 1);
        records.retain(|r| r.semester != 1);
        records.push(record("s1", 2, 61, 1));
        let outcome = run(&records);
        assert!(outcome.graduates.is_empty());
        assert_eq!(outcome.anomalies.inverted_timelines, 1);
    }

    #[test]
    fn any_qualifying_career_graduates_and_first_wins() {
        let mut records = trajectory("s1", 7, 0, 1);
        records.extend(trajectory("s1", 3, 0, 1));
        records.extend(trajectory("s1", 1, 0, 2).into_iter().filter(|r| r.semester < 10));
        let outcome = run(&records);

        assert_eq!(outcome.graduates.len(), 1);
        let decision = &outcome.decisions[0];
        assert_eq!(decision.careers.len(), 3);
        assert_eq!(decision.qualifying_career, Some(3));
        assert_eq!(outcome.anomalies.careers_evaluated, 3);
        assert_eq!(outcome.anomalies.incomplete_careers, 1);
    }

    #[test]
    fn graduates_file_roundtrips_deduplicated_ids() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let path = tmp.path().join("graduados.txt");
        let graduates: BTreeSet<String> = ["b".to_string(), "a".to_string()].into();
        write_graduates(&path, &graduates).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nb\n");

        std::fs::write(&path, "a\n\n b \na\n").unwrap();
        let read = read_graduates(&path).unwrap();
        assert_eq!(read, graduates);
    }
}
