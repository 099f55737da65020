use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::graduation::{AnomalyCounts, GraduationPolicy};

/// Grade columns averaged into snapshot features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeColumn {
    P1,
    P2,
    P3,
    Final,
    E1,
    E2,
    Special,
}

/// Partial, ordinary, final, extraordinary and special grades.
/// `None` means the grade is missing (including negative raw scores).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grades {
    pub p1: Option<f64>,
    pub p2: Option<f64>,
    pub p3: Option<f64>,
    pub o: Option<f64>,
    pub pf: Option<f64>,
    pub e1: Option<f64>,
    pub e2: Option<f64>,
    pub esp: Option<f64>,
}

impl Grades {
    pub fn get(&self, column: GradeColumn) -> Option<f64> {
        match column {
            GradeColumn::P1 => self.p1,
            GradeColumn::P2 => self.p2,
            GradeColumn::P3 => self.p3,
            GradeColumn::Final => self.pf,
            GradeColumn::E1 => self.e1,
            GradeColumn::E2 => self.e2,
            GradeColumn::Special => self.esp,
        }
    }

    /// Normalize out-of-range scores to missing.
    pub fn cleaned(self) -> Self {
        let clean = |value: Option<f64>| value.filter(|v| v.is_finite() && *v >= 0.0);
        Self {
            p1: clean(self.p1),
            p2: clean(self.p2),
            p3: clean(self.p3),
            o: clean(self.o),
            pf: clean(self.pf),
            e1: clean(self.e1),
            e2: clean(self.e2),
            esp: clean(self.esp),
        }
    }
}

/// One subject grade row for a student in a given period.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeRecord {
    pub student_id: String,
    pub career_id: u32,
    pub period_id: u32,
    pub semester: u32,
    pub group_id: Option<i64>,
    pub subject_id: Option<i64>,
    pub grades: Grades,
}

/// Cumulative feature vector for one student up through one semester.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    #[serde(skip)]
    pub student_id: String,
    pub semestre_actual: u32,
    pub promedio_p1: f64,
    pub promedio_p2: f64,
    pub promedio_p3: f64,
    pub promedio_final: f64,
    pub promedio_e1: f64,
    pub promedio_e2: f64,
    pub promedio_esp: f64,
    pub semestres_recursados: u32,
    pub resultado_final: u8,
}

/// A snapshot without its label: the row a trained model scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub semestre_actual: u32,
    pub promedio_p1: f64,
    pub promedio_p2: f64,
    pub promedio_p3: f64,
    pub promedio_final: f64,
    pub promedio_e1: f64,
    pub promedio_e2: f64,
    pub promedio_esp: f64,
    pub semestres_recursados: u32,
}

/// Headline numbers for one analysis run, written as `summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub source: String,
    pub calendar_periods: usize,
    pub policy: GraduationPolicy,
    pub grade_records: usize,
    pub students: usize,
    pub graduates: usize,
    pub anomalies: AnomalyCounts,
    pub snapshots: usize,
}

#[derive(Debug, Clone)]
pub struct SemesterSummary {
    pub semester: u32,
    pub count: usize,
    pub avg_repeated: f64,
    pub graduate_share: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_grades_become_missing() {
        let grades = Grades {
            p1: Some(8.5),
            p2: Some(-1.0),
            e1: Some(0.0),
            esp: Some(f64::NAN),
            ..Grades::default()
        }
        .cleaned();

        assert_eq!(grades.p1, Some(8.5));
        assert_eq!(grades.p2, None);
        assert_eq!(grades.e1, Some(0.0));
        assert_eq!(grades.esp, None);
        assert_eq!(grades.get(GradeColumn::P3), None);
    }
}
