use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use tracing::info;

use crate::calendar::PeriodCalendar;
use crate::error::{Result, TimelineError};
use crate::models::{GradeColumn, GradeRecord, Snapshot};

/// Mean of the non-missing values; 0 when every value is missing so the
/// feature vector stays dense.
pub fn mean_or_zero<'a>(
    records: impl IntoIterator<Item = &'a GradeRecord>,
    column: GradeColumn,
) -> f64 {
    let (sum, count) = records
        .into_iter()
        .filter_map(|record| record.grades.get(column))
        .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Repeated semesters at `semester`: regular periods actually used beyond
/// one per semester, in whole academic years (two regular terms).
pub fn repeated_semesters(
    calendar: &PeriodCalendar,
    start_idx: usize,
    current_idx: usize,
    semester: u32,
) -> u32 {
    let actual = calendar.count_regular_in_range(start_idx, current_idx);
    let excess = actual.saturating_sub(semester as usize);
    (excess / 2) as u32
}

/// Build one cumulative snapshot per (student, semester reached).
///
/// Students come out in ascending id order and semesters ascending, so the
/// table is identical across runs over the same records.
pub fn build_snapshots(
    records: &[GradeRecord],
    graduates: &BTreeSet<String>,
    calendar: &PeriodCalendar,
) -> Result<Vec<Snapshot>> {
    let mut by_student: BTreeMap<&str, Vec<&GradeRecord>> = BTreeMap::new();
    for record in records {
        by_student
            .entry(record.student_id.as_str())
            .or_default()
            .push(record);
    }

    let mut snapshots = Vec::new();
    for (student_id, mut transcript) in by_student {
        transcript.sort_by_key(|record| record.semester);
        let resultado_final = u8::from(graduates.contains(student_id));

        let mut ordinals = Vec::with_capacity(transcript.len());
        for record in &transcript {
            ordinals.push(calendar.ordinal(record.period_id)?);
        }
        let start_idx = match ordinals.iter().min() {
            Some(&idx) => idx,
            None => continue,
        };

        let semesters: BTreeSet<u32> = transcript.iter().map(|record| record.semester).collect();
        for semester in semesters {
            // transcript is sorted by semester, so the cumulative set is a prefix.
            let cutoff = transcript.partition_point(|record| record.semester <= semester);
            let cumulative = &transcript[..cutoff];
            let current_idx = ordinals[..cutoff].iter().copied().max().unwrap_or(start_idx);
            let mean = |column| mean_or_zero(cumulative.iter().copied(), column);

            snapshots.push(Snapshot {
                student_id: student_id.to_string(),
                semestre_actual: semester,
                promedio_p1: mean(GradeColumn::P1),
                promedio_p2: mean(GradeColumn::P2),
                promedio_p3: mean(GradeColumn::P3),
                promedio_final: mean(GradeColumn::Final),
                promedio_e1: mean(GradeColumn::E1),
                promedio_e2: mean(GradeColumn::E2),
                promedio_esp: mean(GradeColumn::Special),
                semestres_recursados: repeated_semesters(calendar, start_idx, current_idx, semester),
                resultado_final,
            });
        }
    }

    info!("Built {} snapshots", snapshots.len());
    Ok(snapshots)
}

pub fn write_snapshots(path: &Path, snapshots: &[Snapshot]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for snapshot in snapshots {
        writer.serialize(snapshot)?;
    }
    writer.flush().map_err(|source| TimelineError::Io {
        path: path.to_path_buf(),
        source,
    })
}
