use std::collections::BTreeMap;

use crate::calendar::PeriodCalendar;
use crate::error::Result;
use crate::models::GradeRecord;

/// `(student_id, career_id)` key used to group a student's progress.
pub type CareerKey = (String, u32);

/// Semester level → period in which the student first reached it.
pub type ProgressRecord = BTreeMap<u32, u32>;

/// Progress records for every (student, career) pair in a run.
pub type ProgressIndex = BTreeMap<CareerKey, ProgressRecord>;

/// Reduce grade rows to the earliest (by calendar ordinal) period each
/// semester level was reached. Record order does not matter.
pub fn build_progress(records: &[GradeRecord], calendar: &PeriodCalendar) -> Result<ProgressIndex> {
    let mut index = ProgressIndex::new();

    for record in records {
        let ordinal = calendar.ordinal(record.period_id)?;
        let progress = index
            .entry((record.student_id.clone(), record.career_id))
            .or_default();

        let earlier = match progress.get(&record.semester) {
            Some(&current) => ordinal < calendar.ordinal(current)?,
            None => true,
        };
        if earlier {
            progress.insert(record.semester, record.period_id);
        }
    }

    Ok(index)
}
