//! Transcript loading from grade exports.
//!
//! Two layouts are accepted:
//! - the export tree `Periodo_<p>/Carrera_<c>/periodo<p>carrera<c>semestre<s>.csv`,
//!   where period, career and semester come from the file name;
//! - a single flat CSV carrying `student_id,career_id,period_id,semester` per row.
//!
//! Negative scores are normalized to missing here; nothing downstream sees them.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{Result, TimelineError};
use crate::models::{GradeRecord, Grades};

/// Period, career and semester encoded in an export file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportKey {
    pub period_id: u32,
    pub career_id: u32,
    pub semester: u32,
}

fn export_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^periodo(\d+)carrera(\d+)semestre(\d+)\.csv$").expect("regex is valid")
    })
}

pub fn parse_export_name(file_name: &str) -> Option<ExportKey> {
    let captures = export_pattern().captures(file_name)?;
    Some(ExportKey {
        period_id: captures[1].parse().ok()?,
        career_id: captures[2].parse().ok()?,
        semester: captures[3].parse().ok()?,
    })
}

#[derive(Deserialize)]
struct ExportRow {
    matricula_hash: String,
    #[serde(default)]
    id_grupo: Option<i64>,
    #[serde(default)]
    id_materia: Option<i64>,
    #[serde(default)]
    p1: Option<f64>,
    #[serde(default)]
    p2: Option<f64>,
    #[serde(default)]
    p3: Option<f64>,
    #[serde(default)]
    o: Option<f64>,
    #[serde(default)]
    pf: Option<f64>,
    #[serde(default)]
    e1: Option<f64>,
    #[serde(default)]
    e2: Option<f64>,
    #[serde(default)]
    esp: Option<f64>,
}

// Grade columns are listed per row type: csv cannot fill optional fields
// through `#[serde(flatten)]`.
#[derive(Deserialize)]
struct FlatRow {
    student_id: String,
    career_id: u32,
    period_id: u32,
    semester: u32,
    #[serde(default)]
    group_id: Option<i64>,
    #[serde(default)]
    subject_id: Option<i64>,
    #[serde(default)]
    p1: Option<f64>,
    #[serde(default)]
    p2: Option<f64>,
    #[serde(default)]
    p3: Option<f64>,
    #[serde(default)]
    o: Option<f64>,
    #[serde(default)]
    pf: Option<f64>,
    #[serde(default)]
    e1: Option<f64>,
    #[serde(default)]
    e2: Option<f64>,
    #[serde(default)]
    esp: Option<f64>,
}

macro_rules! row_grades {
    ($row:expr) => {
        Grades {
            p1: $row.p1,
            p2: $row.p2,
            p3: $row.p3,
            o: $row.o,
            pf: $row.pf,
            e1: $row.e1,
            e2: $row.e2,
            esp: $row.esp,
        }
        .cleaned()
    };
}

/// Load transcripts from either an export directory or a flat CSV file.
pub fn load_transcripts(path: &Path) -> Result<Vec<GradeRecord>> {
    let records = if path.is_dir() {
        load_export_tree(path)?
    } else {
        load_flat_csv(path)?
    };
    info!(
        "Loaded {} grade records from {}",
        records.len(),
        path.display()
    );
    Ok(records)
}

/// All export CSVs under `root`, sorted by path.
pub fn find_export_files(root: &Path) -> Vec<(PathBuf, ExportKey)> {
    let mut files: Vec<(PathBuf, ExportKey)> = walkdir::WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            match parse_export_name(&name) {
                Some(key) => Some((entry.into_path(), key)),
                None => {
                    debug!("Skipping {}: not a grade export", entry.path().display());
                    None
                }
            }
        })
        .collect();

    files.sort_by(|a, b| a.0.cmp(&b.0));
    files
}

pub fn load_export_tree(root: &Path) -> Result<Vec<GradeRecord>> {
    let mut records = Vec::new();

    for (path, key) in find_export_files(root) {
        let mut reader = csv::Reader::from_path(&path)?;
        let has_student_column = reader
            .headers()?
            .iter()
            .any(|header| header == "matricula_hash");
        if !has_student_column {
            warn!(
                "{} has no matricula_hash column; skipping",
                path.display()
            );
            continue;
        }

        let before = records.len();
        for result in reader.deserialize::<ExportRow>() {
            let row = result?;
            records.push(GradeRecord {
                student_id: row.matricula_hash,
                career_id: key.career_id,
                period_id: key.period_id,
                semester: key.semester,
                group_id: row.id_grupo,
                subject_id: row.id_materia,
                grades: row_grades!(row),
            });
        }
        debug!(
            "Read {} rows from {}",
            records.len() - before,
            path.display()
        );
    }

    Ok(records)
}

pub fn load_flat_csv(path: &Path) -> Result<Vec<GradeRecord>> {
    if !path.exists() {
        return Err(TimelineError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "transcript not found"),
        });
    }

    let mut reader = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for result in reader.deserialize::<FlatRow>() {
        let row = result?;
        records.push(GradeRecord {
            student_id: row.student_id,
            career_id: row.career_id,
            period_id: row.period_id,
            semester: row.semester,
            group_id: row.group_id,
            subject_id: row.subject_id,
            grades: row_grades!(row),
        });
    }
    Ok(records)
}
