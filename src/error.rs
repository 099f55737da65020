use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort an analysis run.
///
/// Per-student data problems (missing semesters, inverted timelines) are not
/// errors; they are counted by the graduation classifier instead.
#[derive(Error, Debug)]
pub enum TimelineError {
    /// A record references a period id the calendar does not know about.
    /// The calendar needs to be extended before the run can continue.
    #[error("Unknown period id {0}: extend the period calendar")]
    UnknownPeriod(u32),

    /// The calendar configuration is malformed.
    #[error("Invalid period calendar: {0}")]
    InvalidCalendar(String),

    /// Risk band thresholds are out of range or out of order.
    #[error("Invalid risk thresholds: {0}")]
    InvalidThresholds(String),

    /// A file could not be opened or read from disk.
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A CSV document could not be parsed or written.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, TimelineError>;
