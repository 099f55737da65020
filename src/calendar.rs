use std::collections::HashMap;
use std::path::Path;

use crate::error::{Result, TimelineError};

/// Curated chronological ordering of the institution's enrollment periods.
/// Period ids are not chronological on their own, so this table is the
/// source of truth and must be extended when new periods show up.
const DEFAULT_PERIODS: &[(u32, &str)] = &[
    (35, "2017-2018A"),
    (36, "2017-2018B"),
    (40, "2017-2018V"),
    (39, "2018-2019A"),
    (42, "2018-2019B"),
    (43, "2018-2019V"),
    (41, "2019-2020A"),
    (46, "2019-2020B"),
    (47, "2019-2020V"),
    (44, "2020-2021A"),
    (49, "2020-2021B"),
    (50, "2020-2021V"),
    (48, "2021-2022A"),
    (53, "2021-2022B"),
    (54, "2021-2022V"),
    (51, "2022-2023A"),
    (52, "2022-2023B"),
    (56, "2022-2023V"),
    (55, "2023-2024A"),
    (58, "2023-2024B"),
    (59, "2023-2024V"),
    (57, "2024-2025A"),
    (61, "2024-2025B"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Period {
    pub period_id: u32,
    pub ordinal_index: usize,
    pub name: String,
    pub is_regular: bool,
}

/// Ordered catalog of enrollment periods.
///
/// Regular terms (`A`/`B`) count toward delay; intersession terms (`V`) do not.
#[derive(Debug, Clone)]
pub struct PeriodCalendar {
    periods: Vec<Period>,
    index: HashMap<u32, usize>,
    // regular_prefix[i] = regular periods among ordinals 0..i
    regular_prefix: Vec<usize>,
}

impl PeriodCalendar {
    pub fn new(entries: Vec<(u32, String)>) -> Result<Self> {
        if entries.is_empty() {
            return Err(TimelineError::InvalidCalendar(
                "calendar has no periods".to_string(),
            ));
        }

        let mut periods = Vec::with_capacity(entries.len());
        let mut index = HashMap::with_capacity(entries.len());
        let mut regular_prefix = Vec::with_capacity(entries.len() + 1);
        regular_prefix.push(0);

        for (ordinal_index, (period_id, name)) in entries.into_iter().enumerate() {
            let name = name.trim().to_string();
            let is_regular = match name.chars().last() {
                Some('A') | Some('B') => true,
                Some('V') => false,
                _ => {
                    return Err(TimelineError::InvalidCalendar(format!(
                        "period {period_id} name '{name}' must end in A, B or V"
                    )))
                }
            };

            if index.insert(period_id, ordinal_index).is_some() {
                return Err(TimelineError::InvalidCalendar(format!(
                    "duplicate period id {period_id}"
                )));
            }

            let previous = regular_prefix[ordinal_index];
            regular_prefix.push(previous + usize::from(is_regular));
            periods.push(Period {
                period_id,
                ordinal_index,
                name,
                is_regular,
            });
        }

        Ok(Self {
            periods,
            index,
            regular_prefix,
        })
    }

    pub fn default_calendar() -> Result<Self> {
        let entries = DEFAULT_PERIODS
            .iter()
            .map(|(id, name)| (*id, (*name).to_string()))
            .collect();
        Self::new(entries)
    }

    /// Load `period_id,name` rows in chronological file order.
    pub fn from_csv(path: &Path) -> Result<Self> {
        #[derive(serde::Deserialize)]
        struct CalendarRow {
            period_id: u32,
            name: String,
        }

        let mut reader = csv::Reader::from_path(path)?;
        let mut entries = Vec::new();
        for result in reader.deserialize::<CalendarRow>() {
            let row = result?;
            entries.push((row.period_id, row.name));
        }

        Self::new(entries)
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn periods(&self) -> &[Period] {
        &self.periods
    }

    pub fn period(&self, period_id: u32) -> Result<&Period> {
        self.index
            .get(&period_id)
            .map(|&ordinal| &self.periods[ordinal])
            .ok_or(TimelineError::UnknownPeriod(period_id))
    }

    pub fn ordinal(&self, period_id: u32) -> Result<usize> {
        self.period(period_id).map(|period| period.ordinal_index)
    }

    pub fn is_regular(&self, period_id: u32) -> Result<bool> {
        self.period(period_id).map(|period| period.is_regular)
    }

    /// Regular periods whose ordinal lies in `[ordinal(start), ordinal(end)]`.
    /// Returns 0 when `end` precedes `start`.
    pub fn count_regular_between(&self, start_id: u32, end_id: u32) -> Result<usize> {
        let start = self.ordinal(start_id)?;
        let end = self.ordinal(end_id)?;
        Ok(self.count_regular_in_range(start, end))
    }

    /// Same as [`count_regular_between`](Self::count_regular_between) over
    /// ordinal indices. Indices past the end of the calendar are clamped.
    pub fn count_regular_in_range(&self, start_idx: usize, end_idx: usize) -> usize {
        if end_idx < start_idx || start_idx >= self.periods.len() {
            return 0;
        }
        let end_idx = end_idx.min(self.periods.len() - 1);
        self.regular_prefix[end_idx + 1] - self.regular_prefix[start_idx]
    }
}
