use std::sync::LazyLock;

use csv::StringRecord;
use regex::Regex;

/// Names the date column goes by, compared case-insensitively
const DATE_COLUMNS: [&str; 4] = ["date/time", "date/time (lst)", "date", "local date"];

/// Matches `Max Temp (°C)`, `Max Temp (Â°C)`, `Min Temp (C)`, `Mean Temp`, `Max` ...
/// but not the companion `Max Temp Flag` columns.
static TEMPERATURE_COLUMN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(max|min|mean)(?:\s+temp(?:erature)?)?(?:\s*\([^)]*\))?$")
        .expect("temperature column pattern is valid")
});

/// Column positions discovered from the feed's header row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMap {
    pub date: usize,
    pub max: Option<usize>,
    pub min: Option<usize>,
    pub mean: Option<usize>,
    /// Number of fields in the header; data rows must match it
    pub width: usize,
}

/// Outcome of inspecting one row as a possible header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderCandidate {
    Header(ColumnMap),
    /// Temperature columns were found but no date column
    MissingDate,
    NotHeader,
}

impl ColumnMap {
    /// Inspect a row and build the column map if it is the header.
    ///
    /// When a column name appears twice the first occurrence wins.
    pub fn detect(record: &StringRecord) -> HeaderCandidate {
        let mut date = None;
        let mut max = None;
        let mut min = None;
        let mut mean = None;

        for (index, raw) in record.iter().enumerate() {
            let name = normalize_name(raw);
            if name.is_empty() {
                continue;
            }

            let lowered = name.to_lowercase();
            if DATE_COLUMNS.contains(&lowered.as_str()) {
                date.get_or_insert(index);
                continue;
            }

            if let Some(captures) = TEMPERATURE_COLUMN.captures(&name) {
                let slot = match captures[1].to_lowercase().as_str() {
                    "max" => &mut max,
                    "min" => &mut min,
                    _ => &mut mean,
                };
                slot.get_or_insert(index);
            }
        }

        match date {
            Some(date) => HeaderCandidate::Header(ColumnMap {
                date,
                max,
                min,
                mean,
                width: record.len(),
            }),
            None if max.is_some() || min.is_some() || mean.is_some() => {
                HeaderCandidate::MissingDate
            }
            None => HeaderCandidate::NotHeader,
        }
    }

    pub fn has_temperature_columns(&self) -> bool {
        self.max.is_some() || self.min.is_some() || self.mean.is_some()
    }
}

fn normalize_name(raw: &str) -> &str {
    raw.trim_start_matches('\u{feff}').trim().trim_matches('"').trim()
}
