use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use super::error::RecordSourceError;
use super::types::{Group, GroupKey, LookbackWindow, Mechanism, MonthlyRecord};

/// Supplier of historical monthly records. Implementations may return the
/// records in any order; the engine sorts them.
pub trait RecordSource {
    fn fetch_records(
        &self,
        group: &GroupKey,
        mechanism: Mechanism,
        lookback: LookbackWindow,
        only_with_allocation: bool,
    ) -> Result<Vec<MonthlyRecord>, RecordSourceError>;
}

/// One record line of a history file, tagged with its mechanism.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaggedRecord {
    pub mechanism: Mechanism,
    #[serde(flatten)]
    pub record: MonthlyRecord,
}

/// On-disk / over-the-wire history of a single group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryFile {
    pub group: Group,
    #[serde(default)]
    pub records: Vec<TaggedRecord>,
}

impl HistoryFile {
    pub fn load(path: &Path) -> Result<Self, RecordSourceError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryRecordSource {
    records: HashMap<(GroupKey, Mechanism), Vec<MonthlyRecord>>,
}

impl InMemoryRecordSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, group: GroupKey, mechanism: Mechanism, record: MonthlyRecord) {
        self.records
            .entry((group, mechanism))
            .or_default()
            .push(record);
    }

    pub fn from_history(history: &HistoryFile) -> Self {
        let mut source = Self::new();
        let key = history.group.key();
        for tagged in &history.records {
            source.insert(key.clone(), tagged.mechanism, tagged.record.clone());
        }
        source
    }

    pub fn contains_group(&self, group: &GroupKey) -> bool {
        self.records.keys().any(|(g, _)| g == group)
    }

    /// Every stored record of `group` for `mechanism`, unfiltered.
    pub fn all_records(&self, group: &GroupKey, mechanism: Mechanism) -> &[MonthlyRecord] {
        self.records
            .get(&(group.clone(), mechanism))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl RecordSource for InMemoryRecordSource {
    /// The window is the `lookback` calendar months ending at the newest
    /// stored month. Results are newest first.
    fn fetch_records(
        &self,
        group: &GroupKey,
        mechanism: Mechanism,
        lookback: LookbackWindow,
        only_with_allocation: bool,
    ) -> Result<Vec<MonthlyRecord>, RecordSourceError> {
        if !self.contains_group(group) {
            return Err(RecordSourceError::UnknownGroup(group.clone()));
        }

        let all = self.all_records(group, mechanism);
        let Some(newest) = all.iter().map(|r| r.date).max() else {
            return Ok(Vec::new());
        };
        let newest_index = month_index(newest);
        let oldest_index = newest_index - lookback.months() as i64 + 1;

        let mut window: Vec<MonthlyRecord> = all
            .iter()
            .filter(|r| month_index(r.date) >= oldest_index)
            .filter(|r| !only_with_allocation || r.allocated > 0)
            .cloned()
            .collect();
        window.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(window)
    }
}

fn month_index(date: NaiveDate) -> i64 {
    date.year() as i64 * 12 + date.month0() as i64
}
