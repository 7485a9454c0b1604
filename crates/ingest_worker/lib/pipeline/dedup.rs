use std::collections::HashSet;

use crate::sources::RawReviewRecord;

/// Within-batch duplicate handling. Nothing is remembered across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DedupStrategy {
    #[default]
    None,
    /// Keep the first record for each value of this field. Records without the field are kept.
    NaturalKey(String),
}

impl DedupStrategy {
    pub fn from_key(key: Option<&str>) -> Self {
        match key.map(str::trim) {
            Some(key) if !key.is_empty() => Self::NaturalKey(key.to_string()),
            _ => Self::None,
        }
    }

    /// Returns the surviving records in their original order and how many were dropped.
    pub fn apply(&self, records: Vec<RawReviewRecord>) -> (Vec<RawReviewRecord>, usize) {
        let Self::NaturalKey(field) = self else {
            return (records, 0);
        };

        let before = records.len();
        let mut seen = HashSet::new();
        let kept: Vec<RawReviewRecord> = records
            .into_iter()
            .filter(|record| match record.get(field) {
                Some(value) if !value.is_null() => seen.insert(value.to_string()),
                _ => true,
            })
            .collect();
        let dropped = before - kept.len();
        (kept, dropped)
    }
}
