//! Set of record identities already written to the sink.

use crate::record::{Record, RecordKey};
use std::collections::HashSet;

/// Exact, unbounded dedup set.
///
/// Seeded once from the persisted table and then kept in step with every
/// accepted insert. Nothing is ever evicted: dedup is total over history.
#[derive(Debug, Default)]
pub struct DedupStore {
    seen: HashSet<RecordKey>,
}

impl DedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every stored data row. Rows with fewer than three cells are skipped.
    /// Returns how many distinct keys were added.
    pub fn seed<'a, I>(&mut self, rows: I) -> usize
    where
        I: IntoIterator<Item = &'a Vec<String>>,
    {
        let before = self.seen.len();
        self.seen.extend(
            rows.into_iter()
                .filter_map(|row| Record::from_row(row))
                .map(RecordKey::from),
        );
        self.seen.len() - before
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.seen.contains(key)
    }

    /// Returns `true` if the key was not present before.
    pub fn record(&mut self, key: RecordKey) -> bool {
        self.seen.insert(key)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|cell| cell.to_string()).collect()
    }

    #[test]
    fn test_seed_skips_short_rows_and_duplicates() {
        let rows = vec![
            row(&["d", "t", "p"]),
            row(&["d", "t"]),
            row(&["d", "t", "p"]),
            row(&["d", "t", "q", "extra"]),
        ];
        let mut store = DedupStore::new();
        assert_eq!(store.seed(&rows), 2);
        assert!(store.contains(&Record::new("d", "t", "p").key()));
        assert!(store.contains(&Record::new("d", "t", "q").key()));
        assert!(!store.contains(&Record::new("d", "t", "").key()));
    }

    #[test]
    fn test_record_reports_first_insert_only() {
        let mut store = DedupStore::new();
        let key = Record::new("2024-01-01", "12:00:00", "Temp=20C").key();
        assert!(!store.contains(&key));
        assert!(store.record(key.clone()));
        assert!(!store.record(key.clone()));
        assert!(store.contains(&key));
        assert_eq!(store.len(), 1);
    }

    fn triple() -> impl Strategy<Value = (String, String, String)> {
        ("[ab|]{0,3}", "[ab|]{0,3}", "[ab|]{0,3}")
    }

    proptest! {
        #[test]
        fn keys_collide_only_for_identical_triples(a in triple(), b in triple()) {
            let mut store = DedupStore::new();
            let r1 = Record::new(a.0.as_str(), a.1.as_str(), a.2.as_str());
            let r2 = Record::new(b.0.as_str(), b.1.as_str(), b.2.as_str());
            store.record(r1.key());
            prop_assert_eq!(store.contains(&r2.key()), a == b);
        }
    }
}
