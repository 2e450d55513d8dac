use crate::directive::{Directive, DirectiveId};

/// In-memory copy of the `directives` table
///
/// Only ever replaced as a whole by a fresh fetch; there is no local patching.
/// Records are kept in `created_at` ascending order.
#[derive(Debug, Clone, Default)]
pub struct DirectiveStore {
    records: Vec<Directive>,
}

impl DirectiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole record set with a freshly fetched one
    pub fn replace_all(&mut self, mut records: Vec<Directive>) {
        // stable: rows with equal timestamps keep the backend's order
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        self.records = records;
    }

    pub fn records(&self) -> &[Directive] {
        &self.records
    }

    pub fn get(&self, id: &DirectiveId) -> Option<&Directive> {
        self.records.iter().find(|record| &record.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(id: &str, hour: u32) -> Directive {
        Directive {
            id: DirectiveId::new(id),
            serial_no: None,
            task: String::new(),
            dept: String::new(),
            progress: None,
            status: None,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap(),
        }
    }

    #[test]
    fn keeps_created_at_order() {
        let mut store = DirectiveStore::new();
        store.replace_all(vec![at("b", 5), at("a", 1), at("c", 9)]);
        let ids: Vec<_> = store.records().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn replace_discards_previous_rows() {
        let mut store = DirectiveStore::new();
        store.replace_all(vec![at("a", 1), at("b", 2)]);
        store.replace_all(vec![at("c", 3)]);
        assert_eq!(store.len(), 1);
        assert!(store.get(&DirectiveId::new("a")).is_none());
        assert!(store.get(&DirectiveId::new("c")).is_some());
        store.clear();
        assert!(store.is_empty());
    }
}
