//! Deduplicated string table.

use std::collections::HashMap;

/// A unique string and the offset names that point at it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringEntry {
    pub value: String,
    pub offset_names: Vec<String>,
}

/// Pool of strings waiting to be written after the data body.
///
/// Entries keep first-insertion order; identical values share one entry.
#[derive(Debug, Default)]
pub struct StringTable {
    entries: Vec<StringEntry>,
    index: HashMap<String, usize>,
}

impl StringTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `offset_name` references `value`.
    pub fn add(&mut self, offset_name: impl Into<String>, value: &str) {
        let offset_name = offset_name.into();
        if let Some(&i) = self.index.get(value) {
            self.entries[i].offset_names.push(offset_name);
            return;
        }
        self.index.insert(value.to_owned(), self.entries.len());
        self.entries.push(StringEntry {
            value: value.to_owned(),
            offset_names: vec![offset_name],
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &StringEntry> {
        self.entries.iter()
    }

    /// Remove and return every entry in insertion order.
    pub fn take(&mut self) -> Vec<StringEntry> {
        self.index.clear();
        std::mem::take(&mut self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_values_share_entry() {
        let mut table = StringTable::new();
        table.add("off1", "Sonic");
        table.add("off2", "Tails");
        table.add("off3", "Sonic");

        assert_eq!(table.len(), 2);
        let entries: Vec<_> = table.entries().collect();
        assert_eq!(entries[0].value, "Sonic");
        assert_eq!(entries[0].offset_names, ["off1", "off3"]);
        assert_eq!(entries[1].value, "Tails");
        assert_eq!(entries[1].offset_names, ["off2"]);
    }

    #[test]
    fn test_take_empties_table() {
        let mut table = StringTable::new();
        table.add("a", "x");
        let taken = table.take();
        assert_eq!(taken.len(), 1);
        assert!(table.is_empty());

        table.add("b", "x");
        assert_eq!(table.len(), 1);
        assert_eq!(table.entries().next().unwrap().offset_names, ["b"]);
    }
}
