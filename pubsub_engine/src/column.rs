//! Per-table column registry.
//!
//! Columns are implicit: they come into existence the first time a statement
//! names them. Ordinals are dense, assigned in first-seen order, and stable
//! for the table's lifetime.

use std::collections::HashMap;

/// How a column is indexed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKind {
    /// No index; filters on this column scan.
    None,
    /// Unique value -> row id index.
    Key,
    /// Value -> row id set multimap, no uniqueness.
    Tag,
}

/// A single column.
#[derive(Clone, Debug)]
pub struct Column {
    pub name: String,
    pub ordinal: usize,
    pub index: IndexKind,
}

/// Ordered column registry with a name lookup map.
///
/// Invariant: `columns[i].ordinal == i` for every i.
#[derive(Debug, Default)]
pub struct Columns {
    columns: Vec<Column>,
    by_name: HashMap<String, usize>,
}

impl Columns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Returns the ordinal of a column, if it exists.
    pub fn ordinal_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Returns the column ordinal, creating the column on first use.
    pub fn get_or_add(&mut self, name: &str) -> usize {
        if let Some(ordinal) = self.ordinal_of(name) {
            return ordinal;
        }
        let ordinal = self.columns.len();
        self.columns.push(Column {
            name: name.to_string(),
            ordinal,
            index: IndexKind::None,
        });
        self.by_name.insert(name.to_string(), ordinal);
        ordinal
    }

    /// Returns the column at `ordinal`.
    pub fn get(&self, ordinal: usize) -> Option<&Column> {
        self.columns.get(ordinal)
    }

    /// Returns how the column at `ordinal` is indexed.
    pub fn index_kind(&self, ordinal: usize) -> IndexKind {
        self.columns
            .get(ordinal)
            .map_or(IndexKind::None, |c| c.index)
    }

    /// Marks the column at `ordinal` as KEY- or TAG-indexed.
    pub fn set_index(&mut self, ordinal: usize, kind: IndexKind) {
        if let Some(column) = self.columns.get_mut(ordinal) {
            column.index = kind;
        }
    }

    /// Iterates columns in ordinal order.
    pub fn iter(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter()
    }

    /// Snapshot of column names in ordinal order.
    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}
