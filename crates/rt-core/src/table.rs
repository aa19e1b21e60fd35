//! Core table types for representing roll tables

use crate::arith::DiceArith;
use crate::diagnostic::{Diagnostic, DiagnosticSink};
use crate::directive::Namespace;
use crate::error::{Error, Result};
use crate::expression::Value;
use rand::Rng;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Zero-based row index, injected into every row
pub const INDEX_FIELD: &str = "__index__";
/// 1-based source line of the row, injected into every row
pub const LINE_FIELD: &str = "__line__";
/// Field names reserved by the loader
pub const MAGIC_FIELDS: [&str; 2] = [INDEX_FIELD, LINE_FIELD];

pub fn is_magic_field(name: &str) -> bool {
    MAGIC_FIELDS.contains(&name)
}

/// A row of data: field values in the table's declared field order
#[derive(Debug, Clone, PartialEq)]
pub struct Row<V = Value> {
    cells: Vec<(String, V)>,
}

impl<V> Row<V> {
    /// Create a row from `(field, value)` pairs
    pub fn new(cells: Vec<(String, V)>) -> Self {
        Self { cells }
    }

    /// Get a value by field name
    pub fn get(&self, field: &str) -> Option<&V> {
        self.cells
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// First field in declared order
    pub fn first(&self) -> Option<(&str, &V)> {
        self.cells.first().map(|(name, value)| (name.as_str(), value))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.cells.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Convert every value, stopping at the first error
    pub fn try_map<U, E>(&self, mut f: impl FnMut(&str, &V) -> std::result::Result<U, E>) -> std::result::Result<Row<U>, E> {
        let cells = self
            .cells
            .iter()
            .map(|(name, value)| Ok((name.clone(), f(name, value)?)))
            .collect::<std::result::Result<Vec<_>, E>>()?;
        Ok(Row { cells })
    }
}

impl<V: Serialize> Serialize for Row<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (name, value) in &self.cells {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Outcome of looking a drawn integer up in a [`RollRange`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeLookup {
    /// The integer is registered to this row
    Hit(usize),
    /// Below the lowest key; clamped to its row
    BelowMin { min: i64, index: usize },
    /// Above the highest key; clamped to its row
    AboveMax { max: i64, index: usize },
    /// Inside the span but never registered
    Gap,
}

impl RangeLookup {
    /// Row index this outcome selects. A gap selects the first row.
    pub fn index(self) -> usize {
        match self {
            RangeLookup::Hit(index)
            | RangeLookup::BelowMin { index, .. }
            | RangeLookup::AboveMax { index, .. } => index,
            RangeLookup::Gap => 0,
        }
    }
}

/// Weighted roll state: the dice expression from the first header cell and
/// the integer-to-row map built from that column
#[derive(Debug, Clone, PartialEq)]
pub struct RollRange {
    expr: DiceArith,
    map: BTreeMap<i64, usize>,
}

impl RollRange {
    pub fn new(expr: DiceArith) -> Self {
        Self {
            expr,
            map: BTreeMap::new(),
        }
    }

    pub fn expr(&self) -> &DiceArith {
        &self.expr
    }

    /// Register `roll` to row `index`. Returns false if the integer is
    /// already taken; the earlier mapping is kept.
    pub fn insert(&mut self, roll: i64, index: usize) -> bool {
        if self.map.contains_key(&roll) {
            return false;
        }
        self.map.insert(roll, index);
        true
    }

    pub fn min(&self) -> Option<i64> {
        self.map.keys().next().copied()
    }

    pub fn max(&self) -> Option<i64> {
        self.map.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn lookup(&self, roll: i64) -> RangeLookup {
        if let Some(&index) = self.map.get(&roll) {
            return RangeLookup::Hit(index);
        }
        if let Some((&min, &index)) = self.map.first_key_value() {
            if roll < min {
                return RangeLookup::BelowMin { min, index };
            }
        }
        if let Some((&max, &index)) = self.map.last_key_value() {
            if roll > max {
                return RangeLookup::AboveMax { max, index };
            }
        }
        RangeLookup::Gap
    }
}

/// A loaded roll table
#[derive(Debug, Clone)]
pub struct Table {
    path: PathBuf,
    field_names: Vec<String>,
    rows: Vec<Row>,
    roll_range: Option<RollRange>,
    namespace: Namespace,
}

impl Table {
    pub(crate) fn new(
        path: PathBuf,
        field_names: Vec<String>,
        rows: Vec<Row>,
        roll_range: Option<RollRange>,
        namespace: Namespace,
    ) -> Self {
        Self {
            path,
            field_names,
            rows,
            roll_range,
            namespace,
        }
    }

    /// Canonical path of the source file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory the table's includes are relative to
    pub fn directory(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Every field name, magic fields last
    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }

    /// Field names without the magic fields
    pub fn user_fields(&self) -> Vec<&str> {
        self.field_names
            .iter()
            .map(String::as_str)
            .filter(|name| !is_magic_field(name))
            .collect()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn roll_range(&self) -> Option<&RollRange> {
        self.roll_range.as_ref()
    }

    pub fn is_weighted(&self) -> bool {
        self.roll_range.is_some()
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Map a drawn integer to a row index. Never fails; clamps and gaps are
    /// reported to `sink`. Uniform tables have no mapping and return `None`.
    pub fn lookup_roll(&self, roll: i64, sink: &dyn DiagnosticSink) -> Option<usize> {
        let range = self.roll_range.as_ref()?;
        let lookup = range.lookup(roll);
        let note = match lookup {
            RangeLookup::Hit(_) => None,
            RangeLookup::BelowMin { min, .. } => {
                Some(format!("roll {roll} is below the lowest range value {min}; using its row"))
            }
            RangeLookup::AboveMax { max, .. } => {
                Some(format!("roll {roll} is above the highest range value {max}; using its row"))
            }
            RangeLookup::Gap => Some(format!("roll {roll} falls in a gap in the roll ranges; using row 0")),
        };
        if let Some(message) = note {
            sink.emit(Diagnostic::warning(message).in_file(&self.path));
        }
        Some(lookup.index())
    }

    /// Pick a row according to the table's roll policy and return a copy.
    pub fn roll<R: Rng + ?Sized>(&self, rng: &mut R, sink: &dyn DiagnosticSink) -> Result<Row> {
        if self.rows.is_empty() {
            return Err(Error::EmptyTable(self.path.clone()));
        }

        let index = match &self.roll_range {
            Some(range) => match range.expr().evaluate(rng) {
                Ok(roll) => self.lookup_roll(roll.truncate(), sink),
                Err(e) => {
                    sink.emit(
                        Diagnostic::warning(format!("{e}; choosing a row uniformly")).in_file(&self.path),
                    );
                    None
                }
            },
            None => None,
        };
        let index = index.unwrap_or_else(|| rng.random_range(0..self.rows.len()));

        Ok(self.rows[index].clone())
    }

    /// Return a copy of the row a given roll selects. Uniform tables pick
    /// the row at `roll` modulo the row count.
    pub fn row_for_roll(&self, roll: i64, sink: &dyn DiagnosticSink) -> Result<Row> {
        if self.rows.is_empty() {
            return Err(Error::EmptyTable(self.path.clone()));
        }
        let index = self
            .lookup_roll(roll, sink)
            .unwrap_or_else(|| roll.rem_euclid(self.rows.len() as i64) as usize);
        Ok(self.rows[index].clone())
    }

    /// Fail with [`Error::InvalidField`] if any of `fields` is not declared.
    pub fn check_fields<S: AsRef<str>>(&self, fields: &[S]) -> Result<()> {
        let mut missing: Vec<String> = fields
            .iter()
            .map(AsRef::as_ref)
            .filter(|field| !self.field_names.iter().any(|name| name == field))
            .map(str::to_string)
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        missing.sort();
        missing.dedup();
        Err(Error::InvalidField {
            path: self.path.clone(),
            fields: missing,
        })
    }

    /// Raw rows as a pretty-printed JSON array. Templates are written back
    /// as their source text.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.rows)?)
    }
}
