//! Table cache and the entry point for rolling and resolving

use crate::diagnostic::{DiagnosticSink, TracingSink};
use crate::error::{Error, Result};
use crate::expression::{ReplacementTemplate, Value};
use crate::loader::load_table;
use crate::resolver::{self, RowSource};
use crate::table::{Row, Table};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Loads tables lazily, caches them by canonical path, and rolls on them.
///
/// Every manager owns its own cache and random source. Tables are never
/// evicted or reloaded.
pub struct TableManager {
    tables: HashMap<PathBuf, Table>,
    rng: StdRng,
    sink: Box<dyn DiagnosticSink>,
}

impl Default for TableManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TableManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableManager")
            .field("tables", &self.tables.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl TableManager {
    /// Manager seeded from the OS, reporting diagnostics through `tracing`
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
            rng: StdRng::from_os_rng(),
            sink: Box::new(TracingSink),
        }
    }

    pub fn with_sink(mut self, sink: impl DiagnosticSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Use a deterministic random source
    pub fn with_seed(self, seed: u64) -> Self {
        self.with_rng(StdRng::seed_from_u64(seed))
    }

    pub fn sink(&self) -> &dyn DiagnosticSink {
        self.sink.as_ref()
    }

    /// Get the table at `path`, loading it on first access.
    pub fn get_table<P: AsRef<Path>>(&mut self, path: P) -> Result<&Table> {
        cached(&mut self.tables, self.sink.as_ref(), path.as_ref())
    }

    /// Roll a row from the table at `path`. Templates are left unresolved.
    pub fn roll<P: AsRef<Path>>(&mut self, path: P) -> Result<Row> {
        let table = cached(&mut self.tables, self.sink.as_ref(), path.as_ref())?;
        table.roll(&mut self.rng, self.sink.as_ref())
    }

    /// Return the row an externally supplied `roll` selects.
    pub fn roll_with<P: AsRef<Path>>(&mut self, path: P, roll: i64) -> Result<Row> {
        let table = cached(&mut self.tables, self.sink.as_ref(), path.as_ref())?;
        table.row_for_roll(roll, self.sink.as_ref())
    }

    /// Resolve a template against this manager's tables.
    pub fn resolve(&mut self, template: &ReplacementTemplate, depth_limit: usize) -> Result<String> {
        resolver::resolve(template, self, depth_limit)
    }

    pub fn resolve_value(&mut self, value: &Value, depth_limit: usize) -> Result<String> {
        resolver::resolve_value(value, self, depth_limit)
    }

    /// Roll a row and resolve every field.
    pub fn roll_resolve<P: AsRef<Path>>(&mut self, path: P, depth_limit: usize) -> Result<Row<String>> {
        let row = self.roll(path)?;
        resolver::resolve_row(&row, self, depth_limit)
    }

    pub fn is_loaded<P: AsRef<Path>>(&self, path: P) -> bool {
        path.as_ref()
            .canonicalize()
            .is_ok_and(|p| self.tables.contains_key(&p))
    }

    pub fn loaded_count(&self) -> usize {
        self.tables.len()
    }
}

impl RowSource for TableManager {
    fn roll_row(&mut self, path: &Path) -> Result<Row> {
        self.roll(path)
    }

    fn rng(&mut self) -> &mut dyn RngCore {
        &mut self.rng
    }

    fn sink(&self) -> &dyn DiagnosticSink {
        self.sink.as_ref()
    }
}

fn cached<'a>(
    tables: &'a mut HashMap<PathBuf, Table>,
    sink: &dyn DiagnosticSink,
    path: &Path,
) -> Result<&'a Table> {
    let canonical = path.canonicalize().map_err(|source| Error::FileRead {
        path: path.to_path_buf(),
        source,
    })?;

    match tables.entry(canonical) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(entry) => {
            let table = load_table(entry.key(), sink)?;
            tracing::debug!(
                path = %table.path().display(),
                rows = table.row_count(),
                weighted = table.is_weighted(),
                "loaded table"
            );
            Ok(entry.insert(table))
        }
    }
}
