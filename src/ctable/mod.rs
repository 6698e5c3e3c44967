//! The column ctable: a row keyed by a single [`Key`], with values spread
//! across N named columns, each column its own [`ManagedDtable`].
//!
//! Column 0 (the first column passed to [`ColumnCTable::open`]) is the
//! driver: row iteration walks column 0's keys and probes the other
//! columns for each row, rather than merge-iterating all columns at once.
//! A row with nothing in column 0 is never visited, even if other columns
//! hold data for it — this is a deliberate tradeoff for cheap iteration,
//! not an oversight.

use crate::dtable::{DTable, DTableError, DTableIter, Entry};
use crate::key::{BlobComparator, Key, KeyType};
use crate::managed::{ManagedDtable, ManagedDtableConfig};

/// A single row's values, one per column that has anything stored for
/// that row (columns with a hole for this row key are omitted).
pub type Row = Vec<(String, Entry)>;

pub struct ColumnCTable {
    row_key_type: KeyType,
    names: Vec<String>,
    columns: Vec<ManagedDtable>,
}

impl ColumnCTable {
    /// Opens (or creates) one managed dtable per `(name, path)` pair,
    /// all sharing `row_key_type`. The first entry is the iteration
    /// driver column.
    pub fn open(
        row_key_type: KeyType,
        columns: impl IntoIterator<Item = (String, std::path::PathBuf)>,
        config: ManagedDtableConfig,
    ) -> Result<Self, DTableError> {
        let mut names = Vec::new();
        let mut tables = Vec::new();
        for (name, path) in columns {
            let table = ManagedDtable::open(&path, row_key_type, config.clone())?;
            names.push(name);
            tables.push(table);
        }
        if tables.is_empty() {
            return Err(DTableError::InvalidArgument("ctable requires at least one column".into()));
        }
        Ok(Self { row_key_type, names, columns: tables })
    }

    fn column_index(&self, name: &str) -> Result<usize, DTableError> {
        self.names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| DTableError::NotFound(format!("no column named {name:?}")))
    }

    fn check_row_key(&self, key: &Key) -> Result<(), DTableError> {
        if key.key_type() != self.row_key_type {
            return Err(DTableError::InvalidArgument(format!(
                "row key type mismatch: table expects {:?}, got {:?}",
                self.row_key_type,
                key.key_type()
            )));
        }
        Ok(())
    }

    /// Reads a single column's value for `row_key`.
    pub fn find(&self, row_key: &Key, column_name: &str) -> Result<Option<Entry>, DTableError> {
        self.check_row_key(row_key)?;
        let idx = self.column_index(column_name)?;
        self.columns[idx].lookup(row_key)
    }

    /// Reads every column's value for `row_key`, skipping columns with a
    /// hole at that key.
    pub fn find_row(&self, row_key: &Key) -> Result<Row, DTableError> {
        self.check_row_key(row_key)?;
        let mut row = Vec::new();
        for (name, column) in self.names.iter().zip(&self.columns) {
            if let Some(entry) = column.lookup(row_key)? {
                row.push((name.clone(), entry));
            }
        }
        Ok(row)
    }

    /// Writes `values` for `row_key`, one write per named column. A crash
    /// mid-fan-out can leave some columns written and others not — unlike
    /// [`Self::remove`], a partial insert is not staged behind a shared
    /// bracket, since a caller inserting a subset of columns on purpose
    /// (e.g. a sparse row) has no single "all or nothing" set to begin with.
    pub fn insert(&mut self, row_key: Key, values: Vec<(String, Vec<u8>)>) -> Result<(), DTableError> {
        self.check_row_key(&row_key)?;
        for (name, value) in values {
            let idx = self.column_index(&name)?;
            self.columns[idx].insert(row_key.clone(), value, false)?;
        }
        Ok(())
    }

    /// Removes `row_key` from every column that currently has it, as a
    /// single transactional bracket: every affected column's removal is
    /// staged into its own abortable [`crate::managed::Transaction`] first,
    /// and only once every stage succeeds are they committed, in one tight
    /// loop with no other work interleaved. A column that has nothing for
    /// `row_key` is left untouched, matching the pre-fan-out check.
    pub fn remove(&mut self, row_key: Key) -> Result<(), DTableError> {
        self.check_row_key(&row_key)?;

        let mut staged = Vec::new();
        for column in &self.columns {
            if column.present(&row_key)? {
                let mut tx = column.create_tx();
                tx.remove(row_key.clone());
                staged.push(tx);
            }
        }
        for tx in staged {
            tx.commit()?;
        }
        Ok(())
    }

    /// Runs maintenance on every column, stopping at (and returning) the
    /// first column that fails.
    pub fn maintain(&mut self) -> Result<(), DTableError> {
        for column in &mut self.columns {
            column.maintain()?;
        }
        Ok(())
    }

    /// Installs `cmp` as the blob comparator on every column, stopping at
    /// (and returning) the first column that rejects it.
    pub fn set_blob_cmp(&mut self, cmp: BlobComparator) -> Result<(), DTableError> {
        for column in &mut self.columns {
            column.set_blob_cmp(cmp.clone())?;
        }
        Ok(())
    }

    /// Row-major iteration driven by column 0: walks column 0's keys and
    /// probes every other column for each one.
    pub fn rows(&self) -> RowIter<'_> {
        RowIter { table: self, driver: self.columns[0].iter(), done: false }
    }
}

pub struct RowIter<'a> {
    table: &'a ColumnCTable,
    driver: Box<dyn crate::dtable::DTableIter + 'a>,
    done: bool,
}

impl<'a> Iterator for RowIter<'a> {
    type Item = Result<(Key, Row), DTableError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let advanced = if self.driver.valid() {
            self.driver.next()
        } else {
            self.driver.first()
        };
        match advanced {
            Ok(true) => {}
            Ok(false) => {
                self.done = true;
                return None;
            }
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        }
        let key = match self.driver.key() {
            Some(k) => k,
            None => {
                self.done = true;
                return None;
            }
        };
        match self.table.find_row(&key) {
            Ok(row) => Some(Ok((key, row))),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
