//! Relations - the tabular unit the merge engine reads and produces
//!
//! A relation is an ordered list of uniquely named columns and an ordered list
//! of rows. Once built it is never changed in place; joins always produce a new
//! relation.

use crate::error::{MergeError, Result};
use crate::value::Value;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Table identifier -> relation, supplied by the caller and only ever read
pub type TableSet = HashMap<String, Relation>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Relation {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Relation {
    /// Build a relation, checking column uniqueness and row width
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut seen = HashSet::new();
        for name in &columns {
            if !seen.insert(name.as_str()) {
                return Err(MergeError::InvalidRelation(format!(
                    "duplicate column name '{}'",
                    name
                )));
            }
        }

        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(MergeError::InvalidRelation(format!(
                "row {} has {} values, expected {}",
                idx,
                row.len(),
                columns.len()
            )));
        }

        Ok(Self { columns, rows })
    }

    /// Convenience constructor for literal tables
    pub fn from_rows<C, R, V>(columns: &[C], rows: R) -> Result<Self>
    where
        C: AsRef<str>,
        R: IntoIterator<Item = Vec<V>>,
        V: Into<Value>,
    {
        let columns = columns.iter().map(|c| c.as_ref().to_string()).collect();
        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(Into::into).collect())
            .collect();
        Self::new(columns, rows)
    }

    /// Rows are assembled by the join, which already guarantees the shape
    pub(crate) fn from_parts(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == columns.len()));
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All values of one column, in row order
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }
}
